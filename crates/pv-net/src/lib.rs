//! Networking contracts: address normalization, proxy routing, content
//! classification, and the fetch transport seam.

pub mod classify;
pub mod http;
pub mod proxy;
pub mod tls;
pub mod url;

pub use classify::ContentClassifier;
pub use classify::DeclaredCategory;
pub use classify::DirectKind;
pub use classify::FetchMode;
pub use classify::Reconciliation;
pub use classify::ResourcePlan;
pub use http::CancelFlag;
pub use http::FetchRequest;
pub use http::FetchResponse;
pub use http::HttpTransport;
pub use http::ResourceTransport;
pub use proxy::NO_OP_REFERENCE;
pub use proxy::ProxyUrlBuilder;
pub use tls::TrustStoreMode;
pub use url::DomainPattern;
pub use url::UrlNormalizer;

/// True when the input carries an explicit `scheme://` prefix.
///
/// Matches the address-bar convention: a run of word characters followed
/// by `://`.
pub(crate) fn has_explicit_scheme(input: &str) -> bool {
    let Some((scheme, _)) = input.split_once("://") else {
        return false;
    };

    !scheme.is_empty()
        && scheme
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
