//! Proxy routing: resolving resource references and wrapping them in
//! the configured proxy endpoint.

use crate::has_explicit_scheme;
use percent_encoding::AsciiSet;
use percent_encoding::NON_ALPHANUMERIC;
use percent_encoding::utf8_percent_encode;
use url::Url;

/// Sentinel returned for references that cannot be resolved; a no-op
/// link the rendering surface can follow safely.
pub const NO_OP_REFERENCE: &str = "#";

/// Characters left unescaped by `encodeURIComponent` (unreserved per
/// RFC 3986 plus `!`, `'`, `(`, `)`, `*`).
const URI_COMPONENT_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Builds proxied URLs for both relative and absolute references.
#[derive(Debug, Clone)]
pub struct ProxyUrlBuilder {
    endpoint: String,
}

impl ProxyUrlBuilder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Resolves `reference` against `base_url` and wraps the result in
    /// the proxy endpoint. Never fails: irrecoverable input yields the
    /// `#` no-op sentinel.
    pub fn resolve(&self, reference: &str, base_url: &str) -> String {
        let absolute = if has_explicit_scheme(reference) {
            reference.to_owned()
        } else {
            let Ok(base) = Url::parse(base_url) else {
                return NO_OP_REFERENCE.to_owned();
            };

            if let Some(rest) = reference.strip_prefix("//") {
                format!("{}://{}", base.scheme(), rest)
            } else if reference.starts_with('/') {
                format!("{}{}", base.origin().ascii_serialization(), reference)
            } else {
                format!("{}{}", directory_of(&base), reference)
            }
        };

        // The WHATWG parser would silently repair whitespace; treat such
        // references as unresolvable instead.
        if absolute.chars().any(char::is_whitespace) {
            return NO_OP_REFERENCE.to_owned();
        }

        let Ok(resolved) = Url::parse(&absolute) else {
            return NO_OP_REFERENCE.to_owned();
        };

        format!(
            "{}{}",
            self.endpoint,
            utf8_percent_encode(resolved.as_str(), URI_COMPONENT_SET)
        )
    }
}

/// Serialization of `base` truncated to the last `/` before any query
/// or fragment.
fn directory_of(base: &Url) -> String {
    let mut trimmed = base.clone();
    trimmed.set_query(None);
    trimmed.set_fragment(None);

    let serialized: String = trimmed.into();
    match serialized.rfind('/') {
        Some(index) => serialized[..=index].to_owned(),
        None => serialized,
    }
}
