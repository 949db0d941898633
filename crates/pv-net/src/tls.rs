//! TLS upgrade for the default transport (rustls behind a feature).

use crate::http::BoxedIoStream;
use pv_core::ViewerError;
use pv_core::ViewerResult;
use std::net::TcpStream;

#[cfg(feature = "tls-rustls")]
use rustls::RootCertStore;
#[cfg(feature = "tls-rustls")]
use rustls::pki_types::ServerName;
#[cfg(feature = "tls-rustls")]
use std::sync::Arc;

/// Which trust anchors back certificate verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustStoreMode {
    #[default]
    WebPkiOnly,
    WebPkiAndOs,
}

#[cfg(feature = "tls-rustls")]
pub fn wrap_stream(
    host: &str,
    mut stream: TcpStream,
    trust_store: TrustStoreMode,
) -> ViewerResult<BoxedIoStream> {
    use rustls::ClientConfig;
    use rustls::ClientConnection;
    use rustls::StreamOwned;

    let roots = root_store(trust_store)?;
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let server_name = ServerName::try_from(host.to_owned()).map_err(|error| {
        ViewerError::new(
            "net.tls.server_name_invalid",
            format!("invalid TLS server name `{host}`: {error}"),
        )
    })?;

    let mut connection =
        ClientConnection::new(Arc::new(config), server_name).map_err(|error| {
            ViewerError::new(
                "net.tls.connection_init_failed",
                format!("failed to initialize TLS connection for `{host}`: {error}"),
            )
        })?;

    connection.complete_io(&mut stream).map_err(|error| {
        ViewerError::new(
            "net.tls.handshake_failed",
            format!("TLS handshake failed for `{host}`: {error}"),
        )
    })?;

    Ok(Box::new(StreamOwned::new(connection, stream)))
}

#[cfg(feature = "tls-rustls")]
fn root_store(trust_store: TrustStoreMode) -> ViewerResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if matches!(trust_store, TrustStoreMode::WebPkiAndOs) {
        let native = rustls_native_certs::load_native_certs();
        if native.certs.is_empty() && !native.errors.is_empty() {
            let details = native
                .errors
                .iter()
                .map(std::string::ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ViewerError::new(
                "net.tls.os_roots_load_failed",
                format!("failed to load operating-system roots: {details}"),
            ));
        }

        for cert in native.certs {
            roots.add(cert).map_err(|error| {
                ViewerError::new(
                    "net.tls.os_root_add_failed",
                    format!("failed to add operating-system root: {error}"),
                )
            })?;
        }
    }

    if roots.is_empty() {
        return Err(ViewerError::new(
            "net.tls.root_store_empty",
            "no trust anchors available for TLS verification",
        ));
    }

    Ok(roots)
}

#[cfg(not(feature = "tls-rustls"))]
pub fn wrap_stream(
    _host: &str,
    _stream: TcpStream,
    _trust_store: TrustStoreMode,
) -> ViewerResult<BoxedIoStream> {
    Err(ViewerError::new(
        "net.tls.backend_unavailable",
        "rustls backend is disabled for this build; enable `pv-net/tls-rustls`",
    ))
}
