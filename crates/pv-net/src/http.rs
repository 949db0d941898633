//! Fetch transport contracts and the default HTTP/1.1 implementation.

use crate::classify::FetchMode;
use crate::tls;
use pv_core::ViewerError;
use pv_core::ViewerResult;
use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;
const MAX_RESPONSE_HEAD_BYTES: usize = 128 * 1024;

const DEFAULT_ACCEPT_HEADER: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Trait-object-safe stream shared by the plain and TLS paths.
pub trait IoStream: Read + Write {}
impl<T> IoStream for T where T: Read + Write {}

pub type BoxedIoStream = Box<dyn IoStream>;

/// Clonable cancellation signal for an in-flight fetch.
///
/// The orchestrator trips the flag when a navigation supersedes the
/// fetch; transports check it between phases and abort early.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One fetch attempt handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub mode: FetchMode,
}

/// Transport-level response: status line, declared type, raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub reason: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_ok_status(&self) -> bool {
        self.status == 200
    }
}

/// Seam over the network. The default implementation speaks HTTP/1.1;
/// hosts may substitute their own stack.
pub trait ResourceTransport: Send + Sync {
    fn fetch(&self, request: &FetchRequest, cancel: &CancelFlag) -> ViewerResult<FetchResponse>;
}

/// Blocking one-shot HTTP/1.1 GET transport (`Connection: close`).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    connect_timeout: Duration,
    io_timeout: Duration,
    max_body_bytes: usize,
    trust_store: tls::TrustStoreMode,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            trust_store: tls::TrustStoreMode::default(),
        }
    }
}

impl HttpTransport {
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    pub fn set_io_timeout(&mut self, timeout: Duration) {
        self.io_timeout = timeout;
    }

    pub fn set_max_body_bytes(&mut self, limit: usize) {
        self.max_body_bytes = limit;
    }

    pub fn set_trust_store(&mut self, trust_store: tls::TrustStoreMode) {
        self.trust_store = trust_store;
    }

    fn open_stream(&self, target: &RequestTarget) -> ViewerResult<BoxedIoStream> {
        let stream = connect_first(&target.host, target.port, self.connect_timeout)?;

        stream.set_nodelay(true).map_err(|error| {
            ViewerError::new(
                "net.http.nodelay_failed",
                format!("failed to enable TCP_NODELAY for `{}`: {error}", target.host),
            )
        })?;
        stream
            .set_read_timeout(Some(self.io_timeout))
            .map_err(|error| {
                ViewerError::new(
                    "net.http.read_timeout_failed",
                    format!("failed to set read timeout for `{}`: {error}", target.host),
                )
            })?;
        stream
            .set_write_timeout(Some(self.io_timeout))
            .map_err(|error| {
                ViewerError::new(
                    "net.http.write_timeout_failed",
                    format!("failed to set write timeout for `{}`: {error}", target.host),
                )
            })?;

        if target.secure {
            tls::wrap_stream(&target.host, stream, self.trust_store)
        } else {
            Ok(Box::new(stream))
        }
    }
}

impl ResourceTransport for HttpTransport {
    fn fetch(&self, request: &FetchRequest, cancel: &CancelFlag) -> ViewerResult<FetchResponse> {
        let target = RequestTarget::from_url(&request.url)?;

        ensure_not_cancelled(cancel)?;
        let mut stream = self.open_stream(&target)?;

        ensure_not_cancelled(cancel)?;
        write_get_request(&mut *stream, &target)?;

        ensure_not_cancelled(cancel)?;
        read_response(&mut *stream, cancel, self.max_body_bytes)
    }
}

struct RequestTarget {
    host: String,
    port: u16,
    secure: bool,
    path_and_query: String,
}

impl RequestTarget {
    fn from_url(raw_url: &str) -> ViewerResult<Self> {
        let parsed = url::Url::parse(raw_url).map_err(|error| {
            ViewerError::new(
                "net.http.url_invalid",
                format!("failed to parse request URL `{raw_url}`: {error}"),
            )
        })?;

        let secure = match parsed.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(ViewerError::new(
                    "net.http.scheme_unsupported",
                    format!("unsupported request scheme `{other}`"),
                ));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| {
                ViewerError::new("net.http.host_missing", "request URL must include a host")
            })?
            .to_ascii_lowercase();

        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| {
                ViewerError::new(
                    "net.http.port_missing",
                    "unable to determine effective port for request URL",
                )
            })?;

        let path = if parsed.path().is_empty() {
            "/"
        } else {
            parsed.path()
        };
        let path_and_query = match parsed.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_owned(),
        };

        Ok(Self {
            host,
            port,
            secure,
            path_and_query,
        })
    }

    fn host_header(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn ensure_not_cancelled(cancel: &CancelFlag) -> ViewerResult<()> {
    if cancel.is_cancelled() {
        return Err(ViewerError::new(
            "net.http.cancelled",
            "fetch cancelled by a superseding navigation",
        ));
    }

    Ok(())
}

fn connect_first(host: &str, port: u16, timeout: Duration) -> ViewerResult<TcpStream> {
    let addresses = (host, port).to_socket_addrs().map_err(|error| {
        ViewerError::new(
            "net.http.resolve_failed",
            format!("failed to resolve `{host}:{port}`: {error}"),
        )
    })?;

    let mut last_error: Option<ViewerError> = None;
    for address in addresses {
        match TcpStream::connect_timeout(&address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                last_error = Some(ViewerError::new(
                    "net.http.connect_failed",
                    format!("failed to connect to `{address}`: {error}"),
                ));
            }
        }
    }

    match last_error {
        Some(error) => Err(error),
        None => Err(ViewerError::new(
            "net.http.no_addresses",
            format!("no addresses available for `{host}:{port}`"),
        )),
    }
}

fn write_get_request<S: Write + ?Sized>(stream: &mut S, target: &RequestTarget) -> ViewerResult<()> {
    let mut encoded = Vec::new();
    encoded.extend_from_slice(b"GET ");
    encoded.extend_from_slice(target.path_and_query.as_bytes());
    encoded.extend_from_slice(b" HTTP/1.1\r\n");
    encoded.extend_from_slice(b"Host: ");
    encoded.extend_from_slice(target.host_header().as_bytes());
    encoded.extend_from_slice(b"\r\n");
    encoded.extend_from_slice(b"Accept: ");
    encoded.extend_from_slice(DEFAULT_ACCEPT_HEADER.as_bytes());
    encoded.extend_from_slice(b"\r\n");
    encoded.extend_from_slice(b"Connection: close\r\n");
    encoded.extend_from_slice(b"\r\n");

    stream.write_all(&encoded).map_err(|error| {
        ViewerError::new(
            "net.http.write_failed",
            format!("failed to write HTTP request bytes: {error}"),
        )
    })?;
    stream.flush().map_err(|error| {
        ViewerError::new(
            "net.http.flush_failed",
            format!("failed to flush HTTP request bytes: {error}"),
        )
    })
}

fn read_response<S: Read + ?Sized>(
    stream: &mut S,
    cancel: &CancelFlag,
    max_body_bytes: usize,
) -> ViewerResult<FetchResponse> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    let mut header_end: Option<usize> = None;

    while header_end.is_none() {
        ensure_not_cancelled(cancel)?;

        let read = stream.read(&mut chunk).map_err(|error| {
            ViewerError::new(
                "net.http.read_head_failed",
                format!("failed while reading HTTP response head: {error}"),
            )
        })?;

        if read == 0 {
            return Err(ViewerError::new(
                "net.http.unexpected_eof",
                "unexpected EOF before response head completed",
            ));
        }

        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_RESPONSE_HEAD_BYTES {
            return Err(ViewerError::new(
                "net.http.head_too_large",
                format!("HTTP response head exceeds {MAX_RESPONSE_HEAD_BYTES} bytes"),
            ));
        }

        header_end = find_header_end(&buffer);
    }

    let header_end = match header_end {
        Some(value) => value,
        None => {
            return Err(ViewerError::new(
                "net.http.header_terminator_missing",
                "response head terminator not found",
            ));
        }
    };

    let head_bytes = &buffer[..header_end];
    let mut body = buffer[header_end..].to_vec();
    let head_text = std::str::from_utf8(head_bytes).map_err(|error| {
        ViewerError::new(
            "net.http.head_invalid_utf8",
            format!("HTTP response head is not valid UTF-8 text: {error}"),
        )
    })?;

    let mut lines = head_text.split("\r\n");
    let status_line = lines.next().ok_or_else(|| {
        ViewerError::new("net.http.status_line_missing", "missing HTTP status line")
    })?;
    let (status, reason) = parse_status_line(status_line)?;

    let mut content_type = None;
    let mut content_length: Option<usize> = None;
    for line in lines {
        if line.is_empty() {
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_owned());
        } else if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().ok();
        }
    }

    if let Some(length) = content_length {
        if length > max_body_bytes {
            return Err(ViewerError::new(
                "net.http.body_too_large",
                format!("declared body length {length} exceeds the {max_body_bytes}-byte cap"),
            ));
        }

        while body.len() < length {
            ensure_not_cancelled(cancel)?;

            let read = stream.read(&mut chunk).map_err(|error| {
                ViewerError::new(
                    "net.http.read_body_failed",
                    format!("failed to read HTTP body bytes: {error}"),
                )
            })?;
            if read == 0 {
                return Err(ViewerError::new(
                    "net.http.unexpected_eof",
                    "unexpected EOF before declared body length completed",
                ));
            }
            body.extend_from_slice(&chunk[..read]);
        }
        body.truncate(length);
    } else {
        // Connection: close — the body runs to EOF.
        loop {
            ensure_not_cancelled(cancel)?;

            let read = stream.read(&mut chunk).map_err(|error| {
                ViewerError::new(
                    "net.http.read_body_failed",
                    format!("failed to read HTTP body bytes: {error}"),
                )
            })?;
            if read == 0 {
                break;
            }

            body.extend_from_slice(&chunk[..read]);
            if body.len() > max_body_bytes {
                return Err(ViewerError::new(
                    "net.http.body_too_large",
                    format!("response body exceeds the {max_body_bytes}-byte cap"),
                ));
            }
        }
    }

    Ok(FetchResponse {
        status,
        reason,
        content_type,
        body,
    })
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|index| index + 4)
}

fn parse_status_line(line: &str) -> ViewerResult<(u16, String)> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(ViewerError::new(
            "net.http.status_line_invalid",
            format!("malformed HTTP status line `{line}`"),
        ));
    }

    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..=599).contains(code))
        .ok_or_else(|| {
            ViewerError::new(
                "net.http.status_invalid",
                format!("invalid status code in line `{line}`"),
            )
        })?;

    let reason = parts.next().unwrap_or_default().trim().to_owned();
    Ok((status, reason))
}
