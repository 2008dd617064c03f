/* 📖 # Why a dedicated HTTP module in the PAL?

The engine produces routes and handlers but never owns a socket. Requests and responses are
plain values defined here, so the same service runs behind tiny_http (RealPal) and in-memory
(MockPal::simulate_request) without change.
*/

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::error::{Diagnostic, ErrorKind, STATUS_HANDLER_ERROR};
use crate::{ExposerError, ExposerResult};

/// HTTP methods understood by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    /// Parse an HTTP method from a string (case insensitive).
    pub fn parse(method: &str) -> Option<Self> {
        match method.to_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP headers collection. Lookups ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders {
    inner: HashMap<String, String>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.inner.retain(|existing, _| !existing.eq_ignore_ascii_case(&key));
        self.inner.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.inner.get(key).or_else(|| {
            self.inner
                .iter()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(key))
                .map(|(_, value)| value)
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn all(&self) -> &HashMap<String, String> {
        &self.inner
    }
}

/* 📖 # Why support both bytes and streaming in HttpBody?
Stream-input APIs receive the request body as a byte stream and stream-output APIs hand back
a reader, while JSON APIs work on fixed-size buffers. Both shapes travel through the same
request/response types.
*/

/// HTTP message body.
pub enum HttpBody {
    /// Fixed-size body content
    Bytes(Vec<u8>),
    /// Streaming body content
    Stream(Box<dyn Read + Send>),
}

impl HttpBody {
    pub fn empty() -> Self {
        Self::Bytes(vec![])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self::Bytes(s.into().into_bytes())
    }

    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self::Stream(Box::new(reader))
    }

    /// Content as bytes (empty for streams).
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Bytes(bytes) => bytes,
            Self::Stream(_) => &[],
        }
    }

    /// Content as a string if valid UTF-8 (only works for Bytes variant).
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::Bytes(bytes) => String::from_utf8(bytes.clone()).ok(),
            Self::Stream(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::Stream(_) => false,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Read the whole body into memory, failing once more than `limit` bytes arrive.
    pub fn read_to_vec(self, limit: Option<usize>) -> ExposerResult<Vec<u8>> {
        let bytes = match self {
            Self::Bytes(bytes) => bytes,
            Self::Stream(reader) => {
                let mut buffer = Vec::new();
                let result = match limit {
                    // One byte past the limit is enough to detect the overflow
                    Some(limit) => reader.take(limit as u64 + 1).read_to_end(&mut buffer),
                    None => {
                        let mut reader = reader;
                        reader.read_to_end(&mut buffer)
                    }
                };
                result.map_err(body_read_error)?;
                buffer
            }
        };
        if let Some(limit) = limit {
            if bytes.len() > limit {
                return Err(Box::new(ExposerError::new(ErrorKind::PayloadTooLarge {
                    limit,
                })));
            }
        }
        Ok(bytes)
    }

    /// Convert into a reader suitable for tiny_http.
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        match self {
            Self::Bytes(bytes) => Box::new(std::io::Cursor::new(bytes)),
            Self::Stream(reader) => reader,
        }
    }
}

/// Map a body read failure, keeping a size violation raised by the reader itself.
fn body_read_error(error: std::io::Error) -> Box<ExposerError> {
    let limit = error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<ExposerError>())
        .and_then(|inner| match inner.kind() {
            ErrorKind::PayloadTooLarge { limit } => Some(*limit),
            _ => None,
        });
    match limit {
        Some(limit) => Box::new(ExposerError::new(ErrorKind::PayloadTooLarge { limit })),
        None => crate::err!("Failed to read request body: {}", error),
    }
}

impl Default for HttpBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for HttpBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

impl From<Vec<u8>> for HttpBody {
    fn from(v: Vec<u8>) -> Self {
        Self::from_bytes(v)
    }
}

impl From<String> for HttpBody {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl From<&str> for HttpBody {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

/// HTTP request structure.
#[derive(Debug)]
pub struct HttpRequest {
    method: HttpMethod,
    path: String,
    headers: HttpHeaders,
    body: HttpBody,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HttpHeaders::new(),
            body: HttpBody::empty(),
        }
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// The request target including any query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The request path without the query string.
    pub fn route_path(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HttpHeaders {
        &mut self.headers
    }

    pub fn body(&self) -> &HttpBody {
        &self.body
    }

    /// Take ownership of the body, leaving an empty one behind.
    pub fn take_body(&mut self) -> HttpBody {
        std::mem::take(&mut self.body)
    }

    pub fn with_body(mut self, body: impl Into<HttpBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }
}

/// HTTP status code.
///
/// A plain wrapper rather than an enum: annotated API errors choose arbitrary
/// statuses, and the protocol itself uses the non-standard 512 and 599.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HttpStatusCode(u16);

impl HttpStatusCode {
    pub const OK: Self = Self(200);
    pub const BAD_REQUEST: Self = Self(400);
    pub const FORBIDDEN: Self = Self(403);
    pub const NOT_FOUND: Self = Self(404);
    pub const METHOD_NOT_ALLOWED: Self = Self(405);
    pub const PAYLOAD_TOO_LARGE: Self = Self(413);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    /// The API returned a value violating its own response schema.
    pub const BAD_RESPONSE: Self = Self(512);
    /// The API function failed.
    pub const HANDLER_ERROR: Self = Self(599);

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            200 => "OK",
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            413 => "Payload Too Large",
            500 => "Internal Server Error",
            512 => "Bad Response",
            599 => "Handler Error",
            _ => "Unknown",
        }
    }
}

impl From<u16> for HttpStatusCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl std::fmt::Display for HttpStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

/// Wire body of every error response.
#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    api: Option<&'a str>,
    #[serde(skip_serializing_if = "no_details")]
    details: &'a [Diagnostic],
}

fn no_details(details: &&[Diagnostic]) -> bool {
    details.is_empty()
}

/// HTTP response structure.
#[derive(Debug)]
pub struct HttpResponse {
    status: HttpStatusCode,
    headers: HttpHeaders,
    body: HttpBody,
}

impl HttpResponse {
    pub fn new(status: HttpStatusCode) -> Self {
        Self {
            status,
            headers: HttpHeaders::new(),
            body: HttpBody::empty(),
        }
    }

    pub fn ok() -> Self {
        Self::new(HttpStatusCode::OK)
    }

    pub fn status(&self) -> HttpStatusCode {
        self.status
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn body(&self) -> &HttpBody {
        &self.body
    }

    pub fn into_body(self) -> HttpBody {
        self.body
    }

    pub fn with_body(mut self, body: impl Into<HttpBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_content_type(self, content_type: impl Into<String>) -> Self {
        self.with_header("Content-Type", content_type)
    }

    pub fn with_status(mut self, status: HttpStatusCode) -> Self {
        self.status = status;
        self
    }

    /// Create a 200 JSON response from an already encoded body.
    pub fn json(body: impl Into<String>) -> Self {
        Self::ok()
            .with_content_type("application/json")
            .with_body(body.into())
    }

    /// Serialize `data` into a 200 JSON response.
    pub fn json_value<T: Serialize>(data: &T) -> ExposerResult<Self> {
        let body = serde_json::to_vec(data)?;
        Ok(Self::ok()
            .with_content_type("application/json")
            .with_body(body))
    }

    /// Render an error as a JSON error response.
    ///
    /// The status comes from the error kind; kinds without one are reported
    /// with the handler error status.
    pub fn from_error(error: &ExposerError) -> Self {
        let status = error.status().unwrap_or(STATUS_HANDLER_ERROR);
        let kind = error.kind();
        let body = ErrorBody {
            error: kind.name(),
            message: error.to_string(),
            api: kind.api_id(),
            details: kind.diagnostics(),
        };
        // ErrorBody only holds strings, encoding cannot fail
        let encoded = serde_json::to_vec(&body).unwrap_or_default();
        Self::new(HttpStatusCode::from(status))
            .with_content_type("application/json")
            .with_body(encoded)
    }
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on. If None, the OS will assign an available port.
    pub port: Option<u16>,
    /// Server name used for thread names and logs.
    pub server_name: String,
    /// Largest request body the server reads. Larger bodies get 413.
    pub max_body_bytes: Option<usize>,
}

impl HttpServerConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            server_name: "exposer".to_string(),
            max_body_bytes: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = Some(limit);
        self
    }

    /// Get the address string (host:port, port 0 for OS-assigned).
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(0))
    }
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1")
    }
}

/* 📖 # Why a single HttpService trait?

The service receives raw HttpRequest objects and returns HttpResponse objects; routing is
the service's own business (the engine's RouteTable). Errors returned from the service are
turned into error responses by the PAL implementation, using the error's wire status or 599
when it has none.
*/

/// Trait for handling HTTP requests.
pub trait HttpService: std::fmt::Debug + Send + Sync + 'static {
    /// Handle an HTTP request and return a response.
    ///
    /// Called concurrently from several threads by RealPal.
    fn handle_request(&self, request: HttpRequest) -> ExposerResult<HttpResponse>;
}

impl<S: HttpService + ?Sized> HttpService for Arc<S> {
    fn handle_request(&self, request: HttpRequest) -> ExposerResult<HttpResponse> {
        (**self).handle_request(request)
    }
}

/// Dispatch a request to a service, rendering service errors as responses.
pub fn respond(service: &dyn HttpService, request: HttpRequest) -> HttpResponse {
    match service.handle_request(request) {
        Ok(response) => response,
        Err(error) => HttpResponse::from_error(&error),
    }
}

/// Handle to a running HTTP server.
///
/// Dropping the handle stops the server from accepting new connections;
/// requests already being handled run to completion.
#[derive(Debug)]
pub struct HttpServerHandle {
    port: u16,
    shutdown: Arc<AtomicBool>,
}

impl HttpServerHandle {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn address(&self, host: &str) -> String {
        format!("{}:{}", host, self.port)
    }

    /// Signal the server to shut down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Access the shutdown flag (for internal use by implementations).
    pub fn shutdown_flag(&self) -> &Arc<AtomicBool> {
        &self.shutdown
    }
}

impl Drop for HttpServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
