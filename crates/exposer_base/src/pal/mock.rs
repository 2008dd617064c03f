use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use parking_lot::Mutex;

use crate::ExposerError;
use crate::ExposerResult;
use crate::error::ErrorKind;

use super::FilePath;
use super::http::{HttpRequest, HttpResponse, HttpServerConfig, HttpServerHandle, HttpService};
use super::traits::Pal;

/* 📖 # Why does MockPal keep servers in a map keyed by port?

Starting a server on MockPal only records the service. `simulate_request` then plays the
part of the network: it looks up the service for the port and renders service errors the same
way RealPal does, so tests observe exactly the status codes and bodies a real client would.
*/

/// In-memory PAL implementation for testing.
///
/// ```
/// use exposer_base::{FilePath, MockPal, Pal};
///
/// let mock = MockPal::new();
/// mock.add_file(FilePath::from("exposer.toml"), b"name = \"calc\"".to_vec());
/// let content = mock.read_file_to_string(&FilePath::from("exposer.toml")).unwrap();
/// assert_eq!(content, "name = \"calc\"");
/// ```
#[derive(Debug, Clone)]
pub struct MockPal {
    files: Arc<Mutex<HashMap<FilePath, Vec<u8>>>>,
    http_servers: Arc<Mutex<HashMap<u16, MockServer>>>,
    next_port: Arc<AtomicU16>,
}

#[derive(Debug, Clone)]
struct MockServer {
    service: Arc<dyn HttpService>,
    max_body_bytes: Option<usize>,
}

impl MockPal {
    pub fn new() -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            http_servers: Arc::new(Mutex::new(HashMap::new())),
            next_port: Arc::new(AtomicU16::new(10000)),
        }
    }

    /// Add a file to the mock storage.
    pub fn add_file(&self, path: FilePath, content: Vec<u8>) {
        self.files.lock().insert(path, content);
    }

    /// Simulate an HTTP request to a running server.
    ///
    /// Service errors are rendered into error responses; only a missing server
    /// is reported as `Err`.
    pub fn simulate_request(&self, port: u16, request: HttpRequest) -> ExposerResult<HttpResponse> {
        // Release the lock before dispatching, services may be slow or reentrant
        let server = self.http_servers.lock().get(&port).cloned().ok_or_else(|| {
            Box::new(ExposerError::message(format!(
                "No HTTP server registered on port {}",
                port
            )))
        })?;
        if let Some(limit) = server.max_body_bytes {
            if request.body().as_bytes().len() > limit {
                let error = ExposerError::new(ErrorKind::PayloadTooLarge { limit });
                return Ok(HttpResponse::from_error(&error));
            }
        }
        Ok(super::http::respond(server.service.as_ref(), request))
    }

    /// Get the number of registered HTTP servers.
    pub fn http_server_count(&self) -> usize {
        self.http_servers.lock().len()
    }
}

impl Default for MockPal {
    fn default() -> Self {
        Self::new()
    }
}

impl Pal for MockPal {
    fn read_file(&self, path: &FilePath) -> ExposerResult<Box<dyn Read + Send + 'static>> {
        let files = self.files.lock();
        let content = files.get(path).cloned().ok_or_else(|| {
            Box::new(ExposerError::new(ErrorKind::FileError {
                path: path.as_path().to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            }))
        })?;
        Ok(Box::new(Cursor::new(content)))
    }

    fn start_http_server(
        &self,
        service: Box<dyn HttpService>,
        config: HttpServerConfig,
    ) -> ExposerResult<HttpServerHandle> {
        let port = match config.port {
            Some(p) => p,
            None => self.next_port.fetch_add(1, Ordering::SeqCst),
        };
        self.http_servers.lock().insert(
            port,
            MockServer {
                service: Arc::from(service),
                max_body_bytes: config.max_body_bytes,
            },
        );
        Ok(HttpServerHandle::new(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pal::http::{HttpMethod, HttpStatusCode};

    #[derive(Debug)]
    struct TestHttpService;

    impl HttpService for TestHttpService {
        fn handle_request(&self, request: HttpRequest) -> ExposerResult<HttpResponse> {
            match request.route_path() {
                "/api/test" => Ok(HttpResponse::json(r#"{"status": "ok"}"#)),
                "/api/echo" => {
                    let body = request.body().as_string().unwrap_or_default();
                    Ok(HttpResponse::json(format!("{{\"echo\": \"{}\"}}", body)))
                }
                "/api/broken" => Err(crate::err!("exploded")),
                _ => Ok(HttpResponse::new(HttpStatusCode::NOT_FOUND)),
            }
        }
    }

    #[test]
    fn test_read_file_not_found() {
        let pal = MockPal::new();
        let error = pal.read_file(&FilePath::from("missing.toml")).err().unwrap();
        assert_eq!(
            error.to_string(),
            "File error at missing.toml: file not found"
        );
    }

    #[test]
    fn test_start_http_server_assigns_ports() {
        let pal = MockPal::new();
        let first = pal
            .start_http_server(Box::new(TestHttpService), HttpServerConfig::new("127.0.0.1"))
            .unwrap();
        let second = pal
            .start_http_server(
                Box::new(TestHttpService),
                HttpServerConfig::new("127.0.0.1").with_port(8080),
            )
            .unwrap();
        assert!(first.port() >= 10000);
        assert_eq!(second.port(), 8080);
        assert_eq!(pal.http_server_count(), 2);
    }

    #[test]
    fn test_simulate_request_success() {
        let pal = MockPal::new();
        let config = HttpServerConfig::new("127.0.0.1").with_port(8080);
        pal.start_http_server(Box::new(TestHttpService), config)
            .unwrap();

        let request = HttpRequest::new(HttpMethod::Get, "/api/test?verbose=1");
        let response = pal.simulate_request(8080, request).unwrap();

        assert_eq!(response.status(), HttpStatusCode::OK);
        assert!(response.body().as_string().unwrap().contains("ok"));
    }

    #[test]
    fn test_simulate_request_with_body() {
        let pal = MockPal::new();
        let config = HttpServerConfig::new("127.0.0.1").with_port(8080);
        pal.start_http_server(Box::new(TestHttpService), config)
            .unwrap();

        let request = HttpRequest::new(HttpMethod::Post, "/api/echo").with_body("hello");
        let response = pal.simulate_request(8080, request).unwrap();

        assert_eq!(
            response.body().as_string().unwrap(),
            r#"{"echo": "hello"}"#
        );
    }

    #[test]
    fn test_simulate_request_applies_server_body_limit() {
        let pal = MockPal::new();
        let config = HttpServerConfig::new("127.0.0.1")
            .with_port(8080)
            .with_max_body_bytes(4);
        pal.start_http_server(Box::new(TestHttpService), config)
            .unwrap();

        let request = HttpRequest::new(HttpMethod::Post, "/api/echo").with_body("hello");
        let response = pal.simulate_request(8080, request).unwrap();
        assert_eq!(response.status(), HttpStatusCode::PAYLOAD_TOO_LARGE);

        let request = HttpRequest::new(HttpMethod::Post, "/api/echo").with_body("hey");
        let response = pal.simulate_request(8080, request).unwrap();
        assert_eq!(response.status(), HttpStatusCode::OK);
    }

    #[test]
    fn test_simulate_request_renders_service_error() {
        let pal = MockPal::new();
        let config = HttpServerConfig::new("127.0.0.1").with_port(8080);
        pal.start_http_server(Box::new(TestHttpService), config)
            .unwrap();

        let request = HttpRequest::new(HttpMethod::Get, "/api/broken");
        let response = pal.simulate_request(8080, request).unwrap();
        assert_eq!(response.status(), HttpStatusCode::HANDLER_ERROR);
    }

    #[test]
    fn test_simulate_request_invalid_port() {
        let pal = MockPal::new();
        let request = HttpRequest::new(HttpMethod::Get, "/api/test");
        assert!(pal.simulate_request(9999, request).is_err());
    }
}
