use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::{ExposerError, ExposerResult, error::ErrorKind};

use super::FilePath;
use super::http::{
    HttpBody, HttpMethod, HttpRequest, HttpResponse, HttpServerConfig, HttpServerHandle,
    HttpService, HttpStatusCode, respond,
};
use super::traits::Pal;

/* 📖 # Why tiny_http with a thread per request?

API functions are plain closures that may block (or drive a future to completion on the
calling thread). tiny_http hands out requests synchronously, so every accepted request gets its
own thread and a slow API never holds up the accept loop. The accept loop polls with a short
timeout so that dropping the server handle stops it promptly.
*/

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Concrete PAL implementation using the real filesystem and tiny_http.
///
/// All file paths are resolved relative to a configured base directory.
#[derive(Debug)]
pub struct RealPal {
    base_dir: PathBuf,
}

impl RealPal {
    /// Create a new RealPal resolving paths under `base_dir`.
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn resolve_path(&self, path: &FilePath) -> PathBuf {
        self.base_dir.join(path.as_path())
    }
}

impl Pal for RealPal {
    #[instrument(skip(self), fields(path = %path))]
    fn read_file(&self, path: &FilePath) -> ExposerResult<Box<dyn Read + Send + 'static>> {
        let resolved = self.resolve_path(path);
        debug!(resolved = %resolved.display(), "opening file for reading");
        let file = fs::File::open(&resolved).map_err(|e| {
            debug!(error = %e, "failed to open file");
            Box::new(ExposerError::new(ErrorKind::FileError {
                path: resolved,
                source: e,
            }))
        })?;
        Ok(Box::new(file))
    }

    #[instrument(skip(self, service), fields(address = %config.address()))]
    fn start_http_server(
        &self,
        service: Box<dyn HttpService>,
        config: HttpServerConfig,
    ) -> ExposerResult<HttpServerHandle> {
        let server = tiny_http::Server::http(config.address()).map_err(|e| {
            Box::new(ExposerError::message(format!(
                "Failed to bind HTTP server on {}: {}",
                config.address(),
                e
            )))
        })?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .ok_or_else(|| crate::err!("HTTP server is not listening on an IP address"))?;

        let handle = HttpServerHandle::new(port);
        let shutdown = Arc::clone(handle.shutdown_flag());
        let service: Arc<dyn HttpService> = Arc::from(service);
        let server_name = config.server_name.clone();
        let max_body_bytes = config.max_body_bytes;

        std::thread::Builder::new()
            .name(format!("{}-accept", server_name))
            .spawn(move || accept_loop(server, service, shutdown, max_body_bytes))
            .map_err(|e| crate::err!("Failed to spawn HTTP accept thread: {}", e))?;

        info!(server = %server_name, host = %config.host, port, "HTTP server listening");
        Ok(handle)
    }
}

fn accept_loop(
    server: tiny_http::Server,
    service: Arc<dyn HttpService>,
    shutdown: Arc<AtomicBool>,
    max_body_bytes: Option<usize>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let request = match server.recv_timeout(ACCEPT_POLL_INTERVAL) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "failed to receive HTTP request");
                continue;
            }
        };
        let service = Arc::clone(&service);
        let spawned = std::thread::Builder::new()
            .name("exposer-request".to_string())
            .spawn(move || handle_connection(service.as_ref(), request, max_body_bytes));
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn request thread");
        }
    }
    debug!("HTTP server shut down");
}

fn handle_connection(
    service: &dyn HttpService,
    mut raw: tiny_http::Request,
    max_body_bytes: Option<usize>,
) {
    let response = match convert_request(&raw, max_body_bytes) {
        Ok(request) => {
            debug!(method = %request.method(), path = %request.path(), "handling request");
            serve_streaming(service, request, raw.as_reader(), max_body_bytes)
        }
        Err(error) => HttpResponse::from_error(&error),
    };
    if let Err(e) = raw.respond(convert_response(response)) {
        warn!(error = %e, "failed to send HTTP response");
    }
}

/// Build the request head. A declared body larger than the server limit is
/// refused here, before any of it is read.
fn convert_request(
    raw: &tiny_http::Request,
    max_body_bytes: Option<usize>,
) -> ExposerResult<HttpRequest> {
    let method = HttpMethod::parse(raw.method().as_str()).ok_or_else(|| {
        Box::new(ExposerError::with_status(
            HttpStatusCode::METHOD_NOT_ALLOWED.as_u16(),
            format!("Unsupported HTTP method {}", raw.method()),
        ))
    })?;
    if let (Some(limit), Some(length)) = (max_body_bytes, raw.body_length()) {
        if length > limit {
            debug!(length, limit, "refusing oversized request body");
            return Err(Box::new(ExposerError::new(ErrorKind::PayloadTooLarge {
                limit,
            })));
        }
    }
    let mut request = HttpRequest::new(method, raw.url());
    for header in raw.headers() {
        request
            .headers_mut()
            .insert(header.field.to_string(), header.value.to_string());
    }
    Ok(request)
}

/* 📖 # How does the request body reach the service without being buffered first?

tiny_http lends the body reader to the request's own thread only, and the reader is not Send.
So the service runs on a scoped worker thread and sees the body as a `BodyReader`, while the
connection thread stays behind and pumps: every time the worker's reader runs dry it asks for
one more chunk, and the connection thread reads exactly that chunk from the socket. A stream
API therefore starts working on the first bytes, and a handler that never touches the body
never causes it to be read.

Once the service has answered, the rest of the body is forwarded into the channel if the
reader is still alive (a response streaming the request back). tiny_http cannot write the
response while the request is still being read, so that remainder is buffered, bounded by the
server limit.
*/

const BODY_CHUNK_SIZE: usize = 8 * 1024;

type Chunk = io::Result<Vec<u8>>;

/// What the worker side of the body bridge asks the connection thread for.
#[derive(Debug)]
enum Demand {
    /// The reader is empty and wants the next chunk
    Chunk,
    /// The service answered, forward whatever is left
    Drain,
    /// The reader was dropped
    Closed,
}

fn serve_streaming(
    service: &dyn HttpService,
    request: HttpRequest,
    body: &mut dyn Read,
    max_body_bytes: Option<usize>,
) -> HttpResponse {
    let (demand_tx, demand_rx) = mpsc::channel();
    let (chunk_tx, chunk_rx) = mpsc::channel();
    let reader = BodyReader::new(demand_tx.clone(), chunk_rx);

    let mut limited;
    let body: &mut dyn Read = match max_body_bytes {
        // One byte past the limit is enough to detect the overflow
        Some(limit) => {
            limited = Read::take(body, limit as u64 + 1);
            &mut limited
        }
        None => body,
    };
    let pump = BodyPump {
        body,
        limit: max_body_bytes,
        received: 0,
        finished: false,
    };

    std::thread::scope(|scope| {
        let worker = std::thread::Builder::new()
            .name("exposer-service".to_string())
            .spawn_scoped(scope, move || {
                let response = respond(service, request.with_body(HttpBody::from_reader(reader)));
                let _ = demand_tx.send(Demand::Drain);
                response
            });
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                warn!(error = %e, "failed to spawn service thread");
                return HttpResponse::new(HttpStatusCode::INTERNAL_SERVER_ERROR);
            }
        };
        pump.run(demand_rx, chunk_tx);
        worker.join().unwrap_or_else(|_| {
            warn!("service panicked while handling a request");
            HttpResponse::new(HttpStatusCode::INTERNAL_SERVER_ERROR)
        })
    })
}

/// Connection side of the body bridge.
struct BodyPump<'a> {
    body: &'a mut dyn Read,
    limit: Option<usize>,
    received: usize,
    finished: bool,
}

impl BodyPump<'_> {
    fn run(mut self, demands: Receiver<Demand>, chunks: Sender<Chunk>) {
        while let Ok(demand) = demands.recv() {
            match demand {
                Demand::Chunk => {
                    if chunks.send(self.next_chunk()).is_err() {
                        return;
                    }
                }
                Demand::Drain => {
                    while !self.finished {
                        if chunks.send(self.next_chunk()).is_err() {
                            return;
                        }
                    }
                    return;
                }
                Demand::Closed => return,
            }
        }
    }

    /// The next piece of the body, empty once it is complete.
    fn next_chunk(&mut self) -> Chunk {
        if self.finished {
            return Ok(Vec::new());
        }
        let mut chunk = vec![0u8; BODY_CHUNK_SIZE];
        let read = loop {
            match self.body.read(&mut chunk) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        let read = match read {
            Ok(read) => read,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };
        chunk.truncate(read);
        self.received += read;
        if read == 0 {
            self.finished = true;
        }
        if let Some(limit) = self.limit {
            if self.received > limit {
                self.finished = true;
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    ExposerError::new(ErrorKind::PayloadTooLarge { limit }),
                ));
            }
        }
        Ok(chunk)
    }
}

/// Worker side of the body bridge: a `Read` fed chunk by chunk over a channel.
struct BodyReader {
    demands: Sender<Demand>,
    chunks: Receiver<Chunk>,
    buffer: Vec<u8>,
    position: usize,
    done: bool,
}

impl BodyReader {
    fn new(demands: Sender<Demand>, chunks: Receiver<Chunk>) -> Self {
        Self {
            demands,
            chunks,
            buffer: Vec::new(),
            position: 0,
            done: false,
        }
    }

    fn next_chunk(&mut self) -> Option<Chunk> {
        match self.chunks.try_recv() {
            Ok(chunk) => Some(chunk),
            Err(TryRecvError::Disconnected) => None,
            Err(TryRecvError::Empty) => {
                // A failed send means the connection side is gone; recv then reports it
                let _ = self.demands.send(Demand::Chunk);
                self.chunks.recv().ok()
            }
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.position >= self.buffer.len() {
            if self.done {
                return Ok(0);
            }
            match self.next_chunk() {
                Some(Ok(chunk)) if chunk.is_empty() => self.done = true,
                Some(Ok(chunk)) => {
                    self.buffer = chunk;
                    self.position = 0;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                None => self.done = true,
            }
        }
        let available = &self.buffer[self.position..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.position += count;
        Ok(count)
    }
}

impl Drop for BodyReader {
    fn drop(&mut self) {
        let _ = self.demands.send(Demand::Closed);
    }
}

fn convert_response(response: HttpResponse) -> tiny_http::Response<Box<dyn Read + Send>> {
    let status = tiny_http::StatusCode(response.status().as_u16());
    let headers = response
        .headers()
        .all()
        .iter()
        .filter_map(|(key, value)| {
            tiny_http::Header::from_bytes(key.as_bytes(), value.as_bytes()).ok()
        })
        .collect::<Vec<_>>();
    let body = response.into_body();
    let length = match &body {
        HttpBody::Bytes(bytes) => Some(bytes.len()),
        HttpBody::Stream(_) => None,
    };
    tiny_http::Response::new(status, headers, body.into_reader(), length, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;
    use tempfile::TempDir;

    fn setup_test_dir() -> (TempDir, RealPal) {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let pal = RealPal::new(temp_dir.path().to_path_buf());
        (temp_dir, pal)
    }

    #[test]
    fn test_read_file_to_string() {
        let (temp_dir, pal) = setup_test_dir();
        fs::write(temp_dir.path().join("exposer.toml"), "version = \"1\"").unwrap();

        let content = pal
            .read_file_to_string(&FilePath::from("exposer.toml"))
            .unwrap();
        assert_eq!(content, "version = \"1\"");
    }

    #[test]
    fn test_read_file_not_found() {
        let (_temp_dir, pal) = setup_test_dir();
        let error = pal
            .read_file(&FilePath::from("nonexistent.toml"))
            .err()
            .unwrap();
        assert!(matches!(error.kind(), ErrorKind::FileError { .. }));
    }

    #[derive(Debug)]
    struct EchoService;

    impl HttpService for EchoService {
        fn handle_request(&self, mut request: HttpRequest) -> ExposerResult<HttpResponse> {
            match request.route_path() {
                "/echo" => {
                    let body = request.take_body().read_to_vec(None)?;
                    Ok(HttpResponse::ok()
                        .with_header("X-Method", request.method().as_str())
                        .with_body(body))
                }
                "/first-byte" => {
                    let mut first = [0u8; 1];
                    request.take_body().into_reader().read_exact(&mut first).map_err(|e| {
                        crate::err!("no body: {}", e)
                    })?;
                    Ok(HttpResponse::ok().with_body(first.to_vec()))
                }
                "/fail" => Err(Box::new(ExposerError::with_status(418, "teapot"))),
                _ => Ok(HttpResponse::new(HttpStatusCode::NOT_FOUND)),
            }
        }
    }

    fn start(config: HttpServerConfig) -> (TempDir, HttpServerHandle) {
        let (temp_dir, pal) = setup_test_dir();
        let handle = pal.start_http_server(Box::new(EchoService), config).unwrap();
        (temp_dir, handle)
    }

    fn connect(port: u16, raw_request: &[u8]) -> BufReader<TcpStream> {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(raw_request).unwrap();
        BufReader::new(stream)
    }

    fn send(port: u16, raw_request: &str) -> (String, String) {
        let mut reader = connect(port, raw_request.as_bytes());
        let mut status_line = String::new();
        reader.read_line(&mut status_line).unwrap();
        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        (status_line, rest)
    }

    #[test]
    fn test_http_server_round_trip() {
        let (_temp_dir, handle) = start(HttpServerConfig::new("127.0.0.1"));
        assert!(handle.port() > 0);

        let (status, rest) = send(
            handle.port(),
            "POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        );
        assert!(status.contains("200"), "status was {}", status);
        assert!(rest.contains("X-Method: POST"), "response was {}", rest);
        assert!(rest.ends_with("hello"), "response was {}", rest);
    }

    #[test]
    fn test_http_server_renders_errors() {
        let (_temp_dir, handle) = start(HttpServerConfig::new("127.0.0.1"));

        let (status, rest) = send(
            handle.port(),
            "GET /fail HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        );
        assert!(status.contains("418"), "status was {}", status);
        assert!(rest.contains(r#""message":"teapot""#), "response was {}", rest);
    }

    #[test]
    fn test_declared_oversized_body_is_refused_before_reading() {
        let (_temp_dir, handle) = start(HttpServerConfig::new("127.0.0.1").with_max_body_bytes(16));

        // Only the head is sent; the answer must not wait for 100 MB that never arrive
        let mut reader = connect(
            handle.port(),
            b"POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 100000000\r\n\r\n",
        );
        let mut status_line = String::new();
        reader.read_line(&mut status_line).unwrap();
        assert!(status_line.contains("413"), "status was {}", status_line);
    }

    #[test]
    fn test_undeclared_body_is_cut_at_server_limit() {
        let (_temp_dir, handle) = start(HttpServerConfig::new("127.0.0.1").with_max_body_bytes(16));

        let (status, rest) = send(
            handle.port(),
            "POST /echo HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
             10\r\n0123456789abcdef\r\n10\r\n0123456789abcdef\r\n0\r\n\r\n",
        );
        assert!(status.contains("413"), "status was {}", status);
        assert!(rest.contains("PayloadTooLarge"), "response was {}", rest);
    }

    #[test]
    fn test_body_within_server_limit_is_served() {
        let (_temp_dir, handle) = start(HttpServerConfig::new("127.0.0.1").with_max_body_bytes(16));

        let (status, rest) = send(
            handle.port(),
            "POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 16\r\nConnection: close\r\n\r\n0123456789abcdef",
        );
        assert!(status.contains("200"), "status was {}", status);
        assert!(rest.ends_with("0123456789abcdef"), "response was {}", rest);
    }

    #[test]
    fn test_service_reads_body_before_it_is_complete() {
        let (_temp_dir, handle) = start(HttpServerConfig::new("127.0.0.1"));

        // One byte of a declared thousand; the service answers from that byte alone
        let mut reader = connect(
            handle.port(),
            b"POST /first-byte HTTP/1.1\r\nHost: localhost\r\nContent-Length: 1000\r\n\r\nx",
        );
        let mut status_line = String::new();
        reader.read_line(&mut status_line).unwrap();
        assert!(status_line.contains("200"), "status was {}", status_line);
        let mut line = String::new();
        while reader.read_line(&mut line).unwrap() > 2 {
            line.clear();
        }
        let mut first = [0u8; 1];
        reader.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"x");
    }

    #[test]
    fn test_body_reader_serves_chunks_on_demand() {
        let (demand_tx, demand_rx) = mpsc::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel();
        let mut source: &[u8] = b"hello world";
        let pump = BodyPump {
            body: &mut source,
            limit: None,
            received: 0,
            finished: false,
        };
        let reader = BodyReader::new(demand_tx, chunk_rx);
        std::thread::scope(|scope| {
            let consumer = scope.spawn(move || {
                let mut reader = reader;
                let mut body = String::new();
                reader.read_to_string(&mut body).unwrap();
                body
            });
            pump.run(demand_rx, chunk_tx);
            assert_eq!(consumer.join().unwrap(), "hello world");
        });
    }
}
