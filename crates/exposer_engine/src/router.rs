/* 📖 # Why such a narrow router contract?

The pipeline only ever needs to hand over a list of routes: method, path, handler and a few
per-route options. Any HTTP framework can implement `Router` with a dozen lines. `RouteTable`
is the implementation shipped here; it is also an `HttpService`, so it plugs straight into
RealPal or MockPal. Given the service checksum, it renders its own refusals (unknown path,
wrong method, oversized body) and stamps them with the checksum header like every API answer.
*/

use std::fmt;
use std::sync::Arc;

use exposer_base::pal::http::{HttpMethod, HttpRequest, HttpResponse, HttpService, HttpStatusCode};
use exposer_base::{ExposerError, ExposerResult};
use indexmap::IndexMap;
use tracing::debug;

use crate::checksum::CHECKSUM_HEADER;

/// Default body limit for parsed and buffered request bodies (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Handles the requests of one route.
pub trait RouteHandler: Send + Sync + 'static {
    fn handle(&self, request: HttpRequest) -> ExposerResult<HttpResponse>;
}

impl<F> RouteHandler for F
where
    F: Fn(HttpRequest) -> ExposerResult<HttpResponse> + Send + Sync + 'static,
{
    fn handle(&self, request: HttpRequest) -> ExposerResult<HttpResponse> {
        self(request)
    }
}

/// How a route hands results back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Streamed results are buffered and sent with a known length
    Data,
    /// Streamed results are passed through as they are produced
    Stream,
}

/// Per-route request handling options.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// Decode the body as a JSON object (false for raw body routes)
    pub parse: bool,
    pub output: Output,
    /// Upper bound on the request body, `None` for unlimited
    pub max_body_bytes: Option<usize>,
    /// Fraction of responses checked against the response schema
    pub response_sample_rate: f64,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            parse: true,
            output: Output::Data,
            max_body_bytes: Some(DEFAULT_MAX_BODY_BYTES),
            response_sample_rate: 0.0,
        }
    }
}

/// A registered endpoint.
#[derive(Clone)]
pub struct Route {
    pub method: HttpMethod,
    pub path: String,
    pub handler: Arc<dyn RouteHandler>,
    pub options: RequestOptions,
}

impl Route {
    pub fn new(
        method: HttpMethod,
        path: impl Into<String>,
        handler: impl RouteHandler,
        options: RequestOptions,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            handler: Arc::new(handler),
            options,
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}

/// Receives the routes produced by the exposure pipeline.
pub trait Router {
    fn register(&mut self, routes: Vec<Route>) -> ExposerResult<()>;
}

/// Exact-match route table serving as an `HttpService`.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: IndexMap<String, IndexMap<HttpMethod, Route>>,
    checksum: Option<String>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request, refusals included, with `checksum` in the checksum header.
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(|methods| methods.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn lookup(&self, method: HttpMethod, path: &str) -> Option<&Route> {
        self.routes.get(path)?.get(&method)
    }

    /// Registered `(method, path)` pairs in registration order.
    pub fn endpoints(&self) -> Vec<(HttpMethod, &str)> {
        self.routes
            .iter()
            .flat_map(|(path, methods)| methods.keys().map(move |m| (*m, path.as_str())))
            .collect()
    }
}

impl Router for RouteTable {
    fn register(&mut self, routes: Vec<Route>) -> ExposerResult<()> {
        for route in routes {
            let methods = self.routes.entry(route.path.clone()).or_default();
            if methods.contains_key(&route.method) {
                return Err(Box::new(ExposerError::configuration(format!(
                    "route {} {} is registered twice",
                    route.method, route.path
                ))));
            }
            debug!(method = %route.method, path = %route.path, "registered route");
            methods.insert(route.method, route);
        }
        Ok(())
    }
}

fn declared_length(request: &HttpRequest) -> Option<usize> {
    request.headers().get("Content-Length")?.trim().parse().ok()
}

impl RouteTable {
    fn dispatch(&self, request: HttpRequest) -> ExposerResult<HttpResponse> {
        let Some(methods) = self.routes.get(request.route_path()) else {
            return Err(Box::new(ExposerError::with_status(
                HttpStatusCode::NOT_FOUND.as_u16(),
                format!("No route for {}", request.route_path()),
            )));
        };
        let Some(route) = methods.get(&request.method()) else {
            let allowed = methods
                .keys()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(Box::new(ExposerError::with_status(
                HttpStatusCode::METHOD_NOT_ALLOWED.as_u16(),
                format!(
                    "{} is not allowed for {}, use {}",
                    request.method(),
                    request.route_path(),
                    allowed
                ),
            )));
        };
        // Refuse oversized bodies before reading them when the client announced the size
        if let (Some(limit), Some(length)) = (route.options.max_body_bytes, declared_length(&request))
        {
            if length > limit {
                return Err(Box::new(ExposerError::new(
                    exposer_base::ErrorKind::PayloadTooLarge { limit },
                )));
            }
        }
        route.handler.handle(request)
    }
}

impl HttpService for RouteTable {
    fn handle_request(&self, request: HttpRequest) -> ExposerResult<HttpResponse> {
        let result = self.dispatch(request);
        let Some(checksum) = &self.checksum else {
            return result;
        };
        let response = result.unwrap_or_else(|error| {
            debug!(status = ?error.status(), error = %error, "request refused");
            HttpResponse::from_error(&error)
        });
        Ok(response.with_header(CHECKSUM_HEADER, checksum.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_route(method: HttpMethod, path: &str, body: &'static str) -> Route {
        Route::new(
            method,
            path,
            move |_request: HttpRequest| Ok(HttpResponse::ok().with_body(body)),
            RequestOptions::default(),
        )
    }

    fn table() -> RouteTable {
        let mut table = RouteTable::new();
        table
            .register(vec![
                ok_route(HttpMethod::Get, "/api/calc/now", "now"),
                ok_route(HttpMethod::Post, "/api/calc/add", "add"),
            ])
            .unwrap();
        table
    }

    #[test]
    fn test_dispatch_by_method_and_path() {
        let table = table();
        let response = table
            .handle_request(HttpRequest::new(HttpMethod::Post, "/api/calc/add?trace=1"))
            .unwrap();
        assert_eq!(response.body().as_string().unwrap(), "add");
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.endpoints(),
            vec![
                (HttpMethod::Get, "/api/calc/now"),
                (HttpMethod::Post, "/api/calc/add")
            ]
        );
    }

    #[test]
    fn test_unknown_path_is_404() {
        let error = table()
            .handle_request(HttpRequest::new(HttpMethod::Get, "/api/calc/missing"))
            .unwrap_err();
        assert_eq!(error.status(), Some(404));
    }

    #[test]
    fn test_wrong_method_is_405() {
        let error = table()
            .handle_request(HttpRequest::new(HttpMethod::Get, "/api/calc/add"))
            .unwrap_err();
        assert_eq!(error.status(), Some(405));
        assert_eq!(
            error.to_string(),
            "GET is not allowed for /api/calc/add, use POST"
        );
    }

    #[test]
    fn test_duplicate_route_is_rejected() {
        let mut table = table();
        let error = table
            .register(vec![ok_route(HttpMethod::Post, "/api/calc/add", "again")])
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "Configuration error: route POST /api/calc/add is registered twice"
        );
    }

    #[test]
    fn test_announced_oversized_body_is_413() {
        let mut table = RouteTable::new();
        table
            .register(vec![Route::new(
                HttpMethod::Post,
                "/upload",
                |_request: HttpRequest| Ok(HttpResponse::ok()),
                RequestOptions {
                    max_body_bytes: Some(4),
                    ..RequestOptions::default()
                },
            )])
            .unwrap();
        let request = HttpRequest::new(HttpMethod::Post, "/upload")
            .with_header("content-length", "10")
            .with_body("0123456789");
        let error = table.handle_request(request).unwrap_err();
        assert_eq!(error.status(), Some(413));
    }

    #[test]
    fn test_refusals_carry_checksum_when_known() {
        let table = table().with_checksum("c0ffee");

        let missing = table
            .handle_request(HttpRequest::new(HttpMethod::Get, "/api/calc/missing"))
            .unwrap();
        assert_eq!(missing.status(), HttpStatusCode::NOT_FOUND);
        assert_eq!(
            missing.headers().get(CHECKSUM_HEADER).map(String::as_str),
            Some("c0ffee")
        );

        let wrong_method = table
            .handle_request(HttpRequest::new(HttpMethod::Get, "/api/calc/add"))
            .unwrap();
        assert_eq!(wrong_method.status(), HttpStatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            wrong_method.headers().get(CHECKSUM_HEADER).map(String::as_str),
            Some("c0ffee")
        );

        let served = table
            .handle_request(HttpRequest::new(HttpMethod::Get, "/api/calc/now"))
            .unwrap();
        assert_eq!(served.body().as_string().unwrap(), "now");
        assert!(served.headers().contains(CHECKSUM_HEADER));
    }
}
