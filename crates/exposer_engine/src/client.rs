/* 📖 # Why resolve before calling?

The client knows APIs only by group and id. `resolve()` fetches the discovery document once:
it yields the parameter names needed to build named payloads, the HTTP method of every API,
and the checksum of the surface. Every later response carries the server's current checksum,
and a difference means the server changed under the client; the call fails with
`ChecksumMismatch` instead of returning a result that was computed against a different API.
*/

use std::collections::HashMap;

use exposer_base::error::ErrorKind;
use exposer_base::pal::http::{HttpMethod, HttpRequest, HttpResponse, HttpService, respond};
use exposer_base::{ExposerError, ExposerResult};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::checksum::CHECKSUM_HEADER;
use crate::descriptor::{ExposedApi, normalize_base_path, select_method};
use crate::expose::DiscoveryDocument;
use crate::marshal::to_named_object;

/// Carries requests to an exposed service.
pub trait Transport: Send + Sync {
    /// Deliver a request; failures to reach the service are `Transport` errors.
    fn send(&self, request: HttpRequest) -> ExposerResult<HttpResponse>;
}

/// Transport dispatching into an in-process service.
#[derive(Debug)]
pub struct ServiceTransport<S: HttpService> {
    service: S,
}

impl<S: HttpService> ServiceTransport<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

impl<S: HttpService> Transport for ServiceTransport<S> {
    fn send(&self, request: HttpRequest) -> ExposerResult<HttpResponse> {
        Ok(respond(&self.service, request))
    }
}

#[derive(Debug)]
struct Resolved {
    checksum: String,
    apis: HashMap<(String, String), ExposedApi>,
}

/// Error body as rendered by the server.
#[derive(Deserialize)]
struct RemoteError {
    message: String,
}

/// Calls exposed APIs by group and id.
pub struct ExposedClient<T: Transport> {
    transport: T,
    base_path: String,
    resolved: RwLock<Option<Resolved>>,
}

impl<T: Transport> ExposedClient<T> {
    pub fn new(transport: T, base_path: &str) -> Self {
        Self {
            transport,
            base_path: normalize_base_path(base_path),
            resolved: RwLock::new(None),
        }
    }

    /// Fetch the discovery document and remember the API surface.
    pub fn resolve(&self) -> ExposerResult<DiscoveryDocument> {
        let request = HttpRequest::new(HttpMethod::Get, format!("{}/exposed", self.base_path));
        let response = self.transport.send(request)?;
        let body = success_body(response)?;
        let document: DiscoveryDocument = serde_json::from_slice(&body)?;
        let apis = document
            .apis
            .iter()
            .map(|api| ((api.group.clone(), api.id.clone()), api.clone()))
            .collect();
        debug!(
            service = %document.name,
            checksum = %document.checksum,
            apis = document.apis.len(),
            "resolved exposed APIs"
        );
        *self.resolved.write() = Some(Resolved {
            checksum: document.checksum.clone(),
            apis,
        });
        Ok(document)
    }

    /// Checksum of the resolved surface, if resolved.
    pub fn checksum(&self) -> Option<String> {
        self.resolved.read().as_ref().map(|r| r.checksum.clone())
    }

    fn lookup(&self, group: &str, id: &str) -> ExposerResult<(ExposedApi, String)> {
        let resolved = self.resolved.read();
        let resolved = resolved.as_ref().ok_or_else(|| {
            Box::new(ExposerError::configuration(
                "client must resolve the exposed APIs before calling them",
            ))
        })?;
        let api = resolved
            .apis
            .get(&(group.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| exposer_base::err!("API {}.{} is not exposed", group, id))?;
        Ok((api, resolved.checksum.clone()))
    }

    fn dispatch(&self, request: HttpRequest, expected: &str) -> ExposerResult<Vec<u8>> {
        let response = self.transport.send(request)?;
        if let Some(actual) = response.headers().get(CHECKSUM_HEADER) {
            if actual != expected {
                warn!(expected = %expected, actual = %actual, "exposed API surface changed");
                return Err(Box::new(ExposerError::new(ErrorKind::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual: actual.clone(),
                })));
            }
        }
        success_body(response)
    }

    /// Call a JSON API with positional arguments.
    pub fn call(&self, group: &str, id: &str, args: &[Value]) -> ExposerResult<Value> {
        let (api, checksum) = self.lookup(group, id)?;
        let request = match select_method(&api.params) {
            HttpMethod::Get => HttpRequest::new(HttpMethod::Get, api.path.as_str()),
            method => {
                let payload = Value::Object(to_named_object(args, &api.params));
                HttpRequest::new(method, api.path.as_str())
                    .with_header("Content-Type", "application/json")
                    .with_body(serde_json::to_vec(&payload)?)
            }
        };
        let body = self.dispatch(request, &checksum)?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// Call a buffer or stream input API with a raw body.
    pub fn call_raw(&self, group: &str, id: &str, body: Vec<u8>) -> ExposerResult<Vec<u8>> {
        let (api, checksum) = self.lookup(group, id)?;
        if !api.has_buffer_input && !api.has_stream_input {
            return Err(exposer_base::err!(
                "API {}.{} does not take a raw body",
                group,
                id
            ));
        }
        let request = HttpRequest::new(select_method(&api.params), api.path.as_str())
            .with_header("Content-Type", "application/octet-stream")
            .with_body(body);
        self.dispatch(request, &checksum)
    }
}

/// Body of a successful response, or the remote error with its status.
fn success_body(response: HttpResponse) -> ExposerResult<Vec<u8>> {
    let status = response.status();
    let body = response.into_body().read_to_vec(None)?;
    if status.is_success() {
        return Ok(body);
    }
    let message = serde_json::from_slice::<RemoteError>(&body)
        .map(|remote| remote.message)
        .unwrap_or_else(|_| status.reason_phrase().to_string());
    Err(Box::new(ExposerError::with_status(status.as_u16(), message)))
}

impl<T: Transport> std::fmt::Debug for ExposedClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExposedClient")
            .field("base_path", &self.base_path)
            .field("checksum", &self.checksum())
            .finish()
    }
}
