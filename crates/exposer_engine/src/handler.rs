/* 📖 # Why three different failure statuses?

A caller needs to know whose fault a failure was:
- 400: the request did not match the parameter schema, fix the call
- 512: the function returned something violating its own response schema, fix the server
- 599: the function itself failed

Errors that already carry a status (an API returning `ExposerError::with_status(403, ..)`) are
passed through untouched, as are transport errors from calls the function made itself.
*/

use std::sync::Arc;

use exposer_base::error::ErrorKind;
use exposer_base::pal::http::{HttpBody, HttpRequest, HttpResponse};
use exposer_base::{Diagnostic, ExposerError, ExposerResult};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::api::{ApiOutput, CallArgs, RawInput};
use crate::checksum::CHECKSUM_HEADER;
use crate::descriptor::Descriptor;
use crate::marshal::to_positional;
use crate::router::{Output, RequestOptions, RouteHandler};
use crate::validation::{ResponseSampler, validate, validate_response};

/// Serves one exposed API.
#[derive(Debug)]
pub struct RequestHandler {
    descriptor: Arc<Descriptor>,
    options: RequestOptions,
    sampler: ResponseSampler,
    checksum: String,
}

impl RequestHandler {
    pub fn new(descriptor: Arc<Descriptor>, options: RequestOptions, checksum: String) -> Self {
        let sampler = ResponseSampler::new(options.response_sample_rate);
        Self {
            descriptor,
            options,
            sampler,
            checksum,
        }
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Decode, validate, invoke and encode one request.
    pub async fn call(&self, mut request: HttpRequest) -> ExposerResult<HttpResponse> {
        let args = self.decode_args(request.take_body())?;
        let output = self
            .descriptor
            .function
            .invoke(args)
            .await
            .map_err(|e| wrap_error(&self.descriptor.id, e))?;
        let response = self.encode_output(output)?;
        Ok(response.with_header(CHECKSUM_HEADER, self.checksum.as_str()))
    }

    fn decode_args(&self, body: HttpBody) -> ExposerResult<CallArgs> {
        let descriptor = &self.descriptor;
        if !self.options.parse || descriptor.takes_raw_body() {
            let raw = if descriptor.has_stream_input && self.options.max_body_bytes.is_none() {
                RawInput::Stream(body.into_reader())
            } else {
                RawInput::Buffer(body.read_to_vec(self.options.max_body_bytes)?)
            };
            return Ok(CallArgs::raw(raw));
        }

        let bytes = body.read_to_vec(self.options.max_body_bytes)?;
        let payload = decode_payload(&descriptor.id, &bytes)?;
        if let Some(schema) = &descriptor.payload_schema {
            validate(&payload, schema, &descriptor.id, descriptor.params.len())?;
        }
        Ok(CallArgs::new(to_positional(&payload, &descriptor.params)))
    }

    fn encode_output(&self, output: ApiOutput) -> ExposerResult<HttpResponse> {
        match output {
            ApiOutput::Json(value) => {
                if let Some(schema) = &self.descriptor.response_schema {
                    if self.sampler.should_sample() {
                        validate_response(&value, schema, &self.descriptor.id)?;
                    }
                }
                Ok(HttpResponse::json(serde_json::to_string(&value)?))
            }
            ApiOutput::Bytes(bytes) => Ok(binary_response(HttpBody::from_bytes(bytes))),
            ApiOutput::Stream(reader) => {
                let body = match self.options.output {
                    Output::Stream => HttpBody::Stream(reader),
                    Output::Data => HttpBody::Stream(reader)
                        .read_to_vec(None)
                        .map(HttpBody::from_bytes)
                        .map_err(|e| wrap_error(&self.descriptor.id, e))?,
                };
                Ok(binary_response(body))
            }
        }
    }
}

fn binary_response(body: HttpBody) -> HttpResponse {
    HttpResponse::ok()
        .with_content_type("application/octet-stream")
        .with_body(body)
}

fn invalid_body(id: &str, message: String) -> Box<ExposerError> {
    Box::new(ExposerError::new(ErrorKind::ValidationFailed {
        id: id.to_string(),
        diagnostics: vec![Diagnostic::new(None, message)],
    }))
}

/// Decode a request body into the named payload; an empty body is `{}`.
fn decode_payload(id: &str, bytes: &[u8]) -> ExposerResult<Map<String, Value>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(payload)) => Ok(payload),
        Ok(_) => Err(invalid_body(id, "request body must be a JSON object".to_string())),
        Err(e) => Err(invalid_body(
            id,
            format!("request body is not valid JSON: {}", e),
        )),
    }
}

/// Keep errors that carry their own status (and transport errors), report
/// everything else as a failure of the API function.
pub fn wrap_error(id: &str, error: Box<ExposerError>) -> Box<ExposerError> {
    if error.status().is_some() || matches!(error.kind(), ErrorKind::Transport { .. }) {
        return error;
    }
    Box::new(ExposerError::new(ErrorKind::Handler {
        id: id.to_string(),
        message: error.to_string(),
    }))
}

impl RouteHandler for RequestHandler {
    fn handle(&self, request: HttpRequest) -> ExposerResult<HttpResponse> {
        match futures::executor::block_on(self.call(request)) {
            Ok(response) => Ok(response),
            Err(error) => {
                match error.status() {
                    Some(status) if status >= 500 => {
                        error!(api = %self.descriptor.id, status, error = %error, "API call failed")
                    }
                    Some(status) => {
                        warn!(api = %self.descriptor.id, status, error = %error, "API call rejected")
                    }
                    None => debug!(api = %self.descriptor.id, error = %error, "API call failed"),
                }
                Ok(HttpResponse::from_error(&error)
                    .with_header(CHECKSUM_HEADER, self.checksum.as_str()))
            }
        }
    }
}
