/* 📖 # Why an explicit ApiFunction instead of bare closures?

Everything the exposure pipeline needs to know about a function (its parameter names, the
validation schemas, whether it takes a raw body) is stated next to the closure in one value.
Nothing is inferred from the closure itself, so a function can be wrapped, cloned, or built
programmatically without losing its metadata.
*/

use std::fmt;
use std::future::Future;
use std::io::Read;
use std::sync::Arc;

use exposer_base::pal::http::HttpBody;
use exposer_base::{ExposerError, ExposerResult};
use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::signature;

/// Insertion-ordered map of API id to function, as exported by one group.
pub type ApiMap = IndexMap<String, ApiFunction>;

type SyncFn = dyn Fn(CallArgs) -> ExposerResult<ApiOutput> + Send + Sync;
type AsyncFn = dyn Fn(CallArgs) -> BoxFuture<'static, ExposerResult<ApiOutput>> + Send + Sync;

/// The invocable part of an API, synchronous or asynchronous.
#[derive(Clone)]
pub enum Callable {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl Callable {
    /// Invoke the function, awaiting it if it is asynchronous.
    pub async fn invoke(&self, args: CallArgs) -> ExposerResult<ApiOutput> {
        match self {
            Callable::Sync(f) => f(args),
            Callable::Async(f) => f(args).await,
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Sync(_) => f.write_str("Callable::Sync"),
            Callable::Async(_) => f.write_str("Callable::Async"),
        }
    }
}

/// Raw request body handed to buffer and stream input APIs.
pub enum RawInput {
    Buffer(Vec<u8>),
    Stream(Box<dyn Read + Send>),
}

impl fmt::Debug for RawInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawInput::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            RawInput::Stream(_) => f.write_str("Stream"),
        }
    }
}

static NULL: Value = Value::Null;

/// Positional arguments of one invocation.
///
/// For buffer and stream input APIs the raw body stands in for the first
/// parameter and every positional value reads as `null`.
#[derive(Debug, Default)]
pub struct CallArgs {
    values: Vec<Value>,
    raw: Option<RawInput>,
}

impl CallArgs {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values, raw: None }
    }

    pub fn raw(raw: RawInput) -> Self {
        Self {
            values: vec![],
            raw: Some(raw),
        }
    }

    /// Value at position `index`, `null` when the caller did not supply it.
    pub fn value(&self, index: usize) -> &Value {
        self.values.get(index).unwrap_or(&NULL)
    }

    /// Deserialize the value at position `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> ExposerResult<T> {
        serde_json::from_value(self.value(index).clone()).map_err(|e| {
            Box::new(ExposerError::message(format!(
                "argument {} has an unexpected shape: {}",
                index, e
            )))
        })
    }

    /// Values from position `from` onwards, including overflow arguments.
    pub fn rest(&self, from: usize) -> &[Value] {
        self.values.get(from..).unwrap_or(&[])
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Take the raw body of a buffer input API.
    ///
    /// A body handed over as a stream is read to the end here; a failed read is an error,
    /// never an empty body.
    pub fn take_buffer(&mut self) -> ExposerResult<Option<Vec<u8>>> {
        match self.raw.take() {
            Some(RawInput::Buffer(bytes)) => Ok(Some(bytes)),
            Some(RawInput::Stream(reader)) => HttpBody::Stream(reader).read_to_vec(None).map(Some),
            None => Ok(None),
        }
    }

    /// Take the raw body of a stream input API.
    pub fn take_stream(&mut self) -> Option<Box<dyn Read + Send>> {
        match self.raw.take() {
            Some(RawInput::Stream(reader)) => Some(reader),
            Some(RawInput::Buffer(bytes)) => Some(Box::new(std::io::Cursor::new(bytes))),
            None => None,
        }
    }
}

/// Result of an API function.
pub enum ApiOutput {
    /// Encoded as the JSON response body
    Json(Value),
    /// Sent as-is
    Bytes(Vec<u8>),
    /// Streamed as-is
    Stream(Box<dyn Read + Send>),
}

impl ApiOutput {
    /// Serialize any value into a JSON output.
    pub fn json<T: Serialize>(value: &T) -> ExposerResult<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    pub fn stream<R: Read + Send + 'static>(reader: R) -> Self {
        Self::Stream(Box::new(reader))
    }
}

impl fmt::Debug for ApiOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiOutput::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ApiOutput::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            ApiOutput::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Value> for ApiOutput {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Vec<u8>> for ApiOutput {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<String> for ApiOutput {
    fn from(s: String) -> Self {
        Self::Json(Value::String(s))
    }
}

impl From<()> for ApiOutput {
    fn from(_: ()) -> Self {
        Self::Json(Value::Null)
    }
}

/// How the parameter names of a function are declared.
#[derive(Debug, Clone)]
enum Params {
    Signature(String),
    Names(Vec<String>),
}

/// A function together with everything needed to expose it.
#[derive(Debug, Clone)]
pub struct ApiFunction {
    callable: Callable,
    params: Params,
    validate: Option<Vec<Value>>,
    response_schema: Option<Value>,
    validate_response: bool,
    has_buffer_input: bool,
    has_stream_input: bool,
    description: Option<String>,
    notes: Option<String>,
}

impl ApiFunction {
    fn from_callable(params: Params, callable: Callable) -> Self {
        Self {
            callable,
            params,
            validate: None,
            response_schema: None,
            validate_response: false,
            has_buffer_input: false,
            has_stream_input: false,
            description: None,
            notes: None,
        }
    }

    /// A synchronous function whose parameters are declared as signature text,
    /// e.g. `"(a, b = 1, {c: {d}})"`.
    pub fn new<F, R>(signature: impl Into<String>, f: F) -> Self
    where
        F: Fn(CallArgs) -> ExposerResult<R> + Send + Sync + 'static,
        R: Into<ApiOutput>,
    {
        Self::from_callable(
            Params::Signature(signature.into()),
            Callable::Sync(Arc::new(move |args: CallArgs| -> ExposerResult<ApiOutput> {
                f(args).map(Into::into)
            })),
        )
    }

    /// A synchronous function with an explicit list of parameter names.
    pub fn with_params<F, R>(names: &[&str], f: F) -> Self
    where
        F: Fn(CallArgs) -> ExposerResult<R> + Send + Sync + 'static,
        R: Into<ApiOutput>,
    {
        Self::from_callable(
            Params::Names(names.iter().map(|name| name.to_string()).collect()),
            Callable::Sync(Arc::new(move |args: CallArgs| -> ExposerResult<ApiOutput> {
                f(args).map(Into::into)
            })),
        )
    }

    /// An asynchronous function whose parameters are declared as signature text.
    pub fn new_async<F, Fut, R>(signature: impl Into<String>, f: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ExposerResult<R>> + Send + 'static,
        R: Into<ApiOutput>,
    {
        Self::from_callable(
            Params::Signature(signature.into()),
            Callable::Async(Arc::new(
                move |args: CallArgs| -> BoxFuture<'static, ExposerResult<ApiOutput>> {
                    f(args)
                        .map(|result: ExposerResult<R>| -> ExposerResult<ApiOutput> {
                            result.map(Into::into)
                        })
                        .boxed()
                },
            )),
        )
    }

    /// Per-parameter validation schema fragments, in parameter order.
    pub fn validate(mut self, fragments: Vec<Value>) -> Self {
        self.validate = Some(fragments);
        self
    }

    /// Schema the function's JSON result must satisfy when responses are validated.
    pub fn response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn validate_response(mut self, enabled: bool) -> Self {
        self.validate_response = enabled;
        self
    }

    /// Receive the request body as a byte buffer instead of parsed parameters.
    pub fn buffer_input(mut self) -> Self {
        self.has_buffer_input = true;
        self
    }

    /// Receive the request body as a byte stream instead of parsed parameters.
    pub fn stream_input(mut self) -> Self {
        self.has_stream_input = true;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Resolve the declared parameter names.
    pub fn param_names(&self) -> ExposerResult<Vec<String>> {
        match &self.params {
            Params::Signature(text) => signature::param_names(text),
            Params::Names(names) => {
                let checked = names
                    .iter()
                    .map(|name| signature::check_param_name(name))
                    .collect::<ExposerResult<Vec<String>>>()?;
                signature::check_unique(&names.join(", "), checked)
            }
        }
    }

    /// Check the metadata combinations that can never be served.
    pub fn check_metadata(&self) -> ExposerResult<()> {
        if self.validate_response && self.response_schema.is_none() {
            return Err(Box::new(ExposerError::configuration(
                "validate_response requires a response schema",
            )));
        }
        if self.has_buffer_input && self.has_stream_input {
            return Err(Box::new(ExposerError::configuration(
                "buffer input and stream input are mutually exclusive",
            )));
        }
        Ok(())
    }

    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    pub fn validation_fragments(&self) -> Option<&[Value]> {
        self.validate.as_deref()
    }

    pub fn response_schema_value(&self) -> Option<&Value> {
        self.response_schema.as_ref()
    }

    pub fn validates_response(&self) -> bool {
        self.validate_response
    }

    pub fn has_buffer_input(&self) -> bool {
        self.has_buffer_input
    }

    pub fn has_stream_input(&self) -> bool {
        self.has_stream_input
    }

    pub fn description_text(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn notes_text(&self) -> Option<&str> {
        self.notes.as_deref()
    }
}
