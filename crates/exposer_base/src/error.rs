use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_error::SpanTrace;

/* 📖 # Why a custom error type and not use anyhow/eyre/thiserror etc?

- Better control over error handling
- No dependencies to compile and integrate
- The wire status of an error is part of the protocol, so every variant has to be
  matched explicitly when a response is rendered
 */

/// A single field-level complaint produced by schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Top-level parameter the complaint is about, if it can be attributed to one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub field: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(field: Option<String>, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}: {}", field, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Error variants that can occur while exposing or calling APIs.
#[derive(Debug)]
pub enum ErrorKind {
    /// Startup configuration is malformed (missing name/version, bad group entry, ...)
    Configuration { message: String },

    /// A validation or response schema attached to an API does not compile
    InvalidValidationSchema {
        group: String,
        id: String,
        message: String,
    },

    /// A group's init function failed
    GroupInit {
        group: String,
        source: Box<ExposerError>,
    },

    /// A declared parameter list cannot be mapped to positional parameters
    UnsupportedSignature { signature: String, message: String },

    /// The request payload does not match the API's parameter schema
    ValidationFailed {
        id: String,
        diagnostics: Vec<Diagnostic>,
    },

    /// The request payload carries more values than the API declares
    ParameterCountMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    /// The API returned a value violating its own response schema
    ResponseValidationFailed {
        id: String,
        diagnostics: Vec<Diagnostic>,
    },

    /// The API function failed without choosing a status itself
    Handler { id: String, message: String },

    /// An error annotated with the status it should be reported with
    Status { status: u16, message: String },

    /// The request body exceeds the route's size limit
    PayloadTooLarge { limit: usize },

    /// A lower-layer failure observed by a remote caller
    Transport { message: String },

    /// The server's API surface differs from the one the caller resolved
    ChecksumMismatch { expected: String, actual: String },

    /// File system operation failed
    FileError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Catch-all for other errors with a message
    Message { message: String },
}

/// Status used on the wire for schema validation failures.
pub const STATUS_BAD_REQUEST: u16 = 400;
/// Status used on the wire when a request body is too large.
pub const STATUS_PAYLOAD_TOO_LARGE: u16 = 413;
/// Status used on the wire when an API violates its own response schema.
pub const STATUS_BAD_RESPONSE: u16 = 512;
/// Status used on the wire when an API function fails.
pub const STATUS_HANDLER_ERROR: u16 = 599;

impl ErrorKind {
    /// The wire status this kind carries on its own, if any.
    ///
    /// Kinds without an intrinsic status are reported as handler errors when
    /// they escape an API function.
    pub fn status(&self) -> Option<u16> {
        match self {
            ErrorKind::ValidationFailed { .. } | ErrorKind::ParameterCountMismatch { .. } => {
                Some(STATUS_BAD_REQUEST)
            }
            ErrorKind::ResponseValidationFailed { .. } => Some(STATUS_BAD_RESPONSE),
            ErrorKind::Handler { .. } => Some(STATUS_HANDLER_ERROR),
            ErrorKind::Status { status, .. } => Some(*status),
            ErrorKind::PayloadTooLarge { .. } => Some(STATUS_PAYLOAD_TOO_LARGE),
            _ => None,
        }
    }

    /// Stable name of the kind, used as the `error` field of wire error bodies.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Configuration { .. } => "ConfigurationError",
            ErrorKind::InvalidValidationSchema { .. } => "InvalidValidationSchema",
            ErrorKind::GroupInit { .. } => "GroupInitError",
            ErrorKind::UnsupportedSignature { .. } => "UnsupportedSignatureError",
            ErrorKind::ValidationFailed { .. } | ErrorKind::ParameterCountMismatch { .. } => {
                "ValidationFailed"
            }
            ErrorKind::ResponseValidationFailed { .. } => "ResponseValidationFailed",
            ErrorKind::Handler { .. } => "HandlerError",
            ErrorKind::Status { .. } => "StatusError",
            ErrorKind::PayloadTooLarge { .. } => "PayloadTooLarge",
            ErrorKind::Transport { .. } => "TransportError",
            ErrorKind::ChecksumMismatch { .. } => "ChecksumMismatch",
            ErrorKind::FileError { .. } => "FileError",
            ErrorKind::Message { .. } => "Error",
        }
    }

    /// The API id a per-request error refers to.
    pub fn api_id(&self) -> Option<&str> {
        match self {
            ErrorKind::ValidationFailed { id, .. }
            | ErrorKind::ParameterCountMismatch { id, .. }
            | ErrorKind::ResponseValidationFailed { id, .. }
            | ErrorKind::Handler { id, .. }
            | ErrorKind::InvalidValidationSchema { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Field diagnostics attached to validation failures.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            ErrorKind::ValidationFailed { diagnostics, .. }
            | ErrorKind::ResponseValidationFailed { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}

/* 📖 # Why separate ErrorKind and ExposerError?
This two-layer design provides a clear separation of concerns:
- ErrorKind: structural variants with specific contexts (API ids, groups, diagnostics)
- ExposerError: wraps ErrorKind with runtime context strings and the span trace

Callers match on ErrorKind to decide the wire status, while context is attached
during propagation without touching the kind.
*/

/// Error type wrapping ErrorKind with optional context and the span trace at creation.
#[derive(Debug)]
pub struct ExposerError {
    kind: ErrorKind,
    context: Vec<String>,
    span_trace: SpanTrace,
}

impl ExposerError {
    /// Creates a new error from an ErrorKind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: vec![],
            span_trace: SpanTrace::capture(),
        }
    }

    /// Creates a plain message error.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Message {
            message: message.into(),
        })
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration {
            message: message.into(),
        })
    }

    /// Creates an error annotated with its own wire status.
    ///
    /// API functions return these to report e.g. an authorization failure
    /// with 403 instead of the generic handler error status.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Status {
            status,
            message: message.into(),
        })
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport {
            message: message.into(),
        })
    }

    /// Attaches context to an error.
    /// Context is displayed before the error message.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Attaches context using lazy evaluation.
    pub fn with_context<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> String,
    {
        self.context.push(f());
        self
    }

    /// Returns a reference to the underlying ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the attached context, outermost last.
    pub fn get_context(&self) -> &[String] {
        &self.context
    }

    /// Returns the span trace captured when the error was created.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }

    /// The wire status of this error, if its kind carries one.
    pub fn status(&self) -> Option<u16> {
        self.kind.status()
    }

    /// Returns the innermost error in the chain.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut current: &(dyn StdError + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }
}

impl From<ErrorKind> for ExposerError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<serde_json::Error> for Box<ExposerError> {
    fn from(error: serde_json::Error) -> Self {
        Box::new(ExposerError::message(format!("JSON error: {}", error)))
    }
}

impl StdError for ExposerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.kind {
            ErrorKind::FileError { source, .. } => Some(source),
            ErrorKind::GroupInit { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

fn join_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl fmt::Display for ExposerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ctx) in self.context.iter().enumerate() {
            if i == 0 {
                write!(f, "{}", ctx)?;
            } else {
                write!(f, ": {}", ctx)?;
            }
        }

        if !self.context.is_empty() {
            write!(f, ": ")?;
        }

        match &self.kind {
            ErrorKind::Configuration { message } => {
                write!(f, "Configuration error: {}", message)
            }
            ErrorKind::InvalidValidationSchema { group, id, message } => {
                write!(
                    f,
                    "Invalid validation schema for API {} in group {}: {}",
                    id, group, message
                )
            }
            ErrorKind::GroupInit { group, source } => {
                write!(f, "Initialization of group '{}' failed: {}", group, source)
            }
            ErrorKind::UnsupportedSignature { signature, message } => {
                write!(f, "Unsupported signature '({})': {}", signature, message)
            }
            ErrorKind::ValidationFailed { id, diagnostics } => {
                write!(
                    f,
                    "Invalid parameters for API {}: {}",
                    id,
                    join_diagnostics(diagnostics)
                )
            }
            ErrorKind::ParameterCountMismatch {
                id,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "API {} expects at most {} parameters but received {}",
                    id, expected, actual
                )
            }
            ErrorKind::ResponseValidationFailed { id, diagnostics } => {
                write!(
                    f,
                    "Invalid response from API {}: {}",
                    id,
                    join_diagnostics(diagnostics)
                )
            }
            ErrorKind::Handler { id, message } => {
                write!(f, "Error while calling API {}: {}", id, message)
            }
            ErrorKind::Status { message, .. } => write!(f, "{}", message),
            ErrorKind::PayloadTooLarge { limit } => {
                write!(f, "Request body exceeds the limit of {} bytes", limit)
            }
            ErrorKind::Transport { message } => write!(f, "Transport error: {}", message),
            ErrorKind::ChecksumMismatch { expected, actual } => {
                write!(
                    f,
                    "API checksum mismatch: expected {}, server reported {}",
                    expected, actual
                )
            }
            ErrorKind::FileError { path, source } => {
                write!(f, "File error at {}: {}", path.display(), source)
            }
            ErrorKind::Message { message } => write!(f, "{}", message),
        }
    }
}

/* 📖 # Why use Box<ExposerError> in the result type?

Boxing the error reduces the size of the result type, making it more efficient to return in the common case.
API functions return this type too, so the happy path of every request stays small.
*/

/// Standard result type for exposer operations.
pub type ExposerResult<T> = std::result::Result<T, Box<ExposerError>>;

/// Extension trait for attaching context to Results.
pub trait ResultExt<T> {
    /// Attaches context to an error, consuming and re-wrapping it.
    fn context(self, context: impl Into<String>) -> ExposerResult<T>;

    /// Attaches context using lazy evaluation.
    /// Context is only evaluated if the result is an error.
    fn with_context<F>(self, f: F) -> ExposerResult<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for ExposerResult<T> {
    fn context(self, context: impl Into<String>) -> ExposerResult<T> {
        self.map_err(|err| Box::new(err.context(context)))
    }

    fn with_context<F>(self, f: F) -> ExposerResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| Box::new(err.with_context(f)))
    }
}

/// Creates a boxed message error from a format string.
#[macro_export]
macro_rules! err {
    ($($arg:tt)*) => {
        Box::new($crate::error::ExposerError::message(format!($($arg)*)))
    };
}

/// Returns early with a boxed message error.
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::err!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_status_of_request_kinds() {
        let validation = ErrorKind::ValidationFailed {
            id: "add".to_string(),
            diagnostics: vec![],
        };
        assert_eq!(validation.status(), Some(400));

        let count = ErrorKind::ParameterCountMismatch {
            id: "add".to_string(),
            expected: 2,
            actual: 3,
        };
        assert_eq!(count.status(), Some(400));

        let response = ErrorKind::ResponseValidationFailed {
            id: "add".to_string(),
            diagnostics: vec![],
        };
        assert_eq!(response.status(), Some(512));

        let handler = ErrorKind::Handler {
            id: "add".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(handler.status(), Some(599));
    }

    #[test]
    fn test_annotated_status_passes_through() {
        let error = ExposerError::with_status(403, "not allowed");
        assert_eq!(error.status(), Some(403));
        assert_eq!(error.to_string(), "not allowed");
    }

    #[test]
    fn test_startup_kinds_have_no_status() {
        assert_eq!(ExposerError::configuration("missing name").status(), None);
        assert_eq!(ExposerError::message("plain").status(), None);
        assert_eq!(ExposerError::transport("connection refused").status(), None);
    }

    #[test]
    fn test_group_init_source_chain() {
        let inner = Box::new(ExposerError::message("database unreachable"));
        let error = ExposerError::new(ErrorKind::GroupInit {
            group: "users".to_string(),
            source: inner,
        });
        assert_eq!(
            error.to_string(),
            "Initialization of group 'users' failed: database unreachable"
        );
        assert_eq!(error.root_cause().to_string(), "database unreachable");
    }

    #[test]
    fn test_validation_failed_display_joins_diagnostics() {
        let error = ExposerError::new(ErrorKind::ValidationFailed {
            id: "add".to_string(),
            diagnostics: vec![
                Diagnostic::new(Some("a".to_string()), "\"x\" is not of type \"number\""),
                Diagnostic::new(None, "something else"),
            ],
        });
        assert_eq!(
            error.to_string(),
            "Invalid parameters for API add: a: \"x\" is not of type \"number\"; something else"
        );
    }

    #[test]
    fn test_kind_accessors() {
        let kind = ErrorKind::ResponseValidationFailed {
            id: "list".to_string(),
            diagnostics: vec![Diagnostic::new(None, "bad")],
        };
        assert_eq!(kind.api_id(), Some("list"));
        assert_eq!(kind.diagnostics().len(), 1);
        assert_eq!(kind.name(), "ResponseValidationFailed");
    }

    #[test]
    fn test_error_source_file_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error = ExposerError::new(ErrorKind::FileError {
            path: PathBuf::from("exposer.toml"),
            source: io_err,
        });
        assert!(error.source().is_some());
        assert_eq!(error.root_cause().to_string(), "access denied");
    }

    #[test]
    fn test_err_macro_formats_message() {
        let error: Box<ExposerError> = crate::err!("unknown group {}", "calc");
        assert_eq!(error.to_string(), "unknown group calc");
    }

    #[test]
    fn test_bail_macro_returns_early() {
        fn failing(flag: bool) -> ExposerResult<u32> {
            if flag {
                crate::bail!("flag was {}", flag);
            }
            Ok(1)
        }
        assert_eq!(failing(false).unwrap(), 1);
        assert_eq!(failing(true).unwrap_err().to_string(), "flag was true");
    }

    #[test]
    fn test_json_error_conversion() {
        fn parse() -> ExposerResult<serde_json::Value> {
            Ok(serde_json::from_str("{not json")?)
        }
        let error = parse().unwrap_err();
        assert!(error.to_string().starts_with("JSON error:"));
    }
}
