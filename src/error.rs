use std::error::Error;
use std::fmt::{Display, Formatter};

use serde_json::Value as JsonValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolybaseErrorCode {
    RequestCancelled,
    Unauthorized,
    TransportError,
    FunctionNotFound,
    ArgumentTypeError,
    FunctionExecutionFailed,
    SchemaUnavailable,
    ValidationFailed,
    InvalidArgument,
    Internal,
}

impl PolybaseErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolybaseErrorCode::RequestCancelled => "polybase/request-cancelled",
            PolybaseErrorCode::Unauthorized => "polybase/unauthorized",
            PolybaseErrorCode::TransportError => "polybase/transport-error",
            PolybaseErrorCode::FunctionNotFound => "polybase/function-not-found",
            PolybaseErrorCode::ArgumentTypeError => "polybase/argument-type-error",
            PolybaseErrorCode::FunctionExecutionFailed => "polybase/function-execution-failed",
            PolybaseErrorCode::SchemaUnavailable => "polybase/schema-unavailable",
            PolybaseErrorCode::ValidationFailed => "polybase/validation-failed",
            PolybaseErrorCode::InvalidArgument => "polybase/invalid-argument",
            PolybaseErrorCode::Internal => "polybase/internal",
        }
    }
}

#[derive(Clone, Debug)]
pub struct PolybaseError {
    pub code: PolybaseErrorCode,
    message: String,
    status: Option<u16>,
    reason: Option<String>,
    parameter: Option<usize>,
    body: Option<JsonValue>,
}

impl PolybaseError {
    pub fn new(code: PolybaseErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            reason: None,
            parameter: None,
            body: None,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status reported by the server, when the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Machine readable reason reported by the server (`error.reason`) or the sender.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Zero-based position of the offending argument for `argument-type-error`.
    pub fn parameter(&self) -> Option<usize> {
        self.parameter
    }

    /// Raw response body of a failed request, if one was received.
    pub fn body(&self) -> Option<&JsonValue> {
        self.body.as_ref()
    }

    pub(crate) fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub(crate) fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub(crate) fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    fn with_parameter(mut self, parameter: usize) -> Self {
        self.parameter = Some(parameter);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == PolybaseErrorCode::RequestCancelled
    }
}

impl Display for PolybaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for PolybaseError {}

pub type PolybaseResult<T> = Result<T, PolybaseError>;

pub fn request_cancelled() -> PolybaseError {
    PolybaseError::new(PolybaseErrorCode::RequestCancelled, "Request was cancelled")
}

pub fn unauthorized(message: impl Into<String>) -> PolybaseError {
    PolybaseError::new(PolybaseErrorCode::Unauthorized, message).with_status(401)
}

pub fn transport_error(message: impl Into<String>) -> PolybaseError {
    PolybaseError::new(PolybaseErrorCode::TransportError, message)
}

pub fn function_not_found(collection_id: &str, function_name: &str) -> PolybaseError {
    PolybaseError::new(
        PolybaseErrorCode::FunctionNotFound,
        format!("Function `{function_name}` not found in collection `{collection_id}`"),
    )
}

pub fn argument_type_error(parameter: usize, expected: &str) -> PolybaseError {
    PolybaseError::new(
        PolybaseErrorCode::ArgumentTypeError,
        format!("Argument {parameter} must be a {expected}"),
    )
    .with_parameter(parameter)
}

pub fn function_execution_failed(message: impl Into<String>) -> PolybaseError {
    PolybaseError::new(PolybaseErrorCode::FunctionExecutionFailed, message)
}

pub fn schema_unavailable(message: impl Into<String>) -> PolybaseError {
    PolybaseError::new(PolybaseErrorCode::SchemaUnavailable, message)
}

pub fn validation_failed(message: impl Into<String>) -> PolybaseError {
    PolybaseError::new(PolybaseErrorCode::ValidationFailed, message)
}

pub fn invalid_argument(message: impl Into<String>) -> PolybaseError {
    PolybaseError::new(PolybaseErrorCode::InvalidArgument, message)
}

pub fn internal_error(message: impl Into<String>) -> PolybaseError {
    PolybaseError::new(PolybaseErrorCode::Internal, message)
}
