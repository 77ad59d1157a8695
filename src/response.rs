//! # Response Model
//!
//! Normalizes every handler outcome into a tagged union: either
//! `{"success": true, "data": ...}` or
//! `{"success": false, "error": {"type", "message", "args", "trace"}}`.
//!
//! The error branch is built from plain strings and values captured at
//! construction time, never from a live error object, so encoding an error
//! response cannot itself fail.

use std::backtrace::Backtrace;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A normalized handler outcome.
///
/// Every dispatched handler execution yields exactly one `Response`; neither
/// unwrapped values nor errors ever reach the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Ok(OkResponse),
    Err(ErrResponse),
}

impl Response {
    /// Build a success response around a handler's return value.
    pub fn ok(data: Value) -> Self {
        Response::Ok(OkResponse {
            success: true,
            data,
        })
    }

    /// Build an error response from captured error metadata.
    pub fn err(error: impl Into<ErrorInfo>) -> Self {
        Response::Err(ErrResponse {
            success: false,
            error: error.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Ok(_))
    }
}

/// Successful reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OkResponse {
    pub success: bool,
    pub data: Value,
}

/// Reply describing a failure while processing a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrResponse {
    pub success: bool,
    pub error: ErrorInfo,
}

/// Error metadata derived once, at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// The error's type name, e.g. `ParseIntError`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable message (the error's Display form).
    pub message: String,
    /// Structured arguments the error carried, if any.
    pub args: Vec<Value>,
    /// Formatted backtrace captured where the error crossed into the
    /// response model.
    pub trace: String,
}

impl ErrorInfo {
    /// Capture a panic payload from `catch_unwind`.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked".to_string());

        Self {
            kind: "panic".to_string(),
            message,
            args: Vec::new(),
            trace: Backtrace::force_capture().to_string(),
        }
    }
}

impl From<HandlerFailure> for ErrorInfo {
    fn from(failure: HandlerFailure) -> Self {
        Self {
            kind: failure.kind,
            message: failure.message,
            args: failure.args,
            trace: failure.trace,
        }
    }
}

/// The error type route handlers return.
///
/// A blanket `From` lets handlers use `?` on any `std::error::Error`; the
/// conversion eagerly captures the concrete type name, the Display form,
/// and a backtrace, then drops the original error. That guarantees the
/// resulting [`ErrorInfo`] is always plain data the codec can encode.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub kind: String,
    pub message: String,
    pub args: Vec<Value>,
    pub trace: String,
}

impl HandlerFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            args: Vec::new(),
            trace: Backtrace::force_capture().to_string(),
        }
    }

    /// Shorthand for an ad hoc failure with the default kind.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new("HandlerFailure", message)
    }

    /// Attach structured arguments to the failure.
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl<E> From<E> for HandlerFailure
where
    E: std::error::Error,
{
    fn from(err: E) -> Self {
        Self {
            kind: short_type_name::<E>().to_string(),
            message: err.to_string(),
            args: Vec::new(),
            trace: Backtrace::force_capture().to_string(),
        }
    }
}

/// Last path segment of a type name: `std::num::ParseIntError` -> `ParseIntError`.
fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_response_wire_shape() {
        let response = Response::ok(json!({"answer": 42}));
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded, json!({"success": true, "data": {"answer": 42}}));
    }

    #[test]
    fn err_response_wire_shape() {
        let response = Response::err(ErrorInfo {
            kind: "ValueError".to_string(),
            message: "oops".to_string(),
            args: vec![json!("oops")],
            trace: "trace".to_string(),
        });
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(
            encoded,
            json!({
                "success": false,
                "error": {
                    "type": "ValueError",
                    "message": "oops",
                    "args": ["oops"],
                    "trace": "trace",
                },
            })
        );
    }

    #[test]
    fn responses_deserialize_back_to_the_right_variant() {
        let ok: Response =
            serde_json::from_value(json!({"success": true, "data": "hello"})).unwrap();
        assert!(ok.is_success());

        let err: Response = serde_json::from_value(json!({
            "success": false,
            "error": {"type": "E", "message": "m", "args": [], "trace": ""},
        }))
        .unwrap();
        assert!(!err.is_success());
    }

    #[test]
    fn failure_captures_error_type_and_message() {
        let parse_err = "not a number".parse::<i64>().unwrap_err();
        let failure = HandlerFailure::from(parse_err);

        assert_eq!(failure.kind, "ParseIntError");
        assert!(failure.message.contains("invalid digit"));
        assert!(!failure.trace.is_empty());
    }

    #[test]
    fn failure_carries_structured_args() {
        let failure = HandlerFailure::message("oops").with_args(vec![json!("oops"), json!(2)]);
        let info = ErrorInfo::from(failure);

        assert_eq!(info.kind, "HandlerFailure");
        assert_eq!(info.args, vec![json!("oops"), json!(2)]);
    }
}
