//! Classification of transport failures into domain errors.

use serde_json::Value;

use crate::error::RestError;
use crate::http::ResponseInfo;

/// Hook turning a transport failure into the error the caller sees.
///
/// `body` is the failed response decoded with the request's response
/// serializer, when there was a body and it decoded.
pub trait ErrorHandler: Send + Sync {
    fn classify(&self, error: RestError, body: Option<&Value>, info: &ResponseInfo) -> RestError;
}

/// Leaves transport errors as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn classify(&self, error: RestError, _body: Option<&Value>, _info: &ResponseInfo) -> RestError {
        error
    }
}

/// Extracts `{"error": {"message": ..}}` / `{"message": ..}` style payloads
/// from failed responses into `RestError::ServerError`.
#[derive(Debug, Clone)]
pub struct MessageFieldErrorHandler {
    field: String,
}

impl MessageFieldErrorHandler {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    fn message<'a>(&self, body: &'a Value) -> Option<&'a str> {
        body.get(&self.field)
            .and_then(Value::as_str)
            .or_else(|| body.get("error").and_then(|e| e.get(&self.field)).and_then(Value::as_str))
    }
}

impl Default for MessageFieldErrorHandler {
    fn default() -> Self {
        Self::new("message")
    }
}

impl ErrorHandler for MessageFieldErrorHandler {
    fn classify(&self, error: RestError, body: Option<&Value>, info: &ResponseInfo) -> RestError {
        let (Some(status), Some(body)) = (info.status(), body) else {
            return error;
        };
        match self.message(body) {
            Some(message) => RestError::ServerError {
                status,
                message: message.to_string(),
                payload: Some(body.clone()),
            },
            None => error,
        }
    }
}
