//! Wire-format encoders and decoders between structural values and bytes.
//!
//! A `SerializationKind` is only a tag. It is resolved against the client's
//! serializer registries when an operation is dispatched, so an unknown tag
//! surfaces as `RestError::UnregisteredSerializer` on that operation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Tag naming a registered request/response serializer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerializationKind(String);

impl SerializationKind {
    pub const JSON: &'static str = "json";
    pub const FORM_URL_ENCODED: &'static str = "form-url-encoded";
    pub const PLAIN: &'static str = "plain";
    pub const RAW: &'static str = "raw";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn json() -> Self {
        Self::new(Self::JSON)
    }

    pub fn form_url_encoded() -> Self {
        Self::new(Self::FORM_URL_ENCODED)
    }

    pub fn plain() -> Self {
        Self::new(Self::PLAIN)
    }

    pub fn raw() -> Self {
        Self::new(Self::RAW)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SerializationKind {
    fn default() -> Self {
        Self::json()
    }
}

impl fmt::Display for SerializationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SerializationKind {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Failure to encode or decode a body.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct SerializerError(pub String);

impl SerializerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Encodes a request value into body bytes.
pub trait RequestSerializer: Send + Sync {
    /// `Content-Type` sent with the body, if the format has one.
    fn content_type(&self) -> Option<&str> {
        None
    }

    fn body_from_value(&self, value: &Value) -> Result<Vec<u8>, SerializerError>;
}

/// Decodes response body bytes into a structural value.
pub trait ResponseSerializer: Send + Sync {
    /// `Accept` header value advertised for this format.
    fn accept(&self) -> Option<&str> {
        None
    }

    /// Whether a response with this `Content-Type` can be decoded.
    fn accepts_content_type(&self, _content_type: Option<&str>) -> bool {
        true
    }

    fn value_from_body(&self, body: &[u8]) -> Result<Value, SerializerError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl RequestSerializer for JsonSerializer {
    fn content_type(&self) -> Option<&str> {
        Some("application/json")
    }

    fn body_from_value(&self, value: &Value) -> Result<Vec<u8>, SerializerError> {
        serde_json::to_vec(value).map_err(|e| SerializerError::new(e.to_string()))
    }
}

impl ResponseSerializer for JsonSerializer {
    fn accept(&self) -> Option<&str> {
        Some("application/json")
    }

    fn accepts_content_type(&self, content_type: Option<&str>) -> bool {
        match content_type {
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("json") || ct.starts_with("text/plain")
            }
            None => true,
        }
    }

    fn value_from_body(&self, body: &[u8]) -> Result<Value, SerializerError> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(body).map_err(|e| SerializerError::new(e.to_string()))
    }
}

/// `application/x-www-form-urlencoded` for flat objects.
///
/// Arrays of scalars become repeated keys, `null` fields are skipped and
/// nested objects are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormUrlEncodedSerializer;

impl RequestSerializer for FormUrlEncodedSerializer {
    fn content_type(&self) -> Option<&str> {
        Some("application/x-www-form-urlencoded")
    }

    fn body_from_value(&self, value: &Value) -> Result<Vec<u8>, SerializerError> {
        let Value::Object(fields) = value else {
            return Err(SerializerError::new(
                "form encoding requires an object at the top level",
            ));
        };
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        for (key, field) in fields {
            match field {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        form.append_pair(key, &form_scalar(key, item)?);
                    }
                }
                other => {
                    form.append_pair(key, &form_scalar(key, other)?);
                }
            }
        }
        Ok(form.finish().into_bytes())
    }
}

fn form_scalar(key: &str, value: &Value) -> Result<String, SerializerError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(SerializerError::new(format!(
            "field `{key}` cannot be form encoded"
        ))),
    }
}

/// UTF-8 text bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextSerializer;

impl RequestSerializer for PlainTextSerializer {
    fn content_type(&self) -> Option<&str> {
        Some("text/plain; charset=utf-8")
    }

    fn body_from_value(&self, value: &Value) -> Result<Vec<u8>, SerializerError> {
        match value {
            Value::String(s) => Ok(s.clone().into_bytes()),
            Value::Number(n) => Ok(n.to_string().into_bytes()),
            Value::Bool(b) => Ok(b.to_string().into_bytes()),
            _ => Err(SerializerError::new("plain text body must be a scalar")),
        }
    }
}

impl ResponseSerializer for PlainTextSerializer {
    fn accept(&self) -> Option<&str> {
        Some("text/plain")
    }

    fn value_from_body(&self, body: &[u8]) -> Result<Value, SerializerError> {
        String::from_utf8(body.to_vec())
            .map(Value::String)
            .map_err(|e| SerializerError::new(e.to_string()))
    }
}

/// Opaque bytes, represented structurally as an array of byte values so a
/// `Vec<u8>` domain type maps straight through serde.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSerializer;

impl RequestSerializer for RawSerializer {
    fn content_type(&self) -> Option<&str> {
        Some("application/octet-stream")
    }

    fn body_from_value(&self, value: &Value) -> Result<Vec<u8>, SerializerError> {
        match value {
            Value::String(s) => Ok(s.clone().into_bytes()),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| SerializerError::new("raw body must contain byte values"))
                })
                .collect(),
            _ => Err(SerializerError::new(
                "raw body must be a string or an array of bytes",
            )),
        }
    }
}

impl ResponseSerializer for RawSerializer {
    fn value_from_body(&self, body: &[u8]) -> Result<Value, SerializerError> {
        Ok(Value::Array(
            body.iter().map(|b| Value::from(*b)).collect(),
        ))
    }
}
