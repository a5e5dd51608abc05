//! Error types for the REST mapping client.
//!
//! # Design
//! `RestError` is the closed taxonomy every completion carries on failure.
//! Configuration errors (unregistered tags, unresolvable schemas) are kept
//! apart from runtime failures so callers can tell a broken setup from a
//! misbehaving server; `is_configuration_error` exposes that split.
//!
//! Collaborators report failures with their own small error types, which the
//! pipeline wraps into the matching `RestError` variant.

use serde_json::Value;
use thiserror::Error;

use crate::serialization::SerializationKind;
use crate::validation::{Diagnostic, Direction};

/// Errors delivered to the completion of an operation.
#[derive(Debug, Error)]
pub enum RestError {
    /// A `{name}` placeholder in the path has no matching path parameter.
    #[error("path parameter `{name}` is missing")]
    MissingPathParameter { name: String },

    #[error("no {direction} serializer registered for `{kind}`")]
    UnregisteredSerializer {
        kind: SerializationKind,
        direction: Direction,
    },

    /// No schema format handles the extension of `schema_name`.
    #[error("no schema format registered for extension `{extension}` (schema `{schema_name}`)")]
    UnknownSchemaFormat {
        schema_name: String,
        extension: String,
    },

    #[error("schema `{schema_name}` not found: {reason}")]
    SchemaNotFound { schema_name: String, reason: String },

    #[error("no object mapper registered for tag `{tag}`")]
    UnregisteredObjectMapper { tag: String },

    #[error("no value transformer or object mapper registered for tag `{tag}`")]
    UnregisteredValueTransformer { tag: String },

    /// The tokio runtime needed to run the operation is not available.
    #[error("no async runtime available to dispatch the request")]
    RuntimeUnavailable,

    /// The request body failed validation; nothing was sent.
    #[error("request validation failed: {0}")]
    RequestValidationFailed(ValidationReport),

    #[error("request body could not be serialized: {reason}")]
    RequestSerializationFailed { reason: String },

    /// The `Connection` refused to compose a transport request.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A server-defined error payload, extracted by an `ErrorHandler`.
    #[error("server error ({status}): {message}")]
    ServerError {
        status: u16,
        message: String,
        payload: Option<Value>,
    },

    /// The response bytes could not be decoded. `body` holds the raw bytes.
    #[error("response could not be deserialized: {reason}")]
    ResponseDeserializationFailed { reason: String, body: Vec<u8> },

    #[error("response validation failed: {0}")]
    ResponseValidationFailed(ValidationReport),

    /// A mapper, transformer or the final typed decode rejected the value.
    #[error("object mapping failed: {reason}")]
    ObjectMappingFailed { reason: String },

    #[error("post-processing failed: {reason}")]
    PostProcessingFailed { reason: String },

    #[error("operation cancelled")]
    OperationCancelled,
}

impl RestError {
    /// True for errors caused by client setup rather than by the exchange.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            RestError::UnregisteredSerializer { .. }
                | RestError::UnknownSchemaFormat { .. }
                | RestError::SchemaNotFound { .. }
                | RestError::UnregisteredObjectMapper { .. }
                | RestError::UnregisteredValueTransformer { .. }
                | RestError::RuntimeUnavailable
        )
    }

    /// HTTP status carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RestError::Transport(e) => e.status_code,
            RestError::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Field diagnostics for validation failures.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            RestError::RequestValidationFailed(report)
            | RestError::ResponseValidationFailed(report) => &report.diagnostics,
            _ => &[],
        }
    }
}

/// Coarse classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The host could not be reached (DNS, refused, offline).
    Connectivity,
    Timeout,
    /// The exchange completed with a non-2xx status.
    Status,
    /// The operation task ended without producing a result.
    Aborted,
    Other,
}

/// A failure reported by the `Connection`, or a non-2xx response.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status_code: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
        }
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connectivity, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn status(status: u16) -> Self {
        Self {
            kind: TransportErrorKind::Status,
            status_code: Some(status),
            message: format!("HTTP {status}"),
        }
    }
}

/// Field diagnostics from a failed validation, plus their rendered form.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub schema_name: String,
    pub diagnostics: Vec<Diagnostic>,
    /// Output of the `ValidationErrorPrinter` for the schema's format.
    pub rendered: String,
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "schema `{}`: {}", self.schema_name, self.rendered)
    }
}
