//! Client-wide configuration.
//!
//! Every field has a default, so a config can be deserialized from a partial
//! document (`{"should_suppress_warnings": true}`) in whatever format the
//! host application uses.

use serde::{Deserialize, Serialize};

use crate::serialization::SerializationKind;
use crate::validation::ValidationOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub default_request_serialization: SerializationKind,
    pub default_response_serialization: SerializationKind,
    pub validation_options: ValidationOptions,
    /// Silences developer warnings only; errors are always delivered.
    pub should_suppress_warnings: bool,
    /// Sent with every request; descriptor headers win on collision.
    pub default_headers: Vec<(String, String)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_request_serialization: SerializationKind::json(),
            default_response_serialization: SerializationKind::json(),
            validation_options: ValidationOptions::default(),
            should_suppress_warnings: false,
            default_headers: Vec::new(),
        }
    }
}
