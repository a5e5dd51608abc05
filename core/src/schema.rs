//! Schema model, schema formats and validation-error printers.
//!
//! # Design
//! A `SchemaFormat` turns a schema name into a parsed [`Schema`], the
//! validator the validation engine walks. Formats are registered per file
//! extension, so `user.response.json` is resolved by whatever format is
//! registered for `json`.
//!
//! The built-in [`JsonSchemaFormat`] reads example-shaped documents:
//!
//! ```json
//! {
//!   "id": 1,
//!   "name": "Ann",
//!   "email{?}": "ann@example.com",
//!   "homepage{?}": "{url}",
//!   "tags": ["tag"]
//! }
//! ```
//!
//! String, number and boolean literals stand for their type, `null` accepts
//! anything, a single-element array describes a sequence of that element,
//! `{tag}` defers to a registered value transformer or object mapper, and a
//! `{?}` key suffix marks the field optional.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::validation::Diagnostic;

const OPTIONAL_SUFFIX: &str = "{?}";

/// Expected shape of one position in a structural value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaNode {
    Any,
    String,
    Number,
    Boolean,
    /// Handled by the value transformer or object mapper with this tag.
    Tagged(String),
    Array(Box<SchemaNode>),
    Object(Vec<SchemaField>),
}

impl SchemaNode {
    pub fn type_name(&self) -> &'static str {
        match self {
            SchemaNode::Any => "any",
            SchemaNode::String => "string",
            SchemaNode::Number => "number",
            SchemaNode::Boolean => "boolean",
            SchemaNode::Tagged(_) => "tagged value",
            SchemaNode::Array(_) => "array",
            SchemaNode::Object(_) => "object",
        }
    }

    /// Parse an example-shaped JSON document.
    pub fn from_example(example: &Value) -> Result<SchemaNode, String> {
        match example {
            Value::Null => Ok(SchemaNode::Any),
            Value::Bool(_) => Ok(SchemaNode::Boolean),
            Value::Number(_) => Ok(SchemaNode::Number),
            Value::String(s) => Ok(match parse_tag(s) {
                Some(tag) => SchemaNode::Tagged(tag.to_string()),
                None => SchemaNode::String,
            }),
            Value::Array(items) => match items.as_slice() {
                [] => Ok(SchemaNode::Array(Box::new(SchemaNode::Any))),
                [item] => Ok(SchemaNode::Array(Box::new(SchemaNode::from_example(item)?))),
                _ => Err(format!(
                    "array examples must have exactly one element, found {}",
                    items.len()
                )),
            },
            Value::Object(entries) => {
                let mut fields = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let (name, required) = match key.strip_suffix(OPTIONAL_SUFFIX) {
                        Some(name) => (name.to_string(), false),
                        None => (key.clone(), true),
                    };
                    let node = SchemaNode::from_example(value).map_err(|e| format!("{name}: {e}"))?;
                    fields.push(SchemaField {
                        name,
                        required,
                        node,
                    });
                }
                Ok(SchemaNode::Object(fields))
            }
        }
    }
}

fn parse_tag(s: &str) -> Option<&str> {
    let tag = s.strip_prefix('{')?.strip_suffix('}')?;
    if tag.is_empty() || tag == "?" {
        None
    } else {
        Some(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    pub name: String,
    pub required: bool,
    pub node: SchemaNode,
}

/// A parsed schema: the validator handed to the validation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    root: SchemaNode,
}

impl Schema {
    pub fn new(name: impl Into<String>, root: SchemaNode) -> Self {
        Self {
            name: name.into(),
            root,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &SchemaNode {
        &self.root
    }
}

/// File extension implied by a schema name, e.g. `json` for `user.json`.
pub fn schema_extension(name: &str) -> Option<&str> {
    let file = name.rsplit('/').next().unwrap_or(name);
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}

#[derive(Debug, Clone, Error)]
pub enum SchemaFormatError {
    #[error("no schema named `{0}`")]
    NotFound(String),

    #[error("schema `{name}` is invalid: {reason}")]
    Invalid { name: String, reason: String },

    #[error("could not read schemas: {0}")]
    Io(String),
}

/// Resolves schema names to parsed schemas for one file extension.
pub trait SchemaFormat: Send + Sync {
    fn schema_for_name(&self, name: &str) -> Result<Arc<Schema>, SchemaFormatError>;
}

/// In-memory store of example-shaped JSON schemas.
#[derive(Debug, Clone, Default)]
pub struct JsonSchemaFormat {
    schemas: HashMap<String, Arc<Schema>>,
}

impl JsonSchemaFormat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `document` and store it under `name`, replacing any previous
    /// schema with that name.
    pub fn insert(&mut self, name: &str, document: &Value) -> Result<(), SchemaFormatError> {
        let root = SchemaNode::from_example(document).map_err(|reason| {
            SchemaFormatError::Invalid {
                name: name.to_string(),
                reason,
            }
        })?;
        self.schemas
            .insert(name.to_string(), Arc::new(Schema::new(name, root)));
        Ok(())
    }

    pub fn with_schema(mut self, name: &str, document: &Value) -> Result<Self, SchemaFormatError> {
        self.insert(name, document)?;
        Ok(self)
    }

    /// Load every `*.json` file in `dir`, keyed by file name.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, SchemaFormatError> {
        let dir = dir.as_ref();
        let mut format = Self::new();
        let entries = std::fs::read_dir(dir).map_err(|e| SchemaFormatError::Io(e.to_string()))?;
        for entry in entries {
            let path = entry.map_err(|e| SchemaFormatError::Io(e.to_string()))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let raw = std::fs::read(&path).map_err(|e| SchemaFormatError::Io(e.to_string()))?;
            let document: Value =
                serde_json::from_slice(&raw).map_err(|e| SchemaFormatError::Invalid {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            format.insert(name, &document)?;
        }
        debug!(dir = %dir.display(), count = format.schemas.len(), "loaded schemas");
        Ok(format)
    }
}

impl SchemaFormat for JsonSchemaFormat {
    fn schema_for_name(&self, name: &str) -> Result<Arc<Schema>, SchemaFormatError> {
        self.schemas
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaFormatError::NotFound(name.to_string()))
    }
}

/// Renders validation diagnostics for humans, per schema format.
pub trait ValidationErrorPrinter: Send + Sync {
    fn render(&self, diagnostics: &[Diagnostic]) -> String;
}

/// `path: reason` pairs separated by `; `.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathListPrinter;

impl ValidationErrorPrinter for PathListPrinter {
    fn render(&self, diagnostics: &[Diagnostic]) -> String {
        diagnostics
            .iter()
            .map(|d| {
                if d.path.is_empty() {
                    format!("<root>: {}", d.reason)
                } else {
                    format!("{}: {}", d.path, d.reason)
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}
