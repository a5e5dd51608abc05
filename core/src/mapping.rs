//! Conversion between wire values and domain values.
//!
//! # Design
//! Two kinds of collaborators take part, both registered on the client by tag:
//!
//! - a [`ValueTransformer`] converts one scalar position (a `{url}` string,
//!   a `{iso8601}` date) in both directions;
//! - an [`ObjectMapper`] customises a whole request type or a `{tag}`ged
//!   sub-object. All of its hooks are optional; a hook that returns `None`
//!   declines and generic mapping applies.
//!
//! Generic mapping walks the value alongside its schema and applies
//! transformers and mappers at tagged positions. Everything else passes
//! through unchanged. Without a schema, generic mapping is the identity.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::error::RestError;
use crate::schema::{Schema, SchemaNode};
use crate::validation::{Diagnostic, Direction, WireType};

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransformError(pub String);

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct MappingError(pub String);

impl MappingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Bidirectional converter for one tagged schema position.
pub trait ValueTransformer: Send + Sync {
    /// Wire types this transformer reads; checked during validation.
    fn wire_types(&self) -> Vec<WireType> {
        vec![WireType::String]
    }

    fn object_from_response_value(&self, value: &Value) -> Result<Value, TransformError>;

    fn request_value_from_object(&self, object: &Value) -> Result<Value, TransformError>;
}

/// Optional hooks customising object/wire conversion for a request type or
/// a tagged sub-object.
///
/// Every method has a declining default. Returning `None` from a conversion
/// hook means "not handled here".
pub trait ObjectMapper: Send + Sync {
    fn response_validation_schema_name(&self) -> Option<&str> {
        None
    }

    fn object_from_response_object(&self, _response: &Value) -> Option<Result<Value, MappingError>> {
        None
    }

    fn request_validation_schema_name(&self) -> Option<&str> {
        None
    }

    fn request_object_from_object(&self, _object: &Value) -> Option<Result<Value, MappingError>> {
        None
    }
}

/// How a request type maps its objects, resolved once per operation.
#[derive(Clone)]
pub enum MapperResolution {
    Generic,
    Custom {
        tag: String,
        mapper: Arc<dyn ObjectMapper>,
    },
}

impl std::fmt::Debug for MapperResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapperResolution::Generic => f.write_str("Generic"),
            MapperResolution::Custom { tag, .. } => f.debug_struct("Custom").field("tag", tag).finish(),
        }
    }
}

impl MapperResolution {
    /// Schema name the custom mapper supplies for `direction`, if any.
    pub fn schema_name(&self, direction: Direction) -> Option<&str> {
        match self {
            MapperResolution::Generic => None,
            MapperResolution::Custom { mapper, .. } => mapper_schema_name(mapper.as_ref(), direction),
        }
    }

    /// Run the custom hook for `direction`. `None` when there is no custom
    /// mapper or it declines.
    pub fn convert(&self, value: &Value, direction: Direction) -> Option<Result<Value, MappingError>> {
        match self {
            MapperResolution::Generic => None,
            MapperResolution::Custom { mapper, .. } => mapper_convert(mapper.as_ref(), value, direction),
        }
    }
}

fn mapper_schema_name(mapper: &dyn ObjectMapper, direction: Direction) -> Option<&str> {
    match direction {
        Direction::Request => mapper.request_validation_schema_name(),
        Direction::Response => mapper.response_validation_schema_name(),
    }
}

fn mapper_convert(
    mapper: &dyn ObjectMapper,
    value: &Value,
    direction: Direction,
) -> Option<Result<Value, MappingError>> {
    match direction {
        Direction::Request => mapper.request_object_from_object(value),
        Direction::Response => mapper.object_from_response_object(value),
    }
}

/// What a `{tag}` is bound to in the client's registries.
#[derive(Clone)]
pub enum TagBinding {
    Transformer(Arc<dyn ValueTransformer>),
    Mapper {
        mapper: Arc<dyn ObjectMapper>,
        schema: Option<Arc<Schema>>,
    },
}

/// Resolves schema tags to their registered handlers.
pub trait TagBindings {
    fn bind(&self, tag: &str, direction: Direction) -> Result<TagBinding, RestError>;
}

/// Apply transformers and mappers at the tagged positions of `node`.
///
/// For `Direction::Response` this turns a wire value into a domain value,
/// for `Direction::Request` the reverse. The first rejection fails the
/// whole value with `RestError::ObjectMappingFailed`.
pub fn map_with_schema(
    value: &Value,
    node: &SchemaNode,
    direction: Direction,
    bindings: &dyn TagBindings,
) -> Result<Value, RestError> {
    let mut walk = MapWalk {
        direction,
        bindings,
        rejected: None,
    };
    walk.node(value, node, "")
}

/// Like [`map_with_schema`], but rejections by transformers and mapper hooks
/// become field diagnostics and the rejected value is kept as it was.
///
/// Only configuration problems (an unregistered tag) are returned as `Err`.
pub fn map_collecting(
    value: &Value,
    node: &SchemaNode,
    direction: Direction,
    bindings: &dyn TagBindings,
) -> Result<(Value, Vec<Diagnostic>), RestError> {
    let mut walk = MapWalk {
        direction,
        bindings,
        rejected: Some(Vec::new()),
    };
    let mapped = walk.node(value, node, "")?;
    Ok((mapped, walk.rejected.unwrap_or_default()))
}

struct MapWalk<'a> {
    direction: Direction,
    bindings: &'a dyn TagBindings,
    /// `None` fails fast; `Some` collects rejections.
    rejected: Option<Vec<Diagnostic>>,
}

impl MapWalk<'_> {
    fn node(&mut self, value: &Value, node: &SchemaNode, path: &str) -> Result<Value, RestError> {
        match (node, value) {
            (_, Value::Null) => Ok(Value::Null),
            (SchemaNode::Array(item), Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, entry) in items.iter().enumerate() {
                    out.push(self.node(entry, item, &format!("{path}[{i}]"))?);
                }
                Ok(Value::Array(out))
            }
            (SchemaNode::Object(fields), Value::Object(entries)) => {
                let mut out = Map::new();
                for (key, entry) in entries {
                    let mapped = match fields.iter().find(|f| &f.name == key) {
                        Some(field) => {
                            let field_path = if path.is_empty() {
                                key.clone()
                            } else {
                                format!("{path}.{key}")
                            };
                            self.node(entry, &field.node, &field_path)?
                        }
                        None => entry.clone(),
                    };
                    out.insert(key.clone(), mapped);
                }
                Ok(Value::Object(out))
            }
            (SchemaNode::Tagged(tag), _) => self.tagged(value, tag, path),
            _ => Ok(value.clone()),
        }
    }

    fn tagged(&mut self, value: &Value, tag: &str, path: &str) -> Result<Value, RestError> {
        let converted = match self.bindings.bind(tag, self.direction)? {
            TagBinding::Transformer(transformer) => {
                let converted = match self.direction {
                    Direction::Response => transformer.object_from_response_value(value),
                    Direction::Request => transformer.request_value_from_object(value),
                };
                converted.map_err(|e| e.to_string())
            }
            TagBinding::Mapper { mapper, schema } => {
                match mapper_convert(mapper.as_ref(), value, self.direction) {
                    Some(converted) => converted.map_err(|e| e.to_string()),
                    None => {
                        return match schema {
                            Some(schema) => self.node(value, schema.root(), path),
                            None => Ok(value.clone()),
                        };
                    }
                }
            }
        };
        match converted {
            Ok(converted) => Ok(converted),
            Err(reason) => self.reject(value, tag, path, reason),
        }
    }

    fn reject(&mut self, value: &Value, tag: &str, path: &str, reason: String) -> Result<Value, RestError> {
        match &mut self.rejected {
            Some(rejected) => {
                rejected.push(Diagnostic::new(path, format!("`{{{tag}}}`: {reason}")));
                Ok(value.clone())
            }
            None => Err(RestError::ObjectMappingFailed {
                reason: if path.is_empty() {
                    format!("`{{{tag}}}`: {reason}")
                } else {
                    format!("`{path}` (`{{{tag}}}`): {reason}")
                },
            }),
        }
    }
}

/// `{url}`: absolute URL strings, normalised by the `url` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlTransformer;

impl UrlTransformer {
    fn normalise(value: &Value) -> Result<Value, TransformError> {
        let raw = value
            .as_str()
            .ok_or_else(|| TransformError::new("expected a URL string"))?;
        let parsed = url::Url::parse(raw).map_err(|e| TransformError::new(format!("invalid URL `{raw}`: {e}")))?;
        Ok(Value::String(parsed.to_string()))
    }
}

impl ValueTransformer for UrlTransformer {
    fn object_from_response_value(&self, value: &Value) -> Result<Value, TransformError> {
        Self::normalise(value)
    }

    fn request_value_from_object(&self, object: &Value) -> Result<Value, TransformError> {
        Self::normalise(object)
    }
}

/// `{iso8601}`: ISO-8601 date-times on the wire, RFC 3339 UTC in the domain
/// value (the representation `chrono::DateTime<Utc>` deserializes from).
#[derive(Debug, Clone, Copy, Default)]
pub struct Iso8601DateTransformer;

impl Iso8601DateTransformer {
    fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(naive.and_utc());
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    fn convert(value: &Value) -> Result<Value, TransformError> {
        let raw = value
            .as_str()
            .ok_or_else(|| TransformError::new("expected a date string"))?;
        let parsed = Self::parse(raw).ok_or_else(|| TransformError::new(format!("invalid ISO-8601 date `{raw}`")))?;
        Ok(Value::String(parsed.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
    }
}

impl ValueTransformer for Iso8601DateTransformer {
    fn object_from_response_value(&self, value: &Value) -> Result<Value, TransformError> {
        Self::convert(value)
    }

    fn request_value_from_object(&self, object: &Value) -> Result<Value, TransformError> {
        Self::convert(object)
    }
}

/// `{number-string}`: numbers sent as strings on the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberStringTransformer;

impl ValueTransformer for NumberStringTransformer {
    fn wire_types(&self) -> Vec<WireType> {
        vec![WireType::String, WireType::Number]
    }

    fn object_from_response_value(&self, value: &Value) -> Result<Value, TransformError> {
        match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Ok(Value::from(i));
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| TransformError::new(format!("`{s}` is not a number")))
            }
            _ => Err(TransformError::new("expected a numeric string")),
        }
    }

    fn request_value_from_object(&self, object: &Value) -> Result<Value, TransformError> {
        match object {
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::String(_) => Ok(object.clone()),
            _ => Err(TransformError::new("expected a number")),
        }
    }
}
