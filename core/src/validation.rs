//! Validation engine: checks a structural value against a parsed schema.
//!
//! # Design
//! Validation is a pure transform. It returns the value the rest of the
//! pipeline should use together with field diagnostics, because leniency
//! options may rewrite the value:
//!
//! - an empty object at a field position can be read as `null` (per
//!   direction, separately for optional and required fields);
//! - keys the schema does not mention can be stripped instead of being
//!   reported as unexpected.
//!
//! `{tag}` nodes are resolved through a [`TagResolver`], so the engine stays
//! independent of the client's registries.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RestError;
use crate::schema::{Schema, SchemaField, SchemaNode};

const MAX_DEPTH: usize = 64;

/// Which side of the exchange a value, serializer or schema belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Request => f.write_str("request"),
            Direction::Response => f.write_str("response"),
        }
    }
}

/// Leniency flags for validation. Every flag is independent.
///
/// The default treats an empty object as `null` for optional fields in both
/// directions and leaves everything else strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    pub treat_empty_dictionary_as_nil_in_responses_for_optional: bool,
    pub treat_empty_dictionary_as_nil_in_responses_for_required: bool,
    pub treat_empty_dictionary_as_nil_in_requests_for_optional: bool,
    pub treat_empty_dictionary_as_nil_in_requests_for_required: bool,
    pub remove_values_missed_in_scheme_for_requests: bool,
    pub remove_values_missed_in_scheme_for_responses: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            treat_empty_dictionary_as_nil_in_responses_for_optional: true,
            treat_empty_dictionary_as_nil_in_requests_for_optional: true,
            ..Self::none()
        }
    }
}

impl ValidationOptions {
    /// Every flag cleared.
    pub fn none() -> Self {
        Self {
            treat_empty_dictionary_as_nil_in_responses_for_optional: false,
            treat_empty_dictionary_as_nil_in_responses_for_required: false,
            treat_empty_dictionary_as_nil_in_requests_for_optional: false,
            treat_empty_dictionary_as_nil_in_requests_for_required: false,
            remove_values_missed_in_scheme_for_requests: false,
            remove_values_missed_in_scheme_for_responses: false,
        }
    }

    pub fn treats_empty_object_as_nil(&self, direction: Direction, required: bool) -> bool {
        match (direction, required) {
            (Direction::Response, false) => {
                self.treat_empty_dictionary_as_nil_in_responses_for_optional
            }
            (Direction::Response, true) => {
                self.treat_empty_dictionary_as_nil_in_responses_for_required
            }
            (Direction::Request, false) => {
                self.treat_empty_dictionary_as_nil_in_requests_for_optional
            }
            (Direction::Request, true) => {
                self.treat_empty_dictionary_as_nil_in_requests_for_required
            }
        }
    }

    pub fn removes_values_missing_in_schema(&self, direction: Direction) -> bool {
        match direction {
            Direction::Request => self.remove_values_missed_in_scheme_for_requests,
            Direction::Response => self.remove_values_missed_in_scheme_for_responses,
        }
    }
}

/// One field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Dotted path with `[i]` indices; empty for the root.
    pub path: String,
    pub reason: String,
}

impl Diagnostic {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Structural kinds a value can take on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl WireType {
    pub fn of(value: &Value) -> Option<WireType> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(WireType::Boolean),
            Value::Number(_) => Some(WireType::Number),
            Value::String(_) => Some(WireType::String),
            Value::Array(_) => Some(WireType::Array),
            Value::Object(_) => Some(WireType::Object),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WireType::String => "string",
            WireType::Number => "number",
            WireType::Boolean => "boolean",
            WireType::Object => "object",
            WireType::Array => "array",
        }
    }
}

/// What a `{tag}` in a schema refers to.
#[derive(Debug, Clone)]
pub enum TagTarget {
    /// A value transformer accepting these wire types.
    Transformer(Vec<WireType>),
    /// An object mapper, with its schema for the direction if it names one.
    Mapper(Option<Arc<Schema>>),
}

/// Looks up schema tags while validating.
pub trait TagResolver {
    fn resolve_tag(&self, tag: &str, direction: Direction) -> Result<TagTarget, RestError>;
}

/// Resolver for schemas that use no tags; any tag is unregistered.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTags;

impl TagResolver for NoTags {
    fn resolve_tag(&self, tag: &str, _direction: Direction) -> Result<TagTarget, RestError> {
        Err(RestError::UnregisteredValueTransformer {
            tag: tag.to_string(),
        })
    }
}

/// Result of a validation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    /// The value after leniency rewrites; use this downstream.
    pub value: Value,
    pub diagnostics: Vec<Diagnostic>,
}

impl Validated {
    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Validate `value` against `schema`.
///
/// Returns `Err` only for configuration problems (an unresolvable tag);
/// shape problems are reported as diagnostics.
pub fn validate(
    value: &Value,
    schema: &Schema,
    options: &ValidationOptions,
    direction: Direction,
    resolver: &dyn TagResolver,
) -> Result<Validated, RestError> {
    walk(value, schema, options, direction, resolver, false)
}

/// Validate a domain object before tagged positions are converted.
///
/// Leniency rewrites, stripping and the shape checks of untagged positions
/// apply as in [`validate`]. Values at `{tag}` positions are left unchecked:
/// their wire shape only exists once the transformer or mapper has run.
pub fn validate_object(
    value: &Value,
    schema: &Schema,
    options: &ValidationOptions,
    direction: Direction,
    resolver: &dyn TagResolver,
) -> Result<Validated, RestError> {
    walk(value, schema, options, direction, resolver, true)
}

fn walk(
    value: &Value,
    schema: &Schema,
    options: &ValidationOptions,
    direction: Direction,
    resolver: &dyn TagResolver,
    opaque_tags: bool,
) -> Result<Validated, RestError> {
    let mut walker = Walker {
        options,
        direction,
        resolver,
        opaque_tags,
        diagnostics: Vec::new(),
    };
    let value = walker.check(value, schema.root(), "", 0)?;
    Ok(Validated {
        value,
        diagnostics: walker.diagnostics,
    })
}

struct Walker<'a> {
    options: &'a ValidationOptions,
    direction: Direction,
    resolver: &'a dyn TagResolver,
    opaque_tags: bool,
    diagnostics: Vec<Diagnostic>,
}

impl Walker<'_> {
    fn report(&mut self, path: &str, reason: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(path, reason));
    }

    fn mismatch(&mut self, path: &str, expected: &str, found: &Value) {
        self.report(
            path,
            format!("expected {expected}, found {}", describe(found)),
        );
    }

    fn check(
        &mut self,
        value: &Value,
        node: &SchemaNode,
        path: &str,
        depth: usize,
    ) -> Result<Value, RestError> {
        if depth > MAX_DEPTH {
            self.report(path, "schema nesting too deep");
            return Ok(value.clone());
        }
        match node {
            SchemaNode::Any => {}
            SchemaNode::String if !value.is_string() => self.mismatch(path, "string", value),
            SchemaNode::Number if !value.is_number() => self.mismatch(path, "number", value),
            SchemaNode::Boolean if !value.is_boolean() => self.mismatch(path, "boolean", value),
            SchemaNode::String | SchemaNode::Number | SchemaNode::Boolean => {}
            SchemaNode::Array(item) => {
                let Value::Array(items) = value else {
                    self.mismatch(path, "array", value);
                    return Ok(value.clone());
                };
                let mut out = Vec::with_capacity(items.len());
                for (i, entry) in items.iter().enumerate() {
                    out.push(self.check(entry, item, &format!("{path}[{i}]"), depth + 1)?);
                }
                return Ok(Value::Array(out));
            }
            SchemaNode::Object(fields) => {
                let Value::Object(entries) = value else {
                    self.mismatch(path, "object", value);
                    return Ok(value.clone());
                };
                return self.check_object(entries, fields, path, depth).map(Value::Object);
            }
            SchemaNode::Tagged(tag) => match self.resolver.resolve_tag(tag, self.direction)? {
                _ if self.opaque_tags => {}
                TagTarget::Transformer(accepted) => {
                    let ok = WireType::of(value).is_some_and(|t| accepted.contains(&t));
                    if !ok {
                        let expected = accepted
                            .iter()
                            .map(WireType::name)
                            .collect::<Vec<_>>()
                            .join(" or ");
                        self.mismatch(path, &format!("{expected} for `{{{tag}}}`"), value);
                    }
                }
                TagTarget::Mapper(Some(schema)) => {
                    return self.check(value, schema.root(), path, depth + 1);
                }
                TagTarget::Mapper(None) => {}
            },
        }
        Ok(value.clone())
    }

    fn check_object(
        &mut self,
        entries: &Map<String, Value>,
        fields: &[SchemaField],
        path: &str,
        depth: usize,
    ) -> Result<Map<String, Value>, RestError> {
        let mut out = Map::new();
        for field in fields {
            let field_path = join(path, &field.name);
            match entries.get(&field.name) {
                None if field.required => self.report(&field_path, "required field is missing"),
                None => {}
                Some(Value::Null) => {
                    if field.required {
                        self.report(&field_path, "required field is null");
                    }
                    out.insert(field.name.clone(), Value::Null);
                }
                Some(Value::Object(m))
                    if m.is_empty()
                        && self
                            .options
                            .treats_empty_object_as_nil(self.direction, field.required) =>
                {
                    out.insert(field.name.clone(), Value::Null);
                }
                Some(entry) => {
                    let checked = self.check(entry, &field.node, &field_path, depth + 1)?;
                    out.insert(field.name.clone(), checked);
                }
            }
        }

        let strip = self.options.removes_values_missing_in_schema(self.direction);
        for (key, entry) in entries {
            if fields.iter().any(|f| &f.name == key) {
                continue;
            }
            if !strip {
                self.report(&join(path, key), "unexpected field");
                out.insert(key.clone(), entry.clone());
            }
        }
        Ok(out)
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn describe(value: &Value) -> &'static str {
    match WireType::of(value) {
        Some(t) => t.name(),
        None => "null",
    }
}
