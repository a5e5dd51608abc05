//! Declarative description of one API operation.
//!
//! # Design
//! A `RequestDescriptor` is an immutable snapshot handed to
//! `Client::send`. Serialization kinds left unset fall back to the client's
//! defaults at dispatch time. Path parameters fill `{name}` placeholders;
//! parameters no placeholder consumes become the query string.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use serde::Serialize;
use serde_json::Value;

use crate::error::RestError;
use crate::http::HttpMethod;
use crate::serialization::SerializationKind;

#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    /// Path template with `{name}` placeholders.
    pub path: String,
    pub path_params: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub request_serialization: Option<SerializationKind>,
    pub response_serialization: Option<SerializationKind>,
    pub headers: Vec<(String, String)>,
    pub request_schema_name: Option<String>,
    pub response_schema_name: Option<String>,
    pub custom_mapper_tag: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            path_params: BTreeMap::new(),
            body: None,
            request_serialization: None,
            response_serialization: None,
            headers: Vec::new(),
            request_schema_name: None,
            response_schema_name: None,
            custom_mapper_tag: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn path_param(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.path_params.insert(name.into(), value.to_string());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Use a serializable domain object as the body.
    pub fn body_object<T: Serialize + ?Sized>(self, object: &T) -> Result<Self, RestError> {
        let value = serde_json::to_value(object).map_err(|e| RestError::RequestSerializationFailed {
            reason: e.to_string(),
        })?;
        Ok(self.body(value))
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn request_serialization(mut self, kind: impl Into<SerializationKind>) -> Self {
        self.request_serialization = Some(kind.into());
        self
    }

    pub fn response_serialization(mut self, kind: impl Into<SerializationKind>) -> Self {
        self.response_serialization = Some(kind.into());
        self
    }

    pub fn request_schema(mut self, name: impl Into<String>) -> Self {
        self.request_schema_name = Some(name.into());
        self
    }

    pub fn response_schema(mut self, name: impl Into<String>) -> Self {
        self.response_schema_name = Some(name.into());
        self
    }

    pub fn mapper(mut self, tag: impl Into<String>) -> Self {
        self.custom_mapper_tag = Some(tag.into());
        self
    }

    /// Substitute placeholders and append unused parameters as a query
    /// string. Values are percent-encoded.
    pub fn resolve_path(&self) -> Result<String, RestError> {
        let mut resolved = String::with_capacity(self.path.len());
        let mut used = BTreeSet::new();
        let mut rest = self.path.as_str();

        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|i| open + i) else {
                break;
            };
            let name = &rest[open + 1..close];
            resolved.push_str(&rest[..open]);
            let value = self
                .path_params
                .get(name)
                .ok_or_else(|| RestError::MissingPathParameter {
                    name: name.to_string(),
                })?;
            resolved.push_str(&urlencoding::encode(value));
            used.insert(name);
            rest = &rest[close + 1..];
        }
        resolved.push_str(rest);

        let query: Vec<String> = self
            .path_params
            .iter()
            .filter(|(name, _)| !used.contains(name.as_str()))
            .map(|(name, value)| format!("{}={}", urlencoding::encode(name), urlencoding::encode(value)))
            .collect();
        if !query.is_empty() {
            resolved.push(if resolved.contains('?') { '&' } else { '?' });
            resolved.push_str(&query.join("&"));
        }
        Ok(resolved)
    }
}
