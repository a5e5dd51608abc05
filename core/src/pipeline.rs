//! The request/response pipeline behind `Client::send`.
//!
//! # Design
//! One `Pipeline` value holds everything an operation reads: the connection,
//! the registries and the configuration. The client shares it behind an
//! `Arc`, so in-flight operations read a consistent snapshot while new
//! registrations produce a fresh copy for later dispatches.
//!
//! An operation runs in fixed stages:
//!
//! 1. resolve serializers, mapper, schemas and every tag the schemas use
//!    (configuration errors stop here, before any I/O);
//! 2. check and map the body, validate the wire value and serialize it,
//!    then let the connection compose the transport request;
//! 3. send and classify the outcome (transport errors and non-2xx statuses
//!    go through the `ErrorHandler`);
//! 4. deserialize, validate, map, post-process and decode into `T`.

use std::collections::HashSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::Completion;
use crate::connection::Connection;
use crate::config::ClientConfig;
use crate::descriptor::RequestDescriptor;
use crate::error::{RestError, TransportError, ValidationReport};
use crate::error_handler::ErrorHandler;
use crate::http::{set_header, HttpRequest, HttpResponse, RequestParts, ResponseInfo};
use crate::mapping::{map_collecting, map_with_schema, MapperResolution, ObjectMapper, TagBinding, TagBindings, ValueTransformer};
use crate::post_process::{run_chain, PostProcessor};
use crate::progress::ProgressHandle;
use crate::registry::Registry;
use crate::schema::{schema_extension, PathListPrinter, Schema, SchemaFormat, SchemaNode, ValidationErrorPrinter};
use crate::serialization::{RequestSerializer, ResponseSerializer, SerializationKind};
use crate::validation::{validate, validate_object, Diagnostic, Direction, TagResolver, TagTarget};

#[derive(Clone)]
pub(crate) struct Pipeline {
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) error_handler: Arc<dyn ErrorHandler>,
    pub(crate) config: ClientConfig,
    pub(crate) value_transformers: Registry<dyn ValueTransformer>,
    pub(crate) object_mappers: Registry<dyn ObjectMapper>,
    pub(crate) request_serializers: Registry<dyn RequestSerializer>,
    pub(crate) response_serializers: Registry<dyn ResponseSerializer>,
    pub(crate) schema_formats: Registry<dyn SchemaFormat>,
    pub(crate) error_printers: Registry<dyn ValidationErrorPrinter>,
    pub(crate) post_processors: Vec<Arc<dyn PostProcessor>>,
}

/// Collaborators resolved for one operation.
struct Resolved {
    request_serializer: Arc<dyn RequestSerializer>,
    response_serializer: Arc<dyn ResponseSerializer>,
    mapper: MapperResolution,
    request_schema: Option<Arc<Schema>>,
    response_schema: Option<Arc<Schema>>,
}

impl Pipeline {
    pub(crate) async fn execute<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
        handle: &ProgressHandle,
    ) -> Completion<T> {
        let prepared = self
            .resolve(descriptor)
            .and_then(|resolved| self.build_request(descriptor, &resolved).map(|request| (resolved, request)));
        let (resolved, request) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                debug!(%error, "request failed before dispatch");
                return Completion::new(Err(error), ResponseInfo::empty());
            }
        };

        debug!(url = %request.url, "dispatching request");
        let response = match self.connection.send(request, handle.transfer_context()).await {
            Ok(response) => response,
            Err(error) => {
                let info = ResponseInfo::empty();
                let error = self.error_handler.classify(error.into(), None, &info);
                debug!(%error, "transport failed");
                return Completion::new(Err(error), info);
            }
        };

        let info = ResponseInfo::from(&response);
        if !response.is_success() {
            let error = self.classify_status(&resolved, &response, &info);
            debug!(status = response.status, %error, "request failed");
            return Completion::new(Err(error), info);
        }

        let result = self.process_response(descriptor, &resolved, &response);
        match &result {
            Ok(_) => debug!(status = response.status, "request succeeded"),
            Err(error) => debug!(status = response.status, %error, "response rejected"),
        }
        Completion::new(result, info)
    }

    fn resolve(&self, descriptor: &RequestDescriptor) -> Result<Resolved, RestError> {
        let request_kind = descriptor
            .request_serialization
            .as_ref()
            .unwrap_or(&self.config.default_request_serialization);
        let request_serializer = self
            .request_serializers
            .get(request_kind.as_str())
            .ok_or_else(|| unregistered(request_kind, Direction::Request))?;

        let response_kind = descriptor
            .response_serialization
            .as_ref()
            .unwrap_or(&self.config.default_response_serialization);
        let response_serializer = self
            .response_serializers
            .get(response_kind.as_str())
            .ok_or_else(|| unregistered(response_kind, Direction::Response))?;

        let mapper = match &descriptor.custom_mapper_tag {
            Some(tag) => {
                let mapper = self
                    .object_mappers
                    .get(tag)
                    .ok_or_else(|| RestError::UnregisteredObjectMapper { tag: tag.clone() })?;
                MapperResolution::Custom {
                    tag: tag.clone(),
                    mapper,
                }
            }
            None => MapperResolution::Generic,
        };

        let request_schema = descriptor
            .request_schema_name
            .as_deref()
            .or_else(|| mapper.schema_name(Direction::Request))
            .map(|name| self.schema(name))
            .transpose()?;
        let response_schema = descriptor
            .response_schema_name
            .as_deref()
            .or_else(|| mapper.schema_name(Direction::Response))
            .map(|name| self.schema(name))
            .transpose()?;

        let catalog = Catalog { pipeline: self };
        if let Some(schema) = &request_schema {
            catalog.check_tags(schema.root(), Direction::Request, &mut HashSet::new())?;
        }
        if let Some(schema) = &response_schema {
            catalog.check_tags(schema.root(), Direction::Response, &mut HashSet::new())?;
        }

        Ok(Resolved {
            request_serializer,
            response_serializer,
            mapper,
            request_schema,
            response_schema,
        })
    }

    pub(crate) fn schema(&self, name: &str) -> Result<Arc<Schema>, RestError> {
        let extension = schema_extension(name).unwrap_or_default();
        let format = self
            .schema_formats
            .get(extension)
            .ok_or_else(|| RestError::UnknownSchemaFormat {
                schema_name: name.to_string(),
                extension: extension.to_string(),
            })?;
        format
            .schema_for_name(name)
            .map_err(|e| RestError::SchemaNotFound {
                schema_name: name.to_string(),
                reason: e.to_string(),
            })
    }

    fn build_request(
        &self,
        descriptor: &RequestDescriptor,
        resolved: &Resolved,
    ) -> Result<HttpRequest, RestError> {
        let path = descriptor.resolve_path()?;
        let body = match &descriptor.body {
            Some(object) => Some(self.encode_body(object, resolved)?),
            None => None,
        };

        let mut headers = self.config.default_headers.clone();
        if body.is_some() {
            if let Some(content_type) = resolved.request_serializer.content_type() {
                set_header(&mut headers, "Content-Type", content_type);
            }
        }
        if let Some(accept) = resolved.response_serializer.accept() {
            set_header(&mut headers, "Accept", accept);
        }
        for (name, value) in &descriptor.headers {
            set_header(&mut headers, name, value);
        }

        self.connection
            .build_request(RequestParts {
                method: descriptor.method,
                path,
                headers,
                body,
            })
            .map_err(|e| RestError::InvalidRequest {
                reason: e.to_string(),
            })
    }

    fn encode_body(&self, object: &Value, resolved: &Resolved) -> Result<Vec<u8>, RestError> {
        let catalog = Catalog { pipeline: self };
        let schema = resolved.request_schema.as_deref();

        let wire = match resolved.mapper.convert(object, Direction::Request) {
            Some(converted) => converted.map_err(|e| RestError::ObjectMappingFailed {
                reason: e.to_string(),
            })?,
            None => match schema {
                Some(schema) => self.object_to_wire(object, schema, &catalog)?,
                None => object.clone(),
            },
        };

        let wire = match schema {
            Some(schema) => {
                let validated = validate(
                    &wire,
                    schema,
                    &self.config.validation_options,
                    Direction::Request,
                    &catalog,
                )?;
                if !validated.is_valid() {
                    return Err(RestError::RequestValidationFailed(
                        self.report(schema, validated.diagnostics),
                    ));
                }
                validated.value
            }
            None => {
                self.warn("request body is sent without a validation schema");
                wire
            }
        };

        resolved
            .request_serializer
            .body_from_value(&wire)
            .map_err(|e| RestError::RequestSerializationFailed {
                reason: e.to_string(),
            })
    }

    /// Generic request mapping. The object gets the leniency rewrites and
    /// shape checks first, then transformers run at tagged positions; a
    /// failure of either kind is a field diagnostic.
    fn object_to_wire(&self, object: &Value, schema: &Schema, catalog: &Catalog<'_>) -> Result<Value, RestError> {
        let checked = validate_object(
            object,
            schema,
            &self.config.validation_options,
            Direction::Request,
            catalog,
        )?;
        let (wire, rejected) = map_collecting(&checked.value, schema.root(), Direction::Request, catalog)?;
        let mut diagnostics = checked.diagnostics;
        diagnostics.extend(rejected);
        if diagnostics.is_empty() {
            Ok(wire)
        } else {
            Err(RestError::RequestValidationFailed(self.report(schema, diagnostics)))
        }
    }

    fn classify_status(&self, resolved: &Resolved, response: &HttpResponse, info: &ResponseInfo) -> RestError {
        let body = if response.body.is_empty() {
            None
        } else {
            resolved.response_serializer.value_from_body(&response.body).ok()
        };
        self.error_handler
            .classify(TransportError::status(response.status).into(), body.as_ref(), info)
    }

    fn process_response<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
        resolved: &Resolved,
        response: &HttpResponse,
    ) -> Result<T, RestError> {
        let deserialization_failed = |reason: String| RestError::ResponseDeserializationFailed {
            reason,
            body: response.body.clone(),
        };
        let content_type = response.content_type();
        if !resolved.response_serializer.accepts_content_type(content_type) {
            return Err(deserialization_failed(format!(
                "unexpected content type `{}`",
                content_type.unwrap_or_default()
            )));
        }
        let value = resolved
            .response_serializer
            .value_from_body(&response.body)
            .map_err(|e| deserialization_failed(e.to_string()))?;

        let catalog = Catalog { pipeline: self };
        let schema = resolved.response_schema.as_deref();
        let value = match schema {
            Some(schema) => {
                let validated = validate(
                    &value,
                    schema,
                    &self.config.validation_options,
                    Direction::Response,
                    &catalog,
                )?;
                if !validated.is_valid() {
                    return Err(RestError::ResponseValidationFailed(
                        self.report(schema, validated.diagnostics),
                    ));
                }
                validated.value
            }
            None => {
                self.warn("response is mapped without a validation schema");
                value
            }
        };

        let object = match resolved.mapper.convert(&value, Direction::Response) {
            Some(converted) => converted.map_err(|e| RestError::ObjectMappingFailed {
                reason: e.to_string(),
            })?,
            None => match schema {
                Some(schema) => map_with_schema(&value, schema.root(), Direction::Response, &catalog)?,
                None => value,
            },
        };

        let object = run_chain(&self.post_processors, object, descriptor).map_err(|e| {
            RestError::PostProcessingFailed {
                reason: e.to_string(),
            }
        })?;

        serde_json::from_value(object).map_err(|e| RestError::ObjectMappingFailed {
            reason: e.to_string(),
        })
    }

    fn report(&self, schema: &Schema, diagnostics: Vec<Diagnostic>) -> ValidationReport {
        let extension = schema_extension(schema.name()).unwrap_or_default();
        let rendered = match self.error_printers.get(extension) {
            Some(printer) => printer.render(&diagnostics),
            None => {
                self.warn(&format!(
                    "no validation error printer registered for `{extension}`"
                ));
                PathListPrinter.render(&diagnostics)
            }
        };
        ValidationReport {
            schema_name: schema.name().to_string(),
            diagnostics,
            rendered,
        }
    }

    fn warn(&self, message: &str) {
        if !self.config.should_suppress_warnings {
            warn!("{message}");
        }
    }
}

fn unregistered(kind: &SerializationKind, direction: Direction) -> RestError {
    RestError::UnregisteredSerializer {
        kind: kind.clone(),
        direction,
    }
}

/// Tag lookups against the pipeline's registries. Value transformers take
/// precedence over object mappers registered under the same tag.
struct Catalog<'a> {
    pipeline: &'a Pipeline,
}

impl Catalog<'_> {
    /// Bind every tag reachable from `node`, following the schemas of tagged
    /// object mappers, so an unregistered tag fails whatever the payload.
    fn check_tags(&self, node: &SchemaNode, direction: Direction, seen: &mut HashSet<String>) -> Result<(), RestError> {
        match node {
            SchemaNode::Tagged(tag) => {
                if !seen.insert(tag.clone()) {
                    return Ok(());
                }
                if let TagBinding::Mapper {
                    schema: Some(schema), ..
                } = self.bind(tag, direction)?
                {
                    self.check_tags(schema.root(), direction, seen)?;
                }
                Ok(())
            }
            SchemaNode::Array(item) => self.check_tags(item, direction, seen),
            SchemaNode::Object(fields) => fields
                .iter()
                .try_for_each(|field| self.check_tags(&field.node, direction, seen)),
            _ => Ok(()),
        }
    }
}

impl TagBindings for Catalog<'_> {
    fn bind(&self, tag: &str, direction: Direction) -> Result<TagBinding, RestError> {
        if let Some(transformer) = self.pipeline.value_transformers.get(tag) {
            return Ok(TagBinding::Transformer(transformer));
        }
        let mapper = self
            .pipeline
            .object_mappers
            .get(tag)
            .ok_or_else(|| RestError::UnregisteredValueTransformer {
                tag: tag.to_string(),
            })?;
        let schema_name = match direction {
            Direction::Request => mapper.request_validation_schema_name(),
            Direction::Response => mapper.response_validation_schema_name(),
        };
        let schema = schema_name.map(|name| self.pipeline.schema(name)).transpose()?;
        Ok(TagBinding::Mapper { mapper, schema })
    }
}

impl TagResolver for Catalog<'_> {
    fn resolve_tag(&self, tag: &str, direction: Direction) -> Result<TagTarget, RestError> {
        Ok(match self.bind(tag, direction)? {
            TagBinding::Transformer(transformer) => TagTarget::Transformer(transformer.wire_types()),
            TagBinding::Mapper { schema, .. } => TagTarget::Mapper(schema),
        })
    }
}
