//! Declarative REST client core.
//!
//! # Overview
//! Callers describe an endpoint with a [`RequestDescriptor`] (method, path
//! template, body, serialization kinds, schema names, optional mapper tag)
//! and hand it to [`Client::send`]. The client resolves serializers, mappers
//! and schemas from its registries, validates and serializes the body, lets
//! a [`Connection`] perform the I/O, then deserializes, validates, maps and
//! post-processes the response into a typed object.
//!
//! # Design
//! - The core never touches the network (host-does-IO): transport is the
//!   [`Connection`] collaborator's job.
//! - Every extension point is a tag-keyed registry on the [`Client`];
//!   unregistered tags fail the operation that needs them.
//! - Dispatch is asynchronous. `send` returns an [`Operation`] with a
//!   [`ProgressHandle`] at once, and every outcome, cancellation included,
//!   arrives as exactly one [`Completion`].
//! - Structural values are `serde_json::Value`; domain objects enter and
//!   leave through serde.

pub mod client;
pub mod config;
pub mod connection;
pub mod descriptor;
pub mod error;
pub mod error_handler;
pub mod http;
pub mod mapping;
mod pipeline;
pub mod post_process;
pub mod progress;
pub mod reachability;
pub mod registry;
pub mod schema;
pub mod serialization;
pub mod validation;

pub use client::{Client, Completion, Operation};
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionError};
pub use descriptor::RequestDescriptor;
pub use error::{RestError, TransportError, TransportErrorKind, ValidationReport};
pub use error_handler::{DefaultErrorHandler, ErrorHandler, MessageFieldErrorHandler};
pub use http::{HttpMethod, HttpRequest, HttpResponse, RequestParts, ResponseInfo, ResponseMetadata};
pub use mapping::{MappingError, ObjectMapper, TransformError, ValueTransformer};
pub use post_process::{PostProcessError, PostProcessor};
pub use progress::{Progress, ProgressHandle, TransferContext, TransferState};
pub use reachability::{Reachability, ReachabilityState};
pub use schema::{JsonSchemaFormat, Schema, SchemaFormat, SchemaFormatError, SchemaNode, ValidationErrorPrinter};
pub use serialization::{RequestSerializer, ResponseSerializer, SerializationKind, SerializerError};
pub use validation::{Diagnostic, Direction, ValidationOptions};
