//! The REST client: registries, configuration and dispatch.
//!
//! # Design
//! `Client` owns every registry and its configuration. Registration takes
//! `&mut self` and is meant for setup; dispatch takes `&self`, so a client
//! can be shared across tasks once configured. Registries live in a shared
//! snapshot (`Arc<Pipeline>`): an operation keeps the snapshot it was
//! dispatched with, and a registration made afterwards only affects later
//! dispatches.
//!
//! Each `send` returns at once. A worker task races the pipeline against the
//! handle's cancellation signal; a second task awaits the worker and
//! delivers exactly one `Completion`, also when the worker panicked.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info_span, warn, Instrument};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::descriptor::RequestDescriptor;
use crate::error::{RestError, TransportError, TransportErrorKind};
use crate::error_handler::{DefaultErrorHandler, ErrorHandler};
use crate::http::ResponseInfo;
use crate::mapping::{
    Iso8601DateTransformer, NumberStringTransformer, ObjectMapper, UrlTransformer, ValueTransformer,
};
use crate::pipeline::Pipeline;
use crate::post_process::PostProcessor;
use crate::progress::ProgressHandle;
use crate::reachability::{Reachability, ReachabilityState};
use crate::registry::Registry;
use crate::schema::{PathListPrinter, SchemaFormat, ValidationErrorPrinter};
use crate::serialization::{
    FormUrlEncodedSerializer, JsonSerializer, PlainTextSerializer, RawSerializer, RequestSerializer,
    ResponseSerializer, SerializationKind,
};
use crate::validation::ValidationOptions;

/// Terminal outcome of one operation.
#[derive(Debug)]
pub struct Completion<T> {
    pub result: Result<T, RestError>,
    /// What came back over the wire; empty if nothing was sent.
    pub info: ResponseInfo,
}

impl<T> Completion<T> {
    pub(crate) fn new(result: Result<T, RestError>, info: ResponseInfo) -> Self {
        Self { result, info }
    }

    pub(crate) fn failed(error: RestError) -> Self {
        Self::new(Err(error), ResponseInfo::empty())
    }

    pub fn object(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&RestError> {
        self.result.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, RestError> {
        self.result
    }
}

/// A dispatched operation: its progress handle and its pending completion.
#[derive(Debug)]
pub struct Operation<T> {
    handle: ProgressHandle,
    completion: oneshot::Receiver<Completion<T>>,
}

impl<T> Operation<T> {
    pub fn handle(&self) -> &ProgressHandle {
        &self.handle
    }

    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    /// Wait for the single completion of this operation.
    pub async fn completion(self) -> Completion<T> {
        match self.completion.await {
            Ok(completion) => completion,
            Err(_) => Completion::failed(
                TransportError::new(
                    TransportErrorKind::Aborted,
                    "operation ended without a result",
                )
                .into(),
            ),
        }
    }
}

pub struct Client {
    pipeline: Arc<Pipeline>,
    runtime: Option<Handle>,
    reachability: Arc<Reachability>,
}

impl Client {
    /// A client with the built-in serializers, value transformers and
    /// validation-error printer registered.
    pub fn new(connection: impl Connection + 'static) -> Self {
        let mut client = Self {
            pipeline: Arc::new(Pipeline {
                connection: Arc::new(connection),
                error_handler: Arc::new(DefaultErrorHandler),
                config: ClientConfig::default(),
                value_transformers: Registry::new("value transformer"),
                object_mappers: Registry::new("object mapper"),
                request_serializers: Registry::new("request serializer"),
                response_serializers: Registry::new("response serializer"),
                schema_formats: Registry::new("schema format"),
                error_printers: Registry::new("validation error printer"),
                post_processors: Vec::new(),
            }),
            runtime: None,
            reachability: Arc::new(Reachability::new()),
        };

        client.register_request_serializer(SerializationKind::JSON, JsonSerializer);
        client.register_response_serializer(SerializationKind::JSON, JsonSerializer);
        client.register_request_serializer(SerializationKind::FORM_URL_ENCODED, FormUrlEncodedSerializer);
        client.register_request_serializer(SerializationKind::PLAIN, PlainTextSerializer);
        client.register_response_serializer(SerializationKind::PLAIN, PlainTextSerializer);
        client.register_request_serializer(SerializationKind::RAW, RawSerializer);
        client.register_response_serializer(SerializationKind::RAW, RawSerializer);

        client.register_value_transformer("url", UrlTransformer);
        client.register_value_transformer("iso8601", Iso8601DateTransformer);
        client.register_value_transformer("number-string", NumberStringTransformer);

        client.register_validation_error_printer("json", PathListPrinter);
        client
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.pipeline_mut().config = config;
        self
    }

    /// Dispatch on `runtime` instead of the runtime current at `send`.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    fn pipeline_mut(&mut self) -> &mut Pipeline {
        Arc::make_mut(&mut self.pipeline)
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    pub fn register_value_transformer(
        &mut self,
        tag: impl Into<String>,
        transformer: impl ValueTransformer + 'static,
    ) {
        self.pipeline_mut()
            .value_transformers
            .register(tag, Arc::new(transformer));
    }

    pub fn register_object_mapper(&mut self, tag: impl Into<String>, mapper: impl ObjectMapper + 'static) {
        self.pipeline_mut().object_mappers.register(tag, Arc::new(mapper));
    }

    /// Append a post-processor; processors run in registration order.
    pub fn register_post_processor(&mut self, processor: impl PostProcessor + 'static) {
        self.pipeline_mut().post_processors.push(Arc::new(processor));
    }

    pub fn register_request_serializer(
        &mut self,
        kind: impl Into<SerializationKind>,
        serializer: impl RequestSerializer + 'static,
    ) {
        let kind = kind.into();
        self.pipeline_mut()
            .request_serializers
            .register(kind.as_str(), Arc::new(serializer));
    }

    pub fn register_response_serializer(
        &mut self,
        kind: impl Into<SerializationKind>,
        serializer: impl ResponseSerializer + 'static,
    ) {
        let kind = kind.into();
        self.pipeline_mut()
            .response_serializers
            .register(kind.as_str(), Arc::new(serializer));
    }

    pub fn register_schema_format(&mut self, extension: impl Into<String>, format: impl SchemaFormat + 'static) {
        self.pipeline_mut()
            .schema_formats
            .register(extension, Arc::new(format));
    }

    pub fn register_validation_error_printer(
        &mut self,
        extension: impl Into<String>,
        printer: impl ValidationErrorPrinter + 'static,
    ) {
        self.pipeline_mut()
            .error_printers
            .register(extension, Arc::new(printer));
    }

    pub fn set_error_handler(&mut self, handler: impl ErrorHandler + 'static) {
        self.pipeline_mut().error_handler = Arc::new(handler);
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &ClientConfig {
        &self.pipeline.config
    }

    pub fn set_default_request_serialization(&mut self, kind: impl Into<SerializationKind>) {
        self.pipeline_mut().config.default_request_serialization = kind.into();
    }

    pub fn set_default_response_serialization(&mut self, kind: impl Into<SerializationKind>) {
        self.pipeline_mut().config.default_response_serialization = kind.into();
    }

    pub fn set_validation_options(&mut self, options: ValidationOptions) {
        self.pipeline_mut().config.validation_options = options;
    }

    pub fn set_should_suppress_warnings(&mut self, suppress: bool) {
        self.pipeline_mut().config.should_suppress_warnings = suppress;
    }

    pub fn set_default_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let (name, value) = (name.into(), value.into());
        crate::http::set_header(&mut self.pipeline_mut().config.default_headers, &name, &value);
    }

    // -----------------------------------------------------------------------
    // Reachability
    // -----------------------------------------------------------------------

    pub fn reachability(&self) -> &Reachability {
        &self.reachability
    }

    pub fn reachability_state(&self) -> ReachabilityState {
        self.reachability.state()
    }

    pub fn is_reachable(&self) -> bool {
        self.reachability.is_reachable()
    }

    pub fn subscribe_reachability(&self) -> watch::Receiver<ReachabilityState> {
        self.reachability.subscribe()
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Dispatch `descriptor` and return immediately. Await
    /// `Operation::completion` for the typed result.
    pub fn send<T>(&self, descriptor: RequestDescriptor) -> Operation<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let handle = self.dispatch(descriptor, move |completion| {
            // The receiver may have been dropped; the result is then unwanted.
            let _ = tx.send(completion);
        });
        Operation {
            handle,
            completion: rx,
        }
    }

    /// Dispatch `descriptor`; `completion` is invoked exactly once, off the
    /// caller's context.
    pub fn send_with<T, F>(&self, descriptor: RequestDescriptor, completion: F) -> ProgressHandle
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(Completion<T>) + Send + 'static,
    {
        self.dispatch(descriptor, completion)
    }

    fn dispatch<T, F>(&self, descriptor: RequestDescriptor, deliver: F) -> ProgressHandle
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(Completion<T>) + Send + 'static,
    {
        let handle = ProgressHandle::new();
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            handle.finish();
            deliver(Completion::failed(RestError::RuntimeUnavailable));
            return handle;
        };

        let span = info_span!(
            "rest_operation",
            operation = %handle.id(),
            method = %descriptor.method,
            path = %descriptor.path,
        );
        let pipeline = Arc::clone(&self.pipeline);
        let work_handle = handle.clone();
        let work = runtime.spawn(
            async move {
                tokio::select! {
                    biased;
                    _ = work_handle.cancelled() => None,
                    completion = pipeline.execute::<T>(&descriptor, &work_handle) => Some(completion),
                }
            }
            .instrument(span.clone()),
        );

        let task_handle = handle.clone();
        runtime.spawn(
            async move {
                let outcome = match work.await {
                    Ok(outcome) => outcome,
                    Err(error) => {
                        warn!(%error, "operation task failed");
                        Some(Completion::failed(
                            TransportError::new(
                                TransportErrorKind::Aborted,
                                format!("operation task failed: {error}"),
                            )
                            .into(),
                        ))
                    }
                };
                let completion = match outcome {
                    Some(completion) if task_handle.finish() => completion,
                    Some(completion) => Completion::new(Err(RestError::OperationCancelled), completion.info),
                    None => Completion::failed(RestError::OperationCancelled),
                };
                debug!(ok = completion.result.is_ok(), "delivering completion");
                deliver(completion);
            }
            .instrument(span),
        );
        handle
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.pipeline.config)
            .field("request_serializers", &self.pipeline.request_serializers)
            .field("response_serializers", &self.pipeline.response_serializers)
            .field("schema_formats", &self.pipeline.schema_formats)
            .field("value_transformers", &self.pipeline.value_transformers)
            .field("object_mappers", &self.pipeline.object_mappers)
            .field("post_processors", &self.pipeline.post_processors.len())
            .finish()
    }
}
