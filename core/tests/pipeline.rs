//! Pipeline behaviour against an in-process connection.
//!
//! # Design
//! `StubConnection` records every request it is asked to send and answers
//! with a canned response, so each test can assert both what went over the
//! wire and what the caller's completion carried.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use restmap_core::{
    Client, Connection, ConnectionError, Diagnostic, Direction, HttpRequest, HttpResponse,
    JsonSchemaFormat, MappingError, MessageFieldErrorHandler, ObjectMapper, PostProcessError,
    PostProcessor, Progress, RequestDescriptor, RequestParts, RestError, ResponseSerializer,
    SerializerError, TransferContext, TransportError, TransportErrorKind, ValidationErrorPrinter,
    ValidationOptions,
};
use serde::Deserialize;
use serde_json::{json, Value};

const BASE_URL: &str = "https://api.test";

type Reply = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;

struct StubConnection {
    sent: Arc<Mutex<Vec<HttpRequest>>>,
    reply: Reply,
    delay: Option<Duration>,
}

impl StubConnection {
    fn replying(reply: impl Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            reply: Box::new(reply),
            delay: None,
        }
    }

    fn json(status: u16, body: Value) -> Self {
        Self::replying(move |_| Ok(json_response(status, &body)))
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn log(&self) -> Arc<Mutex<Vec<HttpRequest>>> {
        Arc::clone(&self.sent)
    }
}

#[async_trait]
impl Connection for StubConnection {
    fn build_request(&self, parts: RequestParts) -> Result<HttpRequest, ConnectionError> {
        Ok(parts.into_request(BASE_URL))
    }

    async fn send(&self, request: HttpRequest, transfer: TransferContext) -> Result<HttpResponse, TransportError> {
        self.sent.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = (self.reply)(&request)?;
        let size = response.body.len() as u64;
        transfer.report_download(Progress {
            bytes: size,
            total_bytes: size,
            expected_total_bytes: Some(size),
        });
        Ok(response)
    }
}

fn json_response(status: u16, body: &Value) -> HttpResponse {
    HttpResponse {
        status,
        headers: vec![("Content-Type".to_string(), "application/json".to_string())],
        body: serde_json::to_vec(body).unwrap(),
    }
}

fn schemas() -> JsonSchemaFormat {
    JsonSchemaFormat::new()
        .with_schema("user-input.json", &json!({"name": "", "email{?}": ""}))
        .unwrap()
        .with_schema("user.json", &json!({"id": 0, "name": "", "email{?}": ""}))
        .unwrap()
        .with_schema("contact.json", &json!({"id": 0, "email": ""}))
        .unwrap()
        .with_schema(
            "profile.json",
            &json!({"id": 0, "profile{?}": {"bio": ""}}),
        )
        .unwrap()
        .with_schema("event.json", &json!({"id": 0, "starts_at": "{iso8601}"}))
        .unwrap()
        .with_schema("site.json", &json!({"id": 0, "homepage{?}": "{url}"}))
        .unwrap()
        .with_schema("misspelt.json", &json!({"id": 0, "homepage{?}": "{urll}"}))
        .unwrap()
        .with_schema("order.json", &json!({"id": 0, "total": "{money}"}))
        .unwrap()
        .with_schema("money.json", &json!({"cents": 0}))
        .unwrap()
}

fn client(connection: StubConnection) -> Client {
    let mut client = Client::new(connection);
    client.register_schema_format("json", schemas());
    client
}

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: u64,
    name: String,
    email: Option<String>,
}

// --- request building ---

#[tokio::test]
async fn post_with_path_param_round_trips() {
    let connection = StubConnection::json(200, json!({"id": 42, "name": "Ann"}));
    let sent = connection.log();
    let client = client(connection);

    let descriptor = RequestDescriptor::post("/users/{id}")
        .path_param("id", 42)
        .body(json!({"name": "Ann"}))
        .request_schema("user-input.json")
        .response_schema("user.json");
    let completion = client.send::<User>(descriptor).completion().await;

    assert_eq!(
        completion.into_result().unwrap(),
        User {
            id: 42,
            name: "Ann".to_string(),
            email: None
        }
    );
    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].url, "https://api.test/users/42");
    assert_eq!(sent[0].body.as_deref(), Some(br#"{"name":"Ann"}"#.as_slice()));
    assert_eq!(sent[0].header("content-type"), Some("application/json"));
    assert_eq!(sent[0].header("accept"), Some("application/json"));
}

#[tokio::test]
async fn descriptor_headers_override_defaults() {
    let connection = StubConnection::json(200, json!([]));
    let sent = connection.log();
    let mut client = client(connection);
    client.set_default_header("X-Api-Key", "default");
    client.set_default_header("X-Trace", "on");

    let descriptor = RequestDescriptor::get("/users").header("x-api-key", "override");
    let completion = client.send::<Vec<User>>(descriptor).completion().await;

    assert!(completion.into_result().unwrap().is_empty());
    let sent = sent.lock().unwrap();
    assert_eq!(sent[0].header("X-Api-Key"), Some("override"));
    assert_eq!(sent[0].header("x-trace"), Some("on"));
    assert_eq!(sent[0].header("content-type"), None);
}

#[tokio::test]
async fn missing_path_param_fails_before_sending() {
    let connection = StubConnection::json(200, json!({}));
    let sent = connection.log();
    let client = client(connection);

    let completion = client
        .send::<Value>(RequestDescriptor::get("/users/{id}"))
        .completion()
        .await;

    assert!(matches!(
        completion.error(),
        Some(RestError::MissingPathParameter { name }) if name == "id"
    ));
    assert!(completion.info.status().is_none());
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_request_body_is_never_sent() {
    let connection = StubConnection::json(200, json!({"id": 1, "name": "Ann"}));
    let sent = connection.log();
    let client = client(connection);

    let descriptor = RequestDescriptor::post("/users")
        .body(json!({"name": 5}))
        .request_schema("user-input.json");
    let completion = client.send::<Value>(descriptor).completion().await;

    match completion.error() {
        Some(RestError::RequestValidationFailed(report)) => {
            assert_eq!(report.schema_name, "user-input.json");
            assert_eq!(report.diagnostics[0].path, "name");
            assert!(report.rendered.starts_with("name: "));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unregistered_serializer_is_a_configuration_error() {
    let connection = StubConnection::json(200, json!({}));
    let sent = connection.log();
    let client = client(connection);

    let descriptor = RequestDescriptor::post("/users")
        .body(json!({"name": "Ann"}))
        .request_serialization("protobuf");
    let completion = client.send::<Value>(descriptor).completion().await;

    let error = completion.error().unwrap();
    assert!(error.is_configuration_error());
    assert!(matches!(
        error,
        RestError::UnregisteredSerializer { kind, .. } if kind.as_str() == "protobuf"
    ));
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_schema_extension_is_reported() {
    let client = client(StubConnection::json(200, json!({})));

    let descriptor = RequestDescriptor::get("/users/1").response_schema("user.yaml");
    let completion = client.send::<Value>(descriptor).completion().await;

    assert!(matches!(
        completion.error(),
        Some(RestError::UnknownSchemaFormat { extension, .. }) if extension == "yaml"
    ));
}

#[tokio::test]
async fn unregistered_response_serializer_is_reported_before_sending() {
    let connection = StubConnection::json(200, json!({}));
    let sent = connection.log();
    let client = client(connection);

    let descriptor = RequestDescriptor::get("/users/1").response_serialization("protobuf");
    let completion = client.send::<Value>(descriptor).completion().await;

    assert!(matches!(
        completion.error(),
        Some(RestError::UnregisteredSerializer { kind, direction: Direction::Response })
            if kind.as_str() == "protobuf"
    ));
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_schema_name_is_not_found() {
    let connection = StubConnection::json(200, json!({}));
    let sent = connection.log();
    let client = client(connection);

    let descriptor = RequestDescriptor::get("/users/1").response_schema("missing.json");
    let completion = client.send::<Value>(descriptor).completion().await;

    assert!(matches!(
        completion.error(),
        Some(RestError::SchemaNotFound { schema_name, .. }) if schema_name == "missing.json"
    ));
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn misspelt_tag_fails_even_when_the_field_is_absent() {
    let connection = StubConnection::json(200, json!({"id": 1}));
    let sent = connection.log();
    let client = client(connection);

    let descriptor = RequestDescriptor::get("/sites/1").response_schema("misspelt.json");
    let completion = client.send::<Value>(descriptor).completion().await;

    let error = completion.error().unwrap();
    assert!(error.is_configuration_error());
    assert!(matches!(
        error,
        RestError::UnregisteredValueTransformer { tag } if tag == "urll"
    ));
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_object_at_optional_tagged_field_is_sent_as_null() {
    let connection = StubConnection::json(200, json!({"id": 1}));
    let sent = connection.log();
    let client = client(connection);

    let descriptor = RequestDescriptor::post("/sites")
        .body(json!({"id": 1, "homepage": {}}))
        .request_schema("site.json");
    let completion = client.send::<Value>(descriptor).completion().await;

    assert!(completion.result.is_ok(), "{:?}", completion.error());
    let sent = sent.lock().unwrap();
    assert_eq!(
        sent[0].body.as_deref(),
        Some(br#"{"homepage":null,"id":1}"#.as_slice())
    );
}

#[tokio::test]
async fn tagged_request_values_are_transformed_before_sending() {
    let connection = StubConnection::json(200, json!({"id": 1}));
    let sent = connection.log();
    let client = client(connection);

    let descriptor = RequestDescriptor::post("/sites")
        .body(json!({"id": 1, "homepage": "HTTP://Example.com"}))
        .request_schema("site.json");
    let completion = client.send::<Value>(descriptor).completion().await;

    assert!(completion.result.is_ok(), "{:?}", completion.error());
    let body: Value = serde_json::from_slice(sent.lock().unwrap()[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(body["homepage"], "http://example.com/");
}

#[tokio::test]
async fn rejected_tagged_request_value_is_a_validation_failure() {
    let connection = StubConnection::json(200, json!({"id": 1}));
    let sent = connection.log();
    let client = client(connection);

    let descriptor = RequestDescriptor::post("/sites")
        .body(json!({"id": 1, "homepage": 5}))
        .request_schema("site.json");
    let completion = client.send::<Value>(descriptor).completion().await;

    match completion.error() {
        Some(RestError::RequestValidationFailed(report)) => {
            assert_eq!(report.diagnostics.len(), 1);
            assert_eq!(report.diagnostics[0].path, "homepage");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(sent.lock().unwrap().is_empty());
}

struct Bullets;

impl ValidationErrorPrinter for Bullets {
    fn render(&self, diagnostics: &[Diagnostic]) -> String {
        diagnostics
            .iter()
            .map(|d| format!("* {} ({})", d.path, d.reason))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[tokio::test]
async fn registered_printer_renders_the_report() {
    let mut client = client(StubConnection::json(200, json!({})));
    client.register_validation_error_printer("json", Bullets);

    let descriptor = RequestDescriptor::post("/users")
        .body(json!({}))
        .request_schema("user-input.json");
    let completion = client.send::<Value>(descriptor).completion().await;

    match completion.error() {
        Some(RestError::RequestValidationFailed(report)) => {
            assert_eq!(report.rendered, "* name (required field is missing)");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn form_url_encoded_body_uses_form_content_type() {
    let connection = StubConnection::json(200, json!({"ok": true}));
    let sent = connection.log();
    let client = client(connection);

    let descriptor = RequestDescriptor::post("/form-echo")
        .body(json!({"name": "Ann Lee", "city": "Oslo"}))
        .request_serialization("form-url-encoded");
    let completion = client.send::<Value>(descriptor).completion().await;

    assert_eq!(completion.into_result().unwrap(), json!({"ok": true}));
    let sent = sent.lock().unwrap();
    assert_eq!(
        sent[0].header("content-type"),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(sent[0].body.as_deref(), Some(b"city=Oslo&name=Ann+Lee".as_slice()));
}

// --- response handling ---

#[tokio::test]
async fn missing_required_response_field_names_the_path() {
    let client = client(StubConnection::json(200, json!({"id": 42, "name": "Ann"})));

    let descriptor = RequestDescriptor::get("/users/42").response_schema("contact.json");
    let completion = client.send::<Value>(descriptor).completion().await;

    assert_eq!(completion.info.status(), Some(200));
    let error = completion.error().unwrap();
    assert!(matches!(error, RestError::ResponseValidationFailed(_)));
    let email = error
        .diagnostics()
        .iter()
        .find(|d| d.path == "email")
        .unwrap();
    assert_eq!(email.reason, "required field is missing");
}

#[tokio::test]
async fn unknown_response_keys_fail_unless_stripped() {
    let reply = json!({"id": 1, "name": "Ann", "internal": true});

    let strict = client(StubConnection::json(200, reply.clone()));
    let completion = strict
        .send::<Value>(RequestDescriptor::get("/users/1").response_schema("user.json"))
        .completion()
        .await;
    assert_eq!(completion.error().unwrap().diagnostics()[0].path, "internal");

    let mut lenient = client(StubConnection::json(200, reply));
    lenient.set_validation_options(ValidationOptions {
        remove_values_missed_in_scheme_for_responses: true,
        ..ValidationOptions::default()
    });
    let completion = lenient
        .send::<Value>(RequestDescriptor::get("/users/1").response_schema("user.json"))
        .completion()
        .await;
    assert_eq!(completion.into_result().unwrap(), json!({"id": 1, "name": "Ann"}));
}

#[tokio::test]
async fn empty_optional_object_is_treated_as_nil() {
    let reply = json!({"id": 1, "profile": {}});

    let lenient = client(StubConnection::json(200, reply.clone()));
    let completion = lenient
        .send::<Value>(RequestDescriptor::get("/users/1").response_schema("profile.json"))
        .completion()
        .await;
    assert_eq!(completion.into_result().unwrap()["profile"], Value::Null);

    let mut strict = client(StubConnection::json(200, reply));
    strict.set_validation_options(ValidationOptions::none());
    let completion = strict
        .send::<Value>(RequestDescriptor::get("/users/1").response_schema("profile.json"))
        .completion()
        .await;
    assert!(matches!(
        completion.error(),
        Some(RestError::ResponseValidationFailed(_))
    ));
}

#[tokio::test]
async fn tagged_dates_are_normalised_to_utc() {
    let client = client(StubConnection::json(
        200,
        json!({"id": 3, "starts_at": "2024-03-01T12:00:00+02:00"}),
    ));

    let completion = client
        .send::<Value>(RequestDescriptor::get("/events/3").response_schema("event.json"))
        .completion()
        .await;

    assert_eq!(
        completion.into_result().unwrap()["starts_at"],
        "2024-03-01T10:00:00Z"
    );
}

#[tokio::test]
async fn symmetric_schema_round_trips_through_an_echo() {
    let client = client(StubConnection::replying(|request| {
        Ok(HttpResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: request.body.clone().unwrap_or_default(),
        })
    }));
    let event = json!({"id": 3, "starts_at": "2024-03-01T10:00:00Z"});

    let descriptor = RequestDescriptor::put("/events/3")
        .body(event.clone())
        .request_schema("event.json")
        .response_schema("event.json");
    let completion = client.send::<Value>(descriptor).completion().await;

    assert_eq!(completion.into_result().unwrap(), event);
}

#[tokio::test]
async fn malformed_body_keeps_the_raw_bytes() {
    let client = client(StubConnection::replying(|_| {
        Ok(HttpResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: b"{\"id\": 1,".to_vec(),
        })
    }));

    let completion = client
        .send::<Value>(RequestDescriptor::get("/broken"))
        .completion()
        .await;

    match completion.error() {
        Some(RestError::ResponseDeserializationFailed { body, .. }) => {
            assert_eq!(body.as_slice(), b"{\"id\": 1,");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(completion.info.body(), b"{\"id\": 1,");
}

#[tokio::test]
async fn unexpected_content_type_is_a_deserialization_failure() {
    let client = client(StubConnection::replying(|_| {
        Ok(HttpResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/html".to_string())],
            body: b"<html></html>".to_vec(),
        })
    }));

    let completion = client
        .send::<Value>(RequestDescriptor::get("/"))
        .completion()
        .await;

    assert!(matches!(
        completion.error(),
        Some(RestError::ResponseDeserializationFailed { .. })
    ));
}

#[tokio::test]
async fn typed_decode_failure_is_a_mapping_error() {
    let client = client(StubConnection::json(200, json!({"id": "not-a-number", "name": "Ann"})));

    let completion = client
        .send::<User>(RequestDescriptor::get("/users/1"))
        .completion()
        .await;

    assert!(matches!(
        completion.error(),
        Some(RestError::ObjectMappingFailed { .. })
    ));
}

// --- errors ---

#[tokio::test]
async fn non_success_status_becomes_a_transport_error() {
    let client = client(StubConnection::json(
        404,
        json!({"error": {"message": "user 7 not found"}}),
    ));

    let completion = client
        .send::<Value>(RequestDescriptor::get("/users/7"))
        .completion()
        .await;

    let error = completion.error().unwrap();
    assert_eq!(error.status_code(), Some(404));
    assert!(matches!(
        error,
        RestError::Transport(TransportError {
            kind: TransportErrorKind::Status,
            ..
        })
    ));
    assert_eq!(completion.info.status(), Some(404));
}

#[tokio::test]
async fn error_handler_extracts_server_message() {
    let mut client = client(StubConnection::json(
        404,
        json!({"error": {"message": "user 7 not found"}}),
    ));
    client.set_error_handler(MessageFieldErrorHandler::default());

    let completion = client
        .send::<Value>(RequestDescriptor::get("/users/7"))
        .completion()
        .await;

    match completion.error() {
        Some(RestError::ServerError {
            status,
            message,
            payload,
        }) => {
            assert_eq!(*status, 404);
            assert_eq!(message, "user 7 not found");
            assert!(payload.is_some());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn connection_failure_is_delivered_as_is() {
    let client = client(StubConnection::replying(|_| Err(TransportError::timeout("timed out"))));

    let completion = client
        .send::<Value>(RequestDescriptor::get("/users"))
        .completion()
        .await;

    assert!(matches!(
        completion.error(),
        Some(RestError::Transport(TransportError {
            kind: TransportErrorKind::Timeout,
            ..
        }))
    ));
    assert!(completion.info.response().is_none());
}

// --- mappers and post-processing ---

struct UserCard;

impl ObjectMapper for UserCard {
    fn response_validation_schema_name(&self) -> Option<&str> {
        Some("user.json")
    }

    fn object_from_response_object(&self, response: &Value) -> Option<Result<Value, MappingError>> {
        let label = match (response["id"].as_u64(), response["name"].as_str()) {
            (Some(id), Some(name)) => format!("#{id} {name}"),
            _ => return Some(Err(MappingError::new("incomplete user"))),
        };
        Some(Ok(json!({"label": label})))
    }
}

#[tokio::test]
async fn custom_mapper_replaces_generic_mapping() {
    let mut client = client(StubConnection::json(200, json!({"id": 42, "name": "Ann"})));
    client.register_object_mapper("user-card", UserCard);

    let completion = client
        .send::<Value>(RequestDescriptor::get("/users/42").mapper("user-card"))
        .completion()
        .await;

    assert_eq!(completion.into_result().unwrap(), json!({"label": "#42 Ann"}));
}

#[tokio::test]
async fn custom_mapper_schema_validates_the_response() {
    let mut client = client(StubConnection::json(200, json!({"id": "42"})));
    client.register_object_mapper("user-card", UserCard);

    let completion = client
        .send::<Value>(RequestDescriptor::get("/users/42").mapper("user-card"))
        .completion()
        .await;

    match completion.error() {
        Some(RestError::ResponseValidationFailed(report)) => {
            assert_eq!(report.schema_name, "user.json");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn unregistered_mapper_is_reported() {
    let client = client(StubConnection::json(200, json!({})));

    let completion = client
        .send::<Value>(RequestDescriptor::get("/users/42").mapper("user-card"))
        .completion()
        .await;

    assert!(matches!(
        completion.error(),
        Some(RestError::UnregisteredObjectMapper { tag }) if tag == "user-card"
    ));
}

/// Renames domain fields to their wire names and leaves a debug marker the
/// schema does not know about.
struct UserWire;

impl ObjectMapper for UserWire {
    fn request_validation_schema_name(&self) -> Option<&str> {
        Some("user-input.json")
    }

    fn request_object_from_object(&self, object: &Value) -> Option<Result<Value, MappingError>> {
        Some(match object["full_name"].as_str() {
            Some(name) => Ok(json!({"name": name, "debug": true})),
            None => Err(MappingError::new("full_name is required")),
        })
    }
}

#[tokio::test]
async fn request_mapper_output_is_validated() {
    let connection = StubConnection::json(200, json!({}));
    let sent = connection.log();
    let mut client = client(connection);
    client.register_object_mapper("user-wire", UserWire);

    let descriptor = RequestDescriptor::post("/users")
        .body(json!({"full_name": "Ann"}))
        .mapper("user-wire");
    let completion = client.send::<Value>(descriptor).completion().await;

    match completion.error() {
        Some(RestError::RequestValidationFailed(report)) => {
            assert_eq!(report.schema_name, "user-input.json");
            assert_eq!(
                report.diagnostics,
                vec![Diagnostic::new("debug", "unexpected field")]
            );
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn request_stripping_applies_to_mapper_output() {
    let connection = StubConnection::json(200, json!({}));
    let sent = connection.log();
    let mut client = client(connection);
    client.register_object_mapper("user-wire", UserWire);
    client.set_validation_options(ValidationOptions {
        remove_values_missed_in_scheme_for_requests: true,
        ..ValidationOptions::default()
    });

    let descriptor = RequestDescriptor::post("/users")
        .body(json!({"full_name": "Ann"}))
        .mapper("user-wire");
    let completion = client.send::<Value>(descriptor).completion().await;

    assert!(completion.result.is_ok(), "{:?}", completion.error());
    assert_eq!(
        sent.lock().unwrap()[0].body.as_deref(),
        Some(br#"{"name":"Ann"}"#.as_slice())
    );
}

#[tokio::test]
async fn failing_request_mapper_is_a_mapping_error() {
    let connection = StubConnection::json(200, json!({}));
    let sent = connection.log();
    let mut client = client(connection);
    client.register_object_mapper("user-wire", UserWire);

    let descriptor = RequestDescriptor::post("/users")
        .body(json!({"name": "Ann"}))
        .mapper("user-wire");
    let completion = client.send::<Value>(descriptor).completion().await;

    assert!(matches!(
        completion.error(),
        Some(RestError::ObjectMappingFailed { reason }) if reason == "full_name is required"
    ));
    assert!(sent.lock().unwrap().is_empty());
}

/// Bound to `{money}` in schemas: `{"cents": 1250}` on the wire, `12.5` in
/// the domain.
struct Money;

impl ObjectMapper for Money {
    fn response_validation_schema_name(&self) -> Option<&str> {
        Some("money.json")
    }

    fn object_from_response_object(&self, response: &Value) -> Option<Result<Value, MappingError>> {
        Some(
            response["cents"]
                .as_i64()
                .map(|cents| json!(cents as f64 / 100.0))
                .ok_or_else(|| MappingError::new("cents must be an integer")),
        )
    }
}

#[tokio::test]
async fn tagged_mapper_converts_nested_values() {
    let mut client = client(StubConnection::json(
        200,
        json!({"id": 7, "total": {"cents": 1250}}),
    ));
    client.register_object_mapper("money", Money);

    let completion = client
        .send::<Value>(RequestDescriptor::get("/orders/7").response_schema("order.json"))
        .completion()
        .await;

    assert_eq!(completion.into_result().unwrap(), json!({"id": 7, "total": 12.5}));
}

#[tokio::test]
async fn tagged_mapper_schema_validates_the_nested_value() {
    let mut client = client(StubConnection::json(
        200,
        json!({"id": 7, "total": {"cents": "lots"}}),
    ));
    client.register_object_mapper("money", Money);

    let completion = client
        .send::<Value>(RequestDescriptor::get("/orders/7").response_schema("order.json"))
        .completion()
        .await;

    assert_eq!(
        completion.error().unwrap().diagnostics(),
        &[Diagnostic::new("total.cents", "expected number, found string")]
    );
}

#[tokio::test]
async fn unregistered_tagged_mapper_fails_before_sending() {
    let connection = StubConnection::json(200, json!({"id": 7, "total": {"cents": 1}}));
    let sent = connection.log();
    let client = client(connection);

    let completion = client
        .send::<Value>(RequestDescriptor::get("/orders/7").response_schema("order.json"))
        .completion()
        .await;

    assert!(matches!(
        completion.error(),
        Some(RestError::UnregisteredValueTransformer { tag }) if tag == "money"
    ));
    assert!(sent.lock().unwrap().is_empty());
}

struct Explode;

impl PostProcessor for Explode {
    fn post_process(&self, _: Value, _: &RequestDescriptor) -> Result<Value, PostProcessError> {
        panic!("post-processor bug");
    }
}

#[tokio::test]
async fn panicking_collaborator_still_completes_once() {
    let mut client = client(StubConnection::json(200, json!({"id": 1})));
    client.register_post_processor(Explode);
    let (tx, rx) = tokio::sync::oneshot::channel();

    let handle = client.send_with::<Value, _>(RequestDescriptor::get("/users/1"), move |completion| {
        let _ = tx.send(completion);
    });

    let completion = rx.await.unwrap();
    assert!(matches!(
        completion.error(),
        Some(RestError::Transport(TransportError {
            kind: TransportErrorKind::Aborted,
            ..
        }))
    ));
    assert!(handle.is_finished());
}

struct Envelope;

impl PostProcessor for Envelope {
    fn post_process(&self, object: Value, descriptor: &RequestDescriptor) -> Result<Value, PostProcessError> {
        Ok(json!({"path": descriptor.path, "data": object}))
    }
}

struct RejectEmpty;

impl PostProcessor for RejectEmpty {
    fn post_process(&self, object: Value, _: &RequestDescriptor) -> Result<Value, PostProcessError> {
        match object.get("data").and_then(Value::as_array) {
            Some(items) if items.is_empty() => Err(PostProcessError::new("no users")),
            _ => Ok(object),
        }
    }
}

#[tokio::test]
async fn post_processors_run_in_order() {
    let mut client = client(StubConnection::json(200, json!([{"id": 1}])));
    client.register_post_processor(Envelope);
    client.register_post_processor(RejectEmpty);

    let completion = client
        .send::<Value>(RequestDescriptor::get("/users"))
        .completion()
        .await;

    assert_eq!(
        completion.into_result().unwrap(),
        json!({"path": "/users", "data": [{"id": 1}]})
    );
}

#[tokio::test]
async fn post_processor_failure_aborts_the_operation() {
    let mut client = client(StubConnection::json(200, json!([])));
    client.register_post_processor(Envelope);
    client.register_post_processor(RejectEmpty);

    let completion = client
        .send::<Value>(RequestDescriptor::get("/users"))
        .completion()
        .await;

    assert!(matches!(
        completion.error(),
        Some(RestError::PostProcessingFailed { reason }) if reason == "no users"
    ));
}

// --- registries ---

struct Canned;

impl ResponseSerializer for Canned {
    fn value_from_body(&self, _body: &[u8]) -> Result<Value, SerializerError> {
        Ok(json!({"source": "canned"}))
    }
}

#[tokio::test]
async fn registering_a_kind_again_replaces_the_serializer() {
    let mut client = client(StubConnection::json(200, json!({"source": "wire"})));
    client.register_response_serializer("json", Canned);

    let completion = client
        .send::<Value>(RequestDescriptor::get("/"))
        .completion()
        .await;

    assert_eq!(completion.into_result().unwrap(), json!({"source": "canned"}));
}

#[tokio::test]
async fn in_flight_operations_keep_their_registries() {
    let connection =
        StubConnection::json(200, json!({"source": "wire"})).with_delay(Duration::from_millis(50));
    let mut client = client(connection);

    let operation = client.send::<Value>(RequestDescriptor::get("/"));
    client.register_response_serializer("json", Canned);

    assert_eq!(
        operation.completion().await.into_result().unwrap(),
        json!({"source": "wire"})
    );
}

// --- progress and cancellation ---

#[tokio::test]
async fn cancel_delivers_a_single_cancelled_completion() {
    let connection = StubConnection::json(200, json!({})).with_delay(Duration::from_secs(5));
    let client = client(connection);

    let operation = client.send::<Value>(RequestDescriptor::get("/slow"));
    let handle = operation.handle().clone();
    assert!(operation.cancel());
    assert!(!operation.cancel());

    let completion = operation.completion().await;
    assert!(matches!(completion.error(), Some(RestError::OperationCancelled)));
    assert!(handle.is_cancelled());
    assert!(!handle.cancel());
}

#[tokio::test]
async fn cancel_after_completion_is_a_no_op() {
    let client = client(StubConnection::json(200, json!({"id": 1})));

    let operation = client.send::<Value>(RequestDescriptor::get("/users/1"));
    let handle = operation.handle().clone();
    let completion = operation.completion().await;

    assert!(completion.result.is_ok());
    assert!(handle.is_finished());
    assert!(!handle.cancel());
    assert!(!handle.is_cancelled());
}

#[tokio::test]
async fn send_with_reports_download_progress() {
    let client = client(StubConnection::json(200, json!({"id": 1})));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = tokio::sync::oneshot::channel();

    let handle = client.send_with::<Value, _>(RequestDescriptor::get("/users/1"), move |completion| {
        let _ = tx.send(completion);
    });
    let sink = Arc::clone(&seen);
    assert!(handle.set_download_progress(move |progress| sink.lock().unwrap().push(progress)));
    assert!(!handle.set_download_progress(|_| {}));

    let completion = rx.await.unwrap();
    assert_eq!(completion.into_result().unwrap(), json!({"id": 1}));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].total_bytes, br#"{"id":1}"#.len() as u64);
}

#[test]
fn without_a_runtime_the_completion_is_immediate() {
    let client = client(StubConnection::json(200, json!({})));
    let (tx, rx) = std::sync::mpsc::channel();

    let handle = client.send_with::<Value, _>(RequestDescriptor::get("/"), move |completion| {
        tx.send(completion).unwrap();
    });

    let completion = rx.try_recv().unwrap();
    assert!(matches!(completion.error(), Some(RestError::RuntimeUnavailable)));
    assert!(handle.is_finished());
}
