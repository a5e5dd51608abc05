use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};

/// Fixed creation timestamp, sent with a non-UTC offset on purpose.
pub const CREATED_AT: &str = "2024-03-01T12:00:00+02:00";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: String,
}

#[derive(Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Default)]
pub struct Store {
    next_id: u64,
    users: HashMap<u64, User>,
}

pub type Db = Arc<RwLock<Store>>;

type ApiError = (StatusCode, Json<Value>);

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Store {
        next_id: 1,
        users: HashMap::new(),
    }));
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/{id}",
            get(get_user).post(put_user_with_id).put(update_user).delete(delete_user),
        )
        .route("/form-echo", post(form_echo))
        .route("/broken", get(broken))
        .route("/slow", get(slow))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn not_found(id: u64) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": {"message": format!("user {id} not found")}})),
    )
}

async fn list_users(State(db): State<Db>) -> Json<Vec<User>> {
    let store = db.read().await;
    let mut users: Vec<User> = store.users.values().cloned().collect();
    users.sort_by_key(|u| u.id);
    Json(users)
}

async fn create_user(
    State(db): State<Db>,
    Json(input): Json<CreateUser>,
) -> (StatusCode, Json<User>) {
    let mut store = db.write().await;
    let id = store.next_id;
    store.next_id += 1;
    let user = User {
        id,
        name: input.name,
        email: input.email,
        created_at: CREATED_AT.to_string(),
    };
    store.users.insert(id, user.clone());
    (StatusCode::CREATED, Json(user))
}

async fn get_user(State(db): State<Db>, Path(id): Path<u64>) -> Result<Json<User>, ApiError> {
    let store = db.read().await;
    store.users.get(&id).cloned().map(Json).ok_or_else(|| not_found(id))
}

/// Create or replace the user with a caller-chosen id.
async fn put_user_with_id(
    State(db): State<Db>,
    Path(id): Path<u64>,
    Json(input): Json<CreateUser>,
) -> Json<User> {
    let mut store = db.write().await;
    let user = User {
        id,
        name: input.name,
        email: input.email,
        created_at: CREATED_AT.to_string(),
    };
    store.users.insert(id, user.clone());
    store.next_id = store.next_id.max(id + 1);
    Json(user)
}

async fn update_user(
    State(db): State<Db>,
    Path(id): Path<u64>,
    Json(input): Json<UpdateUser>,
) -> Result<Json<User>, ApiError> {
    let mut store = db.write().await;
    let user = store.users.get_mut(&id).ok_or_else(|| not_found(id))?;
    if let Some(name) = input.name {
        user.name = name;
    }
    if let Some(email) = input.email {
        user.email = Some(email);
    }
    Ok(Json(user.clone()))
}

async fn delete_user(State(db): State<Db>, Path(id): Path<u64>) -> Result<StatusCode, ApiError> {
    let mut store = db.write().await;
    store
        .users
        .remove(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| not_found(id))
}

async fn form_echo(Form(fields): Form<HashMap<String, String>>) -> Json<HashMap<String, String>> {
    Json(fields)
}

async fn broken() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], "{\"id\": 1,")
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json(json!({"done": true}))
}
