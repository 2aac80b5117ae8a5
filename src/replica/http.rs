//! HTTP surface of a node
//!
//! Client API:
//! - `GET /kv/:key`, `PUT /kv/:key` (body `{"value": ...}`), `DELETE /kv/:key`
//!
//! Node-to-node calls:
//! - `POST /internal/send`: 2PC message, 409 when the cohort aborts
//! - `GET /internal/storage`, `GET /internal/id`, `GET /internal/directory`
//! - `POST /internal/register`: 409 when the name is taken
//!
//! Errors come back as `{"error": "..."}`.

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, ProtocolMessage, RegisterRequest};
use crate::replica::node::Replica;
use crate::replica::server::FatalSignal;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted client request body.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Largest accepted node-to-node body. A 2PC message carries a whole client
/// write plus its key and framing, so it must fit anything `/kv` admitted.
pub const MAX_INTERNAL_BODY_BYTES: usize = 2 * MAX_BODY_BYTES;

#[derive(Clone)]
pub struct NodeState {
    pub replica: Arc<Replica>,
    pub fatal: FatalSignal,
}

#[derive(Debug, Deserialize)]
struct PutBody {
    value: String,
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.0.to_http_status(),
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

pub fn create_router(state: NodeState) -> Router {
    // axum's own extractor cap would otherwise undercut both limits
    let client: Router<NodeState> = Router::new()
        .route("/kv/:key", get(get_key).put(put_key).delete(delete_key))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    let internal: Router<NodeState> = Router::new()
        .route("/internal/send", post(send))
        .route("/internal/storage", get(storage))
        .route("/internal/id", get(server_id))
        .route("/internal/register", post(register))
        .route("/internal/directory", get(directory))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_INTERNAL_BODY_BYTES));

    Router::new()
        .route("/health", get(health))
        .merge(client)
        .merge(internal)
        .layer(middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

async fn health(State(state): State<NodeState>) -> Result<impl IntoResponse, ApiError> {
    let peers = state.replica.directory_entries()?.len().saturating_sub(1);
    Ok(Json(json!({
        "status": "healthy",
        "server_id": state.replica.server_id(),
        "peers": peers,
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

async fn get_key(State(state): State<NodeState>, Path(key): Path<String>) -> impl IntoResponse {
    Json(state.replica.get(&key).await)
}

/// A coordinated write. Failing here means the cluster may be inconsistent,
/// so the error is also raised to the serve loop.
async fn put_key(
    State(state): State<NodeState>,
    Path(key): Path<String>,
    Json(body): Json<PutBody>,
) -> Result<impl IntoResponse, ApiError> {
    match state.replica.put(&key, &body.value).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => Err(state.fatal.raise(e).into()),
    }
}

async fn delete_key(
    State(state): State<NodeState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.replica.delete(&key).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => Err(state.fatal.raise(e).into()),
    }
}

async fn send(
    State(state): State<NodeState>,
    Json(message): Json<ProtocolMessage>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.replica.send(message).await?))
}

async fn storage(State(state): State<NodeState>) -> impl IntoResponse {
    Json(state.replica.storage().await)
}

async fn server_id(State(state): State<NodeState>) -> impl IntoResponse {
    Json(state.replica.server_id().to_string())
}

async fn register(
    State(state): State<NodeState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.replica.register_new_server(&req.id, req.handle)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn directory(State(state): State<NodeState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.replica.directory_entries()?))
}
