//! HTTP surface for the docrag question-answering service.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /ask` – Answer one question with an ask approach (`rtr`). Returns
//!   `{ "data_points": [...], "answer": "...", "thoughts": "..." }`.
//! - `POST /chat` – Answer the newest turn of a conversation with a chat approach (`rrr`).
//! - `POST /chat_stream` – Same as `/chat`, streamed as newline-delimited JSON chunks. The first
//!   chunk carries the retrieval `context`; the rest are completion deltas.
//! - `GET /content/{path}` – Serve a stored source page so citations can be opened.
//! - `GET /metrics` – Observe request and ingestion counters.
//! - `GET /commands` – Machine-readable catalog of these routes.
//!
//! Failures are returned as `{ "error": "..." }`: 400 for unknown approaches or unusable
//! requests, 404 for missing content, 415 for non-JSON bodies, 500 otherwise.

use crate::chat::{ChatError, ChatTurn, Overrides, RagApi, ServiceError};
use crate::storage::BlobError;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router exposing the ask/chat API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: RagApi + 'static,
{
    Router::new()
        .route("/ask", post(ask::<S>))
        .route("/chat", post(chat::<S>))
        .route("/chat_stream", post(chat_stream::<S>))
        .route("/content/*path", get(content::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Request body for `POST /ask`.
#[derive(Deserialize)]
struct AskRequest {
    /// Registered ask approach key.
    approach: String,
    /// Question to answer.
    question: String,
    #[serde(default)]
    overrides: Option<Overrides>,
}

/// Request body for `POST /chat` and `POST /chat_stream`.
#[derive(Deserialize)]
struct ChatRequest {
    /// Registered chat approach key.
    approach: String,
    /// Conversation so far; the last turn holds the new question.
    history: Vec<ChatTurn>,
    #[serde(default)]
    overrides: Option<Overrides>,
}

async fn ask<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Response, AppError>
where
    S: RagApi,
{
    let Json(request) = payload?;
    let overrides = request.overrides.unwrap_or_default();
    let response = service
        .ask(&request.approach, &request.question, &overrides)
        .await?;
    tracing::info!(
        approach = %request.approach,
        sources = response.data_points.len(),
        "Ask request completed"
    );
    Ok(Json(response).into_response())
}

async fn chat<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError>
where
    S: RagApi,
{
    let Json(request) = payload?;
    let overrides = request.overrides.unwrap_or_default();
    let response = service
        .chat(&request.approach, &request.history, &overrides)
        .await?;
    tracing::info!(
        approach = %request.approach,
        turns = request.history.len(),
        sources = response.data_points.len(),
        "Chat request completed"
    );
    Ok(Json(response).into_response())
}

/// Stream chat chunks as newline-delimited JSON.
async fn chat_stream<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError>
where
    S: RagApi,
{
    let Json(request) = payload?;
    let overrides = request.overrides.unwrap_or_default();
    let chunks = service
        .chat_stream(&request.approach, &request.history, &overrides)
        .await?;

    let lines = chunks.map(|chunk| match chunk {
        Ok(value) => Ok(Bytes::from(format!("{value}\n"))),
        Err(err) => {
            tracing::error!(error = %err, "Chat stream failed");
            Err(err)
        }
    });
    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

async fn content<S>(
    State(service): State<Arc<S>>,
    Path(path): Path<String>,
) -> Result<Response, AppError>
where
    S: RagApi,
{
    let blob = service.content(&path).await?;
    Ok(([(header::CONTENT_TYPE, blob.content_type)], blob.bytes).into_response())
}

/// Return request and ingestion counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<crate::metrics::MetricsSnapshot>
where
    S: RagApi,
{
    Json(service.metrics_snapshot())
}

/// One route in the catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// List the routes this service answers, with example request bodies.
async fn get_commands() -> Json<CommandsResponse> {
    let overrides = json!({
        "retrieval_mode": "hybrid",
        "semantic_ranker": true,
        "semantic_captions": false,
        "top": 3,
        "suggest_followup_questions": true
    });
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "ask",
                method: "POST",
                path: "/ask",
                description: "Answer one question from retrieved sources. Response returns { \"data_points\", \"answer\", \"thoughts\" }.",
                request_example: Some(json!({
                    "approach": "rtr",
                    "question": "최충헌은 어떤 인물이야?",
                    "overrides": overrides.clone()
                })),
            },
            CommandDescriptor {
                name: "chat",
                method: "POST",
                path: "/chat",
                description: "Answer the newest turn of a conversation from retrieved sources.",
                request_example: Some(json!({
                    "approach": "rrr",
                    "history": [{ "user": "최충헌은 어떤 인물이야?" }],
                    "overrides": overrides.clone()
                })),
            },
            CommandDescriptor {
                name: "chat_stream",
                method: "POST",
                path: "/chat_stream",
                description: "Stream a chat answer as newline-delimited JSON; the first chunk carries the retrieval context.",
                request_example: Some(json!({
                    "approach": "rrr",
                    "history": [{ "user": "최충헌은 어떤 인물이야?" }],
                    "overrides": overrides
                })),
            },
            CommandDescriptor {
                name: "content",
                method: "GET",
                path: "/content/{path}",
                description: "Serve a stored source page referenced by a citation.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return answer and ingestion counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

enum AppError {
    Json(JsonRejection),
    Service(ServiceError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Json(JsonRejection::MissingJsonContentType(_)) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Service(ServiceError::UnknownApproach(_)) => StatusCode::BAD_REQUEST,
            Self::Service(ServiceError::Chat(ChatError::InvalidRequest(_))) => {
                StatusCode::BAD_REQUEST
            }
            Self::Service(ServiceError::Blob(BlobError::NotFound(_))) => StatusCode::NOT_FOUND,
            Self::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Json(JsonRejection::MissingJsonContentType(_)) => {
                "request must be json".to_string()
            }
            Self::Json(rejection) => rejection.body_text(),
            Self::Service(ServiceError::UnknownApproach(_)) => "unknown approach".to_string(),
            Self::Service(err) => err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(error = %message, "Request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(inner: JsonRejection) -> Self {
        Self::Json(inner)
    }
}

impl From<ServiceError> for AppError {
    fn from(inner: ServiceError) -> Self {
        Self::Service(inner)
    }
}
