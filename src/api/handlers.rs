//! HTTP request handlers

use super::types::{
    ErrorResponse, MessageRequest, MessageResponse, ModelInfo, ModelsResponse, OutboxResponse,
    ReviewQuery, ReviewsResponse,
};
use super::AppState;
use crate::db::{Conversation, HistoryEntry};
use crate::llm::all_models;
use crate::runtime::{OrchestratorError, HISTORY_WINDOW};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio_util::sync::CancellationToken;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Inbound messages
        .route("/api/message", post(post_message))
        // Read-only views
        .route("/api/history/:chat_id", get(get_history))
        .route("/api/conversations/:chat_id", get(get_conversation))
        .route("/api/reviews", get(list_reviews))
        .route("/api/outbox/:chat_id", get(get_outbox))
        // Model info
        .route("/api/models", get(list_models))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Inbound Messages
// ============================================================

async fn post_message(
    State(state): State<AppState>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let input = request
        .validate()
        .map_err(|msg| AppError::BadRequest(msg.to_string()))?;

    if !state.access.allows(input.chat_id, input.user_id) {
        tracing::warn!(
            chat_id = input.chat_id,
            user_id = input.user_id,
            "Rejected message from unknown chat or user"
        );
        return Err(AppError::Forbidden("Chat or user is not allowed".to_string()));
    }

    // Dropping this handler (client went away) cancels in-flight work
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let result = state
        .orchestrator
        .handle_message(&input, &cancel)
        .await
        .map_err(|e| {
            tracing::error!(chat_id = input.chat_id, error = %e, "Message handling failed");
            match e {
                OrchestratorError::Cancelled => {
                    AppError::Internal("Request cancelled".to_string())
                }
                _ => AppError::Internal("Internal server error processing message".to_string()),
            }
        })?;

    for deferred in &result.deferred_errors {
        tracing::warn!(chat_id = input.chat_id, error = %deferred, "Post-reply bookkeeping failed");
    }

    Ok(Json(MessageResponse::from(result)))
}

// ============================================================
// Read-only Views
// ============================================================

fn require_chat_id(chat_id: i64) -> Result<i64, AppError> {
    if chat_id == 0 {
        Err(AppError::BadRequest("chat_id must be non-zero".to_string()))
    } else {
        Ok(chat_id)
    }
}

async fn get_history(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    let chat_id = require_chat_id(chat_id)?;
    let history = state
        .db
        .get_recent_history(chat_id, HISTORY_WINDOW)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(history))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
) -> Result<Json<Conversation>, AppError> {
    let chat_id = require_chat_id(chat_id)?;
    state
        .db
        .get_conversation(chat_id)
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No conversation for chat {chat_id}")))
}

async fn list_reviews(
    State(state): State<AppState>,
    Query(query): Query<ReviewQuery>,
) -> Result<Json<ReviewsResponse>, AppError> {
    let reviews = match (query.customer_id, query.chat_id) {
        (Some(customer_id), None) => state.db.list_reviews_by_customer(customer_id),
        (None, Some(chat_id)) => state.db.list_reviews_by_chat(chat_id),
        _ => {
            return Err(AppError::BadRequest(
                "Specify exactly one of customer_id or chat_id".to_string(),
            ))
        }
    }
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ReviewsResponse { reviews }))
}

async fn get_outbox(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
) -> Result<Json<OutboxResponse>, AppError> {
    let chat_id = require_chat_id(chat_id)?;
    let outbox = state
        .outbox
        .as_ref()
        .ok_or_else(|| AppError::NotFound("Outbox is not enabled".to_string()))?;
    Ok(Json(OutboxResponse {
        chat_id,
        messages: outbox.sent_to(chat_id),
    }))
}

// ============================================================
// Model Info
// ============================================================

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let models = all_models()
        .iter()
        .filter(|def| state.llm_registry.get(def.id).is_some())
        .map(|def| ModelInfo {
            id: def.id.to_string(),
            provider: def.provider.display_name().to_string(),
            description: def.description.to_string(),
        })
        .collect();

    Json(ModelsResponse {
        models,
        default: state.llm_registry.default_model_id().to_string(),
    })
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("smb-review-bot ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
