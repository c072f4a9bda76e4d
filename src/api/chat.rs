//! Handlers for chat sessions: CRUD, children, and the LLM reply flow.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiError, AppState, CurrentUser};
use crate::chat::{AttachmentKind, ChatAttachment, ChatMessage, ChatSession, ChatSessionDetail, ChatTag};
use crate::llm::{generate, CompletionMessage};

const DEFAULT_TITLE: &str = "New Chat";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{chat_id}", get(get_session).delete(delete_session))
        .route("/{chat_id}/messages", post(add_message))
        .route("/{chat_id}/attachments", post(add_attachment))
        .route("/{chat_id}/tags", post(add_tag))
        .route("/{chat_id}/reply", post(reply))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateSessionRequest {
    #[serde(default)]
    title: Option<String>,
}

pub(super) async fn create_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stack_id): Path<Uuid>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<ChatSession>, ApiError> {
    let title = body.title.unwrap_or_else(|| DEFAULT_TITLE.to_string());
    Ok(Json(state.chat.create_session(user.id, stack_id, title)?))
}

pub(super) async fn list_sessions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stack_id): Path<Uuid>,
) -> Result<Json<Vec<ChatSession>>, ApiError> {
    Ok(Json(state.chat.list_sessions(user.id, stack_id)?))
}

async fn get_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<ChatSessionDetail>, ApiError> {
    Ok(Json(state.chat.get_session(user.id, chat_id)?))
}

async fn delete_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.chat.delete_session(user.id, chat_id)?;
    Ok(Json(serde_json::json!({ "detail": "Chat deleted" })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMessageRequest {
    role: String,
    content: String,
}

async fn add_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<Uuid>,
    Json(body): Json<AddMessageRequest>,
) -> Result<Json<ChatMessage>, ApiError> {
    if !matches!(body.role.as_str(), "system" | "user" | "assistant") {
        return Err(ApiError::Validation(format!(
            "invalid message role: {}",
            body.role
        )));
    }
    Ok(Json(
        state
            .chat
            .add_message(user.id, chat_id, body.role, body.content)?,
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddAttachmentRequest {
    kind: AttachmentKind,
    ref_id: Uuid,
}

async fn add_attachment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<Uuid>,
    Json(body): Json<AddAttachmentRequest>,
) -> Result<Json<ChatAttachment>, ApiError> {
    Ok(Json(
        state
            .chat
            .add_attachment(user.id, chat_id, body.kind, body.ref_id)?,
    ))
}

#[derive(Deserialize)]
struct AddTagRequest {
    tag: String,
}

async fn add_tag(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<Uuid>,
    Json(body): Json<AddTagRequest>,
) -> Result<Json<ChatTag>, ApiError> {
    Ok(Json(state.chat.add_tag(user.id, chat_id, body.tag)?))
}

#[derive(Deserialize)]
struct ReplyRequest {
    content: String,
}

/// One full chat turn: store the user message, answer it with the session's
/// attachments as context, store the assistant message. A session still on
/// the default title gets one generated from the opening exchange; title
/// failures are logged, never fatal.
async fn reply(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<Uuid>,
    Json(body): Json<ReplyRequest>,
) -> Result<Json<ChatMessage>, ApiError> {
    if body.content.is_empty() {
        return Err(ApiError::Validation("message content is required".to_string()));
    }

    state
        .chat
        .add_message(user.id, chat_id, "user".to_string(), body.content)?;
    let session = state.chat.get_session(user.id, chat_id)?;
    let attachments = state.chat.hydrate_attachments(user.id, chat_id)?;

    let messages: Vec<CompletionMessage> = session
        .messages
        .iter()
        .map(|m| CompletionMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        })
        .collect();
    let answer = generate::chat_with_context(&state.llm, messages, &attachments).await?;
    let stored = state
        .chat
        .add_message(user.id, chat_id, "assistant".to_string(), answer)?;

    if session.title == DEFAULT_TITLE {
        let opening: Vec<String> = session
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect();
        match generate::generate_chat_title(&state.llm, &opening, &attachments).await {
            Ok(title) if !title.is_empty() => {
                state.chat.rename_session(user.id, chat_id, title)?;
            }
            Ok(_) => {}
            Err(err) => log::warn!("chat title generation failed: {err}"),
        }
    }

    Ok(Json(stored))
}
