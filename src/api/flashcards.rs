//! Handlers for flashcards, review submission, and the study lists.

use axum::extract::{Path, Query, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiError, AppState, CurrentUser};
use crate::flashcards::{Flashcard, FlashcardStats, ReviewEvent};
use crate::llm::generate;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/{flashcard_id}",
            put(edit_flashcard).delete(delete_flashcard),
        )
        .route(
            "/{flashcard_id}/reviews",
            get(list_reviews).post(submit_review),
        )
        .route("/{flashcard_id}/stats", get(get_stats))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateFlashcardRequest {
    front: String,
    back: String,
    #[serde(default)]
    explanation: Option<String>,
}

pub(super) async fn list_by_topic(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(topic_id): Path<Uuid>,
) -> Result<Json<Vec<Flashcard>>, ApiError> {
    Ok(Json(state.flashcards.list_by_topic(user.id, topic_id)?))
}

pub(super) async fn create_flashcard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(topic_id): Path<Uuid>,
    Json(body): Json<CreateFlashcardRequest>,
) -> Result<Json<Flashcard>, ApiError> {
    if body.front.is_empty() || body.back.is_empty() {
        return Err(ApiError::Validation(
            "front and back text are required".to_string(),
        ));
    }
    Ok(Json(state.flashcards.create(
        user.id,
        topic_id,
        body.front,
        body.back,
        body.explanation,
    )?))
}

/// Generate flashcards for a topic with the LLM and persist the usable ones.
pub(super) async fn generate_flashcards(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(topic_id): Path<Uuid>,
) -> Result<Json<Vec<Flashcard>>, ApiError> {
    let topic = state.stacks.get_topic(user.id, topic_id)?;
    let existing = state.flashcards.list_by_topic(user.id, topic_id)?;
    let avoid: Vec<String> = existing.into_iter().map(|c| c.front).collect();

    let generated =
        generate::extract_flashcards(&state.llm, &topic.name, 10, &avoid, None).await?;

    let mut created = Vec::with_capacity(generated.len());
    for card in generated {
        created.push(state.flashcards.create(
            user.id,
            topic_id,
            card.front,
            card.back,
            Some(card.explanation),
        )?);
    }
    Ok(Json(created))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditFlashcardRequest {
    front: String,
    back: String,
}

async fn edit_flashcard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(flashcard_id): Path<Uuid>,
    Json(body): Json<EditFlashcardRequest>,
) -> Result<Json<Flashcard>, ApiError> {
    Ok(Json(
        state
            .flashcards
            .edit(user.id, flashcard_id, body.front, body.back)?,
    ))
}

async fn delete_flashcard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(flashcard_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.flashcards.delete(user.id, flashcard_id)?;
    Ok(Json(serde_json::json!({ "detail": "Flashcard deleted" })))
}

async fn list_reviews(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(flashcard_id): Path<Uuid>,
) -> Result<Json<Vec<ReviewEvent>>, ApiError> {
    Ok(Json(state.flashcards.list_reviews(user.id, flashcard_id)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddReviewRequest {
    grade: i32,
    #[serde(default)]
    latency_ms: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewResponse {
    review: ReviewEvent,
    stats: FlashcardStats,
}

/// Submit a grading event. Grade bounds are enforced here, before the
/// scheduling engine ever sees the value.
async fn submit_review(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(flashcard_id): Path<Uuid>,
    Json(body): Json<AddReviewRequest>,
) -> Result<Json<ReviewResponse>, ApiError> {
    if !(0..=5).contains(&body.grade) {
        return Err(ApiError::Validation("invalid grade value".to_string()));
    }
    if body.latency_ms.is_some_and(|l| l < 0) {
        return Err(ApiError::Validation(
            "latency must be non-negative".to_string(),
        ));
    }

    let (review, stats) =
        state
            .flashcards
            .submit_review(user.id, flashcard_id, body.grade, body.latency_ms)?;
    Ok(Json(ReviewResponse { review, stats }))
}

/// Administrative removal of a single ledger event.
pub(super) async fn delete_review(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(review_id): Path<Uuid>,
) -> Result<Json<Option<FlashcardStats>>, ApiError> {
    Ok(Json(state.flashcards.delete_review(user.id, review_id)?))
}

async fn get_stats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(flashcard_id): Path<Uuid>,
) -> Result<Json<Option<FlashcardStats>>, ApiError> {
    Ok(Json(state.flashcards.get_stats(user.id, flashcard_id)?))
}

pub(super) async fn list_by_stack(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stack_id): Path<Uuid>,
) -> Result<Json<Vec<Flashcard>>, ApiError> {
    Ok(Json(state.flashcards.list_by_stack(user.id, stack_id)?))
}

/// Caller-supplied "now" for the due selector; defaults to the current
/// instant.
#[derive(Deserialize)]
pub(super) struct NowQuery {
    now: Option<DateTime<Utc>>,
}

pub(super) async fn learn(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stack_id): Path<Uuid>,
    Query(query): Query<NowQuery>,
) -> Result<Json<Vec<Flashcard>>, ApiError> {
    let now = query.now.unwrap_or_else(Utc::now);
    let due = state.flashcards.due_cards(user.id, stack_id, now)?;
    log::debug!("{} cards due in stack {}", due.len(), stack_id);
    Ok(Json(due))
}

pub(super) async fn missed(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stack_id): Path<Uuid>,
) -> Result<Json<Vec<Flashcard>>, ApiError> {
    Ok(Json(state.flashcards.missed_cards(user.id, stack_id)?))
}
