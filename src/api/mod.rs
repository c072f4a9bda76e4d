//! HTTP surface for the backend.
//!
//! Routes mount under `/api`; `GET /health` sits at the root. The
//! `Authorization: Bearer <subject>` header carries an already-verified
//! subject (token verification is an upstream concern) and resolves to a
//! [`crate::users::User`] through the [`CurrentUser`] extractor, created
//! lazily on first sight.

mod chat;
mod error;
mod exams;
mod flashcards;
mod stacks;

pub use error::ApiError;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::chat::ChatStorage;
use crate::exams::ExamStorage;
use crate::flashcards::{FlashcardStorage, SchedulerConfig};
use crate::llm::LlmClient;
use crate::stacks::StackStorage;
use crate::storage::Database;
use crate::users::{User, UserStorage};

#[derive(Clone)]
pub struct AppState {
    pub users: UserStorage,
    pub stacks: StackStorage,
    pub flashcards: FlashcardStorage,
    pub exams: ExamStorage,
    pub chat: ChatStorage,
    pub llm: LlmClient,
}

impl AppState {
    pub fn new(db: Database, llm: LlmClient, scheduler: SchedulerConfig) -> Self {
        Self {
            users: UserStorage::new(db.clone()),
            stacks: StackStorage::new(db.clone()),
            flashcards: FlashcardStorage::new(db.clone(), scheduler),
            exams: ExamStorage::new(db.clone()),
            chat: ChatStorage::new(db),
            llm,
        }
    }
}

/// The authenticated user for this request.
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        let subject = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        let user = state.users.get_or_create(subject, subject)?;
        Ok(CurrentUser(user))
    }
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let topics = Router::new()
        .route(
            "/{topic_id}",
            put(stacks::update_topic).delete(stacks::delete_topic),
        )
        .route(
            "/{topic_id}/flashcards",
            get(flashcards::list_by_topic).post(flashcards::create_flashcard),
        )
        .route(
            "/{topic_id}/flashcards/generate",
            post(flashcards::generate_flashcards),
        );

    Router::new()
        .route("/health", get(health))
        .nest("/api/stacks", stacks::router())
        .nest("/api/topics", topics)
        .nest("/api/flashcards", flashcards::router())
        .route("/api/reviews/{review_id}", delete(flashcards::delete_review))
        .nest("/api/exams", exams::router())
        .route("/api/questions/{question_id}", delete(exams::delete_question))
        .nest("/api/attempts", exams::attempts_router())
        .nest("/api/chats", chat::router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
