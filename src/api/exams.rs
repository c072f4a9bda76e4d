//! Handlers for exams, questions, and attempts.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiError, AppState, CurrentUser};
use crate::exams::{Exam, ExamAttempt, ExamInfo, Question, QuestionAttempt};
use crate::llm::generate;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{exam_id}", get(get_exam).delete(delete_exam))
        .route("/{exam_id}/info", get(exam_info))
        .route("/{exam_id}/questions", get(list_questions))
        .route(
            "/{exam_id}/attempts",
            get(list_attempts).post(upload_attempt),
        )
}

pub fn attempts_router() -> Router<AppState> {
    Router::new()
        .route("/{attempt_id}", axum::routing::delete(delete_attempt))
        .route("/{attempt_id}/questions", get(list_question_attempts))
        .route("/{attempt_id}/score", post(score_attempt))
        .route("/{attempt_id}/scoring", post(update_scoring))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GenerateExamRequest {
    title: String,
    #[serde(default)]
    prompt: Option<String>,
    num_questions: usize,
    topics: Vec<String>,
}

/// Generate an exam with the LLM and persist it with its questions.
/// Questions that come back structurally unusable (missing options or an
/// unknown topic) are logged and degraded rather than failing the exam.
pub(super) async fn generate_exam(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stack_id): Path<Uuid>,
    Json(body): Json<GenerateExamRequest>,
) -> Result<Json<Exam>, ApiError> {
    state.stacks.get_stack(user.id, stack_id)?;
    let generated = generate::create_multiple_choice_exam(
        &state.llm,
        &body.title,
        &body.topics,
        body.num_questions,
        body.prompt.as_deref(),
    )
    .await?;

    let exam = state.exams.create_exam(user.id, stack_id, body.title)?;
    for question in generated {
        let Some(options) = question.options() else {
            log::warn!("skipping generated question without four options");
            continue;
        };
        let topic_id = match state.stacks.get_topic_by_name(user.id, &question.topic_name) {
            Ok(topic) => Some(topic.id),
            Err(err) => {
                log::warn!(
                    "generated question references unknown topic '{}': {err}",
                    question.topic_name
                );
                None
            }
        };
        state.exams.create_question(
            user.id,
            exam.id,
            question.text,
            options,
            question.answer,
            topic_id,
        )?;
    }
    Ok(Json(exam))
}

pub(super) async fn list_for_stack(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stack_id): Path<Uuid>,
) -> Result<Json<Vec<ExamInfo>>, ApiError> {
    Ok(Json(state.exams.list_exams(user.id, stack_id)?))
}

async fn get_exam(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(exam_id): Path<Uuid>,
) -> Result<Json<Exam>, ApiError> {
    Ok(Json(state.exams.get_exam(user.id, exam_id)?))
}

async fn exam_info(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(exam_id): Path<Uuid>,
) -> Result<Json<ExamInfo>, ApiError> {
    Ok(Json(state.exams.exam_info(user.id, exam_id)?))
}

async fn list_questions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(exam_id): Path<Uuid>,
) -> Result<Json<Vec<Question>>, ApiError> {
    Ok(Json(state.exams.list_questions(user.id, exam_id)?))
}

async fn delete_exam(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(exam_id): Path<Uuid>,
) -> Result<Json<bool>, ApiError> {
    state.exams.delete_exam(user.id, exam_id)?;
    Ok(Json(true))
}

pub(super) async fn delete_question(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(question_id): Path<Uuid>,
) -> Result<Json<bool>, ApiError> {
    state.exams.delete_question(user.id, question_id)?;
    Ok(Json(true))
}

async fn list_attempts(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(exam_id): Path<Uuid>,
) -> Result<Json<Vec<ExamAttempt>>, ApiError> {
    Ok(Json(state.exams.list_attempts(user.id, exam_id)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadAttemptRequest {
    question_attempts: Vec<UploadedAnswer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedAnswer {
    question_id: Uuid,
    #[serde(default)]
    selected_option: Option<String>,
}

/// Record a completed sitting: every answer, then the aggregate score.
async fn upload_attempt(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(exam_id): Path<Uuid>,
    Json(body): Json<UploadAttemptRequest>,
) -> Result<Json<ExamAttempt>, ApiError> {
    let attempt = state.exams.create_attempt(user.id, exam_id)?;
    for answer in body.question_attempts {
        state.exams.create_question_attempt(
            user.id,
            attempt.id,
            answer.question_id,
            answer.selected_option,
        )?;
    }
    Ok(Json(state.exams.score_attempt(user.id, attempt.id)?))
}

async fn delete_attempt(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(attempt_id): Path<Uuid>,
) -> Result<Json<bool>, ApiError> {
    state.exams.delete_attempt(user.id, attempt_id)?;
    Ok(Json(true))
}

async fn list_question_attempts(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(attempt_id): Path<Uuid>,
) -> Result<Json<Vec<QuestionAttempt>>, ApiError> {
    Ok(Json(state.exams.list_question_attempts(user.id, attempt_id)?))
}

async fn score_attempt(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(attempt_id): Path<Uuid>,
) -> Result<Json<ExamAttempt>, ApiError> {
    Ok(Json(state.exams.score_attempt(user.id, attempt_id)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateScoringRequest {
    question_attempts: Vec<ScoringOverride>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoringOverride {
    question_attempt_id: Uuid,
    scored: bool,
    manual_credit: bool,
}

/// Apply manual scoring overrides, then re-aggregate the attempt.
async fn update_scoring(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(attempt_id): Path<Uuid>,
    Json(body): Json<UpdateScoringRequest>,
) -> Result<Json<ExamAttempt>, ApiError> {
    for qa in body.question_attempts {
        state.exams.update_question_attempt_scoring(
            user.id,
            qa.question_attempt_id,
            qa.scored,
            qa.manual_credit,
        )?;
    }
    Ok(Json(state.exams.score_attempt(user.id, attempt_id)?))
}
