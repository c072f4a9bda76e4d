//! Handlers for stacks, topics, dependencies, and the study lists.

use std::collections::{BTreeMap, HashMap};

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use super::{chat, exams, flashcards, ApiError, AppState, CurrentUser};
use crate::llm::generate;
use crate::stacks::{StudyStack, Topic, TopicDependency};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_stacks).post(create_stack))
        .route("/{stack_id}", get(get_stack))
        .route("/{stack_id}/topics", get(list_topics).post(create_topic))
        .route("/{stack_id}/dependencies", get(list_dependencies))
        .route("/{stack_id}/generate_topics", post(generate_topics))
        .route("/{stack_id}/submit_topics", post(submit_topics))
        .route("/{stack_id}/infer_dependencies", post(infer_dependencies))
        .route("/{stack_id}/submit_dependencies", post(submit_dependencies))
        .route("/{stack_id}/flashcards", get(flashcards::list_by_stack))
        .route("/{stack_id}/learn", get(flashcards::learn))
        .route("/{stack_id}/missed", get(flashcards::missed))
        .route("/{stack_id}/exams", get(exams::list_for_stack))
        .route("/{stack_id}/exams/generate", post(exams::generate_exam))
        .route(
            "/{stack_id}/chats",
            get(chat::list_sessions).post(chat::create_session),
        )
}

async fn list_stacks(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<StudyStack>>, ApiError> {
    Ok(Json(state.stacks.list_stacks(user.id)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateStackRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

async fn create_stack(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateStackRequest>,
) -> Result<Json<StudyStack>, ApiError> {
    if body.name.is_empty() {
        return Err(ApiError::Validation("stack name is required".to_string()));
    }
    Ok(Json(
        state.stacks.create_stack(user.id, body.name, body.description)?,
    ))
}

async fn get_stack(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stack_id): Path<Uuid>,
) -> Result<Json<StudyStack>, ApiError> {
    Ok(Json(state.stacks.get_stack(user.id, stack_id)?))
}

async fn list_topics(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stack_id): Path<Uuid>,
) -> Result<Json<Vec<Topic>>, ApiError> {
    Ok(Json(state.stacks.list_topics(user.id, stack_id)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateTopicRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

async fn create_topic(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stack_id): Path<Uuid>,
    Json(body): Json<CreateTopicRequest>,
) -> Result<Json<Topic>, ApiError> {
    if body.name.is_empty() {
        return Err(ApiError::Validation("topic name is required".to_string()));
    }
    Ok(Json(
        state
            .stacks
            .create_topic(user.id, stack_id, body.name, body.description)?,
    ))
}

pub(super) async fn update_topic(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(topic_id): Path<Uuid>,
    Json(body): Json<CreateTopicRequest>,
) -> Result<Json<Topic>, ApiError> {
    Ok(Json(
        state
            .stacks
            .update_topic(user.id, topic_id, body.name, body.description)?,
    ))
}

pub(super) async fn delete_topic(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(topic_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.stacks.delete_topic(user.id, topic_id)?;
    Ok(Json(serde_json::json!({ "detail": "Topic deleted" })))
}

async fn list_dependencies(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stack_id): Path<Uuid>,
) -> Result<Json<Vec<TopicDependency>>, ApiError> {
    Ok(Json(state.stacks.list_dependencies(user.id, stack_id)?))
}

/// Ask the LLM for new topics, avoiding ones the stack already has. Nothing
/// is persisted until the client submits its curated list.
async fn generate_topics(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stack_id): Path<Uuid>,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    let stack = state.stacks.get_stack(user.id, stack_id)?;
    let existing = state.stacks.list_topics(user.id, stack_id)?;
    let avoid: Vec<String> = existing.into_iter().map(|t| t.name).collect();

    let topics = generate::extract_topics(
        &state.llm,
        &stack.name,
        stack.description.as_deref(),
        &avoid,
    )
    .await?;
    Ok(Json(topics))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitTopicsRequest {
    /// New topics as name -> description.
    #[serde(default)]
    new_topics: BTreeMap<String, String>,
    /// Edited topics as id -> (name, description).
    #[serde(default)]
    old_topics: HashMap<Uuid, (String, String)>,
    #[serde(default)]
    deleted_topics: Vec<Uuid>,
}

/// Apply a curated topic list: create, update, and delete in one request.
/// Returns the ids assigned to the new topics.
async fn submit_topics(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stack_id): Path<Uuid>,
    Json(body): Json<SubmitTopicsRequest>,
) -> Result<Json<BTreeMap<String, Uuid>>, ApiError> {
    let mut created = BTreeMap::new();
    for (name, description) in body.new_topics {
        let topic = state
            .stacks
            .create_topic(user.id, stack_id, name.clone(), Some(description))?;
        created.insert(name, topic.id);
    }
    for (topic_id, (name, description)) in body.old_topics {
        state
            .stacks
            .update_topic(user.id, topic_id, name, Some(description))?;
    }
    for topic_id in body.deleted_topics {
        state.stacks.delete_topic(user.id, topic_id)?;
    }
    Ok(Json(created))
}

async fn infer_dependencies(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stack_id): Path<Uuid>,
) -> Result<Json<Vec<(String, String)>>, ApiError> {
    let topics = state.stacks.list_topics(user.id, stack_id)?;
    if topics.is_empty() {
        return Err(ApiError::Validation(
            "stack has no topics to infer dependencies for".to_string(),
        ));
    }
    let names: Vec<String> = topics.into_iter().map(|t| t.name).collect();
    let edges = generate::infer_topic_dependencies(&state.llm, &names).await?;
    Ok(Json(edges))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitDependenciesRequest {
    /// New edges as (from, to) topic name pairs.
    #[serde(default)]
    new_dependencies: Vec<(String, String)>,
    /// Edited edges: "from_id,to_id" -> (new from name, new to name).
    #[serde(default)]
    old_dependencies: HashMap<String, (String, String)>,
    /// Deleted edges as "from_id,to_id" keys.
    #[serde(default)]
    deleted_dependencies: Vec<String>,
}

/// Apply a curated dependency list. Individual edge failures are logged and
/// skipped so one bad pair does not abort the whole submission.
async fn submit_dependencies(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(_stack_id): Path<Uuid>,
    Json(body): Json<SubmitDependenciesRequest>,
) -> Result<Json<HashMap<String, (Uuid, Uuid)>>, ApiError> {
    let mut created = HashMap::new();
    for (from, to) in body.new_dependencies {
        match state.stacks.add_dependency_by_name(user.id, &from, &to) {
            Ok(dep) => {
                created.insert(
                    format!("{from},{to}"),
                    (dep.from_topic_id, dep.to_topic_id),
                );
            }
            Err(err) => log::warn!("skipping dependency {from} -> {to}: {err}"),
        }
    }

    for (key, (new_from, new_to)) in body.old_dependencies {
        let (from_id, to_id) = parse_edge_key(&key)?;
        if let Err(err) = state
            .stacks
            .update_dependency(user.id, from_id, to_id, &new_from, &new_to)
        {
            log::warn!("skipping dependency update {key}: {err}");
        }
    }

    for key in body.deleted_dependencies {
        let (from_id, to_id) = parse_edge_key(&key)?;
        if let Err(err) = state.stacks.delete_dependency(user.id, from_id, to_id) {
            log::warn!("skipping dependency delete {key}: {err}");
        }
    }

    Ok(Json(created))
}

fn parse_edge_key(key: &str) -> Result<(Uuid, Uuid), ApiError> {
    let (from, to) = key
        .split_once(',')
        .ok_or_else(|| ApiError::Validation(format!("malformed edge key: {key}")))?;
    let parse = |s: &str| {
        Uuid::parse_str(s.trim())
            .map_err(|_| ApiError::Validation(format!("malformed edge key: {key}")))
    };
    Ok((parse(from)?, parse(to)?))
}
