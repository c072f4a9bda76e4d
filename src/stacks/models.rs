//! Data models for stacks, topics, and topic dependencies.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A collection of topics a user studies together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyStack {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StudyStack {
    pub fn new(user_id: Uuid, name: String, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name,
            description,
        }
    }
}

/// A unit of study inside a stack; flashcards hang off topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: Uuid,
    pub stack_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Topic {
    pub fn new(stack_id: Uuid, name: String, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            stack_id,
            name,
            description,
        }
    }
}

/// Directed prerequisite edge: `from` should be understood before `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicDependency {
    pub from_topic_id: Uuid,
    pub to_topic_id: Uuid,
}
