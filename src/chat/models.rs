//! Data models for chat sessions and their children.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: Uuid,
    pub stack_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(stack_id: Uuid, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            stack_id,
            title,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A session with all of its children loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionDetail {
    pub id: Uuid,
    pub stack_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
    pub attachments: Vec<ChatAttachment>,
    pub tags: Vec<ChatTag>,
}

/// One turn in a session. `role` is "system", "user", or "assistant".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// What a chat attachment points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    ExamQuestion,
    Flashcard,
    Topic,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::ExamQuestion => "exam_question",
            AttachmentKind::Flashcard => "flashcard",
            AttachmentKind::Topic => "topic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "exam_question" => Some(AttachmentKind::ExamQuestion),
            "flashcard" => Some(AttachmentKind::Flashcard),
            "topic" => Some(AttachmentKind::Topic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAttachment {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub kind: AttachmentKind,
    pub ref_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTag {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub tag: String,
}

/// An attachment resolved to display text for an LLM preamble.
#[derive(Debug, Clone)]
pub struct HydratedAttachment {
    pub kind: AttachmentKind,
    pub text: String,
}
