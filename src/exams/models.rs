//! Data models for exams, questions, and attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: Uuid,
    pub stack_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Exam {
    pub fn new(stack_id: Uuid, name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            stack_id,
            name,
            created_at: Utc::now(),
        }
    }
}

/// A four-option multiple-choice question. `answer` is the correct option
/// letter (A-D). The topic link survives topic deletion as `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: Uuid,
    pub exam_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<Uuid>,
    pub text: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub position: i32,
}

/// An exam plus the topic names its questions cover and the user's best
/// attempt so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamInfo {
    pub id: Uuid,
    pub stack_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_attempt: Option<ExamAttempt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamAttempt {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub completed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scored_questions: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
}

impl ExamAttempt {
    pub fn new(exam_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            exam_id,
            completed_at: Utc::now(),
            scored_questions: None,
            score: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionAttempt {
    pub id: Uuid,
    pub exam_attempt_id: Uuid,
    pub question_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<String>,
    pub is_correct: bool,
    pub scored: bool,
    pub manual_credit: bool,
}
