//! Data models for flashcards, their review ledger, and derived stats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A flashcard with question (front) and answer (back).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub id: Uuid,
    pub topic_id: Uuid,
    pub front: String,
    pub back: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Flashcard {
    pub fn new(topic_id: Uuid, front: String, back: String, explanation: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic_id,
            front,
            back,
            explanation,
        }
    }
}

/// One grading event in a card's append-only review ledger.
///
/// Grades use the SM-2 scale (0-5):
/// - 0: complete blackout, no recall
/// - 1: incorrect, but recognized upon seeing the answer
/// - 2: incorrect, but the answer seemed easy to recall
/// - 3: correct response with serious difficulty
/// - 4: correct response after hesitation
/// - 5: perfect response with no hesitation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEvent {
    pub id: Uuid,
    pub flashcard_id: Uuid,
    pub grade: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl ReviewEvent {
    pub fn new(flashcard_id: Uuid, grade: i32, latency_ms: Option<i64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            flashcard_id,
            grade,
            latency_ms,
            timestamp: Utc::now(),
        }
    }
}

/// Derived scheduling and mastery state, at most one row per flashcard.
///
/// Scheduling fields (`last_seen`, `ease`, `interval_days`, `due_date`) stay
/// absent on a row seeded by a first EWMA touch until the first recompute;
/// `ewma_miss` stays absent on rows the tracker never touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardStats {
    pub flashcard_id: Uuid,
    pub correct_count: i64,
    pub wrong_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ease: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ewma_miss: Option<f64>,
}

impl FlashcardStats {
    /// A fresh row carrying only the miss signal.
    pub fn seeded(flashcard_id: Uuid, ewma_miss: f64) -> Self {
        Self {
            flashcard_id,
            correct_count: 0,
            wrong_count: 0,
            last_seen: None,
            ease: None,
            interval_days: None,
            due_date: None,
            ewma_miss: Some(ewma_miss),
        }
    }
}
