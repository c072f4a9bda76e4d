//! Shared SQLite storage layer.
//!
//! A single database file holds every domain: users, stacks, topics,
//! flashcards (with their review ledger and derived stats), exams, and chat
//! sessions. The schema is created with `execute_batch` when the database is
//! opened; foreign keys cascade down the ownership chain so deleting a stack
//! removes everything underneath it.
//!
//! Domain modules each wrap a [`Database`] handle in their own storage
//! struct. The connection is shared behind `Arc<Mutex<_>>`, so every storage
//! method acquires the lock once and runs its queries on that guard.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage lock poisoned")]
    LockPoisoned,

    #[error("stack not found: {0}")]
    StackNotFound(Uuid),

    #[error("topic not found: {0}")]
    TopicNotFound(Uuid),

    #[error("topic not found: {0}")]
    TopicNameNotFound(String),

    #[error("flashcard not found: {0}")]
    FlashcardNotFound(Uuid),

    #[error("review not found: {0}")]
    ReviewNotFound(Uuid),

    #[error("stats not found for flashcard: {0}")]
    StatsNotFound(Uuid),

    #[error("exam not found: {0}")]
    ExamNotFound(Uuid),

    #[error("question not found: {0}")]
    QuestionNotFound(Uuid),

    #[error("exam attempt not found: {0}")]
    AttemptNotFound(Uuid),

    #[error("question attempt not found: {0}")]
    QuestionAttemptNotFound(Uuid),

    #[error("chat session not found: {0}")]
    ChatNotFound(Uuid),

    #[error("dependency not found: {from} -> {to}")]
    DependencyNotFound { from: Uuid, to: Uuid },

    #[error("dependency already exists: {from} -> {to}")]
    DuplicateDependency { from: Uuid, to: Uuid },

    #[error("invalid answer option: {0}")]
    InvalidAnswerOption(String),
}

impl StorageError {
    /// Whether the error is a missing or unauthorized row, as opposed to an
    /// underlying database failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::StackNotFound(_)
                | StorageError::TopicNotFound(_)
                | StorageError::TopicNameNotFound(_)
                | StorageError::FlashcardNotFound(_)
                | StorageError::ReviewNotFound(_)
                | StorageError::StatsNotFound(_)
                | StorageError::ExamNotFound(_)
                | StorageError::QuestionNotFound(_)
                | StorageError::AttemptNotFound(_)
                | StorageError::QuestionAttemptNotFound(_)
                | StorageError::ChatNotFound(_)
                | StorageError::DependencyNotFound { .. }
        )
    }

    /// Whether the error is caused by rejected input rather than by state.
    pub fn is_invalid(&self) -> bool {
        matches!(
            self,
            StorageError::DuplicateDependency { .. } | StorageError::InvalidAnswerOption(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    external_uid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS study_stacks (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT
);
CREATE INDEX IF NOT EXISTS idx_stacks_user ON study_stacks(user_id);

CREATE TABLE IF NOT EXISTS topics (
    id TEXT PRIMARY KEY,
    stack_id TEXT NOT NULL REFERENCES study_stacks(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT
);
CREATE INDEX IF NOT EXISTS idx_topics_stack ON topics(stack_id);

CREATE TABLE IF NOT EXISTS topic_dependencies (
    from_topic_id TEXT NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
    to_topic_id TEXT NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
    PRIMARY KEY (from_topic_id, to_topic_id)
);

CREATE TABLE IF NOT EXISTS flashcards (
    id TEXT PRIMARY KEY,
    topic_id TEXT NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
    front TEXT NOT NULL,
    back TEXT NOT NULL,
    explanation TEXT
);
CREATE INDEX IF NOT EXISTS idx_flashcards_topic ON flashcards(topic_id);

-- Append-only review ledger; the sole source of truth for recompute.
CREATE TABLE IF NOT EXISTS flashcard_reviews (
    id TEXT PRIMARY KEY,
    flashcard_id TEXT NOT NULL REFERENCES flashcards(id) ON DELETE CASCADE,
    grade INTEGER NOT NULL,
    latency_ms INTEGER,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reviews_card_time
    ON flashcard_reviews(flashcard_id, timestamp);

-- Derived, at most one row per flashcard. Scheduling columns stay NULL on
-- rows seeded by a first EWMA touch until the first recompute fills them.
CREATE TABLE IF NOT EXISTS flashcard_stats (
    flashcard_id TEXT PRIMARY KEY REFERENCES flashcards(id) ON DELETE CASCADE,
    correct_count INTEGER NOT NULL DEFAULT 0,
    wrong_count INTEGER NOT NULL DEFAULT 0,
    last_seen TEXT,
    ease REAL,
    interval_days INTEGER,
    due_date TEXT,
    ewma_miss REAL
);

CREATE TABLE IF NOT EXISTS exams (
    id TEXT PRIMARY KEY,
    stack_id TEXT NOT NULL REFERENCES study_stacks(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_exams_stack ON exams(stack_id);

CREATE TABLE IF NOT EXISTS questions (
    id TEXT PRIMARY KEY,
    exam_id TEXT NOT NULL REFERENCES exams(id) ON DELETE CASCADE,
    topic_id TEXT REFERENCES topics(id) ON DELETE SET NULL,
    text TEXT NOT NULL,
    option_a TEXT NOT NULL,
    option_b TEXT NOT NULL,
    option_c TEXT NOT NULL,
    option_d TEXT NOT NULL,
    answer TEXT NOT NULL,
    explanation TEXT,
    position INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_questions_exam ON questions(exam_id);

CREATE TABLE IF NOT EXISTS exam_attempts (
    id TEXT PRIMARY KEY,
    exam_id TEXT NOT NULL REFERENCES exams(id) ON DELETE CASCADE,
    completed_at TEXT NOT NULL,
    scored_questions INTEGER,
    score INTEGER
);
CREATE INDEX IF NOT EXISTS idx_attempts_exam ON exam_attempts(exam_id);

CREATE TABLE IF NOT EXISTS question_attempts (
    id TEXT PRIMARY KEY,
    exam_attempt_id TEXT NOT NULL REFERENCES exam_attempts(id) ON DELETE CASCADE,
    question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
    selected_option TEXT,
    is_correct INTEGER NOT NULL,
    scored INTEGER NOT NULL DEFAULT 1,
    manual_credit INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_question_attempts_attempt
    ON question_attempts(exam_attempt_id);

CREATE TABLE IF NOT EXISTS chat_sessions (
    id TEXT PRIMARY KEY,
    stack_id TEXT NOT NULL REFERENCES study_stacks(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chats_stack ON chat_sessions(stack_id);

CREATE TABLE IF NOT EXISTS chat_messages (
    id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chat_messages_chat ON chat_messages(chat_id);

CREATE TABLE IF NOT EXISTS chat_attachments (
    id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    ref_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chat_attachments_chat ON chat_attachments(chat_id);

CREATE TABLE IF NOT EXISTS chat_tags (
    id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
    tag TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chat_tags_chat ON chat_tags(chat_id);
"#;

/// Handle to the shared SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (creating if necessary) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        log::info!("opened database at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

/// Fixed-width RFC 3339 rendering so timestamp TEXT columns sort
/// lexicographically in chronological order.
pub(crate) fn format_datetime(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_datetime(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_uuid(idx: usize, value: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
    }

    #[test]
    fn open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mneme.db");
        let db = Database::open(&path).unwrap();
        drop(db);
        assert!(path.exists());
    }

    #[test]
    fn datetime_roundtrip_preserves_order() {
        let a = Utc::now();
        let b = a + chrono::Duration::microseconds(1);
        let (fa, fb) = (format_datetime(a), format_datetime(b));
        assert!(fa < fb);
        assert_eq!(parse_datetime(0, fa).unwrap(), a);
    }
}
