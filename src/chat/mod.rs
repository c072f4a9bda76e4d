//! Chat sessions scoped to a study stack.
//!
//! Sessions carry their messages, attachments (references to exam
//! questions, flashcards, or topics that are hydrated into text before an
//! LLM call), and free-form tags.

pub mod models;
pub mod storage;

pub use models::*;
pub use storage::ChatStorage;
