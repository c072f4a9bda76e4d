//! Flashcards and the spaced repetition engine
//!
//! This module provides:
//! - Flashcard CRUD (cards hang off topics)
//! - The append-only review ledger per card
//! - SM-2 stats recompute by full-history replay
//! - The incremental EWMA miss tracker
//! - Due/missed selection over derived stats

pub mod algorithm;
pub mod models;
pub mod storage;

pub use algorithm::SchedulerConfig;
pub use models::*;
pub use storage::FlashcardStorage;
