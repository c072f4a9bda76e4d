//! LLM-assisted content generation.
//!
//! A thin client for an OpenRouter-compatible chat completions API, plus the
//! generation routines built on it: topic extraction, prerequisite
//! inference, flashcard and exam generation, and stack-scoped chat. Models
//! return free text; the JSON payload is carved out between the outermost
//! braces/brackets before parsing, and anything malformed surfaces as a
//! typed error.

pub mod client;
pub mod generate;

pub use client::{CompletionMessage, LlmClient, LlmError};
pub use generate::{GeneratedFlashcard, GeneratedQuestion};
