//! Multiple-choice exams, their questions, and graded attempts.
//!
//! Attempt scoring is plain aggregation over question attempts: a question
//! counts toward the denominator when it is marked `scored`, and toward the
//! score when it was answered correctly or manually credited.

pub mod models;
pub mod storage;

pub use models::*;
pub use storage::ExamStorage;
