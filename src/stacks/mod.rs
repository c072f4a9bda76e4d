//! Study stacks, their topics, and the prerequisite graph between topics.
//!
//! A stack is the top-level unit a user studies (a course, a book, an exam
//! syllabus). Topics partition a stack; directed dependencies between topics
//! record which ones should be understood first.

pub mod models;
pub mod storage;

pub use models::*;
pub use storage::StackStorage;
