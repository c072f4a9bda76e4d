//! Mneme, a study stack backend.
//!
//! Users own study stacks; stacks contain topics (with prerequisite
//! dependencies), topics contain flashcards, and stacks also hold
//! multiple-choice exams and chat sessions. Content can be generated with an
//! LLM. The scheduling heart of the system lives in
//! [`flashcards::algorithm`]: an SM-2 replay over each card's review ledger,
//! an EWMA miss tracker, and the due/missed selectors built on both.
//!
//! The crate is consumed as a library by the `mneme-server` binary, which
//! mounts the [`api`] router over the shared SQLite [`storage::Database`].

pub mod api;
pub mod chat;
pub mod config;
pub mod exams;
pub mod flashcards;
pub mod llm;
pub mod stacks;
pub mod storage;
pub mod users;
