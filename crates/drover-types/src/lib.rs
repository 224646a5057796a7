//! Shared data model for the drover orchestration core.
//!
//! Everything here is a plain value type: tasks, plans, oracle verdicts,
//! log entries, LLM-facing history, session snapshots. Mutation of these
//! values is owned by `drover-core`'s state manager; other components
//! receive read-only views or copies.

pub mod models;

pub use models::*;
