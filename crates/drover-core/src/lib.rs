//! Plan-and-execute orchestration core.
//!
//! Converts a natural-language user request into an ordered task list via
//! a single planning call against an external reasoning service (the
//! oracle), then drives each task through an execute -> verify -> debug
//! micro-loop, threading every step's result into the next step's
//! context. Execution terminates deterministically on success,
//! unrecoverable failure, or cancellation.
//!
//! The crate is a library: there is no CLI, no storage, and no network
//! code here. Hosts provide an [`oracle::Oracle`] implementation, an
//! optional [`approval::ApprovalGate`], and event subscribers, then call
//! [`orchestrator::Orchestrator::execute`].

pub mod approval;
pub mod codec;
pub mod config;
pub mod events;
pub mod oracle;
pub mod orchestrator;
pub mod planner;
pub mod runner;
pub mod state;

pub use approval::{ApprovalDecision, ApprovalGate};
pub use config::OrchestratorConfig;
pub use events::{ChannelSink, EventBus, EventSink, SessionEvent, TracingSink};
pub use oracle::{CompletionRequest, Oracle, OracleError};
pub use orchestrator::{ExecuteError, Orchestrator};
pub use planner::{PlanOutcome, PlannerError};
pub use runner::{TaskOutcome, TaskRunner};
pub use state::{StateError, StateManager};
