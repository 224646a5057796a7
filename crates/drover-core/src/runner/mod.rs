//! Task runner: the execute -> verify -> debug micro-loop for one task.
//!
//! Runs oracle attempts against the current task until it settles. The
//! first attempt executes; every non-success verdict flips the session
//! into debug mode and consumes one unit of the debug budget. Transport
//! errors, timeouts, unparseable verdicts, and empty-result successes are
//! all folded into synthesized non-success verdicts and follow the same
//! transition rules, so the runner never errors into the orchestrator.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use drover_types::{LogEntry, VerdictError, VerdictStatus};

use crate::codec::prompt::format_task_prompt;
use crate::codec::prompts::TASK_SYSTEM_PROMPT;
use crate::codec::parse_verdict;
use crate::config::OrchestratorConfig;
use crate::events::{EventBus, SessionEvent};
use crate::oracle::{CompletionRequest, Oracle, OracleError};
use crate::state::{StateError, StateManager};

/// Failure reason used for cancellation, both on tasks and the session.
pub const CANCELLED_REASON: &str = "cancelled";

/// Settled outcome of running one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded { result: String },
    Failed { reason: String },
}

/// One oracle attempt, folded.
enum Attempt {
    Success(drover_types::Verdict),
    NonSuccess {
        error: VerdictError,
        logs: Vec<LogEntry>,
    },
    Cancelled,
}

/// Drives the micro-loop for the state manager's current task.
pub struct TaskRunner<'a> {
    oracle: &'a dyn Oracle,
    state: &'a mut StateManager,
    bus: &'a EventBus,
    config: &'a OrchestratorConfig,
    cancel: &'a CancellationToken,
}

impl<'a> TaskRunner<'a> {
    pub fn new(
        oracle: &'a dyn Oracle,
        state: &'a mut StateManager,
        bus: &'a EventBus,
        config: &'a OrchestratorConfig,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            oracle,
            state,
            bus,
            config,
            cancel,
        }
    }

    /// Run the current task until it is settled.
    pub async fn run(&mut self) -> TaskOutcome {
        let task_id = match self.state.current_task() {
            Some(task) => task.id.clone(),
            None => {
                let cursor = self.state.cursor();
                return self.fail_invariant("runner", StateError::CursorExhausted(cursor));
            }
        };
        let mut debug_attempts: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return self.fail_cancelled(&task_id);
            }

            match self.attempt_once().await {
                Attempt::Cancelled => return self.fail_cancelled(&task_id),

                Attempt::Success(verdict) => {
                    let record = if self.state.debug_mode() {
                        self.state.record_debug(&task_id, &verdict)
                    } else {
                        self.state.record_success(&task_id, &verdict)
                    };
                    if let Err(e) = record {
                        return self.fail_invariant(&task_id, e);
                    }
                    info!(
                        session_id = %self.state.session_id(),
                        task_id = %task_id,
                        debug_attempts,
                        "task succeeded"
                    );
                    return TaskOutcome::Succeeded {
                        result: verdict.result,
                    };
                }

                Attempt::NonSuccess { error, logs } => {
                    if debug_attempts == 0 {
                        if let Err(e) = self.state.enter_debug_mode() {
                            return self.fail_invariant(&task_id, e);
                        }
                    }
                    if let Err(e) = self.state.record_failure(&task_id, error.clone(), logs) {
                        return self.fail_invariant(&task_id, e);
                    }

                    if debug_attempts >= self.config.max_debug_attempts {
                        warn!(
                            session_id = %self.state.session_id(),
                            task_id = %task_id,
                            max = self.config.max_debug_attempts,
                            "debug budget exhausted, task failed"
                        );
                        let reason = error.message;
                        let _ = self.state.mark_failed(&reason);
                        return TaskOutcome::Failed { reason };
                    }

                    debug_attempts += 1;
                    info!(
                        session_id = %self.state.session_id(),
                        task_id = %task_id,
                        attempt = debug_attempts,
                        error = %error.message,
                        "starting debug attempt"
                    );
                    self.bus.emit(SessionEvent::DebugStarted {
                        session_id: self.state.session_id(),
                        task_id: task_id.clone(),
                        attempt: debug_attempts,
                        timestamp: Utc::now(),
                    });
                }
            }
        }
    }

    /// Run a single oracle attempt and fold every failure mode into a
    /// synthesized non-success.
    async fn attempt_once(&self) -> Attempt {
        let Some(view) = self.state.prompt_view() else {
            return Attempt::NonSuccess {
                error: VerdictError::message("no current task to execute"),
                logs: vec![],
            };
        };

        let request = CompletionRequest {
            system_prompt: TASK_SYSTEM_PROMPT.to_string(),
            user_prompt: format_task_prompt(&view),
            timeout: self.config.task_timeout,
            tools: self.config.tool_descriptor.clone(),
        };

        let reply = tokio::select! {
            _ = self.cancel.cancelled() => return Attempt::Cancelled,
            outcome = tokio::time::timeout(self.config.task_timeout, self.oracle.complete(request)) => outcome,
        };

        match reply {
            Err(_elapsed) => Attempt::NonSuccess {
                error: VerdictError::message("task-timeout"),
                logs: vec![],
            },
            Ok(Err(OracleError::Cancelled)) => Attempt::Cancelled,
            Ok(Err(e)) => Attempt::NonSuccess {
                error: VerdictError::message(e.to_string()),
                logs: vec![],
            },
            Ok(Ok(text)) => match parse_verdict(&text) {
                Err(e) => Attempt::NonSuccess {
                    error: VerdictError::message(e.to_string()),
                    logs: vec![],
                },
                Ok(verdict) if verdict.status == VerdictStatus::Success => {
                    if verdict.result.trim().is_empty() {
                        // Schema invariant violation; treat as needs-debug.
                        Attempt::NonSuccess {
                            error: VerdictError::message(
                                "verdict reported success with an empty result",
                            ),
                            logs: verdict.log_entries,
                        }
                    } else {
                        Attempt::Success(verdict)
                    }
                }
                Ok(verdict) => {
                    let error = verdict
                        .error
                        .clone()
                        .unwrap_or_else(|| VerdictError::message("unspecified task failure"));
                    Attempt::NonSuccess {
                        error,
                        logs: verdict.log_entries,
                    }
                }
            },
        }
    }

    fn fail_cancelled(&mut self, task_id: &str) -> TaskOutcome {
        info!(
            session_id = %self.state.session_id(),
            task_id = %task_id,
            "task cancelled"
        );
        let _ = self.state.mark_failed(CANCELLED_REASON);
        TaskOutcome::Failed {
            reason: CANCELLED_REASON.to_string(),
        }
    }

    fn fail_invariant(&mut self, task_id: &str, error: StateError) -> TaskOutcome {
        let reason = format!("state invariant violated: {error}");
        warn!(
            session_id = %self.state.session_id(),
            task_id = %task_id,
            error = %error,
            "fatal state error in task runner"
        );
        let _ = self.state.mark_failed(&reason);
        TaskOutcome::Failed { reason }
    }
}
