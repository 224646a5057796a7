//! Top-level driver: planning phase, sequential task phase, summary.
//!
//! Binds the planner, state manager, and task runner behind a single
//! `execute` entrypoint, emits the session event stream, and honors
//! cancellation between tasks and inside every oracle call. Tasks run
//! strictly one at a time -- sequential ordering is the correctness
//! property here, so there is no parallelism across a plan.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use drover_types::{SessionPhase, Snapshot, Summary, TaskStatus};

use crate::approval::{classify_risk, ApprovalDecision, ApprovalGate};
use crate::config::OrchestratorConfig;
use crate::events::{EventBus, EventSink, SessionEvent};
use crate::oracle::Oracle;
use crate::planner::{self, PlanOutcome, PlannerError};
use crate::runner::{TaskOutcome, TaskRunner, CANCELLED_REASON};
use crate::state::{StateError, StateManager};

/// Session-level terminal failures. Everything else is observable through
/// events and the final [`Summary`].
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("planning failed: {0}")]
    Planning(PlannerError),

    #[error("plan rejected by the user")]
    UserRejected,

    #[error("execution cancelled")]
    Cancelled,

    #[error("session state error: {0}")]
    State(#[from] StateError),
}

/// How the task loop ended.
enum Drive {
    /// Plan exhausted or a task failed terminally (including a gate
    /// rejection); a summary applies.
    Finished,
    Cancelled,
    Invariant(StateError),
}

/// One-session driver for a plan-and-execute run.
///
/// Owns the session's [`StateManager`] exclusively; after `execute`
/// returns, the final state stays inspectable via
/// [`Orchestrator::export_state`] (including after cancellation).
pub struct Orchestrator {
    oracle: Arc<dyn Oracle>,
    config: OrchestratorConfig,
    bus: EventBus,
    gate: Option<Arc<dyn ApprovalGate>>,
    cancel: CancellationToken,
    state: Option<StateManager>,
}

impl Orchestrator {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            oracle,
            config: OrchestratorConfig::default(),
            bus: EventBus::new(),
            gate: None,
            cancel: CancellationToken::new(),
            state: None,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Install an approval gate. Absent gate means implicit approval.
    pub fn with_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Add an event subscriber. Must be called before `execute`.
    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.bus.subscribe(sink);
    }

    /// Clone of the cancellation signal. Cancelling it aborts the current
    /// oracle call promptly; a cancelled orchestrator stays cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Snapshot of the session state, once a plan was accepted. Partial
    /// results survive cancellation and are readable here.
    pub fn export_state(&self) -> Option<Snapshot> {
        self.state.as_ref().map(StateManager::export)
    }

    /// Run one end-to-end session for a user request.
    pub async fn execute(&mut self, user_request: &str) -> Result<Summary, ExecuteError> {
        let started = Instant::now();
        let session_id = Uuid::new_v4();
        self.state = None;

        info!(session_id = %session_id, "starting execution");
        self.bus.emit(SessionEvent::PlanningStarted {
            session_id,
            request: user_request.to_string(),
            timestamp: Utc::now(),
        });

        let mut outcome = self.plan_once(session_id, user_request).await?;
        let mut state = self.accept_plan(session_id, &outcome)?;

        // Plan approval, when a gate is installed. A modify verdict buys
        // exactly one re-plan. The callback is a suspension point, so it
        // is raced against cancellation like the oracle calls.
        if let Some(gate) = self.gate.clone() {
            let mut decision = match self
                .approve_plan_cancellable(gate.as_ref(), &outcome, user_request)
                .await
            {
                Some(decision) => decision,
                None => {
                    let _ = state.mark_failed(CANCELLED_REASON);
                    self.state = Some(state);
                    return Err(self.cancelled_failure(session_id));
                }
            };
            if decision == ApprovalDecision::Modify {
                info!(session_id = %session_id, "plan approval requested changes, re-planning once");
                match self.plan_once(session_id, user_request).await {
                    Ok(replanned) => {
                        outcome = replanned;
                        state = self.accept_plan(session_id, &outcome)?;
                        decision = match self
                            .approve_plan_cancellable(gate.as_ref(), &outcome, user_request)
                            .await
                        {
                            Some(decision) => decision,
                            None => {
                                let _ = state.mark_failed(CANCELLED_REASON);
                                self.state = Some(state);
                                return Err(self.cancelled_failure(session_id));
                            }
                        };
                        if decision == ApprovalDecision::Modify {
                            decision = ApprovalDecision::Reject;
                        }
                    }
                    Err(e) => {
                        self.state = Some(state);
                        return Err(e);
                    }
                }
            }
            if decision != ApprovalDecision::Approve {
                warn!(session_id = %session_id, "plan rejected by approval gate");
                self.bus.emit(SessionEvent::ExecutionFailed {
                    session_id,
                    reason: "user-rejected".to_string(),
                    timestamp: Utc::now(),
                });
                self.state = Some(state);
                return Err(ExecuteError::UserRejected);
            }
        }

        if let Err(e) = state.start_execution() {
            self.bus.emit(SessionEvent::ExecutionFailed {
                session_id,
                reason: e.to_string(),
                timestamp: Utc::now(),
            });
            self.state = Some(state);
            return Err(e.into());
        }

        let drive = self.drive(&mut state).await;

        let result = match drive {
            Drive::Finished => {
                let summary = self.summarize(&state, started);
                info!(
                    session_id = %session_id,
                    success = summary.success,
                    completed = summary.completed_tasks,
                    total_steps = summary.total_steps,
                    "execution finished"
                );
                self.bus.emit(SessionEvent::ExecutionCompleted {
                    session_id,
                    summary: summary.clone(),
                    timestamp: Utc::now(),
                });
                Ok(summary)
            }
            Drive::Cancelled => Err(self.cancelled_failure(session_id)),
            Drive::Invariant(e) => {
                warn!(session_id = %session_id, error = %e, "fatal state error");
                self.bus.emit(SessionEvent::ExecutionFailed {
                    session_id,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e.into())
            }
        };

        self.state = Some(state);
        result
    }

    /// Emit the cancellation failure event and produce the matching
    /// error.
    fn cancelled_failure(&self, session_id: Uuid) -> ExecuteError {
        info!(session_id = %session_id, "execution cancelled");
        self.bus.emit(SessionEvent::ExecutionFailed {
            session_id,
            reason: CANCELLED_REASON.to_string(),
            timestamp: Utc::now(),
        });
        ExecuteError::Cancelled
    }

    /// Run the plan-approval callback raced against cancellation.
    /// `None` means the session was cancelled while the gate was pending.
    async fn approve_plan_cancellable(
        &self,
        gate: &dyn ApprovalGate,
        outcome: &PlanOutcome,
        user_request: &str,
    ) -> Option<ApprovalDecision> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            decision = gate.approve_plan(&outcome.plan, user_request) => Some(decision),
        }
    }

    /// One planning call with session-level error handling applied.
    async fn plan_once(
        &self,
        session_id: Uuid,
        user_request: &str,
    ) -> Result<PlanOutcome, ExecuteError> {
        match planner::plan(self.oracle.as_ref(), user_request, &self.config, &self.cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "planning failed");
                self.bus.emit(SessionEvent::ExecutionFailed {
                    session_id,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                match e {
                    PlannerError::Cancelled => Err(ExecuteError::Cancelled),
                    other => Err(ExecuteError::Planning(other)),
                }
            }
        }
    }

    /// Hand a plan to a fresh state manager and announce it.
    fn accept_plan(
        &self,
        session_id: Uuid,
        outcome: &PlanOutcome,
    ) -> Result<StateManager, ExecuteError> {
        let mut state =
            StateManager::for_session(session_id).with_history_limit(self.config.history_limit);
        if let Err(e) = state.set_plan(outcome.plan.clone()) {
            self.bus.emit(SessionEvent::ExecutionFailed {
                session_id,
                reason: e.to_string(),
                timestamp: Utc::now(),
            });
            return Err(e.into());
        }
        info!(
            session_id = %session_id,
            tasks = outcome.plan.len(),
            complexity = %outcome.complexity,
            degenerate = outcome.degenerate,
            "plan accepted"
        );
        self.bus.emit(SessionEvent::PlanCreated {
            session_id,
            plan: outcome.plan.clone(),
            complexity: outcome.complexity,
            reordered: outcome.reordered,
            timestamp: Utc::now(),
        });
        Ok(state)
    }

    /// The sequential task loop.
    async fn drive(&self, state: &mut StateManager) -> Drive {
        let session_id = state.session_id();

        loop {
            // Cancellation between tasks is observed before starting the
            // next one.
            if self.cancel.is_cancelled() {
                let _ = state.mark_failed(CANCELLED_REASON);
                return Drive::Cancelled;
            }

            let Some(task) = state.current_task().cloned() else {
                return Drive::Finished;
            };

            if let Some(gate) = &self.gate {
                let risk = classify_risk(&task);
                if risk >= self.config.risk_threshold {
                    // The gate callback is a suspension point; race it
                    // against cancellation like the oracle calls.
                    let context = state.last_step_result().map(str::to_owned);
                    let decision = tokio::select! {
                        _ = self.cancel.cancelled() => None,
                        decision = gate.approve_task(&task, risk, context.as_deref()) => {
                            Some(decision)
                        }
                    };
                    let Some(decision) = decision else {
                        let _ = state.mark_failed(CANCELLED_REASON);
                        return Drive::Cancelled;
                    };
                    if decision != ApprovalDecision::Approve {
                        warn!(
                            session_id = %session_id,
                            task_id = %task.id,
                            risk = %risk,
                            "task rejected by approval gate"
                        );
                        // A rejected task fails like any other terminal
                        // task failure; the summary reports it.
                        let _ = state.mark_failed("user-rejected");
                        self.bus.emit(SessionEvent::TaskFailed {
                            session_id,
                            task_id: task.id.clone(),
                            reason: "user-rejected".to_string(),
                            timestamp: Utc::now(),
                        });
                        return Drive::Finished;
                    }
                }
            }

            let step_index = state.cursor() + 1;
            info!(
                session_id = %session_id,
                task_id = %task.id,
                step_index,
                "starting task"
            );
            self.bus.emit(SessionEvent::TaskStarted {
                session_id,
                task: task.clone(),
                step_index,
                timestamp: Utc::now(),
            });

            let outcome = TaskRunner::new(
                self.oracle.as_ref(),
                state,
                &self.bus,
                &self.config,
                &self.cancel,
            )
            .run()
            .await;

            match outcome {
                TaskOutcome::Succeeded { result } => {
                    self.bus.emit(SessionEvent::TaskCompleted {
                        session_id,
                        task_id: task.id.clone(),
                        result,
                        timestamp: Utc::now(),
                    });
                    match state.next_step() {
                        Ok(true) => {}
                        Ok(false) => return Drive::Finished,
                        Err(e) => return Drive::Invariant(e),
                    }
                }
                TaskOutcome::Failed { reason } => {
                    self.bus.emit(SessionEvent::TaskFailed {
                        session_id,
                        task_id: task.id.clone(),
                        reason: reason.clone(),
                        timestamp: Utc::now(),
                    });
                    // The runner already marked the session failed; this
                    // is a no-op then, and covers invariant shortcuts.
                    let _ = state.mark_failed(&reason);
                    if reason == CANCELLED_REASON {
                        return Drive::Cancelled;
                    }
                    // A failed prerequisite makes dependents meaningless:
                    // no skipping forward.
                    return Drive::Finished;
                }
            }
        }
    }

    fn summarize(&self, state: &StateManager, started: Instant) -> Summary {
        let plan = state.plan();
        let failed: Vec<&str> = plan
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| t.id.as_str())
            .collect();
        Summary {
            total_tasks: plan.len(),
            completed_tasks: state.completed().len(),
            failed_tasks: failed.len(),
            total_steps: state.total_steps(),
            duration_ms: started.elapsed().as_millis() as u64,
            success: state.phase() == SessionPhase::Completed,
            failed_task: failed.first().map(|id| id.to_string()),
            failure_reason: state.failure_reason().map(str::to_owned),
        }
    }
}
