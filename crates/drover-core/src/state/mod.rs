//! Session state manager.
//!
//! Sole custodian of mutable session state: the plan, the cursor, the
//! LLM-facing history, the aggregated log list, and the last-error slot.
//! All mutation goes through named transitions that validate the session
//! phase and the task identifier; a violated precondition is a caller bug
//! and surfaces as a [`StateError`], which is fatal to the session rather
//! than a retry case.
//!
//! Single-threaded writer discipline: the owning orchestrator mutates.
//! External observers read through [`StateManager::export`], a deep copy.

use chrono::Utc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use drover_types::{
    HistoryEntry, HistoryStatus, LogEntry, Plan, SessionPhase, Snapshot, Task, TaskStatus,
    Verdict, VerdictError,
};

use crate::codec::prompt::{CompletedSummary, TaskPromptView};
use crate::config::DEFAULT_HISTORY_LIMIT;
use crate::planner::validate::{self, PlanValidationError};

/// Errors from state transitions. Every variant is an invariant
/// violation on the caller's side, except [`StateError::InvalidPlan`],
/// which reports a malformed plan at accept time.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] PlanValidationError),

    #[error("plan already accepted")]
    PlanAlreadySet,

    #[error("no plan accepted yet")]
    NoPlan,

    #[error("transition requires phase {expected}, session is {found}")]
    WrongPhase {
        expected: SessionPhase,
        found: SessionPhase,
    },

    #[error("task {got:?} is not the current task (expected {expected:?})")]
    TaskMismatch { expected: String, got: String },

    #[error("no current task (cursor {0} is past the end of the plan)")]
    CursorExhausted(usize),

    #[error("current task {0:?} is not completed")]
    TaskNotCompleted(String),

    #[error("session is terminal ({0})")]
    Terminal(SessionPhase),
}

/// Mutable state for one session.
pub struct StateManager {
    session_id: Uuid,
    phase: SessionPhase,
    plan: Plan,
    cursor: usize,
    /// Task identifiers, ordered by completion.
    completed: Vec<String>,
    history: Vec<HistoryEntry>,
    logs: Vec<LogEntry>,
    last_error: Option<VerdictError>,
    debug_mode: bool,
    /// Advisory hints from the last successful verdict, shown to the next
    /// task's prompt.
    next_steps: Vec<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
    history_limit: usize,
    /// Oracle calls recorded across the session (debug attempts included).
    oracle_calls: u32,
    /// Oracle calls recorded for the current task; resets on `next_step`.
    step_calls: u32,
    failure_reason: Option<String>,
}

impl StateManager {
    /// Create an empty manager for a fresh session.
    pub fn new() -> Self {
        Self::for_session(Uuid::new_v4())
    }

    /// Create an empty manager with a caller-chosen session identifier.
    pub fn for_session(session_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            phase: SessionPhase::Idle,
            plan: Plan::default(),
            cursor: 0,
            completed: Vec::new(),
            history: Vec::new(),
            logs: Vec::new(),
            last_error: None,
            debug_mode: false,
            next_steps: Vec::new(),
            created_at: now,
            updated_at: now,
            history_limit: DEFAULT_HISTORY_LIMIT,
            oracle_calls: 0,
            step_calls: 0,
            failure_reason: None,
        }
    }

    /// Override the LLM-facing history cap.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    // -- accessors ---------------------------------------------------------

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// Identifiers of completed tasks, in completion order.
    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    /// Oracle calls recorded across the session, debug attempts included.
    pub fn total_steps(&self) -> usize {
        self.oracle_calls as usize
    }

    /// The final failure reason, once [`StateManager::mark_failed`] ran.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Task at the cursor, or `None` when the plan is exhausted.
    pub fn current_task(&self) -> Option<&Task> {
        self.plan.tasks.get(self.cursor)
    }

    /// Result of the most recently completed task.
    pub fn last_step_result(&self) -> Option<&str> {
        let id = self.completed.last()?;
        self.plan.task(id)?.result.as_deref()
    }

    /// Bounded view of history for prompt inclusion: the most recent
    /// entries, oldest first.
    pub fn history_for_llm(&self) -> Vec<HistoryEntry> {
        let skip = self.history.len().saturating_sub(self.history_limit);
        self.history[skip..].to_vec()
    }

    /// The append-only aggregated log list.
    pub fn all_log_entries(&self) -> &[LogEntry] {
        &self.logs
    }

    /// Build the input view for the current task's next oracle call.
    pub fn prompt_view(&self) -> Option<TaskPromptView> {
        let task = self.current_task()?.clone();
        let completed = self
            .completed
            .iter()
            .filter_map(|id| {
                let t = self.plan.task(id)?;
                Some(CompletedSummary {
                    id: t.id.clone(),
                    title: t.title.clone(),
                    summary: t.result.clone().unwrap_or_default(),
                })
            })
            .collect();
        Some(TaskPromptView {
            step_index: self.cursor + 1,
            total_tasks: self.plan.len(),
            last_step_result: self.last_step_result().map(str::to_owned),
            completed,
            hints: self.next_steps.clone(),
            debug_mode: self.debug_mode,
            last_error: self.last_error.clone(),
            history: self.history_for_llm(),
            task,
        })
    }

    // -- transitions -------------------------------------------------------

    /// Accept a plan. Rejected after a plan was already accepted or once
    /// execution started. Validates identifier uniqueness and that every
    /// dependency appears earlier in the list.
    pub fn set_plan(&mut self, plan: Plan) -> Result<(), StateError> {
        if self.phase != SessionPhase::Idle {
            return Err(StateError::WrongPhase {
                expected: SessionPhase::Idle,
                found: self.phase,
            });
        }
        if !self.plan.is_empty() {
            return Err(StateError::PlanAlreadySet);
        }
        validate::validate_plan(&plan)?;
        self.plan = plan;
        self.touch();
        Ok(())
    }

    /// Begin executing: phase `idle -> executing`, cursor to 0, first task
    /// to in-progress.
    pub fn start_execution(&mut self) -> Result<(), StateError> {
        if self.phase != SessionPhase::Idle {
            return Err(StateError::WrongPhase {
                expected: SessionPhase::Idle,
                found: self.phase,
            });
        }
        if self.plan.is_empty() {
            return Err(StateError::NoPlan);
        }
        self.phase = SessionPhase::Executing;
        self.cursor = 0;
        self.begin_current_task();
        self.touch();
        Ok(())
    }

    /// Record a first-try success for the current task.
    pub fn record_success(&mut self, task_id: &str, verdict: &Verdict) -> Result<(), StateError> {
        self.record_completion(task_id, verdict, HistoryStatus::Completed)
    }

    /// Record a success reached while in debug mode. Identical to
    /// [`StateManager::record_success`] except the history entry is marked
    /// `debug`; downstream steps cannot tell the two apart.
    pub fn record_debug(&mut self, task_id: &str, verdict: &Verdict) -> Result<(), StateError> {
        self.record_completion(task_id, verdict, HistoryStatus::Debug)
    }

    /// Record a failed attempt for the current task. Writes the last-error
    /// slot and does not advance the cursor; the task may still settle
    /// successfully through a later debug attempt.
    pub fn record_failure(
        &mut self,
        task_id: &str,
        error: VerdictError,
        log_entries: Vec<LogEntry>,
    ) -> Result<(), StateError> {
        let iteration = self.begin_record(task_id)?;
        let task = &mut self.plan.tasks[self.cursor];
        task.status = TaskStatus::Failed;
        task.error = Some(error.message.clone());
        task.finished_at = Some(Utc::now());

        self.logs.extend(log_entries);
        self.history.push(HistoryEntry::new(
            task_id,
            HistoryStatus::Failed,
            &error.message,
            iteration,
        ));
        self.last_error = Some(error);
        self.touch();
        Ok(())
    }

    /// Set the debug-mode flag. The task runner routes subsequent
    /// successes through [`StateManager::record_debug`].
    pub fn enter_debug_mode(&mut self) -> Result<(), StateError> {
        if self.phase != SessionPhase::Executing {
            return Err(StateError::WrongPhase {
                expected: SessionPhase::Executing,
                found: self.phase,
            });
        }
        self.debug_mode = true;
        self.touch();
        Ok(())
    }

    /// Advance past a completed task. Returns `true` when more tasks
    /// remain, `false` when the plan is exhausted (phase `-> completed`).
    pub fn next_step(&mut self) -> Result<bool, StateError> {
        if self.phase != SessionPhase::Executing {
            return Err(StateError::WrongPhase {
                expected: SessionPhase::Executing,
                found: self.phase,
            });
        }
        let current = self
            .current_task()
            .ok_or(StateError::CursorExhausted(self.cursor))?;
        if current.status != TaskStatus::Completed {
            return Err(StateError::TaskNotCompleted(current.id.clone()));
        }

        self.cursor += 1;
        self.step_calls = 0;
        self.touch();

        if self.cursor >= self.plan.len() {
            self.phase = SessionPhase::Completed;
            debug!(session_id = %self.session_id, "plan exhausted, session completed");
            return Ok(false);
        }
        self.begin_current_task();
        Ok(true)
    }

    /// Terminal failure: phase `-> failed`, the active task (if any) is
    /// marked failed with the reason. Calling again on an already-failed
    /// session is a no-op that keeps the first reason; any other further
    /// transition is rejected.
    pub fn mark_failed(&mut self, reason: &str) -> Result<(), StateError> {
        match self.phase {
            SessionPhase::Failed => return Ok(()),
            SessionPhase::Completed => return Err(StateError::Terminal(self.phase)),
            _ => {}
        }
        if let Some(task) = self.plan.tasks.get_mut(self.cursor) {
            if task.status == TaskStatus::InProgress {
                task.status = TaskStatus::Failed;
                task.error = Some(reason.to_string());
                task.finished_at = Some(Utc::now());
            }
        }
        self.phase = SessionPhase::Failed;
        self.failure_reason = Some(reason.to_string());
        self.touch();
        Ok(())
    }

    // -- snapshot ----------------------------------------------------------

    /// Deep-copy snapshot of the session state.
    pub fn export(&self) -> Snapshot {
        Snapshot {
            session_id: self.session_id,
            phase: self.phase,
            cursor: self.cursor,
            plan: self.plan.clone(),
            completed: self.completed.clone(),
            history: self.history.clone(),
            logs: self.logs.clone(),
            last_error: self.last_error.clone(),
            debug_mode: self.debug_mode,
            next_steps: self.next_steps.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Rebuild a manager from a snapshot. Subsequent transitions behave
    /// identically to the exporting manager's.
    pub fn import(snapshot: Snapshot) -> Self {
        let step_calls = snapshot
            .plan
            .tasks
            .get(snapshot.cursor)
            .map(|task| {
                snapshot
                    .history
                    .iter()
                    .filter(|h| h.task_id == task.id)
                    .count() as u32
            })
            .unwrap_or(0);
        let failure_reason = if snapshot.phase == SessionPhase::Failed {
            snapshot
                .plan
                .tasks
                .iter()
                .find(|t| t.status == TaskStatus::Failed)
                .and_then(|t| t.error.clone())
                .or_else(|| snapshot.last_error.as_ref().map(|e| e.message.clone()))
        } else {
            None
        };

        Self {
            session_id: snapshot.session_id,
            phase: snapshot.phase,
            cursor: snapshot.cursor,
            oracle_calls: snapshot.history.len() as u32,
            step_calls,
            failure_reason,
            plan: snapshot.plan,
            completed: snapshot.completed,
            history: snapshot.history,
            logs: snapshot.logs,
            last_error: snapshot.last_error,
            debug_mode: snapshot.debug_mode,
            next_steps: snapshot.next_steps,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    // -- internals ---------------------------------------------------------

    /// Validate phase and task identity for a record transition; returns
    /// the iteration index for the history entry.
    fn begin_record(&mut self, task_id: &str) -> Result<u32, StateError> {
        if self.phase != SessionPhase::Executing {
            return Err(StateError::WrongPhase {
                expected: SessionPhase::Executing,
                found: self.phase,
            });
        }
        let current = self
            .current_task()
            .ok_or(StateError::CursorExhausted(self.cursor))?;
        if current.id != task_id {
            return Err(StateError::TaskMismatch {
                expected: current.id.clone(),
                got: task_id.to_string(),
            });
        }
        self.oracle_calls += 1;
        self.step_calls += 1;
        Ok(self.step_calls)
    }

    fn record_completion(
        &mut self,
        task_id: &str,
        verdict: &Verdict,
        status: HistoryStatus,
    ) -> Result<(), StateError> {
        let iteration = self.begin_record(task_id)?;
        let task = &mut self.plan.tasks[self.cursor];
        task.status = TaskStatus::Completed;
        task.result = Some(verdict.result.clone());
        task.error = None;
        task.finished_at = Some(Utc::now());

        self.logs.extend(verdict.log_entries.iter().cloned());
        self.history
            .push(HistoryEntry::new(task_id, status, &verdict.result, iteration));
        self.completed.push(task_id.to_string());
        self.last_error = None;
        self.debug_mode = false;
        self.next_steps = verdict.next_steps.clone().unwrap_or_default();
        self.touch();
        Ok(())
    }

    fn begin_current_task(&mut self) {
        if let Some(task) = self.plan.tasks.get_mut(self.cursor) {
            task.status = TaskStatus::InProgress;
            task.started_at = Some(Utc::now());
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
