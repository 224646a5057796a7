use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of an LLM-facing history summary, in characters.
pub const HISTORY_SUMMARY_MAX: usize = 200;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPhase {
    Idle,
    Planning,
    Executing,
    Completed,
    Failed,
}

impl SessionPhase {
    /// Whether no further transitions are accepted from this phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for SessionPhase {
    type Err = SessionPhaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "planning" => Ok(Self::Planning),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(SessionPhaseParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`SessionPhase`] string.
#[derive(Debug, Clone)]
pub struct SessionPhaseParseError(pub String);

impl fmt::Display for SessionPhaseParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid session phase: {:?}", self.0)
    }
}

impl std::error::Error for SessionPhaseParseError {}

// ---------------------------------------------------------------------------

/// Status of a task within a plan.
///
/// Advances monotonically: `pending -> in-progress -> (completed | failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Severity of a structured log entry emitted by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = LogLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(LogLevelParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`LogLevel`] string.
#[derive(Debug, Clone)]
pub struct LogLevelParseError(pub String);

impl fmt::Display for LogLevelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid log level: {:?}", self.0)
    }
}

impl std::error::Error for LogLevelParseError {}

// ---------------------------------------------------------------------------

/// Status recorded in an LLM-facing history entry.
///
/// `debug` marks a success that was reached only after one or more debug
/// attempts; downstream steps treat it the same as `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryStatus {
    Completed,
    Failed,
    Debug,
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for HistoryStatus {
    type Err = HistoryStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "debug" => Ok(Self::Debug),
            other => Err(HistoryStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`HistoryStatus`] string.
#[derive(Debug, Clone)]
pub struct HistoryStatusParseError(pub String);

impl fmt::Display for HistoryStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid history status: {:?}", self.0)
    }
}

impl std::error::Error for HistoryStatusParseError {}

// ---------------------------------------------------------------------------

/// Status field of an oracle verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerdictStatus {
    Success,
    Failed,
    NeedsDebug,
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::NeedsDebug => "needs-debug",
        };
        f.write_str(s)
    }
}

impl FromStr for VerdictStatus {
    type Err = VerdictStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "needs-debug" => Ok(Self::NeedsDebug),
            other => Err(VerdictStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`VerdictStatus`] string.
#[derive(Debug, Clone)]
pub struct VerdictStatusParseError(pub String);

impl fmt::Display for VerdictStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid verdict status: {:?}", self.0)
    }
}

impl std::error::Error for VerdictStatusParseError {}

// ---------------------------------------------------------------------------

/// Action recorded for a file the oracle reports having touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileAction {
    Created,
    Modified,
    Deleted,
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

impl FromStr for FileAction {
    type Err = FileActionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "modified" => Ok(Self::Modified),
            "deleted" => Ok(Self::Deleted),
            other => Err(FileActionParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`FileAction`] string.
#[derive(Debug, Clone)]
pub struct FileActionParseError(pub String);

impl fmt::Display for FileActionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid file action: {:?}", self.0)
    }
}

impl std::error::Error for FileActionParseError {}

// ---------------------------------------------------------------------------

/// Complexity classification the planner assigns to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanComplexity {
    Simple,
    Moderate,
    Complex,
}

impl fmt::Display for PlanComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanComplexity {
    type Err = PlanComplexityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Self::Simple),
            "moderate" => Ok(Self::Moderate),
            "complex" => Ok(Self::Complex),
            other => Err(PlanComplexityParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanComplexity`] string.
#[derive(Debug, Clone)]
pub struct PlanComplexityParseError(pub String);

impl fmt::Display for PlanComplexityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan complexity: {:?}", self.0)
    }
}

impl std::error::Error for PlanComplexityParseError {}

// ---------------------------------------------------------------------------

/// Risk classification for a task, used by the approval gate.
///
/// Ordered: `low < medium < high`, so a configured threshold can be
/// compared directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

impl FromStr for RiskLevel {
    type Err = RiskLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(RiskLevelParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`RiskLevel`] string.
#[derive(Debug, Clone)]
pub struct RiskLevelParseError(pub String);

impl fmt::Display for RiskLevelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid risk level: {:?}", self.0)
    }
}

impl std::error::Error for RiskLevelParseError {}

// ---------------------------------------------------------------------------
// Wire structs (oracle verdict)
// ---------------------------------------------------------------------------

/// A structured log record emitted by the oracle as part of a verdict.
///
/// Aggregated append-only across the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Error payload carried by a non-success verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl VerdictError {
    /// Build an error payload with only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
            stderr: None,
        }
    }
}

impl fmt::Display for VerdictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A file the oracle reports as touched. Advisory only; never verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub action: FileAction,
}

/// The oracle's structured per-task reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub result: String,
    pub log_entries: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_changed: Option<Vec<FileChange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<VerdictError>,
}

impl Verdict {
    /// Check the contract invariant: a non-success verdict must carry a
    /// non-empty error message.
    ///
    /// A success verdict with an empty result is NOT rejected here; the
    /// task runner folds that case into a needs-debug transition.
    pub fn check_error_invariant(&self) -> Result<(), String> {
        match self.status {
            VerdictStatus::Success => Ok(()),
            VerdictStatus::Failed | VerdictStatus::NeedsDebug => match &self.error {
                Some(e) if !e.message.trim().is_empty() => Ok(()),
                Some(_) => Err(format!(
                    "verdict with status {} has an empty error message",
                    self.status
                )),
                None => Err(format!(
                    "verdict with status {} is missing the error field",
                    self.status
                )),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Plan structs
// ---------------------------------------------------------------------------

/// A task -- the unit of work within a plan.
///
/// Serialized in the snapshot's language-neutral camelCase shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Stable identifier, unique within the plan.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Long, LLM-authored description.
    pub description: String,
    /// Identifiers of tasks that must be completed first. All must refer
    /// to tasks appearing earlier in the plan.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Hint that the task needs documentation lookup before execution.
    #[serde(default)]
    pub requires_doc_search: bool,
    pub status: TaskStatus,
    /// Set iff `status == completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Set iff `status == failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        depends_on: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            depends_on,
            requires_doc_search: false,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// An ordered sequence of tasks, fixed once accepted.
///
/// Invariant: the dependency relation is a DAG topologically consistent
/// with the list order; identifiers are unique. Enforced at plan-accept
/// time, not by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task by identifier.
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

// ---------------------------------------------------------------------------
// Session structs
// ---------------------------------------------------------------------------

/// A compact record of a prior step shown back to the oracle on later
/// calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub task_id: String,
    pub status: HistoryStatus,
    /// At most [`HISTORY_SUMMARY_MAX`] characters, derived from the task's
    /// result or error.
    pub summary: String,
    /// Index of the oracle call that produced this entry, counted across
    /// the session.
    pub iteration: u32,
}

impl HistoryEntry {
    /// Create an entry, truncating the summary to [`HISTORY_SUMMARY_MAX`]
    /// characters on a character boundary.
    pub fn new(
        task_id: impl Into<String>,
        status: HistoryStatus,
        summary: &str,
        iteration: u32,
    ) -> Self {
        let summary = if summary.chars().count() > HISTORY_SUMMARY_MAX {
            summary.chars().take(HISTORY_SUMMARY_MAX).collect()
        } else {
            summary.to_owned()
        };
        Self {
            task_id: task_id.into(),
            status,
            summary,
            iteration,
        }
    }
}

/// Final account of a session, returned by the orchestrator and carried on
/// the `execution-completed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    /// Oracle calls executed, debug attempts included.
    pub total_steps: usize,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Deep-copy snapshot of a session's state, suitable for export/import.
///
/// The shape is language-neutral camelCase; `nextSteps` is serde-defaulted
/// so snapshots of the bare shape still import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub session_id: Uuid,
    pub phase: SessionPhase,
    pub cursor: usize,
    pub plan: Plan,
    /// Task identifiers, ordered by completion.
    pub completed: Vec<String>,
    pub history: Vec<HistoryEntry>,
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<VerdictError>,
    pub debug_mode: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_steps: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
