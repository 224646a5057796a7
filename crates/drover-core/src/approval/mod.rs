//! Optional approval gate.
//!
//! When a gate is installed, the orchestrator asks it to confirm the plan
//! before execution and to confirm individual tasks whose risk is at or
//! above the configured threshold. No gate means implicit approval
//! everywhere. Risk classification is a keyword heuristic over task
//! content; the orchestrator treats the resulting level as opaque input.

use async_trait::async_trait;

use drover_types::{Plan, RiskLevel, Task};

/// A gate consumer's ruling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Reject,
    /// Plan-level: request one re-plan. Task-level: treated as reject,
    /// since the plan is fixed once approved.
    Modify,
}

/// Human confirmation hooks the orchestrator calls into.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Confirm a freshly planned task list before execution starts.
    async fn approve_plan(&self, plan: &Plan, user_request: &str) -> ApprovalDecision;

    /// Confirm a single task whose risk is at or above the threshold.
    /// `context` carries the previous step's result when available.
    async fn approve_task(
        &self,
        task: &Task,
        risk: RiskLevel,
        context: Option<&str>,
    ) -> ApprovalDecision;
}

// Compile-time assertion: ApprovalGate must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn ApprovalGate) {}
};

/// Markers that classify a task as high risk.
const HIGH_RISK_MARKERS: &[&str] = &[
    "delete",
    "drop table",
    "drop database",
    "rm -rf",
    "force push",
    "force-push",
    "deploy",
    "production",
    "secret",
    "credential",
    "api key",
];

/// Markers that classify a task as medium risk.
const MEDIUM_RISK_MARKERS: &[&str] = &[
    "migrate",
    "migration",
    "install",
    "overwrite",
    "rename",
    "database",
    "schema",
    "permission",
];

/// Classify a task's risk from its title and description.
pub fn classify_risk(task: &Task) -> RiskLevel {
    let haystack = format!("{} {}", task.title, task.description).to_lowercase();
    if HIGH_RISK_MARKERS.iter().any(|m| haystack.contains(m)) {
        RiskLevel::High
    } else if MEDIUM_RISK_MARKERS.iter().any(|m| haystack.contains(m)) {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}
