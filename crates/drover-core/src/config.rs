//! Configuration for the orchestrator.
//!
//! Plain struct config; there is no CLI or environment surface -- the core
//! is invoked as a library and the host passes a config in.

use std::time::Duration;

use drover_types::RiskLevel;

/// Default debug budget per task.
pub const DEFAULT_MAX_DEBUG_ATTEMPTS: u32 = 3;

/// Default wall-clock budget per oracle call.
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of history entries shown back to the oracle.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum debug attempts per task before the task (and the session)
    /// is marked failed.
    pub max_debug_attempts: u32,
    /// Wall time limit per task-runner oracle call. A timeout counts as
    /// one debug attempt.
    pub task_timeout: Duration,
    /// Wall time limit for the planning oracle call. A planner timeout
    /// fails the entire execution.
    pub planner_timeout: Duration,
    /// Cap on the LLM-facing history view (most recent entries win).
    pub history_limit: usize,
    /// Minimum risk at which a task is routed through the approval gate,
    /// when a gate is installed.
    pub risk_threshold: RiskLevel,
    /// Tool-set descriptor handed to the oracle on every call. Opaque to
    /// the core.
    pub tool_descriptor: Option<serde_json::Value>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_debug_attempts: DEFAULT_MAX_DEBUG_ATTEMPTS,
            task_timeout: DEFAULT_ORACLE_TIMEOUT,
            planner_timeout: DEFAULT_ORACLE_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
            risk_threshold: RiskLevel::High,
            tool_descriptor: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_debug_attempts, 3);
        assert_eq!(config.task_timeout, Duration::from_secs(300));
        assert_eq!(config.planner_timeout, Duration::from_secs(300));
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.risk_threshold, RiskLevel::High);
        assert!(config.tool_descriptor.is_none());
    }
}
