//! Planner: one oracle call turning a user request into an ordered task
//! list.
//!
//! Parse or validation failures never abort the session -- the planner
//! degrades to a single-task plan carrying the original request, so
//! execution can still attempt forward progress on malformed planner
//! output. Only oracle-level failures (transport, timeout, cancellation)
//! are returned as errors.

pub mod validate;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use drover_types::{Plan, PlanComplexity, Task};

use crate::codec::prompts::PLANNER_SYSTEM_PROMPT;
use crate::codec::{balanced_json_span, excerpt, strip_code_fence};
use crate::config::OrchestratorConfig;
use crate::oracle::{CompletionRequest, Oracle, OracleError};

/// A validated planning result.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: Plan,
    pub complexity: PlanComplexity,
    /// Whether the planner's list had to be topologically reordered.
    pub reordered: bool,
    /// Whether this is the degenerate single-task fallback.
    pub degenerate: bool,
}

/// Oracle-level planning failures. These abort the session before any
/// task runs.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("planner oracle call failed: {0}")]
    Oracle(OracleError),

    #[error("planner call timed out")]
    Timeout,

    #[error("planning cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Planner wire schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PlannerReply {
    todos: Vec<TodoItem>,
    #[serde(default)]
    complexity: Option<PlanComplexity>,
}

#[derive(Debug, Deserialize)]
struct TodoItem {
    id: String,
    #[serde(default)]
    title: Option<String>,
    description: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default, rename = "requires-doc-search")]
    requires_doc_search: bool,
}

impl TodoItem {
    fn into_task(self) -> Task {
        let title = match self.title {
            Some(t) if !t.trim().is_empty() => t,
            _ => self.description.chars().take(60).collect(),
        };
        let mut task = Task::new(self.id, title, self.description, self.dependencies);
        task.requires_doc_search = self.requires_doc_search;
        task
    }
}

// ---------------------------------------------------------------------------
// Planning call
// ---------------------------------------------------------------------------

/// Run the planning oracle call and return a normalized plan.
pub async fn plan(
    oracle: &dyn Oracle,
    user_request: &str,
    config: &OrchestratorConfig,
    cancel: &CancellationToken,
) -> Result<PlanOutcome, PlannerError> {
    if user_request.trim().is_empty() {
        warn!("empty user request, substituting degenerate plan");
        return Ok(degenerate_plan(user_request));
    }

    let request = CompletionRequest {
        system_prompt: PLANNER_SYSTEM_PROMPT.to_string(),
        user_prompt: planner_user_prompt(user_request),
        timeout: config.planner_timeout,
        tools: config.tool_descriptor.clone(),
    };

    let reply = tokio::select! {
        _ = cancel.cancelled() => return Err(PlannerError::Cancelled),
        outcome = tokio::time::timeout(config.planner_timeout, oracle.complete(request)) => {
            match outcome {
                Err(_) => return Err(PlannerError::Timeout),
                Ok(Err(OracleError::Cancelled)) => return Err(PlannerError::Cancelled),
                Ok(Err(OracleError::Timeout)) => return Err(PlannerError::Timeout),
                Ok(Err(e)) => return Err(PlannerError::Oracle(e)),
                Ok(Ok(text)) => text,
            }
        }
    };

    match parse_planner_reply(&reply) {
        Ok((tasks, complexity)) => match validate::normalize(tasks) {
            Ok((tasks, reordered)) => {
                if reordered {
                    warn!("planner task list was topologically reordered");
                }
                Ok(PlanOutcome {
                    plan: Plan::new(tasks),
                    complexity,
                    reordered,
                    degenerate: false,
                })
            }
            Err(e) => {
                warn!(error = %e, "planner output failed validation, substituting degenerate plan");
                Ok(degenerate_plan(user_request))
            }
        },
        Err(reason) => {
            warn!(%reason, "planner output unparseable, substituting degenerate plan");
            Ok(degenerate_plan(user_request))
        }
    }
}

/// Build the user prompt body for the planning call.
fn planner_user_prompt(user_request: &str) -> String {
    format!("## User Request\n\n{user_request}\n")
}

/// Parse the planner's `{todos, complexity}` reply.
///
/// Same extraction discipline as the verdict codec, different schema.
fn parse_planner_reply(text: &str) -> Result<(Vec<Task>, PlanComplexity), String> {
    let body = strip_code_fence(text);
    let span = balanced_json_span(body)
        .ok_or_else(|| format!("no JSON object in planner reply (excerpt: {:?})", excerpt(text)))?;
    let reply: PlannerReply = serde_json::from_str(span)
        .map_err(|e| format!("planner reply does not match the todos schema: {e}"))?;

    if reply.todos.is_empty() {
        return Err("planner reply contains no todos".to_string());
    }

    let complexity = reply.complexity.unwrap_or(PlanComplexity::Moderate);
    let tasks = reply.todos.into_iter().map(TodoItem::into_task).collect();
    Ok((tasks, complexity))
}

/// Serialize a plan back into the planner's wire dialect.
///
/// `parse_planner_reply(&format_planner_reply(p, c))` reproduces `p` for
/// any plan with JSON-safe identifiers; used by hosts that round-trip
/// plans through gate tooling.
pub fn format_planner_reply(plan: &Plan, complexity: PlanComplexity) -> String {
    let todos: Vec<serde_json::Value> = plan
        .tasks
        .iter()
        .map(|task| {
            serde_json::json!({
                "id": task.id,
                "title": task.title,
                "description": task.description,
                "dependencies": task.depends_on,
                "requires-doc-search": task.requires_doc_search,
            })
        })
        .collect();
    serde_json::json!({"todos": todos, "complexity": complexity}).to_string()
}

/// The single-task fallback plan for malformed planner output.
fn degenerate_plan(user_request: &str) -> PlanOutcome {
    let mut task = Task::new(
        "task-1",
        "Execute user request",
        user_request,
        Vec::new(),
    );
    task.requires_doc_search = true;
    PlanOutcome {
        plan: Plan::new(vec![task]),
        complexity: PlanComplexity::Moderate,
        reordered: false,
        degenerate: true,
    }
}
