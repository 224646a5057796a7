//! Shared test utilities for drover integration tests.
//!
//! Provides a scripted oracle double (canned replies, recorded requests,
//! a hang variant for cancellation tests), an event-collecting sink, JSON
//! fixture builders for verdicts and planner replies, and one-time
//! tracing setup.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;

use drover_core::events::{EventSink, SessionEvent};
use drover_core::oracle::{CompletionRequest, Oracle, OracleError};

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

static INIT_TRACING: Once = Once::new();

/// Initialize a test tracing subscriber once per process.
///
/// Respects `RUST_LOG`; defaults to `info` for drover crates.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("drover=info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ---------------------------------------------------------------------------
// Scripted oracle
// ---------------------------------------------------------------------------

/// One canned oracle behavior.
pub enum ScriptedReply {
    /// Return this text.
    Reply(String),
    /// Fail with this error.
    Error(OracleError),
    /// Never resolve. The caller's timeout or cancellation wins.
    Hang,
}

/// Oracle double that replays a queue of canned behaviors and records
/// every request it receives, so tests can assert on prompt content.
///
/// An exhausted queue fails with a transport error, which keeps a
/// miscounted script from hanging a test.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedOracle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_reply(&self, text: impl Into<String>) {
        self.replies
            .lock()
            .unwrap()
            .push_back(ScriptedReply::Reply(text.into()));
    }

    pub fn push_error(&self, error: OracleError) {
        self.replies
            .lock()
            .unwrap()
            .push_back(ScriptedReply::Error(error));
    }

    pub fn push_hang(&self) {
        self.replies.lock().unwrap().push_back(ScriptedReply::Hang);
    }

    /// Number of completed calls so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// All requests received so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The user prompt of call `index`.
    pub fn user_prompt(&self, index: usize) -> String {
        self.requests.lock().unwrap()[index].user_prompt.clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, request: CompletionRequest) -> Result<String, OracleError> {
        self.requests.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            None => Err(OracleError::Transport(
                "scripted oracle exhausted".to_string(),
            )),
            Some(ScriptedReply::Reply(text)) => Ok(text),
            Some(ScriptedReply::Error(error)) => Err(error),
            Some(ScriptedReply::Hang) => {
                futures::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Event collection
// ---------------------------------------------------------------------------

/// Sink that records every event it sees.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<SessionEvent>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Event names in emission order, e.g. `["planning-started", ...]`.
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &SessionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Wire fixtures
// ---------------------------------------------------------------------------

/// A success verdict with one info log entry.
pub fn verdict_success(result: &str) -> String {
    serde_json::json!({
        "status": "success",
        "result": result,
        "log_entries": [
            {"level": "info", "message": format!("completed: {result}"), "timestamp": "2025-01-01T00:00:00Z"}
        ]
    })
    .to_string()
}

/// A success verdict with no log entries and optional next-step hints.
pub fn verdict_success_with_hints(result: &str, hints: &[&str]) -> String {
    serde_json::json!({
        "status": "success",
        "result": result,
        "log_entries": [],
        "next_steps": hints,
    })
    .to_string()
}

/// A needs-debug verdict carrying an error message.
pub fn verdict_needs_debug(message: &str) -> String {
    serde_json::json!({
        "status": "needs-debug",
        "result": "",
        "error": {"message": message},
        "log_entries": [
            {"level": "error", "message": message, "timestamp": "2025-01-01T00:00:00Z"}
        ]
    })
    .to_string()
}

/// A failed verdict carrying an error message.
pub fn verdict_failed(message: &str) -> String {
    serde_json::json!({
        "status": "failed",
        "result": "",
        "error": {"message": message},
        "log_entries": []
    })
    .to_string()
}

/// A planner reply with the given `(id, dependencies)` pairs.
pub fn planner_reply(todos: &[(&str, &[&str])]) -> String {
    let todos: Vec<serde_json::Value> = todos
        .iter()
        .map(|(id, deps)| {
            serde_json::json!({
                "id": id,
                "title": format!("Task {id}"),
                "description": format!("Carry out {id}."),
                "dependencies": deps,
                "requires-doc-search": false,
            })
        })
        .collect();
    serde_json::json!({"todos": todos, "complexity": "simple"}).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn scripted_oracle_replays_in_order() {
        let oracle = ScriptedOracle::new();
        oracle.push_reply("one");
        oracle.push_reply("two");

        let request = CompletionRequest {
            system_prompt: String::new(),
            user_prompt: "p".to_string(),
            timeout: Duration::from_secs(1),
            tools: None,
        };
        assert_eq!(oracle.complete(request.clone()).await.unwrap(), "one");
        assert_eq!(oracle.complete(request.clone()).await.unwrap(), "two");
        assert!(oracle.complete(request).await.is_err(), "exhausted script errors");
        assert_eq!(oracle.calls(), 3);
    }

    #[test]
    fn fixtures_are_valid_json() {
        for text in [
            verdict_success("ok"),
            verdict_success_with_hints("ok", &["next"]),
            verdict_needs_debug("boom"),
            verdict_failed("dead"),
            planner_reply(&[("a", &[]), ("b", &["a"])]),
        ] {
            serde_json::from_str::<serde_json::Value>(&text).expect("fixture must be JSON");
        }
    }
}
