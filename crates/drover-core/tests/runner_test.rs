//! Tests for the task runner micro-loop, wired directly against a state
//! manager and a scripted oracle (no orchestrator in the way).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use drover_core::config::OrchestratorConfig;
use drover_core::events::{EventBus, SessionEvent};
use drover_core::oracle::OracleError;
use drover_core::runner::{TaskOutcome, TaskRunner};
use drover_core::state::StateManager;
use drover_types::{HistoryStatus, Plan, SessionPhase, Task};

use drover_test_utils::{
    init_tracing, verdict_failed, verdict_needs_debug, verdict_success, CollectingSink,
    ScriptedOracle,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(max_debug_attempts: u32) -> OrchestratorConfig {
    OrchestratorConfig {
        max_debug_attempts,
        task_timeout: Duration::from_secs(5),
        ..OrchestratorConfig::default()
    }
}

fn single_task_state() -> StateManager {
    init_tracing();
    let mut state = StateManager::new();
    state
        .set_plan(Plan::new(vec![Task::new(
            "t1",
            "Compile",
            "Compile the project.",
            vec![],
        )]))
        .unwrap();
    state.start_execution().unwrap();
    state
}

fn bus_with_sink() -> (EventBus, Arc<CollectingSink>) {
    let sink = CollectingSink::new();
    let mut bus = EventBus::new();
    bus.subscribe(sink.clone());
    (bus, sink)
}

fn debug_attempts(sink: &CollectingSink) -> Vec<u32> {
    sink.events()
        .iter()
        .filter_map(|e| match e {
            SessionEvent::DebugStarted { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect()
}

async fn run(
    oracle: &Arc<ScriptedOracle>,
    state: &mut StateManager,
    bus: &EventBus,
    config: &OrchestratorConfig,
) -> TaskOutcome {
    let cancel = CancellationToken::new();
    TaskRunner::new(oracle.as_ref(), state, bus, config, &cancel)
        .run()
        .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_try_success() {
    let oracle = ScriptedOracle::new();
    oracle.push_reply(verdict_success("compiled"));

    let mut state = single_task_state();
    let (bus, sink) = bus_with_sink();
    let outcome = run(&oracle, &mut state, &bus, &config(3)).await;

    assert_eq!(
        outcome,
        TaskOutcome::Succeeded {
            result: "compiled".to_string()
        }
    );
    assert_eq!(oracle.calls(), 1);
    assert!(debug_attempts(&sink).is_empty());
    let history = state.history_for_llm();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Completed);
}

#[tokio::test]
async fn needs_debug_then_success_settles_as_debug() {
    let oracle = ScriptedOracle::new();
    oracle.push_reply(verdict_needs_debug("syntax error"));
    oracle.push_reply(verdict_success("ok"));

    let mut state = single_task_state();
    let (bus, sink) = bus_with_sink();
    let outcome = run(&oracle, &mut state, &bus, &config(3)).await;

    assert_eq!(
        outcome,
        TaskOutcome::Succeeded {
            result: "ok".to_string()
        }
    );
    assert_eq!(debug_attempts(&sink), [1]);
    assert_eq!(state.total_steps(), 2);

    // History records the failure and the debug-mode recovery; the
    // last-error slot is cleared.
    let history = state.history_for_llm();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, HistoryStatus::Failed);
    assert_eq!(history[1].status, HistoryStatus::Debug);
    assert!(state.export().last_error.is_none());
    assert!(!state.debug_mode());
}

#[tokio::test]
async fn debug_prompt_carries_the_error_log() {
    let oracle = ScriptedOracle::new();
    oracle.push_reply(verdict_needs_debug("missing semicolon"));
    oracle.push_reply(verdict_success("fixed"));

    let mut state = single_task_state();
    let (bus, _sink) = bus_with_sink();
    run(&oracle, &mut state, &bus, &config(3)).await;

    let first = oracle.user_prompt(0);
    assert!(!first.contains("## Error Log"));
    let retry = oracle.user_prompt(1);
    assert!(retry.contains("## Error Log"));
    assert!(retry.contains("missing semicolon"));
}

#[tokio::test]
async fn budget_exhaustion_fails_the_task_and_session() {
    let oracle = ScriptedOracle::new();
    oracle.push_reply(verdict_needs_debug("one"));
    oracle.push_reply(verdict_needs_debug("two"));
    oracle.push_reply(verdict_needs_debug("three"));

    let mut state = single_task_state();
    let (bus, sink) = bus_with_sink();
    let outcome = run(&oracle, &mut state, &bus, &config(2)).await;

    assert_eq!(
        outcome,
        TaskOutcome::Failed {
            reason: "three".to_string()
        }
    );
    assert_eq!(oracle.calls(), 3, "max + 1 attempts in total");
    assert_eq!(debug_attempts(&sink), [1, 2], "bounded by the budget");
    assert_eq!(state.phase(), SessionPhase::Failed);
    assert_eq!(state.failure_reason(), Some("three"));
}

#[tokio::test]
async fn malformed_verdict_is_retried_as_debug() {
    let oracle = ScriptedOracle::new();
    oracle.push_reply("not json at all");
    oracle.push_reply(verdict_success("recovered"));

    let mut state = single_task_state();
    let (bus, sink) = bus_with_sink();
    let outcome = run(&oracle, &mut state, &bus, &config(1)).await;

    assert_eq!(
        outcome,
        TaskOutcome::Succeeded {
            result: "recovered".to_string()
        }
    );
    assert_eq!(debug_attempts(&sink), [1]);
    let history = state.history_for_llm();
    assert!(
        history[0].summary.contains("no JSON object"),
        "synthesized error describes the parse failure: {}",
        history[0].summary
    );
}

#[tokio::test]
async fn oracle_timeout_counts_as_one_debug_attempt() {
    let oracle = ScriptedOracle::new();
    oracle.push_hang();
    oracle.push_reply(verdict_success("made it"));

    let mut state = single_task_state();
    let (bus, sink) = bus_with_sink();
    let config = OrchestratorConfig {
        task_timeout: Duration::from_millis(50),
        ..config(1)
    };
    let outcome = run(&oracle, &mut state, &bus, &config).await;

    assert_eq!(
        outcome,
        TaskOutcome::Succeeded {
            result: "made it".to_string()
        }
    );
    assert_eq!(debug_attempts(&sink), [1]);
    assert_eq!(state.history_for_llm()[0].summary, "task-timeout");
}

#[tokio::test]
async fn transport_error_is_folded_into_the_debug_loop() {
    let oracle = ScriptedOracle::new();
    oracle.push_error(OracleError::Transport("connection reset".to_string()));
    oracle.push_reply(verdict_success("back online"));

    let mut state = single_task_state();
    let (bus, sink) = bus_with_sink();
    let outcome = run(&oracle, &mut state, &bus, &config(1)).await;

    assert!(matches!(outcome, TaskOutcome::Succeeded { .. }));
    assert_eq!(debug_attempts(&sink), [1]);
    assert!(state.history_for_llm()[0].summary.contains("connection reset"));
}

#[tokio::test]
async fn empty_result_success_is_treated_as_needs_debug() {
    let oracle = ScriptedOracle::new();
    oracle.push_reply(r#"{"status":"success","result":"","log_entries":[]}"#);
    oracle.push_reply(verdict_success("real result"));

    let mut state = single_task_state();
    let (bus, sink) = bus_with_sink();
    let outcome = run(&oracle, &mut state, &bus, &config(1)).await;

    assert_eq!(
        outcome,
        TaskOutcome::Succeeded {
            result: "real result".to_string()
        }
    );
    assert_eq!(debug_attempts(&sink), [1]);
    assert!(state.history_for_llm()[0].summary.contains("empty result"));
}

#[tokio::test]
async fn failed_status_also_enters_the_debug_loop() {
    let oracle = ScriptedOracle::new();
    oracle.push_reply(verdict_failed("dead end"));
    oracle.push_reply(verdict_success("detour worked"));

    let mut state = single_task_state();
    let (bus, sink) = bus_with_sink();
    let outcome = run(&oracle, &mut state, &bus, &config(2)).await;

    assert!(matches!(outcome, TaskOutcome::Succeeded { .. }));
    assert_eq!(debug_attempts(&sink), [1]);
}

#[tokio::test]
async fn pre_cancelled_token_fails_without_calling_the_oracle() {
    let oracle = ScriptedOracle::new();
    oracle.push_reply(verdict_success("never seen"));

    let mut state = single_task_state();
    let (bus, _sink) = bus_with_sink();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = TaskRunner::new(oracle.as_ref(), &mut state, &bus, &config(3), &cancel)
        .run()
        .await;

    assert_eq!(
        outcome,
        TaskOutcome::Failed {
            reason: "cancelled".to_string()
        }
    );
    assert_eq!(oracle.calls(), 0);
    assert_eq!(state.phase(), SessionPhase::Failed);
}

#[tokio::test]
async fn zero_budget_fails_on_first_non_success() {
    let oracle = ScriptedOracle::new();
    oracle.push_reply(verdict_needs_debug("no retries allowed"));

    let mut state = single_task_state();
    let (bus, sink) = bus_with_sink();
    let outcome = run(&oracle, &mut state, &bus, &config(0)).await;

    assert_eq!(
        outcome,
        TaskOutcome::Failed {
            reason: "no retries allowed".to_string()
        }
    );
    assert_eq!(oracle.calls(), 1);
    assert!(debug_attempts(&sink).is_empty());
}

#[tokio::test]
async fn failure_logs_are_aggregated() {
    let oracle = ScriptedOracle::new();
    oracle.push_reply(verdict_needs_debug("boom"));
    oracle.push_reply(verdict_success("ok"));

    let mut state = single_task_state();
    let (bus, _sink) = bus_with_sink();
    run(&oracle, &mut state, &bus, &config(1)).await;

    // verdict_needs_debug carries one error log entry, verdict_success one
    // info entry; both must land in the aggregate.
    assert_eq!(state.all_log_entries().len(), 2);
}
