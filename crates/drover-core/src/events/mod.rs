//! Session events and the subscriber bus.
//!
//! The orchestrator owns an explicit subscriber list and dispatches
//! synchronously, in order: a subscriber that reads events in order
//! observes a consistent narrative of the session. Payloads are value
//! snapshots; no shared mutable references cross the boundary. A slow
//! subscriber blocks the orchestrator -- subscribers must be fast or
//! buffer (the [`ChannelSink`] buffers).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use drover_types::{Plan, PlanComplexity, Summary, Task};

/// A notification about one state transition within a session.
///
/// Events for a session are emitted in strictly monotonic order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    PlanningStarted {
        session_id: Uuid,
        request: String,
        timestamp: DateTime<Utc>,
    },
    PlanCreated {
        session_id: Uuid,
        plan: Plan,
        complexity: PlanComplexity,
        reordered: bool,
        timestamp: DateTime<Utc>,
    },
    TaskStarted {
        session_id: Uuid,
        task: Task,
        /// 1-based position of the task in the plan.
        step_index: usize,
        timestamp: DateTime<Utc>,
    },
    DebugStarted {
        session_id: Uuid,
        task_id: String,
        /// 1-based debug attempt counter for the task.
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        session_id: Uuid,
        task_id: String,
        result: String,
        timestamp: DateTime<Utc>,
    },
    TaskFailed {
        session_id: Uuid,
        task_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionCompleted {
        session_id: Uuid,
        summary: Summary,
        timestamp: DateTime<Utc>,
    },
    ExecutionFailed {
        session_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// The session this event belongs to.
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::PlanningStarted { session_id, .. }
            | Self::PlanCreated { session_id, .. }
            | Self::TaskStarted { session_id, .. }
            | Self::DebugStarted { session_id, .. }
            | Self::TaskCompleted { session_id, .. }
            | Self::TaskFailed { session_id, .. }
            | Self::ExecutionCompleted { session_id, .. }
            | Self::ExecutionFailed { session_id, .. } => *session_id,
        }
    }

    /// The wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlanningStarted { .. } => "planning-started",
            Self::PlanCreated { .. } => "plan-created",
            Self::TaskStarted { .. } => "task-started",
            Self::DebugStarted { .. } => "debug-started",
            Self::TaskCompleted { .. } => "task-completed",
            Self::TaskFailed { .. } => "task-failed",
            Self::ExecutionCompleted { .. } => "execution-completed",
            Self::ExecutionFailed { .. } => "execution-failed",
        }
    }
}

/// A subscriber. Dispatch is synchronous; implementations must be fast
/// or hand the event off to a buffer.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &SessionEvent);
}

/// The orchestrator-owned subscriber list.
#[derive(Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Subscribers receive events in subscription
    /// order, each event delivered to all subscribers before the next is
    /// emitted.
    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Deliver an event to every subscriber, in order.
    pub fn emit(&self, event: SessionEvent) {
        for sink in &self.sinks {
            sink.emit(&event);
        }
    }
}

/// Buffering sink backed by an unbounded channel, for hosts that consume
/// events asynchronously (UIs, log shippers).
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    /// Create a sink plus the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Create a sink plus a `Stream` over the events.
    pub fn stream() -> (Self, UnboundedReceiverStream<SessionEvent>) {
        let (sink, rx) = Self::channel();
        (sink, UnboundedReceiverStream::new(rx))
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &SessionEvent) {
        // Receiver dropped means nobody is listening anymore; not an error.
        let _ = self.tx.send(event.clone());
    }
}

/// Sink that forwards events into `tracing`, for hosts that want a
/// process-wide log of session activity without a custom subscriber.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &SessionEvent) {
        tracing::info!(
            session_id = %event.session_id(),
            event = event.name(),
            "session event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    impl EventSink for Recorder {
        fn emit(&self, event: &SessionEvent) {
            self.0.lock().unwrap().push(event.name().to_string());
        }
    }

    fn planning_started(session_id: Uuid) -> SessionEvent {
        SessionEvent::PlanningStarted {
            session_id,
            request: "do things".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn dispatch_is_in_order_per_sink() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let mut bus = EventBus::new();
        bus.subscribe(recorder.clone());

        let session_id = Uuid::new_v4();
        bus.emit(planning_started(session_id));
        bus.emit(SessionEvent::ExecutionFailed {
            session_id,
            reason: "cancelled".to_string(),
            timestamp: Utc::now(),
        });

        let seen = recorder.0.lock().unwrap();
        assert_eq!(*seen, ["planning-started", "execution-failed"]);
    }

    #[test]
    fn all_subscribers_see_every_event() {
        let a = Arc::new(Recorder(Mutex::new(Vec::new())));
        let b = Arc::new(Recorder(Mutex::new(Vec::new())));
        let mut bus = EventBus::new();
        bus.subscribe(a.clone());
        bus.subscribe(b.clone());

        bus.emit(planning_started(Uuid::new_v4()));
        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(b.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn channel_sink_buffers_events() {
        let (sink, mut rx) = ChannelSink::channel();
        let mut bus = EventBus::new();
        bus.subscribe(Arc::new(sink));

        let session_id = Uuid::new_v4();
        bus.emit(planning_started(session_id));

        let event = rx.recv().await.expect("event should arrive");
        assert_eq!(event.name(), "planning-started");
        assert_eq!(event.session_id(), session_id);
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        let mut bus = EventBus::new();
        bus.subscribe(Arc::new(sink));
        bus.emit(planning_started(Uuid::new_v4()));
    }

    #[test]
    fn event_wire_form_is_tagged_kebab_case() {
        let json = serde_json::to_string(&planning_started(Uuid::nil())).unwrap();
        assert!(json.contains("\"type\":\"planning-started\""));
    }
}
