//! The `Oracle` trait -- the boundary to the external reasoning service.
//!
//! The core consumes exactly one operation: hand the service a system
//! prompt plus a user prompt and get back a text blob. The service is
//! expected to internalize any tool invocation on its side and return a
//! final structured verdict; the core never interprets tool calls. The
//! trait is object-safe so it can be stored as `Arc<dyn Oracle>` and
//! shared by concurrent sessions (implementations must be
//! concurrency-safe; the core itself keeps at most one call in flight per
//! session).

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

/// A single completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// The versioned system prompt (owned by the codec).
    pub system_prompt: String,
    /// The per-call prompt body.
    pub user_prompt: String,
    /// Wall-clock budget for the call. The caller also enforces this
    /// externally; clients may use it to bound their own transport.
    pub timeout: Duration,
    /// Tool-set descriptor for the oracle's internal use. Opaque to the
    /// core; passed through from the host's configuration.
    pub tools: Option<serde_json::Value>,
}

/// Errors an oracle client may surface.
///
/// All variants are treated as transient by the task runner (they consume
/// one debug attempt each); the planner treats any of them as fatal.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle transport error: {0}")]
    Transport(String),

    #[error("oracle call timed out")]
    Timeout,

    #[error("oracle call cancelled")]
    Cancelled,
}

/// The external reasoning service.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Run one completion and return the final text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, OracleError>;

    /// Streaming variant yielding the final text as a one-item stream.
    ///
    /// Clients that stream natively may override this; the core only ever
    /// consumes the final string.
    fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<String, OracleError>> + Send + '_>> {
        Box::pin(futures::stream::once(self.complete(request)))
    }
}

// Compile-time assertion: Oracle must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Oracle) {}
};

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    /// A trivial oracle that echoes the user prompt back.
    struct EchoOracle;

    #[async_trait]
    impl Oracle for EchoOracle {
        async fn complete(&self, request: CompletionRequest) -> Result<String, OracleError> {
            Ok(request.user_prompt)
        }
    }

    #[test]
    fn oracle_is_object_safe() {
        let oracle: Box<dyn Oracle> = Box::new(EchoOracle);
        let _ = &oracle;
    }

    #[tokio::test]
    async fn echo_complete() {
        let oracle = EchoOracle;
        let reply = oracle
            .complete(CompletionRequest {
                system_prompt: "system".to_string(),
                user_prompt: "hello".to_string(),
                timeout: Duration::from_secs(1),
                tools: None,
            })
            .await
            .unwrap();
        assert_eq!(reply, "hello");
    }

    #[tokio::test]
    async fn default_stream_yields_final_text_once() {
        let oracle = EchoOracle;
        let items: Vec<_> = oracle
            .complete_stream(CompletionRequest {
                system_prompt: String::new(),
                user_prompt: "chunked".to_string(),
                timeout: Duration::from_secs(1),
                tools: None,
            })
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "chunked");
    }
}
