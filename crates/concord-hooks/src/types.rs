use async_trait::async_trait;
use concord_core::{GatewayError, IncomingMessage, OutgoingMessage};

/// Priority bands are a convention, not a contract — only the numeric
/// ordering matters to the pipeline (§4.7).
pub const PRIORITY_CRITICAL: i32 = 0;
pub const PRIORITY_HIGH: i32 = 100;
pub const PRIORITY_NORMAL: i32 = 200;
pub const PRIORITY_LOW: i32 = 300;

/// Runs before RAG. May mutate the incoming message (redact PII, stamp
/// routing metadata). Returning `Some(err)` aborts the pipeline with that
/// error; returning `None` continues to the next hook.
#[async_trait]
pub trait PreHook: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        PRIORITY_NORMAL
    }

    async fn execute(&self, message: &mut IncomingMessage) -> Option<GatewayError>;
}

/// Runs after RAG has produced an outgoing message. May mutate the
/// outgoing message before delivery. Unlike the teacher's fire-and-forget
/// After hooks, post-hooks here can abort — the caller receives the
/// returned error instead of the response.
#[async_trait]
pub trait PostHook: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        PRIORITY_NORMAL
    }

    async fn execute(
        &self,
        incoming: &IncomingMessage,
        outgoing: &mut OutgoingMessage,
    ) -> Option<GatewayError>;
}
