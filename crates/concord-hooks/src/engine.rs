use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use concord_core::{GatewayError, IncomingMessage, OutgoingMessage};
use futures_util::FutureExt;
use tracing::{debug, error, warn};

use crate::error::{HookError, Result};
use crate::types::{PostHook, PreHook};

/// Ordered pre-hook and post-hook lists, each sorted ascending by priority
/// after every registration (§4.7).
///
/// A single `HookPipeline` is meant to be shared across the process —
/// wrap it in `Arc` at the call site.
pub struct HookPipeline {
    pre_hooks: RwLock<Vec<Arc<dyn PreHook>>>,
    post_hooks: RwLock<Vec<Arc<dyn PostHook>>>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self { pre_hooks: RwLock::new(Vec::new()), post_hooks: RwLock::new(Vec::new()) }
    }

    pub fn register_pre(&self, hook: Arc<dyn PreHook>) -> Result<()> {
        let mut hooks = self.pre_hooks.write().expect("pre-hook pipeline poisoned");
        if hooks.iter().any(|h| h.name() == hook.name()) {
            return Err(HookError::DuplicateName(hook.name().to_string()));
        }
        debug!(name = hook.name(), priority = hook.priority(), "pre-hook registered");
        hooks.push(hook);
        hooks.sort_by_key(|h| h.priority());
        Ok(())
    }

    pub fn register_post(&self, hook: Arc<dyn PostHook>) -> Result<()> {
        let mut hooks = self.post_hooks.write().expect("post-hook pipeline poisoned");
        if hooks.iter().any(|h| h.name() == hook.name()) {
            return Err(HookError::DuplicateName(hook.name().to_string()));
        }
        debug!(name = hook.name(), priority = hook.priority(), "post-hook registered");
        hooks.push(hook);
        hooks.sort_by_key(|h| h.priority());
        Ok(())
    }

    /// Run every non-bypassed pre-hook in priority order. Returns the names
    /// of hooks actually executed (for `ResponseMetadata.hooks_executed`),
    /// or the error returned by the hook that aborted the pipeline.
    pub async fn run_pre(&self, message: &mut IncomingMessage) -> Result<Vec<String>>
    where
    {
        self.run_pre_inner(message).await.map_err(HookOutcome::into_error)
    }

    async fn run_pre_inner(
        &self,
        message: &mut IncomingMessage,
    ) -> std::result::Result<Vec<String>, HookOutcome> {
        let hooks: Vec<Arc<dyn PreHook>> = {
            let guard = self.pre_hooks.read().expect("pre-hook pipeline poisoned");
            guard.iter().cloned().collect()
        };

        let mut executed = Vec::with_capacity(hooks.len());
        for hook in hooks {
            if message.bypass_hooks.contains(hook.name()) {
                debug!(hook = hook.name(), "pre-hook bypassed");
                continue;
            }
            let name = hook.name().to_string();
            match AssertUnwindSafe(hook.execute(message)).catch_unwind().await {
                Ok(Some(err)) => {
                    warn!(hook = %name, error = %err.message, "pre-hook aborted pipeline");
                    executed.push(name);
                    return Err(HookOutcome::Aborted(err));
                }
                Ok(None) => {
                    executed.push(name);
                }
                Err(_panic) => {
                    error!(hook = %name, "pre-hook panicked; continuing to next hook");
                    executed.push(name);
                }
            }
        }
        Ok(executed)
    }

    /// Run every non-bypassed post-hook in priority order. Unlike the pre
    /// pass, the bypass set still comes from the originating `IncomingMessage`
    /// since post-hooks don't have their own inbound envelope.
    pub async fn run_post(
        &self,
        incoming: &IncomingMessage,
        outgoing: &mut OutgoingMessage,
    ) -> Result<Vec<String>>
    where
    {
        self.run_post_inner(incoming, outgoing).await.map_err(HookOutcome::into_error)
    }

    async fn run_post_inner(
        &self,
        incoming: &IncomingMessage,
        outgoing: &mut OutgoingMessage,
    ) -> std::result::Result<Vec<String>, HookOutcome> {
        let hooks: Vec<Arc<dyn PostHook>> = {
            let guard = self.post_hooks.read().expect("post-hook pipeline poisoned");
            guard.iter().cloned().collect()
        };

        let mut executed = Vec::with_capacity(hooks.len());
        for hook in hooks {
            if incoming.bypass_hooks.contains(hook.name()) {
                debug!(hook = hook.name(), "post-hook bypassed");
                continue;
            }
            let name = hook.name().to_string();
            match AssertUnwindSafe(hook.execute(incoming, outgoing)).catch_unwind().await {
                Ok(Some(err)) => {
                    warn!(hook = %name, error = %err.message, "post-hook aborted pipeline");
                    executed.push(name);
                    return Err(HookOutcome::Aborted(err));
                }
                Ok(None) => {
                    executed.push(name);
                }
                Err(_panic) => {
                    error!(hook = %name, "post-hook panicked; continuing to next hook");
                    executed.push(name);
                }
            }
        }
        Ok(executed)
    }
}

impl Default for HookPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Internal: distinguishes "a hook aborted with this error" so `run_pre`/
/// `run_post` can return the names executed so far to the caller even on
/// failure, without making that detail part of the public `Result` type.
enum HookOutcome {
    Aborted(GatewayError),
}

impl HookOutcome {
    fn into_error(self) -> HookError {
        match self {
            // Pipeline aborts surface a GatewayError, not a HookError — the
            // gateway distinguishes "a hook is misconfigured" from "a hook
            // rejected this message" by the type it gets back. Wrap it so
            // `run_pre`/`run_post`'s signature stays a single `Result` type;
            // callers downcast via `HookError::Aborted`.
            HookOutcome::Aborted(err) => HookError::Aborted(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use concord_core::{ChannelId, ErrorCode, UserId, UserRef};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_message() -> IncomingMessage {
        IncomingMessage {
            message_id: "m1".into(),
            channel_id: ChannelId::from("web"),
            question: "hi".into(),
            chat_history: vec![],
            user: UserRef {
                id: UserId::from("u1"),
                channel_user_id: "u1".into(),
                session: None,
                auth_token: None,
            },
            channel_metadata: Default::default(),
            bypass_hooks: HashSet::new(),
            channel_signature: None,
        }
    }

    struct CountingHook {
        name: &'static str,
        priority: i32,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PreHook for CountingHook {
        fn name(&self) -> &str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        async fn execute(&self, _message: &mut IncomingMessage) -> Option<GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            None
        }
    }

    struct AbortingHook;

    #[async_trait]
    impl PreHook for AbortingHook {
        fn name(&self) -> &str {
            "aborting"
        }
        async fn execute(&self, _message: &mut IncomingMessage) -> Option<GatewayError> {
            Some(GatewayError::new(ErrorCode::PiiDetected, "blocked"))
        }
    }

    struct PanickingHook;

    #[async_trait]
    impl PreHook for PanickingHook {
        fn name(&self) -> &str {
            "panicking"
        }
        async fn execute(&self, _message: &mut IncomingMessage) -> Option<GatewayError> {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn runs_pre_hooks_in_priority_order() {
        let pipeline = HookPipeline::new();
        let calls = Arc::new(AtomicUsize::new(0));
        pipeline
            .register_pre(Arc::new(CountingHook { name: "low", priority: 300, calls: calls.clone() }))
            .unwrap();
        pipeline
            .register_pre(Arc::new(CountingHook { name: "high", priority: 0, calls: calls.clone() }))
            .unwrap();

        let mut msg = sample_message();
        let executed = pipeline.run_pre(&mut msg).await.unwrap();
        assert_eq!(executed, vec!["high".to_string(), "low".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn aborting_hook_stops_the_pipeline() {
        let pipeline = HookPipeline::new();
        let calls = Arc::new(AtomicUsize::new(0));
        pipeline.register_pre(Arc::new(AbortingHook)).unwrap();
        pipeline
            .register_pre(Arc::new(CountingHook { name: "after", priority: 500, calls: calls.clone() }))
            .unwrap();

        let mut msg = sample_message();
        let err = pipeline.run_pre(&mut msg).await.unwrap_err();
        assert!(matches!(err, HookError::Aborted(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bypassed_hook_is_skipped() {
        let pipeline = HookPipeline::new();
        let calls = Arc::new(AtomicUsize::new(0));
        pipeline
            .register_pre(Arc::new(CountingHook { name: "skip-me", priority: 0, calls: calls.clone() }))
            .unwrap();

        let mut msg = sample_message();
        msg.bypass_hooks.insert("skip-me".to_string());
        let executed = pipeline.run_pre(&mut msg).await.unwrap();
        assert!(executed.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_hook_is_isolated_and_pipeline_continues() {
        let pipeline = HookPipeline::new();
        let calls = Arc::new(AtomicUsize::new(0));
        pipeline.register_pre(Arc::new(PanickingHook)).unwrap();
        pipeline
            .register_pre(Arc::new(CountingHook { name: "survivor", priority: 500, calls: calls.clone() }))
            .unwrap();

        let mut msg = sample_message();
        let executed = pipeline.run_pre(&mut msg).await.unwrap();
        assert_eq!(executed, vec!["panicking".to_string(), "survivor".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let pipeline = HookPipeline::new();
        let calls = Arc::new(AtomicUsize::new(0));
        pipeline
            .register_pre(Arc::new(CountingHook { name: "dup", priority: 0, calls: calls.clone() }))
            .unwrap();
        let result = pipeline.register_pre(Arc::new(CountingHook {
            name: "dup",
            priority: 0,
            calls,
        }));
        assert!(matches!(result, Err(HookError::DuplicateName(_))));
    }
}
