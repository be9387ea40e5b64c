use crate::message::Message;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Carried through the pre → process → post chain for one attempt.
/// `metadata` is re-used across retries of the same batch, so a pre-hook
/// can stash state on attempt 1 that a post-hook reads on attempt 3.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub user_id: String,
    pub batch: Arc<Vec<Message>>,
    pub batch_started_at: i64,
    pub is_retry: bool,
    pub retry_count: u32,
    pub metadata: Arc<Mutex<HashMap<String, serde_json::Value>>>,
}

impl HookContext {
    pub fn new(user_id: String, batch: Arc<Vec<Message>>, batch_started_at: i64) -> Self {
        Self {
            user_id,
            batch,
            batch_started_at,
            is_retry: false,
            retry_count: 0,
            metadata: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn mark_retry(&mut self, retry_count: u32) {
        self.is_retry = true;
        self.retry_count = retry_count;
    }
}

/// Signal a hook can raise in place of returning normally.
#[derive(Debug, thiserror::Error)]
pub enum HookSignal {
    /// Cooperative halt: the chain stops immediately, the batch is dropped,
    /// and the retry machinery never sees this as a transient failure.
    #[error("hook aborted: {reason} ({code})")]
    Abort { reason: String, code: String },
    /// Any other hook failure, folded into the normal processing-error path.
    #[error(transparent)]
    Error(#[from] anyhow::Error),
}

/// An ordered pre/post interceptor. Hooks run on the same execution context
/// as the `Processor` and may suspend on I/O.
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    async fn pre(&self, _ctx: &HookContext) -> Result<(), HookSignal> {
        Ok(())
    }

    async fn post(&self, _ctx: &HookContext) -> Result<(), HookSignal> {
        Ok(())
    }
}

#[derive(Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn Hook>>,
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookChain")
            .field("hooks", &self.hooks.iter().map(|h| h.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.push(hook);
    }

    /// Runs every pre-hook in order. Stops at the first `Abort` or `Error`.
    pub async fn run_pre(&self, ctx: &HookContext) -> Result<(), HookSignal> {
        for hook in &self.hooks {
            hook.pre(ctx).await?;
        }
        Ok(())
    }

    /// Runs every post-hook in order. Only invoked after a successful
    /// `Processor` call; a post-hook failure does not retry the batch.
    pub async fn run_post(&self, ctx: &HookContext) -> Result<(), HookSignal> {
        for hook in &self.hooks {
            hook.post(ctx).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingHook {
        name: String,
        abort: bool,
    }

    #[async_trait]
    impl Hook for RecordingHook {
        fn name(&self) -> &str {
            &self.name
        }

        async fn pre(&self, ctx: &HookContext) -> Result<(), HookSignal> {
            if self.abort {
                return Err(HookSignal::Abort { reason: "blocked".into(), code: "E_BLOCK".into() });
            }
            ctx.metadata.lock().insert(self.name.clone(), serde_json::json!(true));
            Ok(())
        }
    }

    fn ctx() -> HookContext {
        HookContext::new("u1".into(), Arc::new(vec![Message::new("m1", "u1", "hi", 0)]), 0)
    }

    #[tokio::test]
    async fn runs_hooks_in_order_and_shares_metadata() {
        let mut chain = HookChain::new();
        chain.push(Arc::new(RecordingHook { name: "a".into(), abort: false }));
        chain.push(Arc::new(RecordingHook { name: "b".into(), abort: false }));
        let ctx = ctx();
        chain.run_pre(&ctx).await.unwrap();
        assert_eq!(ctx.metadata.lock().len(), 2);
    }

    #[tokio::test]
    async fn abort_stops_the_chain() {
        let mut chain = HookChain::new();
        chain.push(Arc::new(RecordingHook { name: "a".into(), abort: true }));
        chain.push(Arc::new(RecordingHook { name: "b".into(), abort: false }));
        let ctx = ctx();
        let result = chain.run_pre(&ctx).await;
        assert!(matches!(result, Err(HookSignal::Abort { .. })));
        assert!(ctx.metadata.lock().is_empty());
    }
}
