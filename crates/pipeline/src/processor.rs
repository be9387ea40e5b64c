use crate::error::ProcessError;
use crate::message::Message;
use async_trait::async_trait;

/// The sink that consumes a batch for one user — the injection point for
/// the LLM agent invocation and outbound transport. The core does not
/// interpret what happens inside `process`; it only dispatches on the
/// returned tag (success, abort, transient/fatal failure).
///
/// A single call is one attempt: retries re-invoke `process` with the same
/// `batch`. `batch` is always non-empty and ordered by `received_at`.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, user_id: &str, batch: &[Message]) -> Result<(), ProcessError>;

    /// Best-effort user-visible notification outside the normal reply path:
    /// used for `REJECT_WITH_NOTIFY` backpressure and for
    /// `notifyUserOnFailure` after retry exhaustion. Both call sites route
    /// through the Processor's own outbound channel, so one method covers
    /// both.
    async fn notify_user(&self, _user_id: &str, _message: &str) {}
}
