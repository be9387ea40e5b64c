/// Outcome of an `ingest` call. Ingest never propagates downstream errors —
/// it either accepts the message or silently rejects it; this enum exists
/// so tests and metrics can observe which happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    DuplicateIgnored,
    RateLimited,
    Backpressured,
    /// The service is draining for shutdown; new ingests are rejected.
    ShuttingDown,
}

/// Tagged result a `Processor` attempt resolves to, replacing the
/// exception-hierarchy dispatch of a generic unchecked-error model: the
/// retry machinery switches on the tag, never on an error's concrete type.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Cooperative halt raised by a hook. No retry, no user notification
    /// unless the hook opted in via metadata.
    #[error("aborted: {reason} ({code})")]
    Abort { reason: String, code: String },

    /// Subject to retry per the configured backoff policy.
    #[error("transient processing failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// Same retry handling as `Transient`; the distinction is informational
    /// in logs only, with no behavioral difference after exhaustion.
    #[error("fatal processing failure: {0}")]
    Fatal(#[source] anyhow::Error),
}

impl ProcessError {
    pub fn is_abort(&self) -> bool {
        matches!(self, ProcessError::Abort { .. })
    }
}
