use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub tokens_input: u64,
    pub tokens_output: u64,
    /// Point-in-time estimate, read fresh on every snapshot rather than cached.
    pub active_users: i64,
    pub pending_messages: i64,
    pub ingest_accepted: u64,
    pub ingest_deduped: u64,
    pub ingest_rate_limited: u64,
    pub ingest_backpressured: u64,
    pub batches_processed: u64,
    pub batch_retries: u64,
    pub batches_dead_lettered: u64,
}

#[derive(Debug)]
pub struct MetricsStore {
    start_time: Instant,
    messages_in: AtomicU64,
    messages_out: AtomicU64,
    tokens_input: AtomicU64,
    tokens_output: AtomicU64,
    active_users: AtomicI64,
    pending_messages: AtomicI64,
    ingest_accepted: AtomicU64,
    ingest_deduped: AtomicU64,
    ingest_rate_limited: AtomicU64,
    ingest_backpressured: AtomicU64,
    batches_processed: AtomicU64,
    batch_retries: AtomicU64,
    batches_dead_lettered: AtomicU64,
}

impl MetricsStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            messages_in: AtomicU64::new(0),
            messages_out: AtomicU64::new(0),
            tokens_input: AtomicU64::new(0),
            tokens_output: AtomicU64::new(0),
            active_users: AtomicI64::new(0),
            pending_messages: AtomicI64::new(0),
            ingest_accepted: AtomicU64::new(0),
            ingest_deduped: AtomicU64::new(0),
            ingest_rate_limited: AtomicU64::new(0),
            ingest_backpressured: AtomicU64::new(0),
            batches_processed: AtomicU64::new(0),
            batch_retries: AtomicU64::new(0),
            batches_dead_lettered: AtomicU64::new(0),
        })
    }

    pub fn inc_messages_in(&self) {
        self.messages_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_messages_out(&self) {
        self.messages_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tokens(&self, input: u64, output: u64) {
        self.tokens_input.fetch_add(input, Ordering::Relaxed);
        self.tokens_output.fetch_add(output, Ordering::Relaxed);
    }

    pub fn set_active_users(&self, count: i64) {
        self.active_users.store(count, Ordering::Relaxed);
    }

    pub fn set_pending_messages(&self, count: i64) {
        self.pending_messages.store(count, Ordering::Relaxed);
    }

    pub fn inc_ingest_accepted(&self) {
        self.ingest_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ingest_deduped(&self) {
        self.ingest_deduped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ingest_rate_limited(&self) {
        self.ingest_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ingest_backpressured(&self) {
        self.ingest_backpressured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_batches_processed(&self) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_batch_retries(&self) {
        self.batch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_batches_dead_lettered(&self) {
        self.batches_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
            tokens_input: self.tokens_input.load(Ordering::Relaxed),
            tokens_output: self.tokens_output.load(Ordering::Relaxed),
            active_users: self.active_users.load(Ordering::Relaxed),
            pending_messages: self.pending_messages.load(Ordering::Relaxed),
            ingest_accepted: self.ingest_accepted.load(Ordering::Relaxed),
            ingest_deduped: self.ingest_deduped.load(Ordering::Relaxed),
            ingest_rate_limited: self.ingest_rate_limited.load(Ordering::Relaxed),
            ingest_backpressured: self.ingest_backpressured.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            batch_retries: self.batch_retries.load(Ordering::Relaxed),
            batches_dead_lettered: self.batches_dead_lettered.load(Ordering::Relaxed),
        }
    }
}
