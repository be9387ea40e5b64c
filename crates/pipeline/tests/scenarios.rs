//! End-to-end scenarios not already covered by `service.rs`'s inline tests
//! (single message after silence, rapid-then-silence, duplicate webhook,
//! transient-then-success are covered there).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use wabridge_core::bus::MessageBus;
use wabridge_core::config::{BackpressureStrategy, BatchingConfig, ErrorPolicyConfig, RateLimitConfig};
use wabridge_core::metrics::MetricsStore;
use wabridge_pipeline::{
    BatchingService, BatchingServiceConfig, Clock, DeadLetterHandler, HookChain, InMemoryMessageStore, Message,
    ProcessError, Processor, TestClock,
};

struct RecordingProcessor {
    batches: Mutex<Vec<Vec<Message>>>,
}

impl RecordingProcessor {
    fn new() -> Self {
        Self { batches: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    async fn process(&self, _user_id: &str, batch: &[Message]) -> Result<(), ProcessError> {
        self.batches.lock().push(batch.to_vec());
        Ok(())
    }
}

struct AlwaysFailProcessor;

#[async_trait]
impl Processor for AlwaysFailProcessor {
    async fn process(&self, _user_id: &str, _batch: &[Message]) -> Result<(), ProcessError> {
        Err(ProcessError::Transient(anyhow::anyhow!("downstream unavailable")))
    }
}

struct RecordingDlq {
    batches: Mutex<Vec<(String, Vec<Message>)>>,
}

impl RecordingDlq {
    fn new() -> Self {
        Self { batches: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl DeadLetterHandler for RecordingDlq {
    async fn handle(&self, user_id: &str, batch: &[Message]) {
        self.batches.lock().push((user_id.to_string(), batch.to_vec()));
    }
}

fn base_batching() -> BatchingConfig {
    BatchingConfig {
        adaptive_timeout_ms: 5_000,
        silence_threshold_ms: 2_000,
        max_buffer_size: 50,
        rate_limit: RateLimitConfig {
            tokens_per_minute: 6_000,
            bucket_capacity: 100,
            max_messages_in_window: 100,
            sliding_window_ms: 30_000,
        },
        backpressure: BackpressureStrategy::DropNew,
        errors: ErrorPolicyConfig {
            max_retries: 1,
            retry_delay_ms: 100,
            exponential_backoff: true,
            notify_user_on_failure: false,
            user_notification_message: None,
            dead_letter_handler: None,
        },
        max_processed_ids: 5_000,
    }
}

/// Scenario 3: continuous typing hits the absolute timeout rather than
/// ever observing `silenceThreshold` of quiet.
#[tokio::test(start_paused = true)]
async fn continuous_typing_drains_at_the_adaptive_timeout() {
    let clock = Arc::new(TestClock::new(0));
    let processor = Arc::new(RecordingProcessor::new());
    let service = BatchingService::new(
        BatchingServiceConfig::new(base_batching()),
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::new(InMemoryMessageStore::new(5_000)),
        Arc::clone(&processor) as Arc<dyn Processor>,
        HookChain::new(),
        Arc::new(MessageBus::new(16)),
        MetricsStore::new(),
        None,
    );

    for t in [0, 1_000, 2_000, 3_000, 4_000, 5_000] {
        service.ingest(Message::new(format!("m{t}"), "typist", "...", t)).await;
        if t > 0 {
            clock.advance(1_000);
            tokio::time::advance(Duration::from_millis(1_000)).await;
            tokio::task::yield_now().await;
        }
    }

    // Timeout fires at t=5000 from the first message; give it a moment past.
    tokio::time::advance(Duration::from_millis(100)).await;
    tokio::task::yield_now().await;

    let batches = processor.batches.lock();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 6);
}

/// Scenario 5: a burst well beyond the sliding window's ceiling is capped
/// at the limiter; the Processor never sees the dropped tail.
#[tokio::test(start_paused = true)]
async fn burst_exceeding_sliding_window_is_capped_at_the_limiter() {
    let clock = Arc::new(TestClock::new(0));
    let processor = Arc::new(RecordingProcessor::new());
    let mut batching = base_batching();
    batching.rate_limit = RateLimitConfig {
        tokens_per_minute: 6_000,
        bucket_capacity: 30,
        max_messages_in_window: 10,
        sliding_window_ms: 30_000,
    };
    let service = BatchingService::new(
        BatchingServiceConfig::new(batching),
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::new(InMemoryMessageStore::new(5_000)),
        Arc::clone(&processor) as Arc<dyn Processor>,
        HookChain::new(),
        Arc::new(MessageBus::new(16)),
        MetricsStore::new(),
        None,
    );

    let mut accepted = 0;
    for i in 0..20 {
        let outcome = service.ingest(Message::new(format!("m{i}"), "burster", "x", i)).await;
        if outcome == wabridge_pipeline::IngestOutcome::Accepted {
            accepted += 1;
        }
        clock.advance(1);
        tokio::time::advance(Duration::from_millis(1)).await;
    }

    assert_eq!(accepted, 10);

    clock.advance(5_000);
    tokio::time::advance(Duration::from_millis(5_100)).await;
    tokio::task::yield_now().await;

    let batches = processor.batches.lock();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 10);
}

/// DLQ ownership transfer: once retries are exhausted, a configured DLQ
/// handler receives the batch and every message is marked processed,
/// unlike the no-DLQ case.
#[tokio::test(start_paused = true)]
async fn dlq_handler_takes_ownership_on_exhaustion() {
    let clock = Arc::new(TestClock::new(0));
    let store = Arc::new(InMemoryMessageStore::new(5_000));
    let dlq = Arc::new(RecordingDlq::new());
    let mut batching = base_batching();
    batching.errors.max_retries = 1;
    batching.errors.retry_delay_ms = 10;
    batching.errors.exponential_backoff = false;

    let service = BatchingService::new(
        BatchingServiceConfig::new(batching),
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::clone(&store) as Arc<dyn wabridge_pipeline::MessageStore>,
        Arc::new(AlwaysFailProcessor),
        HookChain::new(),
        Arc::new(MessageBus::new(16)),
        MetricsStore::new(),
        Some(Arc::clone(&dlq) as Arc<dyn DeadLetterHandler>),
    );

    service.ingest(Message::new("m1", "doomed", "x", 0)).await;

    clock.advance(2_000);
    tokio::time::advance(Duration::from_millis(2_100)).await;
    tokio::task::yield_now().await;
    // Two attempts total (initial + one retry), 10ms apart.
    tokio::time::advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;

    assert_eq!(dlq.batches.lock().len(), 1);
    assert!(store.has_processed("doomed", "m1").await);
}
