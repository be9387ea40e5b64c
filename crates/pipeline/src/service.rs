use crate::buffer::{Batch, EnqueueResult, UserBuffer};
use crate::clock::Clock;
use crate::error::{IngestOutcome, ProcessError};
use crate::hooks::{HookChain, HookContext, HookSignal};
use crate::limiter::{HybridLimiter, SlidingWindow, TokenBucket};
use crate::message::Message;
use crate::processor::Processor;
use crate::store::MessageStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wabridge_core::bus::{Event, MessageBus};
use wabridge_core::config::BatchingConfig;
use wabridge_core::metrics::MetricsStore;

use crate::scheduler::Scheduler;

/// Sink for batches that exhaust retries without recovering. Errors from
/// the handler itself are logged and swallowed — a failing DLQ must never
/// resurrect the retry loop.
#[async_trait]
pub trait DeadLetterHandler: Send + Sync {
    async fn handle(&self, user_id: &str, batch: &[Message]);
}

/// Batching/rate-limit configuration plus the idle-eviction knobs left as
/// an explicit operational choice. `batching` is kept as
/// `wabridge_core::config::BatchingConfig` so the one validated,
/// deserialisable struct loaded by `AppConfig::load` is also the thing the
/// service runs on — no second copy to keep in sync.
#[derive(Debug, Clone)]
pub struct BatchingServiceConfig {
    pub batching: BatchingConfig,
    /// A buffer with an empty queue idle longer than this is evicted.
    pub buffer_idle_ttl_ms: i64,
    /// Limiters (and their per-user serialisation lock) survive longer,
    /// to preserve dedup/rate-limit semantics across brief reconnects.
    pub limiter_idle_ttl_ms: i64,
    pub sweep_interval_ms: i64,
}

impl BatchingServiceConfig {
    pub fn new(batching: BatchingConfig) -> Self {
        Self {
            batching,
            buffer_idle_ttl_ms: 5 * 60_000,
            limiter_idle_ttl_ms: 60 * 60_000,
            sweep_interval_ms: 60_000,
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Orchestrator owning the per-user buffers, limiters, and serialisation
/// locks, exposing `ingest` as the sole entry point, and driving the
/// hook → process → retry/DLQ pipeline once a `Scheduler` callback (or a
/// forced flush) drains a buffer.
pub struct BatchingService {
    config: BatchingServiceConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn MessageStore>,
    processor: Arc<dyn Processor>,
    hooks: HookChain,
    scheduler: Scheduler,
    bus: Arc<MessageBus>,
    metrics: Arc<MetricsStore>,
    dead_letter: Option<Arc<dyn DeadLetterHandler>>,

    buffers: Mutex<HashMap<String, Arc<UserBuffer>>>,
    limiters: Mutex<HashMap<String, Arc<HybridLimiter>>>,
    limiter_last_seen: Mutex<HashMap<String, i64>>,
    batch_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,

    shutting_down: AtomicBool,
    in_flight: AtomicUsize,
}

impl BatchingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BatchingServiceConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn MessageStore>,
        processor: Arc<dyn Processor>,
        hooks: HookChain,
        bus: Arc<MessageBus>,
        metrics: Arc<MetricsStore>,
        dead_letter: Option<Arc<dyn DeadLetterHandler>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            clock,
            store,
            processor,
            hooks,
            scheduler: Scheduler::new(),
            bus,
            metrics,
            dead_letter,
            buffers: Mutex::new(HashMap::new()),
            limiters: Mutex::new(HashMap::new()),
            limiter_last_seen: Mutex::new(HashMap::new()),
            batch_locks: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Short, non-blocking entry point (`BLOCK_UNTIL_SPACE` excepted).
    /// Performs dedup check, limiter acquire, enqueue/backpressure, and
    /// timer arming, then returns.
    pub async fn ingest(self: &Arc<Self>, message: Message) -> IngestOutcome {
        if self.shutting_down.load(Ordering::SeqCst) {
            return IngestOutcome::ShuttingDown;
        }

        if self.store.has_processed(&message.user_id, &message.message_id).await {
            self.metrics.inc_ingest_deduped();
            wabridge_core::audit::log_audit_internal(
                "dedup_hit",
                &message.user_id,
                serde_json::json!({ "message_id": message.message_id }),
            );
            return IngestOutcome::DuplicateIgnored;
        }

        let now = self.clock.now_ms();
        let limiter = self.limiter_for(&message.user_id, now);
        if !limiter.try_acquire(now) {
            self.metrics.inc_ingest_rate_limited();
            return IngestOutcome::RateLimited;
        }

        let user_id = message.user_id.clone();
        let buffer = self.buffer_for(&user_id);

        match self.enqueue_with_backpressure(&user_id, &buffer, message).await {
            EnqueueResult::Accepted { started_cycle, .. } => {
                self.on_enqueued(&user_id, started_cycle);
                self.metrics.inc_ingest_accepted();
                self.refresh_gauges();
                IngestOutcome::Accepted
            }
            EnqueueResult::Duplicate => {
                // Already pending in this cycle's buffer — not yet in the
                // `MessageStore` processed set (the batch hasn't been
                // dispatched yet), but still a replay that must stay
                // invisible to the Processor.
                self.metrics.inc_ingest_deduped();
                IngestOutcome::DuplicateIgnored
            }
            EnqueueResult::AtCapacity => {
                self.metrics.inc_ingest_backpressured();
                wabridge_core::audit::log_audit_internal(
                    "backpressure_rejected",
                    &user_id,
                    serde_json::json!({ "strategy": format!("{:?}", self.config.batching.backpressure) }),
                );
                IngestOutcome::Backpressured
            }
        }
    }

    async fn enqueue_with_backpressure(
        self: &Arc<Self>,
        user_id: &str,
        buffer: &Arc<UserBuffer>,
        message: Message,
    ) -> EnqueueResult {
        use wabridge_core::config::BackpressureStrategy::*;

        match buffer.enqueue(message.clone()) {
            accepted @ EnqueueResult::Accepted { .. } => return accepted,
            EnqueueResult::Duplicate => return EnqueueResult::Duplicate,
            EnqueueResult::AtCapacity => {}
        }

        match self.config.batching.backpressure {
            DropNew => EnqueueResult::AtCapacity,
            DropOldest => match buffer.enqueue_evicting_oldest(message) {
                accepted @ EnqueueResult::Accepted { .. } => {
                    tracing::debug!(user_id, "dropped oldest buffered message under backpressure");
                    accepted
                }
                other => other,
            },
            FlushAndAccept => {
                self.force_drain(user_id, buffer);
                buffer.enqueue(message)
            }
            RejectWithNotify => {
                let msg = self
                    .config
                    .batching
                    .errors
                    .user_notification_message
                    .clone()
                    .unwrap_or_else(|| "You're sending messages too quickly, please slow down.".to_string());
                self.processor.notify_user(user_id, &msg).await;
                EnqueueResult::AtCapacity
            }
            BlockUntilSpace => {
                let deadline = tokio::time::Instant::now() + self.config.batching.adaptive_timeout();
                loop {
                    match buffer.enqueue(message.clone()) {
                        accepted @ EnqueueResult::Accepted { .. } => break accepted,
                        EnqueueResult::Duplicate => break EnqueueResult::Duplicate,
                        EnqueueResult::AtCapacity => {}
                    }
                    if tokio::time::Instant::now() >= deadline {
                        break EnqueueResult::AtCapacity;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
        }
    }

    /// Forces an immediate Draining transition (`FLUSH_AND_ACCEPT`):
    /// snapshots and clears the buffer, cancels its timers, and dispatches
    /// the forced batch if non-empty.
    fn force_drain(self: &Arc<Self>, user_id: &str, buffer: &Arc<UserBuffer>) {
        self.scheduler.cancel_all(user_id);
        let batch = buffer.drain();
        self.spawn_dispatch(user_id, batch);
    }

    fn on_enqueued(self: &Arc<Self>, user_id: &str, started_cycle: bool) {
        let silence = self.config.batching.silence_threshold();
        let timeout = self.config.batching.adaptive_timeout();

        if started_cycle {
            let svc = Arc::clone(self);
            let uid = user_id.to_string();
            self.scheduler.arm_timeout(user_id, timeout, move || async move {
                svc.on_timeout_fire(&uid).await;
            });
        }

        self.arm_silence(user_id, silence);
    }

    fn arm_silence(self: &Arc<Self>, user_id: &str, delay: Duration) {
        let svc = Arc::clone(self);
        let uid = user_id.to_string();
        self.scheduler.arm_silence(user_id, delay, move || async move {
            svc.on_silence_fire(&uid).await;
        });
    }

    /// On fire, re-checks `lastMessageAt`: a message may have arrived in the
    /// race between the timer elapsing and this callback running. If the
    /// silence window hasn't actually elapsed, rearm for the remainder
    /// instead of draining.
    async fn on_silence_fire(self: Arc<Self>, user_id: &str) {
        let Some(buffer) = self.get_buffer(user_id) else { return };
        if buffer.is_empty() {
            return;
        }

        let now = self.clock.now_ms();
        let last = buffer.last_message_at();
        let threshold = self.config.batching.silence_threshold_ms as i64;
        let elapsed = now - last;

        if elapsed < threshold {
            self.arm_silence(user_id, Duration::from_millis((threshold - elapsed) as u64));
            return;
        }

        self.drain_and_dispatch(user_id, &buffer);
    }

    /// Fires unconditionally once the absolute deadline from the first
    /// message of the cycle is reached; drains if the buffer still has
    /// anything pending.
    async fn on_timeout_fire(self: Arc<Self>, user_id: &str) {
        let Some(buffer) = self.get_buffer(user_id) else { return };
        if buffer.is_empty() {
            return;
        }
        self.drain_and_dispatch(user_id, &buffer);
    }

    fn drain_and_dispatch(self: &Arc<Self>, user_id: &str, buffer: &Arc<UserBuffer>) {
        self.scheduler.cancel_all(user_id);
        let batch = buffer.drain();
        self.refresh_gauges();
        self.spawn_dispatch(user_id, batch);
    }

    /// An empty batch means another path (e.g. a concurrent
    /// `FLUSH_AND_ACCEPT`) already drained this cycle; treated as a no-op,
    /// never as an empty Processor invocation — `batch` is always
    /// non-empty by the time `Processor::process` runs.
    fn spawn_dispatch(self: &Arc<Self>, user_id: &str, batch: Batch) {
        if batch.messages.is_empty() {
            return;
        }
        let svc = Arc::clone(self);
        let uid = user_id.to_string();
        tokio::spawn(async move {
            svc.run_batch(uid, batch.messages).await;
        });
    }

    /// Runs the hook → process → retry/DLQ pipeline for one batch. Holds a
    /// per-user async mutex for its entire duration, which is what
    /// guarantees at most one in-flight invocation per userID and that a
    /// new batch's dispatch waits for the previous batch's final hook.
    async fn run_batch(self: Arc<Self>, user_id: String, messages: Vec<Message>) {
        let batch_lock = self.lock_for(&user_id);
        let _guard = batch_lock.lock().await;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _in_flight_guard = InFlightGuard(&self.in_flight);

        let batch_started_at = self.clock.now_ms();
        let batch: Arc<Vec<Message>> = Arc::new(messages);
        let mut ctx = HookContext::new(user_id.clone(), Arc::clone(&batch), batch_started_at);

        let mut attempt: u32 = 1;
        loop {
            self.publish_span(&user_id, batch.len(), attempt, "started");

            if attempt > 1 {
                ctx.mark_retry(attempt - 1);
            }

            match self.run_attempt(&ctx, &batch).await {
                Ok(()) => {
                    for m in batch.iter() {
                        self.store.mark_processed(&user_id, &m.message_id).await;
                    }
                    self.metrics.inc_batches_processed();
                    self.publish_span(&user_id, batch.len(), attempt, "success");
                    return;
                }
                Err(ProcessError::Abort { reason, code }) => {
                    tracing::info!(user_id = %user_id, reason = %reason, code = %code, "batch aborted by hook");
                    self.publish_span(&user_id, batch.len(), attempt, &format!("abort:{code}"));
                    return;
                }
                Err(err) => {
                    tracing::warn!(user_id = %user_id, attempt, error = %err, "batch processing failed");
                    let max_retries = self.config.batching.errors.max_retries;
                    if attempt < max_retries + 1 {
                        let delay = self.retry_delay(attempt);
                        self.metrics.inc_batch_retries();
                        self.publish_span(&user_id, batch.len(), attempt, "retry_scheduled");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    self.handle_exhaustion(&user_id, &batch).await;
                    self.publish_span(&user_id, batch.len(), attempt, "exhausted");
                    return;
                }
            }
        }
    }

    async fn run_attempt(&self, ctx: &HookContext, batch: &Arc<Vec<Message>>) -> Result<(), ProcessError> {
        if let Err(signal) = self.hooks.run_pre(ctx).await {
            return Err(signal_to_process_error(signal));
        }
        self.processor.process(&ctx.user_id, batch).await?;
        if let Err(signal) = self.hooks.run_post(ctx).await {
            return Err(signal_to_process_error(signal));
        }
        Ok(())
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let errors = &self.config.batching.errors;
        if errors.exponential_backoff {
            let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
            Duration::from_millis(errors.retry_delay_ms.saturating_mul(factor))
        } else {
            errors.retry_delay()
        }
    }

    /// On exhaustion, DLQ presence is the only thing that changes dedup
    /// semantics: with a handler configured, the batch is marked processed
    /// (the DLQ now owns it); without one, it is left unmarked so a
    /// replayed webhook remains a path to recovery.
    async fn handle_exhaustion(&self, user_id: &str, batch: &Arc<Vec<Message>>) {
        let errors = &self.config.batching.errors;

        if let Some(handler) = &self.dead_letter {
            handler.handle(user_id, batch).await;
            for m in batch.iter() {
                self.store.mark_processed(user_id, &m.message_id).await;
            }
            self.metrics.inc_batches_dead_lettered();
        }

        if errors.notify_user_on_failure {
            let message = errors
                .user_notification_message
                .clone()
                .unwrap_or_else(|| "We're having trouble processing your message right now.".to_string());
            self.processor.notify_user(user_id, &message).await;
        }
    }

    fn publish_span(&self, user_id: &str, batch_size: usize, attempt: u32, outcome: &str) {
        let _ = self.bus.publish(Event::BatchSpan {
            user_id: user_id.to_string(),
            batch_size,
            attempt,
            outcome: outcome.to_string(),
        });
    }

    fn buffer_for(&self, user_id: &str) -> Arc<UserBuffer> {
        let mut buffers = self.buffers.lock();
        Arc::clone(
            buffers
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(UserBuffer::new(self.config.batching.max_buffer_size))),
        )
    }

    fn get_buffer(&self, user_id: &str) -> Option<Arc<UserBuffer>> {
        self.buffers.lock().get(user_id).cloned()
    }

    fn limiter_for(&self, user_id: &str, now_ms: i64) -> Arc<HybridLimiter> {
        self.limiter_last_seen.lock().insert(user_id.to_string(), now_ms);
        let mut limiters = self.limiters.lock();
        Arc::clone(limiters.entry(user_id.to_string()).or_insert_with(|| {
            let rl = &self.config.batching.rate_limit;
            Arc::new(HybridLimiter::new(
                TokenBucket::new(rl.tokens_per_minute, rl.bucket_capacity, now_ms),
                SlidingWindow::new(rl.sliding_window_ms as i64, rl.max_messages_in_window as usize),
            ))
        }))
    }

    fn lock_for(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.batch_locks.lock();
        Arc::clone(locks.entry(user_id.to_string()).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))))
    }

    fn refresh_gauges(&self) {
        let pending: usize = {
            let buffers = self.buffers.lock();
            self.metrics.set_active_users(buffers.len() as i64);
            buffers.values().map(|b| b.size()).sum()
        };
        self.metrics.set_pending_messages(pending as i64);
    }

    /// Spawns the idle-eviction sweep: buffers with an empty queue that have
    /// been idle longer than `buffer_idle_ttl_ms` are dropped; limiters (and
    /// the per-user serialisation lock) survive for the longer
    /// `limiter_idle_ttl_ms`, so dedup/rate-limit semantics aren't lost
    /// across a brief reconnect.
    pub fn spawn_idle_sweep(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let svc = Arc::clone(self);
        let interval = Duration::from_millis(svc.config.sweep_interval_ms.max(1_000) as u64);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                svc.sweep_idle_buffers();
                svc.sweep_idle_limiters();
            }
        })
    }

    fn sweep_idle_buffers(&self) {
        let now = self.clock.now_ms();
        let ttl = self.config.buffer_idle_ttl_ms;
        let scheduler = &self.scheduler;
        {
            let mut buffers = self.buffers.lock();
            buffers.retain(|user_id, buffer| {
                let idle = buffer.is_empty() && now - buffer.last_message_at() > ttl;
                if idle {
                    tracing::debug!(user_id, "evicting idle user buffer");
                    scheduler.cancel_all(user_id);
                }
                !idle
            });
        }
        self.refresh_gauges();
    }

    fn sweep_idle_limiters(&self) {
        let now = self.clock.now_ms();
        let ttl = self.config.limiter_idle_ttl_ms;
        let mut seen = self.limiter_last_seen.lock();
        let mut limiters = self.limiters.lock();
        let mut locks = self.batch_locks.lock();
        seen.retain(|user_id, last_seen| {
            let alive = now - *last_seen <= ttl;
            if !alive {
                limiters.remove(user_id);
                locks.remove(user_id);
            }
            alive
        });
    }

    /// Cancels every outstanding timer and rejects new ingests, then waits
    /// up to `grace` for in-flight batches to finish. Messages left in
    /// un-drained buffers are lost unless the configured `MessageStore` is
    /// durable.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.scheduler.shutdown();

        let deadline = tokio::time::Instant::now() + grace;
        while self.in_flight.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

fn signal_to_process_error(signal: HookSignal) -> ProcessError {
    match signal {
        HookSignal::Abort { reason, code } => ProcessError::Abort { reason, code },
        HookSignal::Error(e) => ProcessError::Transient(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::store::InMemoryMessageStore;
    use std::sync::atomic::AtomicU32;
    use wabridge_core::config::{BackpressureStrategy, ErrorPolicyConfig, RateLimitConfig};

    fn test_batching(overrides: impl FnOnce(&mut BatchingConfig)) -> BatchingConfig {
        let mut cfg = BatchingConfig {
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
                max_retries: 3,
                retry_delay_ms: 100,
                exponential_backoff: true,
                notify_user_on_failure: false,
                user_notification_message: None,
                dead_letter_handler: None,
            },
            max_processed_ids: 5_000,
        };
        overrides(&mut cfg);
        cfg
    }

    struct RecordingProcessor {
        batches: Mutex<Vec<Vec<Message>>>,
        fail_times: AtomicU32,
    }

    impl RecordingProcessor {
        fn new(fail_times: u32) -> Self {
            Self { batches: Mutex::new(Vec::new()), fail_times: AtomicU32::new(fail_times) }
        }
    }

    #[async_trait]
    impl Processor for RecordingProcessor {
        async fn process(&self, _user_id: &str, batch: &[Message]) -> Result<(), ProcessError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(ProcessError::Transient(anyhow::anyhow!("boom")));
            }
            self.batches.lock().push(batch.to_vec());
            Ok(())
        }
    }

    fn make_service(
        batching: BatchingConfig,
        clock: Arc<TestClock>,
        processor: Arc<RecordingProcessor>,
    ) -> Arc<BatchingService> {
        BatchingService::new(
            BatchingServiceConfig::new(batching),
            clock,
            Arc::new(InMemoryMessageStore::new(5_000)),
            processor,
            HookChain::new(),
            Arc::new(MessageBus::new(16)),
            MetricsStore::new(),
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn single_message_drains_after_silence_threshold() {
        let clock = Arc::new(TestClock::new(0));
        let processor = Arc::new(RecordingProcessor::new(0));
        let batching = test_batching(|_| {});
        let service = make_service(batching, Arc::clone(&clock), Arc::clone(&processor));

        let outcome = service.ingest(Message::new("m1", "userA", "hi", 0)).await;
        assert_eq!(outcome, IngestOutcome::Accepted);

        clock.advance(2_000);
        tokio::time::advance(Duration::from_millis(2_050)).await;
        tokio::task::yield_now().await;

        let batches = processor.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].message_id, "m1");
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_messages_rearm_silence_and_drain_once() {
        let clock = Arc::new(TestClock::new(0));
        let processor = Arc::new(RecordingProcessor::new(0));
        let batching = test_batching(|_| {});
        let service = make_service(batching, Arc::clone(&clock), Arc::clone(&processor));

        service.ingest(Message::new("m1", "userA", "a", 0)).await;
        clock.advance(500);
        tokio::time::advance(Duration::from_millis(500)).await;
        service.ingest(Message::new("m2", "userA", "b", 500)).await;
        clock.advance(500);
        tokio::time::advance(Duration::from_millis(500)).await;
        service.ingest(Message::new("m3", "userA", "c", 1_000)).await;

        clock.advance(2_000);
        tokio::time::advance(Duration::from_millis(2_100)).await;
        tokio::task::yield_now().await;

        let batches = processor.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[0][0].message_id, "m1");
        assert_eq!(batches[0][2].message_id, "m3");
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_webhook_is_ingested_once() {
        let clock = Arc::new(TestClock::new(0));
        let processor = Arc::new(RecordingProcessor::new(0));
        let batching = test_batching(|_| {});
        let service = make_service(batching, Arc::clone(&clock), Arc::clone(&processor));

        let first = service.ingest(Message::new("m1", "userA", "x", 0)).await;
        let replay = service.ingest(Message::new("m1", "userA", "x", 100)).await;
        assert_eq!(first, IngestOutcome::Accepted);
        assert_eq!(replay, IngestOutcome::DuplicateIgnored);

        clock.advance(2_000);
        tokio::time::advance(Duration::from_millis(2_050)).await;
        tokio::task::yield_now().await;

        let batches = processor.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_then_succeed() {
        let clock = Arc::new(TestClock::new(0));
        let processor = Arc::new(RecordingProcessor::new(2));
        let batching = test_batching(|b| {
            b.errors.max_retries = 3;
            b.errors.retry_delay_ms = 100;
            b.errors.exponential_backoff = true;
        });
        let service = make_service(batching, Arc::clone(&clock), Arc::clone(&processor));

        service.ingest(Message::new("m1", "userA", "x", 0)).await;
        service.ingest(Message::new("m2", "userA", "y", 0)).await;

        clock.advance(2_000);
        tokio::time::advance(Duration::from_millis(2_050)).await;
        tokio::task::yield_now().await;
        // First attempt fails, retry after 100ms, second attempt fails,
        // retry after 200ms, third attempt succeeds.
        tokio::time::advance(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;

        let batches = processor.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(processor.fail_times.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_new_backpressure_rejects_when_full() {
        let clock = Arc::new(TestClock::new(0));
        let processor = Arc::new(RecordingProcessor::new(0));
        let batching = test_batching(|b| b.max_buffer_size = 1);
        let service = make_service(batching, Arc::clone(&clock), Arc::clone(&processor));

        let first = service.ingest(Message::new("m1", "userA", "x", 0)).await;
        let second = service.ingest(Message::new("m2", "userA", "y", 0)).await;
        assert_eq!(first, IngestOutcome::Accepted);
        assert_eq!(second, IngestOutcome::Backpressured);
    }
}
