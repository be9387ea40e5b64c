use crate::clock::Clock;
use crate::error::IngestOutcome;
use crate::message::Message;
use crate::service::BatchingService;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use wabridge_core::bus::{Event, MessageBus};

/// A webhook event already reduced to the shape the core cares about.
/// Translating provider-specific JSON (WhatsApp's
/// `IncomingMessageEvent`/`MessageStatusEvent`) into this shape is
/// `wabridge-whatsapp`'s job, deliberately left out of the core: webhook
/// signature validation and provider-specific JSON parsing belong to the
/// WebhookDispatcher's collaborator, not to the batching pipeline itself.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// A delivery-status update; forwarded to observability without
    /// touching the batching pipeline.
    Status { message_id: String, recipient_id: String, status: String, timestamp: i64 },
    /// An inbound message already reduced to text (non-text payloads are
    /// transcribed or described upstream).
    Message { user_id: String, message_id: String, text: String, received_at: i64 },
}

/// Translates a typed webhook event into a `BatchingService::ingest` call.
/// Applies a coarse per-user flood guard before ingest so a user hammering
/// the webhook doesn't even reach the dedup/limiter stage.
pub struct WebhookDispatcher {
    service: Arc<BatchingService>,
    bus: Arc<MessageBus>,
    clock: Arc<dyn Clock>,
    flood_guard_ms: i64,
    last_dispatch: Mutex<HashMap<String, i64>>,
}

impl WebhookDispatcher {
    pub fn new(service: Arc<BatchingService>, bus: Arc<MessageBus>, clock: Arc<dyn Clock>, flood_guard_ms: i64) -> Self {
        Self { service, bus, clock, flood_guard_ms, last_dispatch: Mutex::new(HashMap::new()) }
    }

    /// Returns `None` for status events and flood-guarded messages (neither
    /// reaches `ingest`), `Some(outcome)` otherwise.
    pub async fn dispatch(&self, event: InboundEvent) -> Option<IngestOutcome> {
        match event {
            InboundEvent::Status { message_id, recipient_id, status, timestamp } => {
                let _ = self.bus.publish(Event::SystemLog {
                    level: "info".to_string(),
                    message: format!("delivery status {status} for message {message_id} to {recipient_id} at {timestamp}"),
                });
                None
            }
            InboundEvent::Message { user_id, message_id, text, received_at } => {
                if self.flood_guarded(&user_id) {
                    tracing::debug!(user_id = %user_id, "coarse flood guard short-circuited dispatch");
                    return None;
                }
                let now = self.clock.now_ms();
                tracing::trace!(
                    user_id = %user_id,
                    webhook_lag_ms = now - received_at,
                    "dispatching webhook delivery"
                );
                // Stamped from our own clock rather than the webhook's
                // `timestamp` (whole seconds, and lagging local time by
                // network delivery): `UserBuffer`'s silence timer compares
                // `received_at` against the same `Clock`, and mixing a
                // second-granular upstream timestamp with `clock.now_ms()`
                // can make a just-armed buffer look already past
                // `silenceThreshold`.
                let message = Message::new(message_id, user_id, text, now);
                Some(self.service.ingest(message).await)
            }
        }
    }

    fn flood_guarded(&self, user_id: &str) -> bool {
        let now = self.clock.now_ms();
        let mut last = self.last_dispatch.lock();
        if let Some(&prev) = last.get(user_id) {
            if now - prev < self.flood_guard_ms {
                return true;
            }
        }
        last.insert(user_id.to_string(), now);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::hooks::HookChain;
    use crate::processor::Processor;
    use crate::service::BatchingServiceConfig;
    use crate::store::InMemoryMessageStore;
    use async_trait::async_trait;
    use wabridge_core::config::{BackpressureStrategy, BatchingConfig, ErrorPolicyConfig, RateLimitConfig};
    use wabridge_core::metrics::MetricsStore;

    struct NoopProcessor;

    #[async_trait]
    impl Processor for NoopProcessor {
        async fn process(&self, _user_id: &str, _batch: &[Message]) -> Result<(), crate::error::ProcessError> {
            Ok(())
        }
    }

    fn batching() -> BatchingConfig {
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

    #[tokio::test(start_paused = true)]
    async fn status_events_never_reach_ingest() {
        let clock = Arc::new(TestClock::new(0));
        let bus = Arc::new(MessageBus::new(16));
        let mut rx = bus.subscribe();
        let service = BatchingService::new(
            BatchingServiceConfig::new(batching()),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::new(InMemoryMessageStore::new(5_000)),
            Arc::new(NoopProcessor),
            HookChain::new(),
            Arc::clone(&bus),
            MetricsStore::new(),
            None,
        );
        let dispatcher = WebhookDispatcher::new(service, bus, clock, 500);

        let outcome = dispatcher
            .dispatch(InboundEvent::Status {
                message_id: "wamid.1".into(),
                recipient_id: "+15550000000".into(),
                status: "delivered".into(),
                timestamp: 0,
            })
            .await;

        assert!(outcome.is_none());
        assert!(matches!(rx.try_recv(), Ok(Event::SystemLog { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn flood_guard_short_circuits_rapid_dispatches() {
        let clock = Arc::new(TestClock::new(0));
        let bus = Arc::new(MessageBus::new(16));
        let service = BatchingService::new(
            BatchingServiceConfig::new(batching()),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::new(InMemoryMessageStore::new(5_000)),
            Arc::new(NoopProcessor),
            HookChain::new(),
            Arc::clone(&bus),
            MetricsStore::new(),
            None,
        );
        let dispatcher = WebhookDispatcher::new(service, bus, Arc::clone(&clock) as Arc<dyn Clock>, 500);

        let first = dispatcher
            .dispatch(InboundEvent::Message { user_id: "u1".into(), message_id: "m1".into(), text: "hi".into(), received_at: 0 })
            .await;
        let second = dispatcher
            .dispatch(InboundEvent::Message { user_id: "u1".into(), message_id: "m2".into(), text: "yo".into(), received_at: 100 })
            .await;

        assert!(first.is_some());
        assert!(second.is_none());

        clock.advance(600);
        let third = dispatcher
            .dispatch(InboundEvent::Message { user_id: "u1".into(), message_id: "m3".into(), text: "still here".into(), received_at: 600 })
            .await;
        assert!(third.is_some());
    }
}
