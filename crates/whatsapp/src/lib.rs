pub mod outbound;
pub mod webhook;

use crate::outbound::{OutboundError, OutboundMessage, WhatsAppClient};
use async_trait::async_trait;
use wabridge_core::bus::{Event, MessageBus};
use wabridge_core::channel::ChannelAdapter;
use std::sync::Arc;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use wabridge_pipeline::message::Recipient;

/// Subscribes to the bus and delivers `Event::OutboundMessage` replies
/// addressed to a `whatsapp:` session key, bounding concurrent sends with a
/// semaphore and retrying transient delivery failures with jittered
/// exponential backoff.
#[derive(Clone)]
pub struct WhatsAppAdapter {
    bus: Arc<MessageBus>,
    client: Arc<WhatsAppClient>,
    default_to: Option<String>,
    max_inflight: usize,
    retry_jitter_ms: u64,
}

impl WhatsAppAdapter {
    pub fn new(
        bus: Arc<MessageBus>,
        token: String,
        api_base: Option<String>,
        phone_number_id: String,
        default_to: Option<String>,
        max_inflight: usize,
        retry_jitter_ms: u64,
    ) -> Self {
        Self {
            bus,
            client: Arc::new(WhatsAppClient::new(token, phone_number_id, api_base)),
            default_to,
            max_inflight: max_inflight.max(1),
            retry_jitter_ms,
        }
    }

    fn jitter_delay(&self, attempt: u32) -> StdDuration {
        if self.retry_jitter_ms == 0 {
            return StdDuration::from_millis(0);
        }
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let jitter = (seed ^ ((attempt as u64) << 7)) % (self.retry_jitter_ms + 1);
        StdDuration::from_millis(jitter)
    }

    async fn send_with_retry(&self, to: &str, message: &OutboundMessage) -> Result<(), OutboundError> {
        let recipient = Recipient::phone(to)
            .map_err(|e| OutboundError::Validation(format!("invalid recipient {to}: {e}")))?;

        let mut delay = Duration::from_secs(1);
        let mut last_err = None;
        for attempt in 1..=3u32 {
            match self.client.send(&recipient, message).await {
                Ok(message_id) => {
                    info!(to = %to, attempt, message_id = %message_id, "WhatsApp outbound sent");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "WhatsApp outbound attempt failed");
                    last_err = Some(e);
                }
            }
            sleep(delay + self.jitter_delay(attempt)).await;
            delay *= 2;
        }

        Err(last_err.unwrap_or(OutboundError::Api("exhausted retries".into())))
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppAdapter {
    fn channel_name(&self) -> &str {
        "whatsapp"
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("Starting WhatsApp adapter");

        let bus = self.bus.clone();
        let adapter = self.clone();
        let semaphore = Arc::new(Semaphore::new(self.max_inflight));

        tokio::spawn(async move {
            let mut rx = bus.subscribe();
            loop {
                match rx.recv().await {
                    Ok(Event::OutboundMessage(msg)) => {
                        if !msg.session_key.starts_with("whatsapp:") {
                            continue;
                        }

                        let target = msg
                            .session_key
                            .strip_prefix("whatsapp:")
                            .filter(|s| !s.is_empty())
                            .map(|s| s.to_string())
                            .or_else(|| adapter.default_to.clone());

                        let Some(to) = target else {
                            warn!("WhatsApp outbound dropped: no target recipient configured");
                            continue;
                        };

                        let text = match OutboundMessage::text(msg.content.clone()) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "WhatsApp outbound dropped: invalid reply text");
                                continue;
                            }
                        };

                        let permit = match semaphore.clone().acquire_owned().await {
                            Ok(p) => p,
                            Err(_) => continue,
                        };
                        let adapter_cloned = adapter.clone();

                        tokio::spawn(async move {
                            let _permit = permit;
                            if let Err(e) = adapter_cloned.send_with_retry(&to, &text).await {
                                error!(error = %e, "WhatsApp outbound failed permanently");
                            }
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "WhatsApp bus subscription error");
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(())
    }
}
