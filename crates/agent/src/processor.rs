use crate::context::ContextBuilder;
use rand::Rng;
use std::sync::Arc;
use wabridge_core::bus::{Event, MessageBus};
use wabridge_core::config::AppConfig;
use wabridge_core::types::{ChatMessage, Role};
use wabridge_persistence::SqliteSessionStore;
use wabridge_pipeline::error::ProcessError;
use wabridge_pipeline::message::Message;
use wabridge_pipeline::processor::Processor;
use wabridge_providers::{GenerationOptions, LLMProvider};
use wabridge_voice::{should_speak, TtsProvider};
use wabridge_whatsapp::outbound::{MediaKind, OutboundMessage, WhatsAppClient};
use async_trait::async_trait;
use tracing::{error, info, warn};

/// History length at which a session gets auto-summarized and trimmed back
/// down to `HISTORY_KEEP_AFTER_SUMMARIZE` messages, so a long-running
/// WhatsApp thread doesn't grow the per-batch context (and the LLM token
/// bill) without bound.
const HISTORY_SUMMARIZE_THRESHOLD: i64 = 30;
const HISTORY_KEEP_AFTER_SUMMARIZE: i64 = 10;

/// The `Processor` the core batching pipeline invokes for every drained
/// batch: joins the batch into one prompt, calls
/// the configured LLM provider with the user's conversation history,
/// persists both sides of the exchange, and delivers the reply — as text
/// on the bus, or as synthesised speech uploaded directly to WhatsApp when
/// the `speechPlayChance` roll says so.
pub struct AgentProcessor {
    bus: Arc<MessageBus>,
    provider: Arc<dyn LLMProvider>,
    model: GenerationOptions,
    context_builder: ContextBuilder,
    store: SqliteSessionStore,
    whatsapp: Arc<WhatsAppClient>,
    tts: Option<Arc<dyn TtsProvider>>,
    speech_play_chance: f64,
}

impl AgentProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LLMProvider>,
        model: GenerationOptions,
        context_builder: ContextBuilder,
        store: SqliteSessionStore,
        whatsapp: Arc<WhatsAppClient>,
        tts: Option<Arc<dyn TtsProvider>>,
        config: &AppConfig,
    ) -> Self {
        Self {
            bus,
            provider,
            model,
            context_builder,
            store,
            whatsapp,
            tts,
            speech_play_chance: config.voice.speech_play_chance,
        }
    }

    fn session_key(user_id: &str) -> String {
        format!("whatsapp:{user_id}")
    }

    fn join_batch(batch: &[Message]) -> String {
        batch
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn deliver_text(&self, user_id: &str, text: &str) {
        let reply = ChatMessage::new("whatsapp", &Self::session_key(user_id), Role::Assistant, text);
        if let Err(e) = self.bus.publish(Event::OutboundMessage(reply)) {
            error!(user_id, error = %e, "failed to publish outbound reply to bus");
        }
    }

    /// Synthesises `text` to speech and uploads it directly to WhatsApp as a
    /// voice note, bypassing the bus (the bus's `Event::OutboundMessage`
    /// only carries text; a media reply needs the client directly).
    async fn deliver_voice(&self, user_id: &str, text: &str, tts: &Arc<dyn TtsProvider>) -> Result<(), ProcessError> {
        let speech = tts
            .synthesize(text)
            .await
            .map_err(|e| ProcessError::Transient(e.into()))?;

        let media_id = self
            .whatsapp
            .upload_media(speech.audio, &speech.mime_type)
            .await
            .map_err(|e| ProcessError::Transient(e.into()))?;

        let outbound = OutboundMessage::media_by_id(MediaKind::Audio, media_id, None)
            .map_err(|e| ProcessError::Fatal(e.into()))?;

        let recipient = wabridge_pipeline::message::Recipient::phone(user_id)
            .map_err(|e| ProcessError::Fatal(anyhow::anyhow!("invalid WhatsApp recipient {user_id}: {e}")))?;

        self.whatsapp
            .send(&recipient, &outbound)
            .await
            .map_err(|e| ProcessError::Transient(e.into()))?;

        Ok(())
    }

    /// Summarizes `session_key`'s history once it crosses
    /// `HISTORY_SUMMARIZE_THRESHOLD` and trims the stored rows back down to
    /// `HISTORY_KEEP_AFTER_SUMMARIZE`. Best-effort: a failure here doesn't
    /// fail the batch that's already been replied to, it just means the
    /// session stays untrimmed until the next batch tries again.
    async fn maybe_summarize_and_trim(&self, session_key: &str) {
        let history = match self.store.get_history(session_key, HISTORY_SUMMARIZE_THRESHOLD + 1).await {
            Ok(h) => h,
            Err(e) => {
                warn!(session = session_key, error = %e, "failed to load history for auto-summarize check");
                return;
            }
        };
        if (history.len() as i64) < HISTORY_SUMMARIZE_THRESHOLD {
            return;
        }

        info!(session = session_key, "auto-summarizing session history");
        let transcript = history
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = vec![
            ChatMessage::new("whatsapp", session_key, Role::System, "Summarize the following WhatsApp conversation concisely, in a short paragraph."),
            ChatMessage::new("whatsapp", session_key, Role::User, &transcript),
        ];
        let options = GenerationOptions {
            model: self.model.model.clone(),
            max_tokens: Some(500),
            temperature: Some(0.3),
        };

        let summary = match self.provider.chat(&messages, &[], &options).await {
            Ok(resp) => resp.content,
            Err(e) => {
                warn!(session = session_key, error = %e, "auto-summarize LLM call failed");
                return;
            }
        };
        if let Err(e) = self.store.set_summary(session_key, summary).await {
            warn!(session = session_key, error = %e, "failed to persist auto-summary");
            return;
        }
        if let Err(e) = self.store.trim_history(session_key, HISTORY_KEEP_AFTER_SUMMARIZE).await {
            warn!(session = session_key, error = %e, "failed to trim history after auto-summarize");
        }
    }
}

#[async_trait]
impl Processor for AgentProcessor {
    async fn process(&self, user_id: &str, batch: &[Message]) -> Result<(), ProcessError> {
        let session_key = Self::session_key(user_id);
        let batch_text = Self::join_batch(batch);

        let history = self
            .store
            .get_history(&session_key, 200)
            .await
            .map_err(ProcessError::Transient)?;
        let summary = self
            .store
            .get_summary(&session_key)
            .await
            .map_err(ProcessError::Transient)?;

        let messages = self.context_builder.build(&history, summary.as_deref(), &batch_text);

        let response = self
            .provider
            .chat(&messages, &[], &self.model)
            .await
            .map_err(|e| ProcessError::Transient(e.into()))?;

        let inbound = ChatMessage::new("whatsapp", &session_key, Role::User, &batch_text).with_sender(user_id);
        self.store.add_message(&inbound).await.map_err(ProcessError::Transient)?;
        let outbound = ChatMessage::new("whatsapp", &session_key, Role::Assistant, &response.content);
        self.store.add_message(&outbound).await.map_err(ProcessError::Transient)?;

        self.maybe_summarize_and_trim(&session_key).await;

        let roll: f64 = rand::rng().random();
        if let Some(tts) = self.tts.as_ref().filter(|_| should_speak(self.speech_play_chance, roll)) {
            if let Err(e) = self.deliver_voice(user_id, &response.content, tts).await {
                warn!(user_id, "voice delivery failed, falling back to text");
                let _ = e;
                self.deliver_text(user_id, &response.content).await;
            }
        } else {
            self.deliver_text(user_id, &response.content).await;
        }

        Ok(())
    }

    async fn notify_user(&self, user_id: &str, message: &str) {
        self.deliver_text(user_id, message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_prefixes_whatsapp() {
        assert_eq!(AgentProcessor::session_key("15551234567"), "whatsapp:15551234567");
    }

    #[test]
    fn joins_batch_messages_with_newlines() {
        let batch = vec![
            Message::new("m1", "u1", "hello", 0),
            Message::new("m2", "u1", "there", 1),
        ];
        assert_eq!(AgentProcessor::join_batch(&batch), "hello\nthere");
    }
}
