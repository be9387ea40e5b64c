use async_trait::async_trait;
use wabridge_core::config::VoiceProviderConfig;

#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("tts provider returned an error response: {0}")]
    ProviderError(String),
    #[error("tts request failed: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// A synthesised reply: raw audio bytes plus the MIME type the WhatsApp
/// media-upload endpoint needs to tag them with.
#[derive(Debug, Clone)]
pub struct SynthesizedSpeech {
    pub audio: Vec<u8>,
    pub mime_type: String,
}

/// Converts agent reply text to speech. Voice replies are opaque to the
/// batching pipeline — it only decides *whether* to speak via
/// `speechPlayChance`; the trait exists so the HTTP provider can be swapped
/// or mocked in tests.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedSpeech, TtsError>;
}

/// Talks to a generic ElevenLabs-shaped text-to-speech HTTP API: POST text,
/// get audio bytes back. Good enough for any provider that exposes that
/// shape behind `api_base`.
pub struct HttpTtsProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    voice_id: String,
}

impl HttpTtsProvider {
    pub fn new(config: VoiceProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key,
            api_base: config
                .api_base
                .unwrap_or_else(|| "https://api.elevenlabs.io/v1".to_string()),
            voice_id: config.voice_id,
        }
    }
}

#[async_trait]
impl TtsProvider for HttpTtsProvider {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedSpeech, TtsError> {
        let url = format!("{}/text-to-speech/{}", self.api_base, self.voice_id);

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("accept", "audio/mpeg")
            .json(&serde_json::json!({
                "text": text,
                "model_id": "eleven_multilingual_v2",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::ProviderError(format!("{status}: {body}")));
        }

        let audio = response.bytes().await?.to_vec();
        Ok(SynthesizedSpeech { audio, mime_type: "audio/mpeg".to_string() })
    }
}

/// Rolls a `speechPlayChance` coin using the given random value in [0, 1)
/// (injected rather than sampled here, so callers can test both branches
/// deterministically).
pub fn should_speak(speech_play_chance: f64, roll: f64) -> bool {
    speech_play_chance > 0.0 && roll < speech_play_chance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_speaks_at_zero_chance() {
        assert!(!should_speak(0.0, 0.0));
    }

    #[test]
    fn always_speaks_at_full_chance() {
        assert!(should_speak(1.0, 0.999));
    }

    #[test]
    fn respects_the_roll_threshold() {
        assert!(should_speak(0.5, 0.2));
        assert!(!should_speak(0.5, 0.8));
    }
}
