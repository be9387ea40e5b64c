use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration, loaded from a JSON file plus
/// `WABRIDGE_`-prefixed environment overrides.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub workspace: PathBuf,
    pub gateway: GatewayConfig,
    pub batching: BatchingConfig,
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    pub whatsapp: WhatsAppConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub auth_token: Option<String>,
}

/// WhatsApp Cloud API credentials and webhook settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WhatsAppConfig {
    pub token: String,
    pub phone_number_id: String,
    #[serde(default)]
    pub api_base: Option<String>,
    pub verify_token: String,
    pub app_secret: String,
    /// Recipient used when an outbound reply's session key carries no
    /// `whatsapp:<phone>` suffix (e.g. replies issued from a non-WhatsApp
    /// origin back onto the only configured channel).
    #[serde(default)]
    pub default_to: Option<String>,
}

/// Batching, rate-limiting and error-policy knobs, in their raw
/// (pre-validation) deserialisable form. `AppConfig::validate` performs
/// the construction-time checks these fields require.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BatchingConfig {
    pub adaptive_timeout_ms: u64,
    pub silence_threshold_ms: u64,
    pub max_buffer_size: usize,
    pub rate_limit: RateLimitConfig,
    pub backpressure: BackpressureStrategy,
    pub errors: ErrorPolicyConfig,
    #[serde(default = "default_max_processed_ids")]
    pub max_processed_ids: usize,
}

fn default_max_processed_ids() -> usize {
    5_000
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    pub tokens_per_minute: u32,
    pub bucket_capacity: u32,
    pub max_messages_in_window: u32,
    pub sliding_window_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackpressureStrategy {
    DropNew,
    DropOldest,
    FlushAndAccept,
    RejectWithNotify,
    BlockUntilSpace,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ErrorPolicyConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    #[serde(default = "default_true")]
    pub exponential_backoff: bool,
    #[serde(default)]
    pub notify_user_on_failure: bool,
    #[serde(default)]
    pub user_notification_message: Option<String>,
    #[serde(default)]
    pub dead_letter_handler: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvidersConfig {
    pub openai: Option<ProviderConfig>,
    pub openrouter: Option<ProviderConfig>,
    pub anthropic: Option<AnthropicConfig>,
    pub google: Option<GoogleConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_base: Option<String>,
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GoogleConfig {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct VoiceConfig {
    /// Probability in [0, 1] that a reply is synthesised to speech instead
    /// of sent as text.
    #[serde(default)]
    pub speech_play_chance: f64,
    pub provider: Option<VoiceProviderConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VoiceProviderConfig {
    pub api_key: String,
    pub api_base: Option<String>,
    pub voice_id: String,
}

impl AppConfig {
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = if let Some(path) = custom_path {
            path
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".wabridge/config.json")
        };

        let s = Config::builder()
            .add_source(File::from(config_path).required(true))
            .add_source(config::Environment::with_prefix("WABRIDGE").separator("__"))
            .build()?;

        let parsed: AppConfig = s.try_deserialize()?;
        parsed.validate().map_err(ConfigError::Message)?;
        Ok(parsed)
    }

    /// Construction-time validation: invalid configuration is a fatal error
    /// rather than something callers discover at runtime.
    fn validate(&self) -> Result<(), String> {
        let b = &self.batching;
        if b.adaptive_timeout_ms == 0 {
            return Err("batching.adaptive_timeout_ms must be > 0".into());
        }
        if b.silence_threshold_ms > b.adaptive_timeout_ms {
            return Err("batching.silence_threshold_ms must be <= adaptive_timeout_ms".into());
        }
        if b.max_buffer_size == 0 {
            return Err("batching.max_buffer_size must be > 0".into());
        }
        if b.rate_limit.tokens_per_minute == 0 {
            return Err("batching.rate_limit.tokens_per_minute must be > 0".into());
        }
        if b.rate_limit.bucket_capacity == 0 {
            return Err("batching.rate_limit.bucket_capacity must be > 0".into());
        }
        if b.rate_limit.max_messages_in_window == 0 {
            return Err("batching.rate_limit.max_messages_in_window must be > 0".into());
        }
        if b.rate_limit.sliding_window_ms == 0 {
            return Err("batching.rate_limit.sliding_window_ms must be > 0".into());
        }
        if b.max_processed_ids == 0 {
            return Err("batching.max_processed_ids must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.voice.speech_play_chance) {
            return Err("voice.speech_play_chance must be within [0, 1]".into());
        }
        if self.whatsapp.token.is_empty() {
            return Err("whatsapp.token must not be empty".into());
        }
        if self.whatsapp.phone_number_id.is_empty() {
            return Err("whatsapp.phone_number_id must not be empty".into());
        }
        if self.whatsapp.verify_token.is_empty() {
            return Err("whatsapp.verify_token must not be empty".into());
        }
        if self.whatsapp.app_secret.is_empty() {
            return Err("whatsapp.app_secret must not be empty".into());
        }
        Ok(())
    }
}

impl BatchingConfig {
    pub fn adaptive_timeout(&self) -> Duration {
        Duration::from_millis(self.adaptive_timeout_ms)
    }

    pub fn silence_threshold(&self) -> Duration {
        Duration::from_millis(self.silence_threshold_ms)
    }
}

impl RateLimitConfig {
    pub fn sliding_window(&self) -> Duration {
        Duration::from_millis(self.sliding_window_ms)
    }
}

impl ErrorPolicyConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_batching() -> BatchingConfig {
        BatchingConfig {
            adaptive_timeout_ms: 5_000,
            silence_threshold_ms: 2_000,
            max_buffer_size: 50,
            rate_limit: RateLimitConfig {
                tokens_per_minute: 20,
                bucket_capacity: 5,
                max_messages_in_window: 10,
                sliding_window_ms: 30_000,
            },
            backpressure: BackpressureStrategy::DropOldest,
            errors: ErrorPolicyConfig {
                max_retries: 3,
                retry_delay_ms: 500,
                exponential_backoff: true,
                notify_user_on_failure: false,
                user_notification_message: None,
                dead_letter_handler: None,
            },
            max_processed_ids: 5_000,
        }
    }

    fn valid_app(batching: BatchingConfig) -> AppConfig {
        AppConfig {
            workspace: PathBuf::from("."),
            gateway: GatewayConfig { port: 8080, auth_token: None },
            batching,
            providers: ProvidersConfig::default(),
            voice: VoiceConfig::default(),
            whatsapp: WhatsAppConfig {
                token: "test-token".into(),
                phone_number_id: "123456".into(),
                api_base: None,
                verify_token: "verify-me".into(),
                app_secret: "shh".into(),
                default_to: None,
            },
        }
    }

    #[test]
    fn rejects_missing_whatsapp_token() {
        let mut cfg = valid_app(valid_batching());
        cfg.whatsapp.token = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_silence_above_timeout() {
        let cfg = valid_app(BatchingConfig { silence_threshold_ms: 9_000, ..valid_batching() });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_zero_silence_threshold() {
        let cfg = valid_app(BatchingConfig { silence_threshold_ms: 0, ..valid_batching() });
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_empty_buffer() {
        let cfg = valid_app(BatchingConfig { max_buffer_size: 0, ..valid_batching() });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_speech_chance() {
        let mut cfg = valid_app(valid_batching());
        cfg.voice.speech_play_chance = 1.5;
        assert!(cfg.validate().is_err());
    }
}
