use inquire::{Confirm, Password, Select, Text};
use std::fs;
use std::path::{Path, PathBuf};
use wabridge_core::config::{
    AnthropicConfig, AppConfig, BackpressureStrategy, BatchingConfig, ErrorPolicyConfig,
    GatewayConfig, GoogleConfig, ProviderConfig, ProvidersConfig, RateLimitConfig, VoiceConfig,
    WhatsAppConfig,
};

/// Interactive wizard producing a validated `~/.wabridge/config.json`. Asks
/// only for the configuration fields the gateway actually reads, with the
/// same defaults it falls back to when a field is hand-edited later.
pub fn run_onboarding() -> anyhow::Result<()> {
    println!("wabridge setup\n");
    println!("This wizard writes a WhatsApp <-> AI-agent gateway config.\n");

    let workspace_str = Text::new("Workspace directory (conversation memory, prompt files):")
        .with_default("workspace")
        .prompt()?;
    let workspace = PathBuf::from(&workspace_str);

    let port: u16 = Text::new("Gateway HTTP port:")
        .with_default("8080")
        .prompt()?
        .parse()
        .unwrap_or(8080);

    let auth_token = if Confirm::new("Protect /api/* endpoints with a bearer token?")
        .with_default(true)
        .prompt()?
    {
        Some(Password::new("Bearer token:").without_confirmation().prompt()?)
    } else {
        None
    };

    println!("\n--- WhatsApp Cloud API ---");
    let wa_token = Password::new("Access token:").without_confirmation().prompt()?;
    let phone_number_id = Text::new("Phone number ID:").prompt()?;
    let verify_token = Text::new("Webhook verify token (you choose this):").prompt()?;
    let app_secret = Password::new("App secret (for signature verification):")
        .without_confirmation()
        .prompt()?;
    let default_to = Text::new("Default recipient phone number (optional, E.164):")
        .prompt_skippable()?
        .filter(|s| !s.is_empty());

    println!("\n--- LLM provider ---");
    let mut providers = ProvidersConfig::default();
    let provider_choice = Select::new(
        "Which LLM provider should the agent use?",
        vec!["openai", "anthropic", "google"],
    )
    .prompt()?;

    match provider_choice {
        "openai" => {
            let api_key = Password::new("OpenAI API key:").without_confirmation().prompt()?;
            let api_base = Text::new("API base URL:")
                .with_default("https://api.openai.com/v1")
                .prompt()?;
            let model = Text::new("Model:").with_default("gpt-4o-mini").prompt()?;
            providers.openai = Some(ProviderConfig { api_key, api_base: Some(api_base), model });
        }
        "anthropic" => {
            let api_key = Password::new("Anthropic API key:").without_confirmation().prompt()?;
            let model = Text::new("Model:").with_default("claude-3-5-sonnet-20241022").prompt()?;
            providers.anthropic = Some(AnthropicConfig { api_key, model });
        }
        _ => {
            let api_key = Password::new("Google AI Studio API key:").without_confirmation().prompt()?;
            let model = Text::new("Model:").with_default("gemini-1.5-flash").prompt()?;
            providers.google = Some(GoogleConfig { api_key, model });
        }
    }

    println!("\n--- Batching & rate limiting (defaults) ---");
    let adaptive_timeout_ms: u64 = Text::new("Adaptive timeout (ms, max wait from first message):")
        .with_default("5000")
        .prompt()?
        .parse()
        .unwrap_or(5_000);
    let silence_threshold_ms: u64 = Text::new("Silence threshold (ms, dispatch after this much quiet):")
        .with_default("2000")
        .prompt()?
        .parse()
        .unwrap_or(2_000);
    let max_buffer_size: usize = Text::new("Max buffered messages per user:")
        .with_default("50")
        .prompt()?
        .parse()
        .unwrap_or(50);

    let backpressure = match Select::new(
        "Backpressure strategy when a buffer is full:",
        vec!["DROP_OLDEST", "DROP_NEW", "FLUSH_AND_ACCEPT", "REJECT_WITH_NOTIFY"],
    )
    .prompt()?
    {
        "DROP_NEW" => BackpressureStrategy::DropNew,
        "FLUSH_AND_ACCEPT" => BackpressureStrategy::FlushAndAccept,
        "REJECT_WITH_NOTIFY" => BackpressureStrategy::RejectWithNotify,
        _ => BackpressureStrategy::DropOldest,
    };

    let voice_chance: f64 = if Confirm::new("Enable voice replies?").with_default(false).prompt()? {
        Text::new("Fraction of replies spoken (0.0-1.0):")
            .with_default("0.2")
            .prompt()?
            .parse()
            .unwrap_or(0.2)
    } else {
        0.0
    };

    let config = AppConfig {
        workspace: workspace.clone(),
        gateway: GatewayConfig { port, auth_token },
        batching: BatchingConfig {
            adaptive_timeout_ms,
            silence_threshold_ms,
            max_buffer_size,
            rate_limit: RateLimitConfig {
                tokens_per_minute: 20,
                bucket_capacity: 5,
                max_messages_in_window: 10,
                sliding_window_ms: 30_000,
            },
            backpressure,
            errors: ErrorPolicyConfig {
                max_retries: 3,
                retry_delay_ms: 500,
                exponential_backoff: true,
                notify_user_on_failure: true,
                user_notification_message: Some(
                    "Sorry, something went wrong on our end. Please try again shortly.".to_string(),
                ),
                dead_letter_handler: None,
            },
            max_processed_ids: 5_000,
        },
        providers,
        voice: VoiceConfig { speech_play_chance: voice_chance, provider: None },
        whatsapp: WhatsAppConfig {
            token: wa_token,
            phone_number_id,
            api_base: None,
            verify_token,
            app_secret,
            default_to,
        },
    };

    let config_json = serde_json::to_string_pretty(&config)?;
    let config_path = dirs::home_dir().unwrap().join(".wabridge/config.json");
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    if config_path.exists()
        && !Confirm::new("Config file already exists. Overwrite?")
            .with_default(false)
            .prompt()?
    {
        println!("Aborted.");
        return Ok(());
    }

    fs::write(&config_path, config_json)?;
    create_workspace(&workspace)?;

    println!("\nwabridge is ready.");
    println!("  Config written to {:?}", config_path);
    println!("  Run 'wabridge serve' to start the gateway.");

    Ok(())
}

/// Seeds the workspace with the prompt files `ContextBuilder` reads into
/// the system prompt it assembles for every batch (`AGENTS.md`, `SOUL.md`,
/// `USER.md`, `IDENTITY.md`), so a fresh install has something sensible to
/// say rather than an empty system prompt.
fn create_workspace(workspace: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(workspace)?;

    let templates: Vec<(&str, &str)> = vec![
        (
            "AGENTS.md",
            r#"# Agent Instructions

You are a helpful AI assistant replying over WhatsApp. Be concise, accurate,
and conversational — replies render as chat bubbles, not documents.

## Guidelines

- Keep replies short; split long answers into a few sentences, not a wall of text.
- Ask for clarification when a request is ambiguous.
- Be proactive and helpful without being verbose.
"#,
        ),
        (
            "SOUL.md",
            r#"# Soul

## Personality

- Helpful and friendly
- Concise and to the point
- Honest and transparent

## Values

- Accuracy over speed
- User privacy and safety
"#,
        ),
        (
            "USER.md",
            r#"# User

Information about the person on the other end of this WhatsApp number.

## Preferences

- Communication style: (casual/formal)
- Timezone: (their timezone)
- Language: (their preferred language)
"#,
        ),
        (
            "IDENTITY.md",
            r#"# Identity

## Purpose

Bridge a WhatsApp number to an LLM-backed conversational agent.

## Philosophy

- Simplicity over complexity
- Fast, short replies over long ones
"#,
        ),
    ];

    for (filename, content) in &templates {
        let file_path = workspace.join(filename);
        if !file_path.exists() {
            fs::write(&file_path, content)?;
            println!("  Created {}", filename);
        }
    }

    Ok(())
}
