use crate::anthropic::AnthropicProvider;
use crate::google::GoogleProvider;
use crate::openai::OpenAIProvider;
use crate::reliable::ReliableProvider;
use crate::LLMProvider;
use wabridge_core::config::AppConfig;
use std::sync::Arc;

/// Create the appropriate LLM provider based on the application config.
/// Checks providers in order: OpenAI → OpenRouter → Anthropic → Google,
/// and wraps the result in a `ReliableProvider` so transient network/5xx
/// failures are retried before the pipeline's own retry policy ever sees
/// them — a provider hiccup and a batch-processing failure are distinct
/// problems with distinct retry budgets.
pub fn create_provider(config: &AppConfig) -> anyhow::Result<Arc<dyn LLMProvider>> {
    let inner: Arc<dyn LLMProvider> = if let Some(openai_cfg) = &config.providers.openai {
        Arc::new(OpenAIProvider::new(
            openai_cfg.api_key.clone(),
            openai_cfg.api_base.clone(),
        ))
    } else if let Some(openrouter_cfg) = &config.providers.openrouter {
        Arc::new(OpenAIProvider::new(
            openrouter_cfg.api_key.clone(),
            openrouter_cfg.api_base.clone(),
        ))
    } else if let Some(anthropic_cfg) = &config.providers.anthropic {
        Arc::new(AnthropicProvider::new(anthropic_cfg.api_key.clone()))
    } else if let Some(google_cfg) = &config.providers.google {
        Arc::new(GoogleProvider::new(
            google_cfg.api_key.clone(),
            google_cfg.model.clone(),
        ))
    } else {
        anyhow::bail!("No LLM provider configured. Run 'wabridge onboard' to set one up.");
    };

    Ok(Arc::new(ReliableProvider::new(inner, 2, 250)))
}

/// The model name to pass in `GenerationOptions` for whichever provider
/// `create_provider` picked, using the same priority order.
pub fn default_model(config: &AppConfig) -> anyhow::Result<String> {
    if let Some(openai_cfg) = &config.providers.openai {
        Ok(openai_cfg.model.clone())
    } else if let Some(openrouter_cfg) = &config.providers.openrouter {
        Ok(openrouter_cfg.model.clone())
    } else if let Some(anthropic_cfg) = &config.providers.anthropic {
        Ok(anthropic_cfg.model.clone())
    } else if let Some(google_cfg) = &config.providers.google {
        Ok(google_cfg.model.clone())
    } else {
        anyhow::bail!("No LLM provider configured. Run 'wabridge onboard' to set one up.");
    }
}
