pub mod onboard;
pub mod verify;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use wabridge_agent::context::ContextBuilder;
use wabridge_agent::processor::AgentProcessor;
use wabridge_core::bus::MessageBus;
use wabridge_core::channel::ChannelAdapter;
use wabridge_core::config::AppConfig;
use wabridge_core::metrics::MetricsStore;
use wabridge_pipeline::clock::{Clock, SystemClock};
use wabridge_pipeline::hooks::HookChain;
use wabridge_pipeline::service::{BatchingService, BatchingServiceConfig};
use wabridge_pipeline::store::InMemoryMessageStore;
use wabridge_providers::factory::{create_provider, default_model};
use wabridge_providers::GenerationOptions;
use wabridge_server::gateway::Gateway;
use wabridge_voice::{HttpTtsProvider, TtsProvider};
use wabridge_whatsapp::outbound::WhatsAppClient;
use wabridge_whatsapp::WhatsAppAdapter;

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".wabridge/config.json")
}

/// Shutdown grace period: in-flight batches get this long to finish before
/// the process exits regardless.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Builds and runs the gateway: the pipeline orchestrator, its
/// `AgentProcessor` sink, and the axum HTTP surface, then blocks until
/// `Ctrl+C` and drains in flight batches before returning.
pub async fn run_gateway(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path).map_err(|e| {
        anyhow::anyhow!("failed to load config: {e}. Run 'wabridge onboard' first.")
    })?;

    tokio::fs::create_dir_all(&config.workspace).await?;

    let metrics = MetricsStore::new();
    let bus = Arc::new(MessageBus::new(256).with_metrics(metrics.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let db_path = config.workspace.join("wabridge.db");
    let store_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let session_store = wabridge_persistence::SqliteSessionStore::new(&store_url).await?;

    let whatsapp = Arc::new(WhatsAppClient::new(
        config.whatsapp.token.clone(),
        config.whatsapp.phone_number_id.clone(),
        config.whatsapp.api_base.clone(),
    ));

    let provider = create_provider(&config)?;
    let model = GenerationOptions {
        model: default_model(&config)?,
        max_tokens: None,
        temperature: None,
    };
    let context_builder = ContextBuilder::new(config.workspace.clone());

    let tts: Option<Arc<dyn TtsProvider>> = config
        .voice
        .provider
        .clone()
        .map(|cfg| Arc::new(HttpTtsProvider::new(cfg)) as Arc<dyn TtsProvider>);
    if tts.is_some() {
        info!("TTS provider configured, speech_play_chance = {}", config.voice.speech_play_chance);
    }

    let processor = Arc::new(AgentProcessor::new(
        bus.clone(),
        provider,
        model,
        context_builder,
        session_store,
        whatsapp.clone(),
        tts,
        &config,
    ));

    let message_store = Arc::new(InMemoryMessageStore::new(config.batching.max_processed_ids));

    let service = BatchingService::new(
        BatchingServiceConfig::new(config.batching.clone()),
        clock.clone(),
        message_store,
        processor,
        HookChain::new(),
        bus.clone(),
        metrics.clone(),
        None,
    );
    let _sweep_handle = service.spawn_idle_sweep();

    let whatsapp_adapter = WhatsAppAdapter::new(
        bus.clone(),
        config.whatsapp.token.clone(),
        config.whatsapp.api_base.clone(),
        config.whatsapp.phone_number_id.clone(),
        config.whatsapp.default_to.clone(),
        8,
        250,
    );
    whatsapp_adapter.start().await?;

    let dispatcher = Arc::new(wabridge_pipeline::dispatcher::WebhookDispatcher::new(
        service.clone(),
        bus.clone(),
        clock,
        500,
    ));

    let gateway = Gateway::new(
        dispatcher,
        config.gateway.port,
        metrics,
        config.gateway.auth_token.clone(),
        config.whatsapp.verify_token.clone(),
        config.whatsapp.app_secret.clone(),
    );

    let server_handle = tokio::spawn(async move {
        if let Err(e) = gateway.start().await {
            error!(error = %e, "gateway server error");
        }
    });

    info!(port = config.gateway.port, "wabridge gateway running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining in-flight batches");

    service.shutdown(SHUTDOWN_GRACE).await;
    server_handle.abort();

    Ok(())
}
