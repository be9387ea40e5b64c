use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};
use wabridge_core::config::AppConfig;

const VERSION: &str = "0.1.0";

#[derive(Parser)]
#[command(name = "wabridge")]
#[command(version = VERSION)]
#[command(about = "WhatsApp <-> AI-agent dialog gateway")]
struct Cli {
    /// Path to config.json (defaults to ~/.wabridge/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (ingest pipeline + WhatsApp webhook HTTP server)
    Serve,
    /// Run the onboarding wizard to generate a config file
    Onboard,
    /// Verify configured provider and WhatsApp credentials
    Verify,
}

fn init_tracing() {
    let stdout_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".wabridge/logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "wabridge.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked deliberately: the guard must outlive the process to flush on exit,
    // and main() has no natural place to hold it across every early return.
    Box::leak(Box::new(guard));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(stdout_filter)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| metadata.target() != "audit"));

    let audit_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_target(false)
        .without_time()
        .with_filter(tracing_subscriber::filter::LevelFilter::from_level(Level::INFO))
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| metadata.target() == "audit"));

    tracing_subscriber::registry().with(stdout_layer).with(audit_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Onboard => {
            if let Err(e) = wabridge_cli::onboard::run_onboarding() {
                error!("onboarding failed: {e}");
            }
        }
        Commands::Verify => {
            run_verify(cli.config).await?;
        }
        Commands::Serve => {
            wabridge_cli::run_gateway(cli.config).await?;
        }
    }

    Ok(())
}

async fn run_verify(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)
        .map_err(|e| anyhow::anyhow!("failed to load config: {e}. Run 'wabridge onboard' first."))?;

    if let Some(openai) = &config.providers.openai {
        report(wabridge_cli::verify::verify_api_key("openai", &openai.api_key, openai.api_base.as_deref()).await);
    }
    if let Some(openrouter) = &config.providers.openrouter {
        report(wabridge_cli::verify::verify_api_key("openrouter", &openrouter.api_key, openrouter.api_base.as_deref()).await);
    }
    if let Some(anthropic) = &config.providers.anthropic {
        report(wabridge_cli::verify::verify_api_key("anthropic", &anthropic.api_key, None).await);
    }
    if let Some(google) = &config.providers.google {
        report(wabridge_cli::verify::verify_api_key("google", &google.api_key, None).await);
    }

    report(
        wabridge_cli::verify::verify_whatsapp_token(
            &config.whatsapp.token,
            &config.whatsapp.phone_number_id,
            config.whatsapp.api_base.as_deref(),
        )
        .await,
    );

    Ok(())
}

fn report(result: anyhow::Result<String>) {
    match result {
        Ok(msg) => println!("[ok] {msg}"),
        Err(e) => println!("[failed] {e}"),
    }
}
