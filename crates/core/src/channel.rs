use async_trait::async_trait;

/// Name of the (only, for now) channel this gateway bridges.
pub const CHANNEL_WHATSAPP: &str = "whatsapp";

/// Standardized interface for an inbound/outbound transport adapter.
/// `wabridge-whatsapp` is the one implementation; the trait exists so the
/// pipeline and server never depend on WhatsApp-specific types directly.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Unique channel identifier (e.g. "whatsapp").
    fn channel_name(&self) -> &str;

    /// Start the adapter. Spawns whatever background tasks it needs
    /// (outbound delivery workers, health pollers) and returns once they're running.
    async fn start(&self) -> anyhow::Result<()>;

    /// Quick health check — verify the adapter's upstream connection is alive.
    async fn health_check(&self) -> bool {
        true
    }
}
