use crate::metrics::MetricsStore;
use crate::types::ChatMessage;
use std::sync::Arc;
use tokio::sync::broadcast;

/// The observability broadcaster the core pipeline treats as an opaque
/// external collaborator. `wabridge-agent` publishes outbound replies and
/// per-batch spans here; `wabridge-whatsapp` and `wabridge-server` subscribe
/// to deliver/observe.
#[derive(Debug, Clone)]
pub enum Event {
    /// A reply ready to go out over a channel adapter.
    OutboundMessage(ChatMessage),
    /// Free-form system log line, forwarded from any subsystem.
    SystemLog { level: String, message: String },
    /// Per-batch span: start on Processor entry, end on terminal
    /// success/failure/abort.
    BatchSpan {
        user_id: String,
        batch_size: usize,
        attempt: u32,
        outcome: String,
    },
}

pub struct MessageBus {
    tx: broadcast::Sender<Event>,
    metrics: Option<Arc<MetricsStore>>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsStore>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) -> Result<usize, broadcast::error::SendError<Event>> {
        if let Event::OutboundMessage(_) = event {
            if let Some(metrics) = &self.metrics {
                metrics.inc_messages_out();
            }
        }
        self.tx.send(event)
    }
}
