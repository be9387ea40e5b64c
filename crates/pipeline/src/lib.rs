pub mod buffer;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod hooks;
pub mod limiter;
pub mod message;
pub mod processor;
pub mod scheduler;
pub mod service;
pub mod store;

pub use buffer::{Batch, Epoch, EnqueueResult, UserBuffer};
pub use clock::{Clock, SystemClock, TestClock};
pub use dispatcher::{InboundEvent, WebhookDispatcher};
pub use error::{IngestOutcome, ProcessError};
pub use hooks::{Hook, HookChain, HookContext, HookSignal};
pub use limiter::{HybridLimiter, SlidingWindow, TokenBucket};
pub use message::{validate_e164, E164Error, Message, Recipient, RecipientKind};
pub use processor::Processor;
pub use scheduler::Scheduler;
pub use service::{BatchingService, BatchingServiceConfig, DeadLetterHandler};
pub use store::{DurableMessageStore, InMemoryMessageStore, MessageStore};
