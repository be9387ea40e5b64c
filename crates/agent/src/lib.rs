pub mod context;
pub mod processor;

pub use context::ContextBuilder;
pub use processor::AgentProcessor;
