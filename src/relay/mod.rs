//! Completion relay: provider seam, usage accounting and the streaming
//! engine that drives one test call end to end.

pub mod provider;
pub mod stream;
pub mod usage;

pub use provider::{
    ChunkStream, CompletionProvider, CompletionRequest, CompletionResponse, HttpProvider,
    MockBehavior, MockProvider,
};
pub use stream::{CompletionRelay, RelayConfig};
pub use usage::{estimate_tokens, TokenUsage, TokenUsageRecord, UsageLog};
