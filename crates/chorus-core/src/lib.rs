//! chorus-core - The orchestration heart of chorus
//!
//! This crate provides:
//! - A data-driven registry of OpenAI-compatible provider backends
//! - Per-provider clients with scoped conversation memory
//! - Concurrent fan-out with per-provider budgets and a global deadline
//! - An aggregation pass that merges successful answers into one summary
//! - The storage seam every exchange is recorded through
//! - An on-demand reachability probe per provider

pub mod aggregator;
pub mod client;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod probe;
pub mod providers;
pub mod registry;
pub mod store;
pub mod types;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use aggregator::MergedAnswer;
pub use client::{ProviderAnswer, ProviderClient};
pub use error::{ChorusError, ProviderError};
pub use memory::SessionMemory;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use probe::{ProviderHealth, ProviderStatus, StatusProbe};
pub use providers::{ChatBackend, ChatMessage, ChatReply, ChatRequest, ChatRole, OpenAiBackend};
pub use registry::{ProviderConfig, ProviderRegistry};
pub use store::{ExchangeStore, MemoryStore, RecordKind, SearchHit};
pub use types::{
    AggregateReply, AggregateRequest, AskRequest, Completion, CompletionOutcome, ExchangeReply,
    FanoutRequest, Prompt, ProviderId, ScopeKey, TokenUsage,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        // Just verify that all main types are exported
        let _ = std::mem::size_of::<Orchestrator>();
        let _ = std::mem::size_of::<ProviderRegistry>();
        let _ = std::mem::size_of::<SessionMemory>();
        let _ = std::mem::size_of::<StatusProbe>();
        let _ = std::mem::size_of::<Completion>();
        let _ = std::mem::size_of::<MemoryStore>();
    }
}
