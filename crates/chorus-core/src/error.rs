//! Error taxonomy for the orchestration pipeline

use std::time::Duration;

use thiserror::Error;

use crate::types::CompletionOutcome;

/// Failure of a single backend call.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited")]
    RateLimited {
        /// Suggested retry delay from the server.
        retry_after: Option<Duration>,
    },

    #[error("network error: {0}")]
    Network(String),

    /// Fatal provider-side rejection (quota exhaustion, malformed request,
    /// unparseable response). Never retried by this layer.
    #[error("provider rejected the request: {0}")]
    Fatal(String),
}

impl ProviderError {
    /// Terminal completion state this failure settles as.
    pub fn outcome(&self) -> CompletionOutcome {
        match self {
            Self::Timeout => CompletionOutcome::Timeout,
            _ => CompletionOutcome::Failure,
        }
    }
}

/// Top-level error for everything above the wire backends.
#[derive(Debug, Error)]
pub enum ChorusError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    /// Single-provider path only: the provider's failure is the request's
    /// failure. Fan-out captures failures as per-completion outcomes instead.
    #[error("provider '{provider}' failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("aggregation failed: {0}")]
    Aggregation(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}
