//! Concurrent fan-out across providers under one global deadline

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregator;
use crate::client::{ProviderAnswer, ProviderClient};
use crate::error::{ChorusError, ProviderError};
use crate::store::ExchangeStore;
use crate::types::{
    AggregateReply, AggregateRequest, AskRequest, Completion, ExchangeReply, FanoutRequest, Prompt,
    ProviderId, ScopeKey,
};
use crate::validate;

const DEFAULT_GLOBAL_DEADLINE_SECS: u64 = 75;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on a whole fan-out batch, on top of per-provider budgets.
    pub global_deadline_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            global_deadline_secs: DEFAULT_GLOBAL_DEADLINE_SECS,
        }
    }
}

impl OrchestratorConfig {
    fn global_deadline(&self) -> Duration {
        Duration::from_secs(self.global_deadline_secs)
    }
}

/// Dispatches prompts to provider clients, settles every outcome, and
/// records the exchange.
///
/// Results are always reported in provider-identity order, so arrival
/// order never leaks to the caller. One provider's failure becomes a
/// FAILURE row for that provider and nothing more.
pub struct Orchestrator {
    clients: BTreeMap<ProviderId, Arc<ProviderClient>>,
    store: Arc<dyn ExchangeStore>,
    config: OrchestratorConfig,
    session_id: String,
}

impl Orchestrator {
    pub fn new(
        clients: Vec<Arc<ProviderClient>>,
        store: Arc<dyn ExchangeStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let clients = clients
            .into_iter()
            .map(|client| (client.id(), client))
            .collect();
        Self {
            clients,
            store,
            config,
            // One memory session per orchestrator instance.
            session_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn provider_count(&self) -> usize {
        self.clients.len()
    }

    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.clients.keys().cloned().collect()
    }

    fn client(&self, id: &ProviderId) -> Result<&Arc<ProviderClient>, ChorusError> {
        self.clients
            .get(id)
            .ok_or_else(|| ChorusError::UnknownProvider(id.to_string()))
    }

    fn scope_for(&self, chat_id: Option<&str>) -> ScopeKey {
        ScopeKey::new(&self.session_id, chat_id.map(str::to_string))
    }

    /// Single-provider path. The provider's failure is the request's
    /// failure, but the outcome row is recorded first either way.
    pub async fn ask(&self, request: &AskRequest) -> Result<ExchangeReply, ChorusError> {
        validate::validate_ask(request)?;
        let client = self.client(&request.provider)?;
        let scope = self.scope_for(request.chat_id.as_deref());
        let prompt = Prompt::new(&self.session_id, request.chat_id.as_deref(), &request.prompt);
        self.store.record_prompt(&prompt).await?;

        debug!("Dispatching prompt {} to {}", prompt.id, client.id());
        let started = Instant::now();
        let result = client
            .call(&request.prompt, request.style.as_deref(), &scope)
            .await;
        let completion = completion_from(&prompt.id, client.id(), &result, started.elapsed());
        self.store.record_completion(&completion).await?;

        match result {
            Ok(_) => Ok(ExchangeReply {
                prompt,
                completions: vec![completion],
            }),
            Err(source) => Err(ChorusError::Provider {
                provider: request.provider.to_string(),
                source,
            }),
        }
    }

    /// Fan a prompt out to every requested provider and settle all of them.
    pub async fn ask_multi(&self, request: &FanoutRequest) -> Result<ExchangeReply, ChorusError> {
        self.ask_multi_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`ask_multi`](Self::ask_multi), but tied to a caller-side
    /// cancellation signal. Cancelling settles every outstanding provider
    /// as TIMEOUT; nothing is left half-done.
    pub async fn ask_multi_with_cancel(
        &self,
        request: &FanoutRequest,
        cancel: CancellationToken,
    ) -> Result<ExchangeReply, ChorusError> {
        validate::validate_fanout(request, self.clients.len())?;
        let clients = self.resolve_sorted(&request.providers)?;
        let scope = self.scope_for(request.chat_id.as_deref());
        let prompt = Prompt::new(&self.session_id, request.chat_id.as_deref(), &request.prompt);
        self.store.record_prompt(&prompt).await?;

        let completions = self
            .dispatch(
                &prompt.id,
                clients,
                &request.prompt,
                request.style.as_deref(),
                &scope,
                cancel,
            )
            .await;
        for completion in &completions {
            self.store.record_completion(completion).await?;
        }
        info!(
            "Fan-out for prompt {} settled across {} providers",
            prompt.id,
            completions.len()
        );
        Ok(ExchangeReply {
            prompt,
            completions,
        })
    }

    /// Fan-out followed by a summarization pass through the designated
    /// aggregator. Per-provider outcomes are recorded before the summary
    /// is attempted; the summary itself is never stored.
    pub async fn ask_aggregate(
        &self,
        request: &AggregateRequest,
    ) -> Result<AggregateReply, ChorusError> {
        self.ask_aggregate_with_cancel(request, CancellationToken::new())
            .await
    }

    pub async fn ask_aggregate_with_cancel(
        &self,
        request: &AggregateRequest,
        cancel: CancellationToken,
    ) -> Result<AggregateReply, ChorusError> {
        validate::validate_aggregate(request, self.clients.len())?;
        // Resolve the aggregator up front so a bad name fails before any
        // provider is called.
        let aggregator_client = Arc::clone(self.client(&request.aggregator)?);

        let fanout = FanoutRequest {
            prompt: request.prompt.clone(),
            style: request.style.clone(),
            chat_id: request.chat_id.clone(),
            providers: request.providers.clone(),
        };
        let exchange = self.ask_multi_with_cancel(&fanout, cancel).await?;

        let merged = aggregator::summarize(&aggregator_client, &exchange.completions).await?;
        Ok(AggregateReply {
            prompt: exchange.prompt,
            completions: exchange.completions,
            contributors: merged.contributors,
            summary: merged.summary,
        })
    }

    /// Resolve the requested set into clients, sorted by provider identity.
    /// The sorted order fixes both dispatch order and result order.
    fn resolve_sorted(
        &self,
        providers: &[ProviderId],
    ) -> Result<Vec<Arc<ProviderClient>>, ChorusError> {
        let mut ids: Vec<ProviderId> = providers.to_vec();
        ids.sort();
        ids.iter()
            .map(|id| self.client(id).map(Arc::clone))
            .collect()
    }

    async fn dispatch(
        &self,
        prompt_id: &str,
        clients: Vec<Arc<ProviderClient>>,
        prompt: &str,
        style: Option<&str>,
        scope: &ScopeKey,
        cancel: CancellationToken,
    ) -> Vec<Completion> {
        let local = cancel.child_token();
        let deadline = Instant::now() + self.config.global_deadline();

        let mut handles = Vec::with_capacity(clients.len());
        for client in clients {
            let child = local.child_token();
            let prompt = prompt.to_string();
            let style = style.map(str::to_string);
            let scope = scope.clone();
            let id = client.id();
            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let result = tokio::select! {
                    _ = child.cancelled() => Err(ProviderError::Timeout),
                    result = client.call(&prompt, style.as_deref(), &scope) => result,
                };
                (result, started.elapsed())
            });
            handles.push((id, handle));
        }

        // Collect in the sorted dispatch order; the deadline spans the
        // whole batch, not each handle.
        let mut completions = Vec::with_capacity(handles.len());
        for (id, mut handle) in handles {
            let (result, elapsed) = match timeout_at(deadline, &mut handle).await {
                Ok(Ok(settled)) => settled,
                Ok(Err(join_error)) => {
                    warn!("Provider task for {} failed: {}", id, join_error);
                    (
                        Err(ProviderError::Network("provider task failed".to_string())),
                        Duration::ZERO,
                    )
                }
                Err(_) => {
                    warn!("Global deadline hit; cancelling {} and any stragglers", id);
                    local.cancel();
                    handle.abort();
                    (Err(ProviderError::Timeout), self.config.global_deadline())
                }
            };
            completions.push(completion_from(prompt_id, id, &result, elapsed));
        }
        completions
    }
}

fn completion_from(
    prompt_id: &str,
    provider: ProviderId,
    result: &Result<ProviderAnswer, ProviderError>,
    elapsed: Duration,
) -> Completion {
    match result {
        Ok(answer) => Completion::success(
            prompt_id,
            provider,
            answer.text.clone(),
            answer.model.clone(),
            answer.usage,
            answer.execution_time_ms,
        ),
        Err(err) => Completion::failed(prompt_id, provider, err.outcome(), elapsed.as_millis() as u64),
    }
}
