//! One configured backend plus the call discipline around it

use std::sync::Arc;
use std::time::Instant;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::memory::{SessionMemory, enforce_alternation};
use crate::providers::{ChatBackend, ChatMessage, ChatRequest};
use crate::registry::ProviderConfig;
use crate::types::{ProviderId, ScopeKey, TokenUsage};

/// Successful result of one provider call.
#[derive(Debug, Clone)]
pub struct ProviderAnswer {
    pub text: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub execution_time_ms: u64,
}

/// One provider's client, binding its registry config to a wire backend.
/// Read-only after construction; safe to share across fan-out tasks.
pub struct ProviderClient {
    config: ProviderConfig,
    backend: Arc<dyn ChatBackend>,
    memory: Arc<SessionMemory>,
}

impl ProviderClient {
    pub fn new(
        config: ProviderConfig,
        backend: Arc<dyn ChatBackend>,
        memory: Arc<SessionMemory>,
    ) -> Self {
        Self {
            config,
            backend,
            memory,
        }
    }

    pub fn id(&self) -> ProviderId {
        self.config.id()
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Execute one prompt in a conversation scope.
    ///
    /// History is read before the call; the user/assistant pair is committed
    /// only after the backend succeeds, so a failed call leaves the scope
    /// exactly as it was.
    pub async fn call(
        &self,
        prompt: &str,
        style: Option<&str>,
        scope: &ScopeKey,
    ) -> Result<ProviderAnswer, ProviderError> {
        let system = match style {
            Some(style) => format!(
                "{}\n\nRespond in this style: {}",
                self.config.system_prompt, style
            ),
            None => self.config.system_prompt.clone(),
        };

        let user = ChatMessage::user(prompt);
        let mut messages = if self.config.use_memory {
            self.memory.history(scope).await
        } else {
            Vec::new()
        };
        messages.push(user.clone());
        if self.config.strict_role_alternation {
            enforce_alternation(&mut messages);
        }

        let answer = self.send(system, messages).await?;

        if self.config.use_memory {
            self.memory
                .commit_exchange(scope, user, ChatMessage::assistant(answer.text.clone()))
                .await;
        }

        Ok(answer)
    }

    /// One-shot call with a dedicated instruction, bypassing memory.
    pub async fn call_with_instruction(
        &self,
        prompt: &str,
        instruction: &str,
    ) -> Result<ProviderAnswer, ProviderError> {
        self.send(instruction.to_string(), vec![ChatMessage::user(prompt)])
            .await
    }

    async fn send(
        &self,
        system: String,
        messages: Vec<ChatMessage>,
    ) -> Result<ProviderAnswer, ProviderError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            system,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        debug!("calling provider '{}' (model {})", self.id(), self.config.model);
        let started = Instant::now();
        let reply = match timeout(self.config.timeout(), self.backend.complete(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "provider '{}' exceeded its {}s budget",
                    self.id(),
                    self.config.timeout_secs
                );
                return Err(ProviderError::Timeout);
            }
        };
        let execution_time_ms = started.elapsed().as_millis() as u64;

        // Some local servers omit the model field; fall back to the
        // configured name so the record stays attributable.
        let model = if reply.model.is_empty() {
            self.config.model.clone()
        } else {
            reply.model
        };

        Ok(ProviderAnswer {
            text: reply.text,
            model,
            usage: reply.usage,
            execution_time_ms,
        })
    }

    /// Reachability check against the backend, no side effects.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        self.backend.ping().await
    }
}
