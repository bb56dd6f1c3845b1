//! OpenAI-compatible wire backend
//!
//! Speaks the `/v1/chat/completions` dialect shared by OpenAI, Ollama,
//! vLLM, llama.cpp, and most containerized inference servers, which is why
//! a single backend covers every configured provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{ChatBackend, ChatReply, ChatRequest, ChatRole};
use crate::error::ProviderError;
use crate::types::TokenUsage;

const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP client for one OpenAI-compatible endpoint.
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiBackend {
    pub fn new(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Assemble wire messages with the system instruction first.
    fn to_wire_messages(request: &ChatRequest) -> Vec<WireMessage> {
        let mut result = vec![WireMessage {
            role: "system".to_string(),
            content: request.system.clone(),
        }];

        for msg in &request.messages {
            // The instruction slot is already filled above.
            if msg.role == ChatRole::System {
                continue;
            }
            result.push(WireMessage {
                role: msg.role.to_string(),
                content: msg.content.clone(),
            });
        }

        result
    }

    fn from_wire_response(resp: WireResponse) -> Result<ChatReply, ProviderError> {
        let model = resp.model.unwrap_or_default();
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Fatal("response had no choices".to_string()))?;

        let usage = resp.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u
                .total_tokens
                .unwrap_or(u.prompt_tokens + u.completion_tokens),
        });

        Ok(ChatReply {
            text: choice.message.content.unwrap_or_default(),
            model,
            usage,
        })
    }

    /// Map an error status to the failure taxonomy.
    fn classify_status(status: StatusCode, body: &str, retry_after: Option<u64>) -> ProviderError {
        match status.as_u16() {
            401 | 403 => ProviderError::Auth(format!("status {status}")),
            429 => {
                // The same status covers throttling and exhausted quotas;
                // quota errors must not look retryable.
                if body.contains("insufficient_quota") {
                    ProviderError::Fatal(format!("quota exhausted: {}", snippet(body)))
                } else {
                    ProviderError::RateLimited {
                        retry_after: retry_after.map(Duration::from_secs),
                    }
                }
            }
            402 => ProviderError::Fatal(format!("billing: {}", snippet(body))),
            500..=599 => ProviderError::Network(format!("server error {status}")),
            _ => ProviderError::Fatal(format!("status {status}: {}", snippet(body))),
        }
    }

    fn bearer(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        // Local endpoints are usually keyless.
        if self.api_key.is_empty() {
            builder
        } else {
            builder.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatReply, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let messages = Self::to_wire_messages(request);

        let body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        debug!(
            "chat request: url={}, model={}, messages={}",
            url,
            request.model,
            messages.len()
        );

        let response = self
            .bearer(self.client.post(&url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(Self::classify_status(status, &text, retry_after));
        }

        let api_response: WireResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Fatal(format!("unparseable response body: {e}")))?;

        debug!(
            "chat response: choices={}, finish_reason={:?}",
            api_response.choices.len(),
            api_response.choices.first().and_then(|c| c.finish_reason.as_deref())
        );

        Self::from_wire_response(api_response)
    }

    async fn ping(&self) -> Result<(), ProviderError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .bearer(self.client.get(&url).timeout(PING_TIMEOUT))
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            Err(Self::classify_status(status, &text, None))
        }
    }
}

fn map_send_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Network(err.to_string())
    }
}

fn snippet(body: &str) -> String {
    if body.chars().count() > 200 {
        let cut: String = body.chars().take(197).collect();
        format!("{cut}...")
    } else {
        body.to_string()
    }
}

// ── wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    model: Option<String>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: Option<u32>,
}
