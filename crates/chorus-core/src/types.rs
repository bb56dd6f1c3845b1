//! Shared types for chorus-core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalized identity of one configured backend.
///
/// Names are trimmed and lowercased on entry, so lookups are
/// case-insensitive and result ordering is lexicographic on the
/// normalized form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ProviderId {
    fn from(name: String) -> Self {
        Self::new(&name)
    }
}

// Manual impl so wire input normalizes the same way constructors do.
impl<'de> Deserialize<'de> for ProviderId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Self::new(&name))
    }
}

/// Terminal state of one provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompletionOutcome {
    Success,
    Failure,
    Timeout,
}

impl CompletionOutcome {
    /// Parse a stored outcome label (e.g. from a database row).
    pub fn from_string(s: &str) -> Self {
        match s {
            "SUCCESS" => Self::Success,
            "TIMEOUT" => Self::Timeout,
            _ => Self::Failure,
        }
    }
}

impl std::fmt::Display for CompletionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Token usage reported by a backend for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One conversation's memory scope: a session plus an optional chat under it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub session_id: String,
    pub chat_id: Option<String>,
}

impl ScopeKey {
    pub fn new(session_id: impl Into<String>, chat_id: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            chat_id,
        }
    }

    /// Label for the chat half of the key; the default scope prints as "default".
    pub fn chat_label(&self) -> &str {
        self.chat_id.as_deref().unwrap_or("default")
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.session_id, self.chat_label())
    }
}

/// An inbound user prompt, recorded once per request. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Prompt {
    pub fn new(session_id: &str, chat_id: Option<&str>, text: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            chat_id: chat_id.map(str::to_string),
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// One provider's terminal outcome for a prompt. Append-only, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub id: String,
    pub prompt_id: String,
    pub provider: ProviderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub execution_time_ms: u64,
    pub completed_at: DateTime<Utc>,
    pub outcome: CompletionOutcome,
}

impl Completion {
    /// A settled success carrying the backend's answer.
    pub fn success(
        prompt_id: &str,
        provider: ProviderId,
        text: String,
        model: String,
        usage: Option<TokenUsage>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt_id: prompt_id.to_string(),
            provider,
            model: Some(model),
            text: Some(text),
            usage,
            execution_time_ms,
            completed_at: Utc::now(),
            outcome: CompletionOutcome::Success,
        }
    }

    /// A settled failure or timeout: no text, no model, no usage.
    pub fn failed(
        prompt_id: &str,
        provider: ProviderId,
        outcome: CompletionOutcome,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt_id: prompt_id.to_string(),
            provider,
            model: None,
            text: None,
            usage: None,
            execution_time_ms,
            completed_at: Utc::now(),
            outcome,
        }
    }
}

/// Single-provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub provider: ProviderId,
}

/// Multi-provider fan-out request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub providers: Vec<ProviderId>,
}

/// Fan-out followed by a summarization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub providers: Vec<ProviderId>,
    pub aggregator: ProviderId,
}

/// One recorded exchange: the prompt plus every provider outcome,
/// ordered by provider identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeReply {
    pub prompt: Prompt,
    pub completions: Vec<Completion>,
}

/// An exchange plus the merged summary over its successful answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReply {
    pub prompt: Prompt,
    pub completions: Vec<Completion>,
    pub contributors: Vec<ProviderId>,
    pub summary: String,
}
