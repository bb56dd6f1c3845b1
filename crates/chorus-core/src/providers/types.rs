//! Backend-agnostic chat types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::types::TokenUsage;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    /// The opposite conversational role; system flips to nothing.
    pub fn flipped(self) -> Self {
        match self {
            Self::User => Self::Assistant,
            Self::Assistant => Self::User,
            Self::System => Self::System,
        }
    }
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

/// One message in a conversation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A fully-assembled request for one backend call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// What a backend returned for one successful call.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Trait every wire backend implements.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Execute one chat completion.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatReply, ProviderError>;

    /// Minimal reachability check, no side effects.
    async fn ping(&self) -> Result<(), ProviderError>;
}
