//! Wire backends for OpenAI-compatible chat endpoints
//!
//! Every configured provider speaks the same chat-completions dialect, so
//! one HTTP backend covers local and remote endpoints alike. Backends
//! implement the [`ChatBackend`] trait, which is what tests substitute.

pub mod openai;
pub mod types;

pub use openai::OpenAiBackend;
pub use types::{ChatBackend, ChatMessage, ChatReply, ChatRequest, ChatRole};
