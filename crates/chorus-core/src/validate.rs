//! Explicit request validation
//!
//! Every inbound shape is checked here before it reaches the orchestrator,
//! and every check returns a typed error rather than panicking or relying
//! on downstream layers to notice.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::error::ChorusError;
use crate::types::{AggregateRequest, AskRequest, FanoutRequest, ProviderId};

pub const MIN_PROMPT_CHARS: usize = 2;
pub const MAX_PROMPT_CHARS: usize = 40_000;
pub const MAX_STYLE_CHARS: usize = 100;
pub const MAX_CHAT_ID_CHARS: usize = 128;

/// Prompt text must hold between 2 and 40000 characters.
pub fn validate_prompt(text: &str) -> Result<(), ChorusError> {
    let chars = text.chars().count();
    if chars < MIN_PROMPT_CHARS {
        return Err(ChorusError::Validation(format!(
            "prompt must be at least {MIN_PROMPT_CHARS} characters"
        )));
    }
    if chars > MAX_PROMPT_CHARS {
        return Err(ChorusError::Validation(format!(
            "prompt exceeds {MAX_PROMPT_CHARS} characters"
        )));
    }
    Ok(())
}

pub fn validate_style(style: Option<&str>) -> Result<(), ChorusError> {
    if let Some(style) = style {
        if style.chars().count() > MAX_STYLE_CHARS {
            return Err(ChorusError::Validation(format!(
                "style hint exceeds {MAX_STYLE_CHARS} characters"
            )));
        }
    }
    Ok(())
}

/// Chat ids key memory scopes and database rows, so they must be printable
/// and bounded. An empty id should have been omitted instead.
pub fn validate_chat_id(chat_id: Option<&str>) -> Result<(), ChorusError> {
    let Some(chat_id) = chat_id else {
        return Ok(());
    };
    if chat_id.is_empty() {
        return Err(ChorusError::Validation("chat id must not be empty".to_string()));
    }
    if chat_id.chars().count() > MAX_CHAT_ID_CHARS {
        return Err(ChorusError::Validation(format!(
            "chat id exceeds {MAX_CHAT_ID_CHARS} characters"
        )));
    }
    if chat_id.chars().any(char::is_control) {
        return Err(ChorusError::Validation(
            "chat id must not contain control characters".to_string(),
        ));
    }
    Ok(())
}

/// A fan-out needs 2..=N distinct providers, N being the configured count.
pub fn validate_provider_set(providers: &[ProviderId], configured: usize) -> Result<(), ChorusError> {
    if providers.len() < 2 {
        return Err(ChorusError::Validation(
            "a multi-provider request needs at least 2 providers".to_string(),
        ));
    }
    if providers.len() > configured {
        return Err(ChorusError::Validation(format!(
            "requested {} providers but only {} are configured",
            providers.len(),
            configured
        )));
    }
    let distinct: BTreeSet<&ProviderId> = providers.iter().collect();
    if distinct.len() != providers.len() {
        return Err(ChorusError::Validation(
            "provider set contains duplicates".to_string(),
        ));
    }
    Ok(())
}

/// Record ids are canonical hyphenated UUIDs. A malformed id is a
/// validation error; not-found is reserved for well-formed unknown ids.
pub fn validate_record_id(id: &str) -> Result<(), ChorusError> {
    if id.len() == 36 && Uuid::try_parse(id).is_ok() {
        Ok(())
    } else {
        Err(ChorusError::Validation(format!("malformed record id '{id}'")))
    }
}

pub fn validate_ask(request: &AskRequest) -> Result<(), ChorusError> {
    validate_prompt(&request.prompt)?;
    validate_style(request.style.as_deref())?;
    validate_chat_id(request.chat_id.as_deref())
}

pub fn validate_fanout(request: &FanoutRequest, configured: usize) -> Result<(), ChorusError> {
    validate_prompt(&request.prompt)?;
    validate_style(request.style.as_deref())?;
    validate_chat_id(request.chat_id.as_deref())?;
    validate_provider_set(&request.providers, configured)
}

pub fn validate_aggregate(request: &AggregateRequest, configured: usize) -> Result<(), ChorusError> {
    validate_prompt(&request.prompt)?;
    validate_style(request.style.as_deref())?;
    validate_chat_id(request.chat_id.as_deref())?;
    validate_provider_set(&request.providers, configured)
}
