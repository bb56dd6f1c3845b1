//! Storage seam for prompts and completions
//!
//! The orchestrator records through the [`ExchangeStore`] trait and never
//! sees a concrete backend. Completions carry their prompt's id; nothing
//! links a prompt forward to its completions, so readers always query by
//! prompt id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::types::{Completion, Prompt};

const SNIPPET_CHARS: usize = 200;

/// What kind of record a search hit points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Prompt,
    Completion,
}

impl RecordKind {
    /// Parse a stored kind label (e.g. from an index document).
    pub fn from_string(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "completion" => Self::Completion,
            _ => Self::Prompt,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prompt => write!(f, "prompt"),
            Self::Completion => write!(f, "completion"),
        }
    }
}

/// One full-text search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub kind: RecordKind,
    pub prompt_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub score: f32,
    pub snippet: String,
}

/// Durable record of prompts and their per-provider outcomes.
#[async_trait]
pub trait ExchangeStore: Send + Sync {
    /// Persist an inbound prompt. Ids are unique; recording twice is an error.
    async fn record_prompt(&self, prompt: &Prompt) -> anyhow::Result<()>;

    /// Persist one settled completion. Its prompt must already be recorded.
    async fn record_completion(&self, completion: &Completion) -> anyhow::Result<()>;

    async fn prompt_by_id(&self, id: &str) -> anyhow::Result<Option<Prompt>>;

    /// Completions for a prompt, ordered by provider then id.
    async fn completions_for_prompt(&self, prompt_id: &str) -> anyhow::Result<Vec<Completion>>;

    /// Prompts recorded under a chat, oldest first.
    async fn prompts_for_chat(&self, chat_id: &str) -> anyhow::Result<Vec<Prompt>>;

    /// Full-text search over prompt and completion text.
    async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SearchHit>>;
}

/// Clip text for display in a search hit.
pub fn clip_snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        return text.to_string();
    }
    let clipped: String = text.chars().take(SNIPPET_CHARS - 3).collect();
    format!("{}...", clipped)
}

#[derive(Default)]
struct Records {
    prompts: Vec<Prompt>,
    completions: Vec<Completion>,
}

/// Keeps every record in process memory. Backs tests and ephemeral runs
/// where nothing should touch disk.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn prompt_count(&self) -> usize {
        self.records.lock().await.prompts.len()
    }

    pub async fn completion_count(&self) -> usize {
        self.records.lock().await.completions.len()
    }
}

#[async_trait]
impl ExchangeStore for MemoryStore {
    async fn record_prompt(&self, prompt: &Prompt) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        anyhow::ensure!(
            !records.prompts.iter().any(|p| p.id == prompt.id),
            "prompt {} already recorded",
            prompt.id
        );
        records.prompts.push(prompt.clone());
        Ok(())
    }

    async fn record_completion(&self, completion: &Completion) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        anyhow::ensure!(
            records.prompts.iter().any(|p| p.id == completion.prompt_id),
            "completion {} references unknown prompt {}",
            completion.id,
            completion.prompt_id
        );
        records.completions.push(completion.clone());
        Ok(())
    }

    async fn prompt_by_id(&self, id: &str) -> anyhow::Result<Option<Prompt>> {
        let records = self.records.lock().await;
        Ok(records.prompts.iter().find(|p| p.id == id).cloned())
    }

    async fn completions_for_prompt(&self, prompt_id: &str) -> anyhow::Result<Vec<Completion>> {
        let records = self.records.lock().await;
        let mut rows: Vec<Completion> = records
            .completions
            .iter()
            .filter(|c| c.prompt_id == prompt_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.provider.cmp(&b.provider).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn prompts_for_chat(&self, chat_id: &str) -> anyhow::Result<Vec<Prompt>> {
        let records = self.records.lock().await;
        let mut rows: Vec<Prompt> = records
            .prompts
            .iter()
            .filter(|p| p.chat_id.as_deref() == Some(chat_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SearchHit>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.records.lock().await;
        let mut hits = Vec::new();
        for prompt in &records.prompts {
            if prompt.text.to_lowercase().contains(&needle) {
                hits.push(SearchHit {
                    id: prompt.id.clone(),
                    kind: RecordKind::Prompt,
                    prompt_id: prompt.id.clone(),
                    provider: None,
                    score: 1.0,
                    snippet: clip_snippet(&prompt.text),
                });
            }
        }
        for completion in &records.completions {
            let Some(text) = &completion.text else {
                continue;
            };
            if text.to_lowercase().contains(&needle) {
                hits.push(SearchHit {
                    id: completion.id.clone(),
                    kind: RecordKind::Completion,
                    prompt_id: completion.prompt_id.clone(),
                    provider: Some(completion.provider.as_str().to_string()),
                    score: 1.0,
                    snippet: clip_snippet(text),
                });
            }
        }
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompletionOutcome, ProviderId};

    fn sample_prompt(chat_id: Option<&str>, text: &str) -> Prompt {
        Prompt::new("sess-1", chat_id, text)
    }

    #[tokio::test]
    async fn test_completion_requires_recorded_prompt() {
        let store = MemoryStore::new();
        let orphan = Completion::failed(
            "missing-prompt",
            ProviderId::new("docker"),
            CompletionOutcome::Failure,
            10,
        );
        let err = store.record_completion(&orphan).await.unwrap_err();
        assert!(err.to_string().contains("unknown prompt"));
    }

    #[tokio::test]
    async fn test_duplicate_prompt_rejected() {
        let store = MemoryStore::new();
        let prompt = sample_prompt(None, "hello");
        store.record_prompt(&prompt).await.unwrap();
        assert!(store.record_prompt(&prompt).await.is_err());
    }

    #[tokio::test]
    async fn test_completions_ordered_by_provider() {
        let store = MemoryStore::new();
        let prompt = sample_prompt(None, "hello");
        store.record_prompt(&prompt).await.unwrap();
        for name in ["ollama", "docker", "azure"] {
            let completion = Completion::success(
                &prompt.id,
                ProviderId::new(name),
                "answer".to_string(),
                "m".to_string(),
                None,
                5,
            );
            store.record_completion(&completion).await.unwrap();
        }
        let rows = store.completions_for_prompt(&prompt.id).await.unwrap();
        let providers: Vec<&str> = rows.iter().map(|c| c.provider.as_str()).collect();
        assert_eq!(providers, vec!["azure", "docker", "ollama"]);
    }

    #[tokio::test]
    async fn test_prompts_for_chat_filters_scope() {
        let store = MemoryStore::new();
        let in_chat = sample_prompt(Some("chat-1"), "first");
        let other_chat = sample_prompt(Some("chat-2"), "second");
        let no_chat = sample_prompt(None, "third");
        for p in [&in_chat, &other_chat, &no_chat] {
            store.record_prompt(p).await.unwrap();
        }
        let rows = store.prompts_for_chat("chat-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, in_chat.id);
        assert!(store.prompts_for_chat("chat-9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_covers_both_record_kinds() {
        let store = MemoryStore::new();
        let prompt = sample_prompt(None, "tell me about rust lifetimes");
        store.record_prompt(&prompt).await.unwrap();
        let completion = Completion::success(
            &prompt.id,
            ProviderId::new("docker"),
            "Lifetimes tie borrows to scopes.".to_string(),
            "m".to_string(),
            None,
            5,
        );
        store.record_completion(&completion).await.unwrap();

        let hits = store.search("lifetimes", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].kind, RecordKind::Prompt);
        assert_eq!(hits[1].kind, RecordKind::Completion);
        assert_eq!(hits[1].provider.as_deref(), Some("docker"));
        assert_eq!(hits[1].prompt_id, prompt.id);

        assert!(store.search("   ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_completions_not_searchable() {
        let store = MemoryStore::new();
        let prompt = sample_prompt(None, "ping");
        store.record_prompt(&prompt).await.unwrap();
        let lost = Completion::failed(
            &prompt.id,
            ProviderId::new("docker"),
            CompletionOutcome::Timeout,
            30_000,
        );
        store.record_completion(&lost).await.unwrap();
        assert!(store.search("timeout", 10).await.unwrap().is_empty());
        assert_eq!(store.completion_count().await, 1);
    }

    #[test]
    fn test_clip_snippet_bounds_length() {
        let long = "x".repeat(500);
        let clipped = clip_snippet(&long);
        assert_eq!(clipped.chars().count(), SNIPPET_CHARS);
        assert!(clipped.ends_with("..."));
        assert_eq!(clip_snippet("short"), "short");
    }

    #[test]
    fn test_record_kind_labels() {
        assert_eq!(RecordKind::Prompt.to_string(), "prompt");
        assert_eq!(RecordKind::from_string("completion"), RecordKind::Completion);
        assert_eq!(RecordKind::from_string("garbage"), RecordKind::Prompt);
    }
}
