//! Archive facade combining SQLite rows and the search index

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use chorus_core::{Completion, ExchangeStore, Prompt, RecordKind, SearchHit};

use crate::sqlite::ArchiveDb;
use crate::tantivy::SearchIndex;

/// Durable exchange store: rows in SQLite, text in Tantivy.
///
/// The row write comes first; a record that failed to index is still
/// retrievable by id, just not searchable.
pub struct Archive {
    db: Arc<ArchiveDb>,
    index: SearchIndex,
}

impl Archive {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(db_path: P, index_path: Q) -> Result<Self> {
        info!(
            "Initializing archive with db at {:?} and index at {:?}",
            db_path.as_ref(),
            index_path.as_ref()
        );

        let db = Arc::new(ArchiveDb::new(db_path)?);
        let index = SearchIndex::new(index_path)?;

        Ok(Self { db, index })
    }
}

#[async_trait]
impl ExchangeStore for Archive {
    async fn record_prompt(&self, prompt: &Prompt) -> Result<()> {
        self.db.insert_prompt(prompt).await?;
        self.index.index_record(
            &prompt.id,
            RecordKind::Prompt,
            &prompt.id,
            None,
            &prompt.text,
            &prompt.created_at.to_rfc3339(),
        )?;
        debug!("Archived prompt {}", prompt.id);
        Ok(())
    }

    async fn record_completion(&self, completion: &Completion) -> Result<()> {
        self.db.insert_completion(completion).await?;
        // Failures and timeouts have no text; they stay row-only.
        if let Some(text) = &completion.text {
            self.index.index_record(
                &completion.id,
                RecordKind::Completion,
                &completion.prompt_id,
                Some(completion.provider.as_str()),
                text,
                &completion.completed_at.to_rfc3339(),
            )?;
        }
        debug!(
            "Archived completion {} ({})",
            completion.id, completion.outcome
        );
        Ok(())
    }

    async fn prompt_by_id(&self, id: &str) -> Result<Option<Prompt>> {
        self.db.get_prompt(id).await
    }

    async fn completions_for_prompt(&self, prompt_id: &str) -> Result<Vec<Completion>> {
        self.db.get_completions(prompt_id).await
    }

    async fn prompts_for_chat(&self, chat_id: &str) -> Result<Vec<Prompt>> {
        self.db.get_prompts_by_chat(chat_id).await
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.index.search(query, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::{CompletionOutcome, ProviderId};
    use std::env;
    use uuid::Uuid;

    fn temp_paths() -> (std::path::PathBuf, std::path::PathBuf) {
        let tag = Uuid::new_v4();
        (
            env::temp_dir().join(format!("chorus_archive_{tag}.db")),
            env::temp_dir().join(format!("chorus_archive_idx_{tag}")),
        )
    }

    #[tokio::test]
    async fn test_record_then_read_back() -> Result<()> {
        let (db_path, index_path) = temp_paths();
        let archive = Archive::new(&db_path, &index_path)?;

        let prompt = Prompt::new("sess-1", Some("chat-1"), "compare rust and go briefly");
        archive.record_prompt(&prompt).await?;

        let ok = Completion::success(
            &prompt.id,
            ProviderId::new("ollama"),
            "Rust favors control, Go favors simplicity.".to_string(),
            "llama3:8b".to_string(),
            None,
            900,
        );
        let lost = Completion::failed(
            &prompt.id,
            ProviderId::new("docker"),
            CompletionOutcome::Timeout,
            30_000,
        );
        archive.record_completion(&ok).await?;
        archive.record_completion(&lost).await?;

        // Read-after-write on the same record
        let loaded = archive.prompt_by_id(&prompt.id).await?.unwrap();
        assert_eq!(loaded.text, "compare rust and go briefly");

        let completions = archive.completions_for_prompt(&prompt.id).await?;
        assert_eq!(completions.len(), 2);
        assert_eq!(completions[0].provider.as_str(), "docker");
        assert_eq!(completions[0].outcome, CompletionOutcome::Timeout);
        assert_eq!(completions[1].provider.as_str(), "ollama");

        let history = archive.prompts_for_chat("chat-1").await?;
        assert_eq!(history.len(), 1);

        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_dir_all(&index_path);
        Ok(())
    }

    #[tokio::test]
    async fn test_search_spans_kinds_but_not_failures() -> Result<()> {
        let (db_path, index_path) = temp_paths();
        let archive = Archive::new(&db_path, &index_path)?;

        let prompt = Prompt::new("sess-1", None, "what is a borrow checker");
        archive.record_prompt(&prompt).await?;
        let ok = Completion::success(
            &prompt.id,
            ProviderId::new("ollama"),
            "The borrow checker enforces aliasing rules.".to_string(),
            "llama3:8b".to_string(),
            None,
            5,
        );
        let lost = Completion::failed(
            &prompt.id,
            ProviderId::new("docker"),
            CompletionOutcome::Failure,
            5,
        );
        archive.record_completion(&ok).await?;
        archive.record_completion(&lost).await?;

        let hits = archive.search("borrow", 10).await?;
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.prompt_id == prompt.id));
        assert!(hits.iter().any(|h| h.kind == RecordKind::Prompt));
        assert!(
            hits.iter()
                .any(|h| h.provider.as_deref() == Some("ollama"))
        );
        // The failed completion never reaches the index.
        assert!(!hits.iter().any(|h| h.id == lost.id));

        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_dir_all(&index_path);
        Ok(())
    }
}
