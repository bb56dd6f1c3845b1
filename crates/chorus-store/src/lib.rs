//! Durable archive for chorus exchanges
//!
//! This crate provides:
//! - SQLite storage for prompts and their per-provider completions
//! - Tantivy full-text search over exchange text
//! - The Archive facade implementing the core storage seam

pub mod archive;
pub mod sqlite;
pub mod tantivy;

// Re-export main types
pub use archive::Archive;
pub use sqlite::ArchiveDb;
pub use tantivy::SearchIndex;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use chorus_core::{ExchangeStore, Prompt};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_archive_behind_the_trait() -> Result<()> {
        let tag = uuid::Uuid::new_v4();
        let db_path = std::env::temp_dir().join(format!("chorus_store_{tag}.db"));
        let index_path = std::env::temp_dir().join(format!("chorus_store_idx_{tag}"));

        let store: Arc<dyn ExchangeStore> = Arc::new(Archive::new(&db_path, &index_path)?);

        let prompt = Prompt::new("sess", None, "hello archive");
        store.record_prompt(&prompt).await?;
        assert!(store.prompt_by_id(&prompt.id).await?.is_some());
        assert_eq!(store.search("archive", 5).await?.len(), 1);

        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_dir_all(&index_path);
        Ok(())
    }
}
