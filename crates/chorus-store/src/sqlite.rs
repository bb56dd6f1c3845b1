//! SQLite layer for the exchange archive

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use chorus_core::{Completion, CompletionOutcome, Prompt, ProviderId, TokenUsage};

/// SQLite database wrapper (thread-safe via Arc<Mutex>)
pub struct ArchiveDb {
    conn: Arc<Mutex<Connection>>,
}

impl ArchiveDb {
    /// Initialize database with schema
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).context("Failed to open SQLite database")?;

        info!("Initializing exchange archive at {:?}", path.as_ref());
        warn!(
            "Exchange archive is NOT encrypted. Prompts and completions are stored in plaintext at {:?}",
            path.as_ref()
        );

        // Enable foreign keys
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS prompts (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                chat_id TEXT,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS completions (
                id TEXT PRIMARY KEY,
                prompt_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT,
                text TEXT,
                prompt_tokens INTEGER,
                completion_tokens INTEGER,
                total_tokens INTEGER,
                execution_time_ms INTEGER NOT NULL,
                completed_at TEXT NOT NULL,
                outcome TEXT NOT NULL,
                FOREIGN KEY(prompt_id) REFERENCES prompts(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_completions_prompt ON completions(prompt_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_prompts_chat ON prompts(chat_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_prompts_created ON prompts(created_at)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a prompt record
    pub async fn insert_prompt(&self, prompt: &Prompt) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let prompt = prompt.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });

            conn.execute(
                "INSERT INTO prompts (id, session_id, chat_id, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    &prompt.id,
                    &prompt.session_id,
                    prompt.chat_id.as_deref(),
                    &prompt.text,
                    prompt.created_at.to_rfc3339(),
                ],
            )?;

            debug!("Inserted prompt: {}", prompt.id);
            Ok(())
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Insert a completion record; its prompt row must already exist
    pub async fn insert_completion(&self, completion: &Completion) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let completion = completion.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });

            conn.execute(
                "INSERT INTO completions
                 (id, prompt_id, provider, model, text,
                  prompt_tokens, completion_tokens, total_tokens,
                  execution_time_ms, completed_at, outcome)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    &completion.id,
                    &completion.prompt_id,
                    completion.provider.as_str(),
                    completion.model.as_deref(),
                    completion.text.as_deref(),
                    completion.usage.map(|u| u.prompt_tokens),
                    completion.usage.map(|u| u.completion_tokens),
                    completion.usage.map(|u| u.total_tokens),
                    completion.execution_time_ms as i64,
                    completion.completed_at.to_rfc3339(),
                    completion.outcome.to_string(),
                ],
            )?;

            debug!(
                "Inserted completion: {} ({} {})",
                completion.id,
                completion.provider,
                completion.outcome
            );
            Ok(())
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Get a prompt by ID
    pub async fn get_prompt(&self, id: &str) -> Result<Option<Prompt>> {
        let conn = Arc::clone(&self.conn);
        let id = id.to_owned();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            let result = conn
                .query_row(
                    "SELECT id, session_id, chat_id, text, created_at
                     FROM prompts WHERE id = ?1",
                    params![&id],
                    Self::row_to_prompt,
                )
                .optional()?;

            Ok(result)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Completions for a prompt, in provider-identity order
    pub async fn get_completions(&self, prompt_id: &str) -> Result<Vec<Completion>> {
        let conn = Arc::clone(&self.conn);
        let prompt_id = prompt_id.to_owned();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            let mut stmt = conn.prepare(
                "SELECT id, prompt_id, provider, model, text,
                        prompt_tokens, completion_tokens, total_tokens,
                        execution_time_ms, completed_at, outcome
                 FROM completions
                 WHERE prompt_id = ?1
                 ORDER BY provider ASC, id ASC",
            )?;

            let completions = stmt
                .query_map(params![&prompt_id], Self::row_to_completion)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(completions)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Prompts recorded under a chat, oldest first
    pub async fn get_prompts_by_chat(&self, chat_id: &str) -> Result<Vec<Prompt>> {
        let conn = Arc::clone(&self.conn);
        let chat_id = chat_id.to_owned();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            let mut stmt = conn.prepare(
                "SELECT id, session_id, chat_id, text, created_at
                 FROM prompts
                 WHERE chat_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;

            let prompts = stmt
                .query_map(params![&chat_id], Self::row_to_prompt)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(prompts)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Helper to convert row to Prompt
    fn row_to_prompt(row: &rusqlite::Row) -> rusqlite::Result<Prompt> {
        Ok(Prompt {
            id: row.get(0)?,
            session_id: row.get(1)?,
            chat_id: row.get(2)?,
            text: row.get(3)?,
            created_at: row
                .get::<_, String>(4)?
                .parse()
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    /// Helper to convert row to Completion
    fn row_to_completion(row: &rusqlite::Row) -> rusqlite::Result<Completion> {
        let provider: String = row.get(2)?;
        let prompt_tokens: Option<u32> = row.get(5)?;
        let completion_tokens: Option<u32> = row.get(6)?;
        let total_tokens: Option<u32> = row.get(7)?;
        let usage = match (prompt_tokens, completion_tokens, total_tokens) {
            (Some(prompt_tokens), Some(completion_tokens), Some(total_tokens)) => {
                Some(TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens,
                })
            }
            _ => None,
        };
        let outcome: String = row.get(10)?;

        Ok(Completion {
            id: row.get(0)?,
            prompt_id: row.get(1)?,
            provider: ProviderId::new(&provider),
            model: row.get(3)?,
            text: row.get(4)?,
            usage,
            execution_time_ms: row.get::<_, i64>(8)? as u64,
            completed_at: row
                .get::<_, String>(9)?
                .parse()
                .unwrap_or_else(|_| Utc::now()),
            outcome: CompletionOutcome::from_string(&outcome),
        })
    }
}
