//! Tantivy full-text index over archived prompts and completions

use anyhow::{Context, Result};
use std::path::Path;
use tantivy::{
    Index, IndexWriter, ReloadPolicy, TantivyDocument,
    collector::TopDocs,
    query::QueryParser,
    schema::*,
};
use tracing::{debug, info};

use chorus_core::store::clip_snippet;
use chorus_core::{RecordKind, SearchHit};

/// Tantivy search index wrapper
pub struct SearchIndex {
    index: Index,
    #[allow(dead_code)]
    schema: Schema,
    id_field: Field,
    kind_field: Field,
    prompt_id_field: Field,
    provider_field: Field,
    content_field: Field,
    recorded_at_field: Field,
}

impl SearchIndex {
    /// Create or open a Tantivy index
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Initializing search index at {:?}", path.as_ref());

        std::fs::create_dir_all(path.as_ref())?;

        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let kind_field = schema_builder.add_text_field("kind", STRING | STORED);
        let prompt_id_field = schema_builder.add_text_field("prompt_id", STRING | STORED);
        let provider_field = schema_builder.add_text_field("provider", STRING | STORED);
        let content_field = schema_builder.add_text_field("content", TEXT | STORED);
        let recorded_at_field = schema_builder.add_text_field("recorded_at", STRING | STORED);
        let schema = schema_builder.build();

        let index = if path.as_ref().join("meta.json").exists() {
            Index::open_in_dir(path.as_ref())?
        } else {
            Index::create_in_dir(path.as_ref(), schema.clone())?
        };

        debug!("Search index initialized successfully");

        Ok(Self {
            index,
            schema,
            id_field,
            kind_field,
            prompt_id_field,
            provider_field,
            content_field,
            recorded_at_field,
        })
    }

    /// Index one record, replacing any previous document with the same id
    pub fn index_record(
        &self,
        id: &str,
        kind: RecordKind,
        prompt_id: &str,
        provider: Option<&str>,
        content: &str,
        recorded_at: &str,
    ) -> Result<()> {
        let mut writer = self.get_writer()?;

        let id_query = tantivy::query::TermQuery::new(
            tantivy::Term::from_field_text(self.id_field, id),
            tantivy::schema::IndexRecordOption::Basic,
        );
        let _ = writer.delete_query(Box::new(id_query));

        let mut doc = TantivyDocument::default();
        doc.add_text(self.id_field, id);
        doc.add_text(self.kind_field, kind.to_string());
        doc.add_text(self.prompt_id_field, prompt_id);
        doc.add_text(self.provider_field, provider.unwrap_or(""));
        doc.add_text(self.content_field, content);
        doc.add_text(self.recorded_at_field, recorded_at);

        writer.add_document(doc)?;
        writer.commit()?;

        debug!("Indexed record: {} ({})", id, kind);
        Ok(())
    }

    /// Search record content
    pub fn search(&self, query_str: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;

        let searcher = reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let query = query_parser
            .parse_query(query_str)
            .context("Failed to parse search query")?;

        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::new();
        for (score, doc_address) in top_docs {
            let retrieved_doc: TantivyDocument = searcher.doc(doc_address)?;

            let field_text = |field: Field| -> String {
                retrieved_doc
                    .get_first(field)
                    .and_then(|v: &tantivy::schema::OwnedValue| v.as_str())
                    .unwrap_or("")
                    .to_string()
            };

            let provider = field_text(self.provider_field);
            let content = field_text(self.content_field);

            results.push(SearchHit {
                id: field_text(self.id_field),
                kind: RecordKind::from_string(&field_text(self.kind_field)),
                prompt_id: field_text(self.prompt_id_field),
                provider: (!provider.is_empty()).then_some(provider),
                score,
                snippet: clip_snippet(&content),
            });
        }

        debug!(
            "Search for '{}' returned {} results",
            query_str,
            results.len()
        );
        Ok(results)
    }

    /// Get index writer
    fn get_writer(&self) -> Result<IndexWriter> {
        // 50MB heap size for writer
        self.index
            .writer(50_000_000)
            .context("Failed to create index writer")
    }
}
