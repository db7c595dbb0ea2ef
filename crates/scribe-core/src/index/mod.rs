mod redb_index;

pub use redb_index::RedbSummaryIndex;

use crate::error::Result;
use crate::types::Summary;
use async_trait::async_trait;
use std::sync::Arc;

/// What an upsert did to the entry for its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No entry existed for the key.
    Created,
    /// An older entry was overwritten.
    Replaced,
    /// A newer entry already existed and was kept.
    Superseded,
}

/// Search index holding one summary per document key.
///
/// `upsert` overwrites: repeated writes for a key converge to a single
/// entry, the one with the latest `generated_at`. Failures that may clear up
/// are reported as `IndexUnavailable`; implementations never retry.
#[async_trait]
pub trait SummaryIndex: Send + Sync {
    async fn upsert(&self, summary: &Summary) -> Result<UpsertOutcome>;

    async fn get(&self, document_key: &str) -> Result<Option<Summary>>;

    /// Case-insensitive substring match over key and summary text.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Summary>>;

    async fn count(&self) -> Result<u64>;

    /// Index identifier (used in logs).
    fn name(&self) -> &str;
}

#[async_trait]
impl<I: SummaryIndex + ?Sized> SummaryIndex for Arc<I> {
    async fn upsert(&self, summary: &Summary) -> Result<UpsertOutcome> {
        (**self).upsert(summary).await
    }

    async fn get(&self, document_key: &str) -> Result<Option<Summary>> {
        (**self).get(document_key).await
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Summary>> {
        (**self).search(query, limit).await
    }

    async fn count(&self) -> Result<u64> {
        (**self).count().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Writes finished summaries into the index.
#[derive(Clone)]
pub struct IndexWriter {
    index: Arc<dyn SummaryIndex>,
}

impl IndexWriter {
    pub fn new(index: Arc<dyn SummaryIndex>) -> Self {
        Self { index }
    }

    pub async fn upsert(&self, summary: &Summary) -> Result<UpsertOutcome> {
        self.index.upsert(summary).await
    }

    pub fn index(&self) -> &Arc<dyn SummaryIndex> {
        &self.index
    }
}

/// Whether `summary` matches a lowercase query.
pub(crate) fn matches_query(summary: &Summary, query_lower: &str) -> bool {
    query_lower.is_empty()
        || summary.document_key.to_lowercase().contains(query_lower)
        || summary.text.to_lowercase().contains(query_lower)
}
