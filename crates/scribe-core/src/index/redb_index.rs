use super::{matches_query, SummaryIndex, UpsertOutcome};
use crate::error::{Result, ScribeError};
use crate::types::Summary;
use async_trait::async_trait;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// document_key -> bincode(Summary)
const SUMMARIES: TableDefinition<&str, &[u8]> = TableDefinition::new("summaries");

/// Embedded summary index backed by redb.
///
/// Each upsert runs in one write transaction, so the compare-and-replace on
/// `generated_at` is atomic with respect to concurrent writers.
pub struct RedbSummaryIndex {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbSummaryIndex {
    /// Open or create an index at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ScribeError::Config(format!("Failed to create directory: {}", e))
            })?;
        }

        let db = Database::create(&path)?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SUMMARIES)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn serialize(summary: &Summary) -> Result<Vec<u8>> {
        bincode::serialize(summary).map_err(ScribeError::from)
    }

    fn deserialize(bytes: &[u8]) -> Result<Summary> {
        bincode::deserialize(bytes).map_err(ScribeError::from)
    }

    /// Run a redb operation on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| ScribeError::IndexUnavailable(format!("index task failed: {}", e)))?
    }
}

#[async_trait]
impl SummaryIndex for RedbSummaryIndex {
    async fn upsert(&self, summary: &Summary) -> Result<UpsertOutcome> {
        let summary = summary.clone();
        self.blocking(move |db| {
            let bytes = Self::serialize(&summary)?;
            let key = summary.document_key.as_str();

            let write_txn = db.begin_write()?;
            let outcome = {
                let mut table = write_txn.open_table(SUMMARIES)?;
                let existing = match table.get(key)? {
                    Some(guard) => match Self::deserialize(guard.value()) {
                        Ok(current) => Some(Some(current)),
                        Err(e) => {
                            log::warn!("Overwriting undecodable summary for {}: {}", key, e);
                            Some(None)
                        }
                    },
                    None => None,
                };

                match existing {
                    Some(Some(current)) if current.generated_at > summary.generated_at => {
                        UpsertOutcome::Superseded
                    }
                    Some(_) => {
                        table.insert(key, bytes.as_slice())?;
                        UpsertOutcome::Replaced
                    }
                    None => {
                        table.insert(key, bytes.as_slice())?;
                        UpsertOutcome::Created
                    }
                }
            };
            write_txn.commit()?;

            Ok(outcome)
        })
        .await
    }

    async fn get(&self, document_key: &str) -> Result<Option<Summary>> {
        let document_key = document_key.to_string();
        self.blocking(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(SUMMARIES)?;
            let result = match table.get(document_key.as_str())? {
                Some(guard) => Some(Self::deserialize(guard.value())?),
                None => None,
            };
            Ok(result)
        })
        .await
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Summary>> {
        let query_lower = query.to_lowercase();
        self.blocking(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(SUMMARIES)?;

            let mut results = Vec::new();
            for entry in table.iter()? {
                if results.len() >= limit {
                    break;
                }
                let (key, value) = entry?;
                let summary = match Self::deserialize(value.value()) {
                    Ok(summary) => summary,
                    Err(e) => {
                        log::warn!("Skipping undecodable summary {}: {}", key.value(), e);
                        continue;
                    }
                };
                if matches_query(&summary, &query_lower) {
                    results.push(summary);
                }
            }
            Ok(results)
        })
        .await
    }

    async fn count(&self) -> Result<u64> {
        self.blocking(|db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(SUMMARIES)?;
            Ok(table.len()?)
        })
        .await
    }

    fn name(&self) -> &str {
        "redb"
    }
}
