use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity of a document in the store and of its summary in the index.
pub type DocumentKey = String;

/// Generated summary text as returned by the model.
pub type SummaryText = String;

/// A normalised notification that a document is available for processing.
/// Not unique: the transport may deliver the same (bucket, key) twice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestionEvent {
    pub bucket: String,
    pub key: DocumentKey,
    pub received_at: DateTime<Utc>,
}

impl IngestionEvent {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            received_at: Utc::now(),
        }
    }
}

/// Raw content fetched for one run. Owned by that run only.
#[derive(Debug, Clone)]
pub struct Document {
    pub bucket: String,
    pub key: DocumentKey,
    pub content: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl Document {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            content,
            fetched_at: Utc::now(),
        }
    }

    /// Hex SHA-256 of the raw content.
    pub fn content_sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.content))
    }

    /// The first `max_chars` characters of the content, lossily decoded.
    pub fn excerpt(&self, max_chars: usize) -> String {
        String::from_utf8_lossy(&self.content)
            .chars()
            .take(max_chars)
            .collect()
    }
}

/// The index entry for one document. `document_key` is its identity:
/// at most one live summary exists per key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub document_key: DocumentKey,

    pub text: SummaryText,

    /// Model identifier the summary was produced with.
    pub model_version: String,

    /// Decides which write wins when the same key is indexed twice.
    pub generated_at: DateTime<Utc>,

    pub bucket: String,

    /// Leading slice of the source document, kept for display.
    pub content_excerpt: String,

    pub content_sha256: String,
}

impl Summary {
    pub fn from_document(
        document: &Document,
        text: SummaryText,
        model_version: impl Into<String>,
        excerpt_chars: usize,
    ) -> Self {
        Self {
            document_key: document.key.clone(),
            text,
            model_version: model_version.into(),
            generated_at: Utc::now(),
            bucket: document.bucket.clone(),
            content_excerpt: document.excerpt(excerpt_chars),
            content_sha256: document.content_sha256(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_counts_chars_not_bytes() {
        let doc = Document::new("b1", "k.txt", "żółw ma skorupę".as_bytes().to_vec());
        assert_eq!(doc.excerpt(4), "żółw");
        assert_eq!(doc.excerpt(100), "żółw ma skorupę");
    }

    #[test]
    fn test_summary_from_document() {
        let doc = Document::new("b1", "reports/q1.txt", b"Revenue grew 10%.".to_vec());
        let summary = Summary::from_document(&doc, "Q1 revenue grew 10%.".into(), "model-a", 7);

        assert_eq!(summary.document_key, "reports/q1.txt");
        assert_eq!(summary.bucket, "b1");
        assert_eq!(summary.content_excerpt, "Revenue");
        assert_eq!(summary.content_sha256.len(), 64);
        assert!(summary.generated_at >= doc.fetched_at);
    }
}
