use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScribeError>;

/// How a failed run is reported to the trigger mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Leave the event unacknowledged so the transport re-delivers it.
    Retryable,
    /// Acknowledge the event; re-delivery cannot succeed.
    Fatal,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::Retryable => write!(f, "retryable"),
            FailureClass::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScribeError {
    #[error("Throttled: {0}")]
    Throttled(String),

    #[error("Transient fetch error for {key}: {reason}")]
    TransientFetch { key: String, reason: String },

    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid document {key}: {reason}")]
    InvalidDocument { key: String, reason: String },

    #[error("Authentication failure: {0}")]
    AuthFailure(String),

    #[error("Summarization unavailable after {attempts} attempts: {last_error}")]
    SummarizationUnavailable { attempts: u32, last_error: String },

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Malformed trigger payload: {0}")]
    MalformedTrigger(String),

    #[error("Run exceeded timeout of {0:?}")]
    RunTimeout(std::time::Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Trigger transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage operation error: {0}")]
    StorageOperation(#[from] redb::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl ScribeError {
    /// Terminal classification used for acknowledgement decisions.
    pub fn class(&self) -> FailureClass {
        match self {
            ScribeError::Throttled(_)
            | ScribeError::TransientFetch { .. }
            | ScribeError::SummarizationUnavailable { .. }
            | ScribeError::IndexUnavailable(_)
            | ScribeError::RunTimeout(_)
            | ScribeError::Transport(_)
            | ScribeError::Storage(_)
            | ScribeError::Database(_)
            | ScribeError::Table(_)
            | ScribeError::Transaction(_)
            | ScribeError::Commit(_)
            | ScribeError::StorageOperation(_)
            | ScribeError::Serialization(_) => FailureClass::Retryable,
            ScribeError::NotFound { .. }
            | ScribeError::InvalidDocument { .. }
            | ScribeError::AuthFailure(_)
            | ScribeError::MalformedTrigger(_)
            | ScribeError::Config(_) => FailureClass::Fatal,
        }
    }

    /// Whether a stage-level retry loop may repeat the call that produced
    /// this error. Throttling from the gate is not in this set: it is
    /// retried by re-delivery, not inside the run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScribeError::TransientFetch { .. }
                | ScribeError::IndexUnavailable(_)
                | ScribeError::Storage(_)
                | ScribeError::Database(_)
                | ScribeError::Table(_)
                | ScribeError::Transaction(_)
                | ScribeError::Commit(_)
                | ScribeError::StorageOperation(_)
        )
    }

    /// Short machine-friendly label, used as a metrics label and in logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ScribeError::Throttled(_) => "throttled",
            ScribeError::TransientFetch { .. } => "transient_fetch",
            ScribeError::NotFound { .. } => "not_found",
            ScribeError::InvalidDocument { .. } => "invalid_document",
            ScribeError::AuthFailure(_) => "auth_failure",
            ScribeError::SummarizationUnavailable { .. } => "summarization_unavailable",
            ScribeError::IndexUnavailable(_) => "index_unavailable",
            ScribeError::MalformedTrigger(_) => "malformed_trigger",
            ScribeError::RunTimeout(_) => "run_timeout",
            ScribeError::Config(_) => "config",
            ScribeError::Transport(_) => "transport",
            ScribeError::Storage(_)
            | ScribeError::Database(_)
            | ScribeError::Table(_)
            | ScribeError::Transaction(_)
            | ScribeError::Commit(_)
            | ScribeError::StorageOperation(_)
            | ScribeError::Serialization(_) => "index_unavailable",
        }
    }
}
