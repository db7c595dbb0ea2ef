pub mod types;
pub mod error;
pub mod config;
pub mod retry;
pub mod trigger;
pub mod gate;
pub mod fetch;
pub mod summarize;
pub mod index;
pub mod coordinator;

pub use error::{FailureClass, Result, ScribeError};
pub use types::*;
pub use config::{PipelineConfig, DEFAULT_MODEL_ID};
pub use retry::BackoffPolicy;
pub use trigger::{Acknowledger, Delivery, TriggerAdapter, TriggerSource};
pub use gate::{ConcurrencyGate, ConcurrencySlot};
pub use fetch::{DocumentFetcher, DocumentStore, FsDocumentStore, MemoryDocumentStore};
pub use summarize::{summary_prompt, SummarizationInvoker, SummarizationService};
pub use index::{IndexWriter, RedbSummaryIndex, SummaryIndex, UpsertOutcome};
pub use coordinator::{
    BatchReport, Disposition, NoopObserver, PipelineCoordinator, RetryStage, RunFailure,
    RunId, RunObserver, RunOutcome, RunReport, RunStage, StageAttempts,
};
