use crate::error::{FailureClass, ScribeError};
use crate::index::UpsertOutcome;
use crate::types::IngestionEvent;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Identifies one pass of an event through the pipeline (UUIDv7).
pub type RunId = Uuid;

/// Stage a run has reached. Runs only move forward; any stage may fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RunStage {
    Received,
    /// Concurrency slot acquired.
    Admitted,
    Fetched,
    Summarized,
    Indexed,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Received => "received",
            RunStage::Admitted => "admitted",
            RunStage::Fetched => "fetched",
            RunStage::Summarized => "summarized",
            RunStage::Indexed => "indexed",
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which retried call a retry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryStage {
    Fetch,
    Summarize,
    Index,
}

impl RetryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStage::Fetch => "fetch",
            RetryStage::Summarize => "summarize",
            RetryStage::Index => "index",
        }
    }
}

/// Why a run failed, and the last stage it completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    /// Last stage reached before the failure.
    pub stage: RunStage,
    /// Short label from the error taxonomy, e.g. `not_found`.
    pub reason: &'static str,
    pub message: String,
}

impl RunFailure {
    pub fn from_error(stage: RunStage, error: &ScribeError) -> Self {
        Self {
            stage,
            reason: error.reason(),
            message: error.to_string(),
        }
    }
}

/// Terminal status of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Indexed {
        generated_at: DateTime<Utc>,
        upsert: UpsertOutcome,
    },
    Fatal(RunFailure),
    Retryable(RunFailure),
}

impl RunOutcome {
    pub fn failed(stage: RunStage, error: &ScribeError) -> Self {
        let failure = RunFailure::from_error(stage, error);
        match error.class() {
            FailureClass::Fatal => RunOutcome::Fatal(failure),
            FailureClass::Retryable => RunOutcome::Retryable(failure),
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            RunOutcome::Indexed { .. } | RunOutcome::Fatal(_) => Disposition::Ack,
            RunOutcome::Retryable(_) => Disposition::Nack,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            RunOutcome::Indexed { .. } => "indexed",
            RunOutcome::Fatal(_) => "fatal",
            RunOutcome::Retryable(_) => "retryable",
        }
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            RunOutcome::Indexed { .. } => None,
            RunOutcome::Fatal(f) | RunOutcome::Retryable(f) => Some(f.reason),
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, RunOutcome::Indexed { .. })
    }
}

/// What the trigger mechanism should do with the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Mark consumed.
    Ack,
    /// Leave unconsumed for re-delivery.
    Nack,
}

/// Transient state of one event moving through the pipeline. Lives only
/// for the duration of processing.
#[derive(Debug)]
pub(crate) struct PipelineRun {
    pub run_id: RunId,
    pub event: IngestionEvent,
    pub stage: RunStage,
    pub attempts: StageAttempts,
    pub started: Instant,
}

impl PipelineRun {
    pub fn new(event: IngestionEvent) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            event,
            stage: RunStage::Received,
            attempts: StageAttempts::default(),
            started: Instant::now(),
        }
    }

    pub fn advance(&mut self, stage: RunStage) {
        debug_assert!(stage > self.stage, "runs only move forward");
        log::debug!(
            "run {} {}/{}: {} -> {}",
            self.run_id,
            self.event.bucket,
            self.event.key,
            self.stage,
            stage
        );
        self.stage = stage;
    }

    pub fn finish(self, outcome: RunOutcome) -> RunReport {
        RunReport {
            run_id: self.run_id,
            event: self.event,
            last_stage: self.stage,
            attempts: self.attempts,
            duration: self.started.elapsed(),
            outcome,
        }
    }
}

/// Calls made per retried stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageAttempts {
    pub fetch: u32,
    pub summarize: u32,
    pub index: u32,
}

/// Record of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub event: IngestionEvent,
    pub last_stage: RunStage,
    pub attempts: StageAttempts,
    pub duration: Duration,
    pub outcome: RunOutcome,
}

/// Result of handling one notification payload.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub runs: Vec<RunReport>,
    /// Records that could not be turned into events.
    pub rejected: Vec<RunFailure>,
}

impl BatchReport {
    /// `Nack` if any run is retryable; malformed records are consumed.
    pub fn disposition(&self) -> Disposition {
        if self
            .runs
            .iter()
            .any(|r| r.outcome.disposition() == Disposition::Nack)
        {
            Disposition::Nack
        } else {
            Disposition::Ack
        }
    }

    pub fn indexed(&self) -> usize {
        self.runs.iter().filter(|r| r.outcome.is_indexed()).count()
    }
}
