mod run;

pub use run::{
    BatchReport, Disposition, RetryStage, RunFailure, RunId, RunOutcome, RunReport, RunStage,
    StageAttempts,
};

use crate::config::PipelineConfig;
use crate::error::{FailureClass, Result, ScribeError};
use crate::fetch::{DocumentFetcher, DocumentStore};
use crate::gate::ConcurrencyGate;
use crate::index::{IndexWriter, SummaryIndex, UpsertOutcome};
use crate::retry::BackoffPolicy;
use crate::summarize::{SummarizationInvoker, SummarizationService};
use crate::trigger::TriggerAdapter;
use crate::types::{Document, IngestionEvent, Summary, SummaryText};
use run::PipelineRun;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Hooks for observing runs. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn retry_scheduled(&self, _stage: RetryStage, _attempt: u32, _delay: Duration, _error: &ScribeError) {}

    fn summarization_started(&self) {}

    fn summarization_finished(&self) {}

    fn trigger_rejected(&self, _error: &ScribeError) {}

    fn run_finished(&self, _report: &RunReport) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Sequences fetch → summarise → index for each event and maps every
/// outcome to a terminal status.
///
/// The coordinator is the only place that retries or decides between
/// retry, drop and escalation. Runs are independent; any number may be in
/// progress at once, but summarisation only happens inside a slot of the
/// shared [`ConcurrencyGate`].
#[derive(Clone)]
pub struct PipelineCoordinator {
    config: Arc<PipelineConfig>,
    adapter: TriggerAdapter,
    gate: ConcurrencyGate,
    fetcher: DocumentFetcher,
    invoker: SummarizationInvoker,
    writer: IndexWriter,
    observer: Arc<dyn RunObserver>,
}

impl PipelineCoordinator {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn DocumentStore>,
        service: Arc<dyn SummarizationService>,
        index: Arc<dyn SummaryIndex>,
    ) -> Result<Self> {
        config.validate()?;

        let gate = ConcurrencyGate::new(config.max_concurrency, config.slot_lease());
        let invoker = SummarizationInvoker::new(service, config.model_id.clone(), config.max_tokens);

        Ok(Self {
            adapter: TriggerAdapter::new(config.suffix_filter.clone()),
            gate,
            fetcher: DocumentFetcher::new(store),
            invoker,
            writer: IndexWriter::new(index),
            observer: Arc::new(NoopObserver),
            config: Arc::new(config),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn adapter(&self) -> &TriggerAdapter {
        &self.adapter
    }

    pub fn index(&self) -> &Arc<dyn SummaryIndex> {
        self.writer.index()
    }

    /// Translate a raw notification and process every admitted event.
    /// Events from one payload run concurrently.
    pub async fn handle_notification(&self, payload: &[u8]) -> BatchReport {
        let mut report = BatchReport::default();
        let mut events = Vec::new();

        for result in self.adapter.translate(payload) {
            match result {
                Ok(event) => events.push(event),
                Err(e) => {
                    log::error!("Rejected trigger record: {}", e);
                    self.observer.trigger_rejected(&e);
                    report
                        .rejected
                        .push(RunFailure::from_error(RunStage::Received, &e));
                }
            }
        }

        report.runs = futures::future::join_all(events.into_iter().map(|e| self.process(e))).await;
        report
    }

    /// Run one event to a terminal status. Never panics on pipeline errors;
    /// every failure is folded into the returned report.
    pub async fn process(&self, event: IngestionEvent) -> RunReport {
        let mut run = PipelineRun::new(event);
        let timeout = self.config.run_timeout();

        log::info!(
            "run {} started for {}/{}",
            run.run_id,
            run.event.bucket,
            run.event.key
        );

        // The slot, if held, is dropped with the future on timeout.
        let result = tokio::time::timeout(timeout, self.execute(&mut run)).await;

        let outcome = match result {
            Ok(Ok((summary, upsert))) => RunOutcome::Indexed {
                generated_at: summary.generated_at,
                upsert,
            },
            Ok(Err(e)) => RunOutcome::failed(run.stage, &e),
            Err(_) => RunOutcome::failed(run.stage, &ScribeError::RunTimeout(timeout)),
        };

        let report = run.finish(outcome);
        log_report(&report);
        self.observer.run_finished(&report);
        report
    }

    async fn execute(&self, run: &mut PipelineRun) -> Result<(Summary, UpsertOutcome)> {
        let slot = self.gate.acquire(self.config.slot_acquire_timeout()).await?;
        run.advance(RunStage::Admitted);

        let document = self.fetch_stage(run).await?;
        run.advance(RunStage::Fetched);

        let text = self.summarize_stage(run, &document).await?;
        if !self.gate.release(slot) {
            log::warn!(
                "run {}: concurrency lease expired before summarisation finished",
                run.run_id
            );
        }
        run.advance(RunStage::Summarized);

        let summary = Summary::from_document(
            &document,
            text,
            self.invoker.model_id(),
            self.config.excerpt_chars,
        );
        let upsert = self.index_stage(run, &summary).await?;
        run.advance(RunStage::Indexed);

        Ok((summary, upsert))
    }

    async fn fetch_stage(&self, run: &mut PipelineRun) -> Result<Document> {
        let fetcher = &self.fetcher;
        let (bucket, key) = (run.event.bucket.as_str(), run.event.key.as_str());
        let (result, attempts) = self
            .with_retry(
                RetryStage::Fetch,
                &self.config.fetch_policy(),
                ScribeError::is_transient,
                move || fetcher.fetch(bucket, key),
            )
            .await;
        run.attempts.fetch = attempts;
        result
    }

    async fn summarize_stage(&self, run: &mut PipelineRun, document: &Document) -> Result<SummaryText> {
        let invoker = &self.invoker;
        let observer = &self.observer;
        let (result, attempts) = self
            .with_retry(
                RetryStage::Summarize,
                &self.config.summarization_backoff,
                |e| matches!(e, ScribeError::Throttled(_)),
                move || async move {
                    let _in_flight = InFlight::start(observer.as_ref());
                    invoker.summarize(document).await
                },
            )
            .await;
        run.attempts.summarize = attempts;

        result.map_err(|e| match e {
            ScribeError::Throttled(last_error) => ScribeError::SummarizationUnavailable {
                attempts,
                last_error,
            },
            other => other,
        })
    }

    async fn index_stage(&self, run: &mut PipelineRun, summary: &Summary) -> Result<UpsertOutcome> {
        let writer = &self.writer;
        let (result, attempts) = self
            .with_retry(
                RetryStage::Index,
                &self.config.index_policy(),
                ScribeError::is_transient,
                move || writer.upsert(summary),
            )
            .await;
        run.attempts.index = attempts;
        result
    }

    /// Call `op` until it succeeds, fails with an error `retryable` rejects,
    /// or `policy` runs out of attempts. Returns the last result and the
    /// number of calls made.
    async fn with_retry<T, F, Fut>(
        &self,
        stage: RetryStage,
        policy: &BackoffPolicy,
        retryable: impl Fn(&ScribeError) -> bool,
        mut op: F,
    ) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return (Ok(value), attempts),
                Err(e) if retryable(&e) && policy.allows_another(attempts) => {
                    let delay = policy.delay_for(attempts - 1);
                    log::warn!(
                        "{} attempt {}/{} failed ({}), retrying in {:?}",
                        stage.as_str(),
                        attempts,
                        policy.max_attempts,
                        e,
                        delay
                    );
                    self.observer.retry_scheduled(stage, attempts, delay, &e);
                    drop(e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempts),
            }
        }
    }
}

/// Brackets one summarisation call for the observer, cancellation included.
struct InFlight<'a>(&'a dyn RunObserver);

impl<'a> InFlight<'a> {
    fn start(observer: &'a dyn RunObserver) -> Self {
        observer.summarization_started();
        Self(observer)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.summarization_finished();
    }
}

fn log_report(report: &RunReport) {
    let event = &report.event;
    match &report.outcome {
        RunOutcome::Indexed { upsert, .. } => log::info!(
            "run {} indexed {}/{} ({:?}) in {:?}",
            report.run_id,
            event.bucket,
            event.key,
            upsert,
            report.duration
        ),
        RunOutcome::Retryable(failure) => log::warn!(
            "run {} retryable failure for {}/{} after {}: {} [{}]",
            report.run_id,
            event.bucket,
            event.key,
            failure.stage,
            failure.message,
            FailureClass::Retryable
        ),
        RunOutcome::Fatal(failure) => {
            log::error!(
                "run {} fatal failure for {}/{} after {}: {} [{}]",
                report.run_id,
                event.bucket,
                event.key,
                failure.stage,
                failure.message,
                FailureClass::Fatal
            );
            if failure.reason == "auth_failure" {
                log::error!(
                    "ESCALATION: summarisation credentials rejected (run {}): {}",
                    report.run_id,
                    failure.message
                );
            } else if failure.reason == "config" {
                log::error!(
                    "ESCALATION: summarisation service misconfigured (run {}): {}",
                    report.run_id,
                    failure.message
                );
            }
        }
    }
}
