use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use scribe_core::{RetryStage, RunObserver, RunReport, ScribeError};
use std::time::Duration;

// ── Label types ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabel {
    pub status: String,
    pub reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StageLabel {
    pub stage: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabel {
    pub reason: String,
}

// ── Metrics registry ───────────────────────────────────────────────────────────

pub struct ScribeMetrics {
    pub registry: Registry,

    // Runs
    pub run_outcomes: Family<OutcomeLabel, Counter>,
    pub run_duration: Histogram,

    // Retries inside a run, by stage
    pub stage_retries: Family<StageLabel, Counter>,

    // Trigger records that could not be translated
    pub triggers_rejected: Family<ReasonLabel, Counter>,

    // Summarisation calls currently outstanding
    pub summarizations_in_flight: Gauge,

    // Concurrency gate (set on each scrape)
    pub gate_capacity: Gauge,
    pub gate_slots_held: Gauge,
    pub gate_leases_expired: Gauge,

    // Index size and uptime (set on each scrape)
    pub indexed_documents: Gauge,
    pub uptime_seconds: Gauge,
}

impl ScribeMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let run_outcomes: Family<OutcomeLabel, Counter> = Family::default();
        registry.register(
            "scribe_runs",
            "Finished pipeline runs by terminal status and reason",
            run_outcomes.clone(),
        );

        let run_duration = Histogram::new([0.5_f64, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0].into_iter());
        registry.register(
            "scribe_run_duration_seconds",
            "Pipeline run duration in seconds",
            run_duration.clone(),
        );

        let stage_retries: Family<StageLabel, Counter> = Family::default();
        registry.register(
            "scribe_stage_retries",
            "Retries scheduled inside runs, by stage",
            stage_retries.clone(),
        );

        let triggers_rejected: Family<ReasonLabel, Counter> = Family::default();
        registry.register(
            "scribe_triggers_rejected",
            "Notification records that could not be translated into events",
            triggers_rejected.clone(),
        );

        let summarizations_in_flight: Gauge = Gauge::default();
        registry.register(
            "scribe_summarizations_in_flight",
            "Summarisation calls currently outstanding",
            summarizations_in_flight.clone(),
        );

        let gate_capacity: Gauge = Gauge::default();
        registry.register(
            "scribe_gate_capacity",
            "Configured maximum concurrent summarisations",
            gate_capacity.clone(),
        );

        let gate_slots_held: Gauge = Gauge::default();
        registry.register(
            "scribe_gate_slots_held",
            "Concurrency slots currently leased",
            gate_slots_held.clone(),
        );

        let gate_leases_expired: Gauge = Gauge::default();
        registry.register(
            "scribe_gate_leases_expired",
            "Concurrency leases reclaimed after expiry since start",
            gate_leases_expired.clone(),
        );

        let indexed_documents: Gauge = Gauge::default();
        registry.register(
            "scribe_indexed_documents",
            "Documents with a summary in the index",
            indexed_documents.clone(),
        );

        let uptime_seconds: Gauge = Gauge::default();
        registry.register(
            "scribe_uptime_seconds",
            "Worker uptime in seconds",
            uptime_seconds.clone(),
        );

        Self {
            registry,
            run_outcomes,
            run_duration,
            stage_retries,
            triggers_rejected,
            summarizations_in_flight,
            gate_capacity,
            gate_slots_held,
            gate_leases_expired,
            indexed_documents,
            uptime_seconds,
        }
    }

    /// Prometheus text exposition of the registry.
    pub fn render(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for ScribeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunObserver for ScribeMetrics {
    fn retry_scheduled(&self, stage: RetryStage, _attempt: u32, _delay: Duration, _error: &ScribeError) {
        self.stage_retries
            .get_or_create(&StageLabel {
                stage: stage.as_str().to_string(),
            })
            .inc();
    }

    fn summarization_started(&self) {
        self.summarizations_in_flight.inc();
    }

    fn summarization_finished(&self) {
        self.summarizations_in_flight.dec();
    }

    fn trigger_rejected(&self, error: &ScribeError) {
        self.triggers_rejected
            .get_or_create(&ReasonLabel {
                reason: error.reason().to_string(),
            })
            .inc();
    }

    fn run_finished(&self, report: &RunReport) {
        self.run_outcomes
            .get_or_create(&OutcomeLabel {
                status: report.outcome.status().to_string(),
                reason: report.outcome.reason().unwrap_or("none").to_string(),
            })
            .inc();
        self.run_duration.observe(report.duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_core::{IngestionEvent, RunFailure, RunId, RunOutcome, RunStage, StageAttempts};

    fn report(outcome: RunOutcome) -> RunReport {
        RunReport {
            run_id: RunId::nil(),
            event: IngestionEvent::new("b1", "a.txt"),
            last_stage: RunStage::Fetched,
            attempts: StageAttempts::default(),
            duration: Duration::from_millis(1500),
            outcome,
        }
    }

    #[test]
    fn test_observer_updates_counters() {
        let metrics = ScribeMetrics::new();
        let err = ScribeError::Throttled("429".into());

        metrics.retry_scheduled(RetryStage::Summarize, 1, Duration::from_millis(500), &err);
        metrics.summarization_started();
        metrics.run_finished(&report(RunOutcome::Retryable(RunFailure::from_error(
            RunStage::Fetched,
            &ScribeError::SummarizationUnavailable {
                attempts: 5,
                last_error: "429".into(),
            },
        ))));

        assert_eq!(metrics.summarizations_in_flight.get(), 1);
        metrics.summarization_finished();
        assert_eq!(metrics.summarizations_in_flight.get(), 0);

        let text = metrics.render().unwrap();
        assert!(text.contains("scribe_stage_retries_total{stage=\"summarize\"} 1"));
        assert!(text.contains(
            "scribe_runs_total{status=\"retryable\",reason=\"summarization_unavailable\"} 1"
        ));
        assert!(text.contains("scribe_run_duration_seconds_count 1"));
    }
}
