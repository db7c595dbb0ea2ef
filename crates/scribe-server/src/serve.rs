use crate::cli::ProcessArgs;
use crate::config::{IndexBackend, ScribeConfig, StoreBackend};
use crate::http::{self, ScribeMetrics};
use crate::nats::JetStreamSource;
use crate::remote::{HttpDocumentStore, HttpSearchIndex, MessagesClient};
use crate::worker::Worker;
use scribe_core::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

fn fail_on_invalid(config: &ScribeConfig) -> anyhow::Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        return Ok(());
    }
    for e in &errors {
        error!("Invalid configuration: {}", e);
    }
    anyhow::bail!("{} configuration error(s)", errors.len())
}

/// Wire the configured store, model and index into a coordinator.
pub async fn build_coordinator(config: &ScribeConfig) -> anyhow::Result<PipelineCoordinator> {
    let store: Arc<dyn DocumentStore> = match config.store.backend {
        StoreBackend::Fs => {
            info!("Document store: {:?}", config.store.root);
            Arc::new(FsDocumentStore::new(&config.store.root))
        }
        StoreBackend::Http => {
            let endpoint = config
                .store
                .endpoint
                .clone()
                .ok_or_else(|| anyhow::anyhow!("[store] endpoint is required"))?;
            info!("Document store: {}", endpoint);
            Arc::new(HttpDocumentStore::new(
                endpoint,
                Duration::from_millis(config.store.timeout_ms),
            )?)
        }
    };

    let api_key = config
        .model
        .api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("[model] api_key is required"))?;
    let model = Arc::new(MessagesClient::new(
        config.model.endpoint.clone(),
        api_key,
        config.model.api_version.clone(),
        Duration::from_millis(config.model.timeout_ms),
    )?);
    info!(
        "Summarisation model: {} via {}",
        config.pipeline.model_id, config.model.endpoint
    );

    let index: Arc<dyn SummaryIndex> = match config.index.backend {
        IndexBackend::Redb => {
            info!("Opening summary index {:?}...", config.index.path);
            let index = RedbSummaryIndex::open(&config.index.path)?;
            info!("Summary index loaded: {} documents", index.count().await?);
            Arc::new(index)
        }
        IndexBackend::Http => {
            let endpoint = config
                .index
                .endpoint
                .clone()
                .ok_or_else(|| anyhow::anyhow!("[index] endpoint is required"))?;
            let index = HttpSearchIndex::new(
                endpoint.clone(),
                config.index.name.clone(),
                Duration::from_millis(config.index.timeout_ms),
            )?;
            index.ensure_index().await?;
            info!("Summary index: {}/{}", endpoint, config.index.name);
            Arc::new(index)
        }
    };

    Ok(PipelineCoordinator::new(
        config.pipeline.clone(),
        store,
        model,
        index,
    )?)
}

pub async fn run(config: ScribeConfig) -> anyhow::Result<()> {
    info!("Starting Scribe worker v{}", env!("CARGO_PKG_VERSION"));
    info!("HTTP: {}", config.server.http_addr);
    fail_on_invalid(&config)?;

    let metrics = Arc::new(ScribeMetrics::new());
    let coordinator = build_coordinator(&config)
        .await?
        .with_observer(metrics.clone());
    info!(
        "Concurrency gate: {} slot(s), lease {:?}",
        coordinator.gate().capacity(),
        coordinator.gate().lease_duration()
    );

    // Reclaim slots from holders that died without releasing.
    let reaper_task = {
        let gate = coordinator.gate().clone();
        let interval = (gate.lease_duration() / 4).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let reclaimed = gate.reap_expired();
                if reclaimed > 0 {
                    warn!("Reclaimed {} expired concurrency lease(s)", reclaimed);
                }
            }
        })
    };

    // Start HTTP server
    let http_task = {
        let app_state = http::AppState {
            coordinator: coordinator.clone(),
            metrics: metrics.clone(),
            http_events: config.server.http_events,
            retry_after_secs: config.server.retry_after_secs,
            start_time: std::time::Instant::now(),
        };
        let app = http::create_router(app_state);
        let addr = config.server.http_addr;
        let listener = tokio::net::TcpListener::bind(addr).await?;

        tokio::spawn(async move {
            info!("Starting HTTP server on {}", addr);
            if let Err(e) = axum::serve(listener, app).await {
                error!("HTTP server failed: {}", e);
            }
        })
    };

    // Optionally start the JetStream consumer
    let nats_task: Option<JoinHandle<()>> = if config.nats.enabled {
        info!("Connecting to NATS at {}...", config.nats.url);

        match async_nats::connect(&config.nats.url).await {
            Ok(client) => {
                info!("NATS connected");
                let source = JetStreamSource::new(client, config.nats.clone());
                let worker = Worker::new(
                    coordinator.clone(),
                    config.server.max_workers,
                    config.nats.nak_delay(),
                );

                Some(tokio::spawn(async move {
                    if let Err(e) = worker.run(&source).await {
                        error!("NATS consumer failed: {}", e);
                    }
                }))
            }
            Err(e) => {
                error!("Failed to connect to NATS: {}", e);
                error!("Continuing without NATS consumer");
                None
            }
        }
    } else {
        info!("NATS consumer disabled");
        None
    };

    info!("Scribe worker ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, terminating...");

    http_task.abort();
    reaper_task.abort();
    if let Some(task) = nats_task {
        task.abort();
    }

    Ok(())
}

/// `scribe process`: one event through the pipeline, outcome on stdout.
pub async fn process_one(config: ScribeConfig, args: ProcessArgs) -> anyhow::Result<()> {
    fail_on_invalid(&config)?;
    let coordinator = build_coordinator(&config).await?;

    let report = coordinator
        .process(IngestionEvent::new(args.bucket, args.key))
        .await;

    println!("run:      {}", report.run_id);
    println!("object:   {}/{}", report.event.bucket, report.event.key);
    println!("status:   {}", report.outcome.status());
    println!("stage:    {}", report.last_stage);
    println!(
        "attempts: fetch={} summarize={} index={}",
        report.attempts.fetch, report.attempts.summarize, report.attempts.index
    );
    println!("duration: {:?}", report.duration);

    match &report.outcome {
        RunOutcome::Indexed { .. } => {
            if let Some(summary) = coordinator.index().get(&report.event.key).await? {
                println!("\n{}", summary.text);
            }
            Ok(())
        }
        RunOutcome::Fatal(failure) | RunOutcome::Retryable(failure) => {
            println!("reason:   {} ({})", failure.reason, failure.message);
            std::process::exit(1);
        }
    }
}
