use futures::StreamExt;
use scribe_core::{Delivery, Disposition, PipelineCoordinator, TriggerSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Pulls deliveries from a trigger source and runs each through the
/// pipeline, at most `max_workers` at a time.
pub struct Worker {
    coordinator: PipelineCoordinator,
    permits: Arc<Semaphore>,
    nack_delay: Duration,
}

impl Worker {
    pub fn new(coordinator: PipelineCoordinator, max_workers: usize, nack_delay: Duration) -> Self {
        Self {
            coordinator,
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            nack_delay,
        }
    }

    /// Consume `source` until its stream ends.
    pub async fn run(&self, source: &dyn TriggerSource) -> scribe_core::Result<()> {
        let mut deliveries = source.subscribe().await?;
        info!("Worker consuming from {}", source.name());

        while let Some(delivery) = deliveries.next().await {
            // Back-pressure: stop pulling while every worker is busy.
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let coordinator = self.coordinator.clone();
            let nack_delay = self.nack_delay;

            tokio::spawn(async move {
                handle_delivery(&coordinator, delivery, nack_delay).await;
                drop(permit);
            });
        }

        warn!("Trigger source {} ended", source.name());
        Ok(())
    }
}

/// Process one delivery and report its disposition to the transport.
pub async fn handle_delivery(
    coordinator: &PipelineCoordinator,
    delivery: Delivery,
    nack_delay: Duration,
) -> Disposition {
    debug!(
        "Delivery received ({} bytes, attempt {})",
        delivery.payload.len(),
        delivery.delivery_count
    );

    let batch = coordinator.handle_notification(&delivery.payload).await;
    let disposition = batch.disposition();

    let result = match disposition {
        Disposition::Ack => delivery.acker.ack().await,
        Disposition::Nack => {
            info!(
                "Re-delivery requested for notification (attempt {}, {} runs retryable)",
                delivery.delivery_count,
                batch
                    .runs
                    .iter()
                    .filter(|r| r.outcome.disposition() == Disposition::Nack)
                    .count()
            );
            delivery.acker.nack(Some(nack_delay)).await
        }
    };
    if let Err(e) = result {
        error!("Failed to report {:?} to trigger source: {}", disposition, e);
    }

    disposition
}
