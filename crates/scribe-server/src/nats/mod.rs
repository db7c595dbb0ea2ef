use crate::config::NatsConfig;
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, DeliverPolicy},
    stream, AckKind,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use scribe_core::{Acknowledger, Delivery, Result, ScribeError, TriggerSource};
use std::time::Duration;

/// Notifications from a JetStream durable pull consumer.
///
/// The stream and consumer are created on first use. Messages stay
/// unacknowledged until the worker reports a disposition, and JetStream
/// redelivers anything not acked within `ack_wait`.
pub struct JetStreamSource {
    context: jetstream::Context,
    config: NatsConfig,
}

impl JetStreamSource {
    pub fn new(client: async_nats::Client, config: NatsConfig) -> Self {
        Self {
            context: jetstream::new(client),
            config,
        }
    }

    async fn consumer(&self) -> Result<jetstream::consumer::Consumer<pull::Config>> {
        let stream = self
            .context
            .get_or_create_stream(stream::Config {
                name: self.config.stream.clone(),
                subjects: vec![self.config.subject.clone()],
                ..Default::default()
            })
            .await
            .map_err(|e| ScribeError::Transport(format!("stream {}: {}", self.config.stream, e)))?;

        stream
            .get_or_create_consumer(
                &self.config.durable,
                pull::Config {
                    durable_name: Some(self.config.durable.clone()),
                    filter_subject: self.config.subject.clone(),
                    ack_policy: AckPolicy::Explicit,
                    deliver_policy: DeliverPolicy::All,
                    ack_wait: self.config.ack_wait(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ScribeError::Transport(format!("consumer {}: {}", self.config.durable, e)))
    }
}

#[async_trait]
impl TriggerSource for JetStreamSource {
    fn name(&self) -> &str {
        "nats"
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, Delivery>> {
        let consumer = self.consumer().await?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| ScribeError::Transport(format!("pull subscription: {}", e)))?;

        tracing::info!(
            "JetStream consumer {} attached to {} ({})",
            self.config.durable,
            self.config.stream,
            self.config.subject
        );

        let deliveries = messages.filter_map(|result| async move {
            match result {
                Ok(message) => {
                    let delivery_count = message
                        .info()
                        .map(|info| info.delivered.max(1) as u64)
                        .unwrap_or(1);
                    Some(Delivery {
                        payload: message.payload.to_vec(),
                        delivery_count,
                        acker: Box::new(JetStreamAcker { message }),
                    })
                }
                Err(e) => {
                    tracing::warn!("JetStream pull failed: {}", e);
                    None
                }
            }
        });

        Ok(deliveries.boxed())
    }
}

struct JetStreamAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledger for JetStreamAcker {
    async fn ack(&self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| ScribeError::Transport(format!("ack failed: {}", e)))
    }

    async fn nack(&self, delay: Option<Duration>) -> Result<()> {
        self.message
            .ack_with(AckKind::Nak(delay))
            .await
            .map_err(|e| ScribeError::Transport(format!("nak failed: {}", e)))
    }
}
