use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Message;
use tracing::{error, info, warn};

use crate::broker::consumer::{process_create_request, PipelineContext};
use crate::broker::types::EntityMessage;
use crate::broker::RequestTransport;
use crate::config::KafkaConfig;
use crate::error::{AppError, AppResult};
use crate::metrics;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Kafka producer side of the pipeline.
///
/// Configured for at-least-once delivery:
/// - `acks=all`: wait for all in-sync replicas
/// - `enable.idempotence=true`: no duplicate writes within a producer session
/// - records keyed by idempotency key, so same-key messages share a partition
pub struct KafkaTransport {
    producer: FutureProducer,
    request_topic: String,
    result_topic: String,
}

impl KafkaTransport {
    pub fn new(config: &KafkaConfig) -> AppResult<Self> {
        info!(brokers = %config.brokers, topic = %config.request_topic, "Initializing Kafka producer");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            // Reliability settings
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "5")
            // Performance settings
            .set("linger.ms", "10")
            .set("batch.size", "16384")
            // Timeout settings
            .set("request.timeout.ms", "30000")
            .set("delivery.timeout.ms", "120000")
            .create()?;

        Ok(Self {
            producer,
            request_topic: config.request_topic.clone(),
            result_topic: config.result_topic.clone(),
        })
    }

    async fn send(&self, topic: &str, message: &EntityMessage) -> AppResult<()> {
        let payload = serde_json::to_string(message)?;
        let record = FutureRecord::to(topic)
            .key(&message.idempotency_key)
            .payload(&payload);

        match self
            .producer
            .send(record, Timeout::After(PUBLISH_TIMEOUT))
            .await
        {
            Ok((partition, offset)) => {
                tracing::debug!(
                    message_id = %message.message_id,
                    topic,
                    partition,
                    offset,
                    "Message published to Kafka"
                );
                Ok(())
            }
            Err((e, _)) => Err(AppError::Broker(e.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl RequestTransport for KafkaTransport {
    async fn publish_request(&self, message: &EntityMessage) -> AppResult<()> {
        self.send(&self.request_topic, message).await?;
        metrics::MESSAGES_PUBLISHED.inc();
        Ok(())
    }

    async fn publish_result(&self, message: &EntityMessage) {
        // A result publish failure must not roll back completed work
        if let Err(e) = self.send(&self.result_topic, message).await {
            error!(
                message_id = %message.message_id,
                error = %e,
                "Failed to publish result message (not rolled back)"
            );
        }
    }
}

/// Kafka consumer loop for creation requests.
///
/// Offsets are committed manually, only after a message has settled in a
/// terminal tracked status; a crash before the commit causes redelivery,
/// which the durable idempotency check absorbs.
pub struct KafkaRequestConsumer {
    consumer: StreamConsumer,
}

impl KafkaRequestConsumer {
    pub fn new(config: &KafkaConfig) -> AppResult<Self> {
        info!(
            brokers = %config.brokers,
            topic = %config.request_topic,
            group = %config.consumer_group,
            "Initializing Kafka consumer"
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            // Offset management: manual commit after processing
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            // Session management
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .create()?;

        consumer.subscribe(&[&config.request_topic])?;

        Ok(Self { consumer })
    }

    /// Run the consume loop until the task is aborted.
    pub async fn run(self, ctx: Arc<PipelineContext>) {
        info!("Kafka request consumer started");
        loop {
            match self.consumer.recv().await {
                Ok(borrowed) => {
                    let Some(Ok(payload)) = borrowed.payload_view::<str>() else {
                        warn!("Skipping Kafka message with empty or non-UTF8 payload");
                        let _ = self.consumer.commit_message(&borrowed, CommitMode::Async);
                        continue;
                    };

                    match serde_json::from_str::<EntityMessage>(payload) {
                        Ok(message) => {
                            metrics::MESSAGES_CONSUMED.inc();
                            process_create_request(&ctx, message).await;
                            // Every outcome acknowledges; failed messages are
                            // not redelivered (no automatic retry by policy)
                            if let Err(e) =
                                self.consumer.commit_message(&borrowed, CommitMode::Async)
                            {
                                error!(error = %e, "Failed to commit Kafka offset");
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Skipping unparsable Kafka message");
                            let _ = self.consumer.commit_message(&borrowed, CommitMode::Async);
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Kafka consume error");
                }
            }
        }
    }
}
