use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

use crate::broker::consumer::{process_create_request, PipelineContext};
use crate::broker::types::EntityMessage;
use crate::broker::RequestTransport;
use crate::error::{AppError, AppResult};
use crate::metrics;

const RESULT_CHANNEL_CAPACITY: usize = 256;
const PARTITION_CAPACITY: usize = 256;

/// In-memory partitioned broker.
///
/// Requests are routed to one of N ordered mpsc channels by hashing the
/// idempotency key, so all messages for one key are consumed by a single
/// partition worker in order. Partitions are bounded: when consumers fall
/// behind, `publish_request` waits for a free slot instead of queueing
/// without limit. Results go out on a broadcast channel that interested
/// parties (tests, bridges) can subscribe to; publishing a result with no
/// subscribers is not an error.
pub struct MemoryBroker {
    partitions: Vec<mpsc::Sender<EntityMessage>>,
    results: broadcast::Sender<EntityMessage>,
}

impl MemoryBroker {
    /// Create a broker with `partitions` ordered sub-channels. The receivers
    /// are handed back so the caller can attach partition workers once the
    /// pipeline context (which includes this broker as its result transport)
    /// is assembled.
    pub fn new(partitions: usize) -> (Arc<Self>, Vec<mpsc::Receiver<EntityMessage>>) {
        assert!(partitions > 0, "broker needs at least one partition");

        let mut senders = Vec::with_capacity(partitions);
        let mut receivers = Vec::with_capacity(partitions);
        for _ in 0..partitions {
            let (tx, rx) = mpsc::channel(PARTITION_CAPACITY);
            senders.push(tx);
            receivers.push(rx);
        }
        let (results, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);

        (
            Arc::new(Self {
                partitions: senders,
                results,
            }),
            receivers,
        )
    }

    /// Spawn one consumer task per partition. Each worker processes its
    /// partition strictly in order; popping the channel is the acknowledgment.
    pub fn spawn_partition_workers(
        receivers: Vec<mpsc::Receiver<EntityMessage>>,
        ctx: Arc<PipelineContext>,
    ) -> Vec<JoinHandle<()>> {
        receivers
            .into_iter()
            .enumerate()
            .map(|(partition, mut rx)| {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    info!(partition, "Partition worker started");
                    while let Some(message) = rx.recv().await {
                        metrics::MESSAGES_CONSUMED.inc();
                        process_create_request(&ctx, message).await;
                    }
                    info!(partition, "Partition worker stopped");
                })
            })
            .collect()
    }

    /// Observe result messages.
    pub fn subscribe_results(&self) -> broadcast::Receiver<EntityMessage> {
        self.results.subscribe()
    }

    fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.partitions.len()
    }
}

#[async_trait::async_trait]
impl RequestTransport for MemoryBroker {
    async fn publish_request(&self, message: &EntityMessage) -> AppResult<()> {
        let partition = self.partition_for(&message.idempotency_key);
        self.partitions[partition]
            .send(message.clone())
            .await
            .map_err(|_| AppError::broker("request partition closed"))?;
        metrics::MESSAGES_PUBLISHED.inc();
        tracing::debug!(
            message_id = %message.message_id,
            partition,
            "Request published to in-memory broker"
        );
        Ok(())
    }

    async fn publish_result(&self, message: &EntityMessage) {
        // No subscribers is fine; results are observational
        let _ = self.results.send(message.clone());
    }
}
