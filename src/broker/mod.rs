// Asynchronous transport for creation requests and results.
//
// Two implementations share one contract: an in-memory partitioned channel
// broker (default, no external infrastructure) and a Kafka transport. Both
// route messages by idempotency key so all messages for one key traverse a
// single ordered partition, which serializes same-key processing without an
// in-process lock.

pub mod consumer;
pub mod kafka;
pub mod memory;
pub mod types;

use crate::error::AppResult;
use types::EntityMessage;

pub use consumer::{process_create_request, PipelineContext, ProcessOutcome};
pub use kafka::{KafkaRequestConsumer, KafkaTransport};
pub use memory::MemoryBroker;

/// Producer side of the request pipeline.
#[async_trait::async_trait]
pub trait RequestTransport: Send + Sync {
    /// Publish a creation request, partitioned by idempotency key.
    async fn publish_request(&self, message: &EntityMessage) -> AppResult<()>;

    /// Publish a processing result. Best-effort: a transport failure here is
    /// logged and swallowed, because the creation work already happened and
    /// must not be rolled back by a reporting problem.
    async fn publish_result(&self, message: &EntityMessage);
}
