use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::types::{EntityMessage, MessageStatus};
use crate::broker::RequestTransport;
use crate::idempotency::IdempotencyKeyStore;
use crate::metrics;
use crate::store::EntityStore;
use crate::tracking::MessageTracker;

/// Shared dependencies of a request consumer, independent of the transport
/// feeding it.
pub struct PipelineContext {
    pub keys: Arc<dyn IdempotencyKeyStore>,
    pub entities: Arc<dyn EntityStore>,
    pub tracker: Arc<dyn MessageTracker>,
    pub transport: Arc<dyn RequestTransport>,
}

/// How a consumed message settled. Every variant acknowledges the input
/// message: failures are not redelivered automatically, which trades
/// automatic retry for freedom from redelivery loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    Duplicate,
    Failed,
}

/// Process one creation request pulled off the broker.
///
/// The consumer relies on partition affinity for same-key serialization and
/// on the durable key store for the idempotency decision itself, which keeps
/// it consistent with the synchronous path and makes redelivery after a
/// crash harmless: the durable check simply reports the key as claimed.
pub async fn process_create_request(
    ctx: &PipelineContext,
    mut message: EntityMessage,
) -> ProcessOutcome {
    info!(
        message_id = %message.message_id,
        idempotency_key = %message.idempotency_key,
        "Processing creation request"
    );

    message.status = MessageStatus::Processing;
    record_status(ctx, &message).await;

    match create_entity(ctx, &mut message).await {
        Ok(Some(entity_id)) => {
            message.status = MessageStatus::Completed;
            message.entity_id = Some(entity_id);
            record_status(ctx, &message).await;
            ctx.transport.publish_result(&message).await;
            metrics::MESSAGES_COMPLETED.inc();
            info!(
                message_id = %message.message_id,
                entity_id = %entity_id,
                "Entity created"
            );
            ProcessOutcome::Completed
        }
        Ok(None) => {
            message.status = MessageStatus::Duplicate;
            message.error_message =
                Some("request already processed with this idempotency key".to_string());
            record_status(ctx, &message).await;
            ctx.transport.publish_result(&message).await;
            metrics::MESSAGES_DUPLICATE.inc();
            warn!(
                message_id = %message.message_id,
                idempotency_key = %message.idempotency_key,
                "Duplicate creation request"
            );
            ProcessOutcome::Duplicate
        }
        Err(e) => {
            message.status = MessageStatus::Failed;
            message.error_message = Some(e.to_string());
            record_status(ctx, &message).await;
            ctx.transport.publish_result(&message).await;
            metrics::MESSAGES_FAILED.inc();
            error!(
                message_id = %message.message_id,
                error = %e,
                "Creation request failed"
            );
            ProcessOutcome::Failed
        }
    }
}

/// Returns Ok(Some(id)) on creation, Ok(None) on duplicate.
async fn create_entity(
    ctx: &PipelineContext,
    message: &mut EntityMessage,
) -> anyhow::Result<Option<Uuid>> {
    message.validate()?;

    // Durable idempotency check; false means the key is already claimed
    if !ctx.keys.check_and_save(&message.idempotency_key).await? {
        return Ok(None);
    }

    let payload = message.payload();
    payload
        .validate()
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // Async path: the entity gets a generated id, the key stays a pure claim
    let entity = payload.into_entity(Uuid::new_v4());
    if !ctx.entities.save(&entity).await? {
        anyhow::bail!("duplicate entity detected by store");
    }

    Ok(Some(entity.id))
}

/// Tracker updates are best-effort: a tracking failure must not corrupt or
/// abort the processing itself.
async fn record_status(ctx: &PipelineContext, message: &EntityMessage) {
    if let Err(e) = ctx.tracker.update(message).await {
        warn!(
            message_id = %message.message_id,
            error = %e,
            "Failed to update message tracking"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewBankEntity;
    use crate::idempotency::InMemoryKeyStore;
    use crate::store::InMemoryEntityStore;
    use crate::tracking::InMemoryTracker;
    use crate::error::AppResult;

    /// Transport double that records published results.
    #[derive(Default)]
    struct NullTransport {
        results: std::sync::Mutex<Vec<EntityMessage>>,
    }

    #[async_trait::async_trait]
    impl RequestTransport for NullTransport {
        async fn publish_request(&self, _message: &EntityMessage) -> AppResult<()> {
            Ok(())
        }

        async fn publish_result(&self, message: &EntityMessage) {
            self.results.lock().unwrap().push(message.clone());
        }
    }

    fn context() -> (PipelineContext, Arc<NullTransport>) {
        let transport = Arc::new(NullTransport::default());
        (
            PipelineContext {
                keys: Arc::new(InMemoryKeyStore::new()),
                entities: Arc::new(InMemoryEntityStore::new()),
                tracker: Arc::new(InMemoryTracker::new()),
                transport: transport.clone(),
            },
            transport,
        )
    }

    fn payload() -> NewBankEntity {
        NewBankEntity {
            name: "Banco Test".to_string(),
            code: "999".to_string(),
            country: "Argentina".to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_message_completes_second_is_duplicate() {
        let (ctx, transport) = context();

        let first = EntityMessage::new("key-1", &payload());
        let second = EntityMessage::new("key-1", &payload());

        assert_eq!(
            process_create_request(&ctx, first.clone()).await,
            ProcessOutcome::Completed
        );
        assert_eq!(
            process_create_request(&ctx, second.clone()).await,
            ProcessOutcome::Duplicate
        );

        let tracked = ctx
            .tracker
            .get_by_message_id(&first.message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tracked.status, MessageStatus::Completed);
        assert!(tracked.entity_id.is_some());

        let dup = ctx
            .tracker
            .get_by_message_id(&second.message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dup.status, MessageStatus::Duplicate);
        assert!(dup.entity_id.is_none());

        // Both outcomes published a result
        assert_eq!(transport.results.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_payload_settles_failed() {
        let (ctx, _) = context();

        let bad = NewBankEntity {
            name: String::new(),
            code: "999".to_string(),
            country: "Argentina".to_string(),
        };
        let message = EntityMessage::new("key-1", &bad);

        assert_eq!(
            process_create_request(&ctx, message.clone()).await,
            ProcessOutcome::Failed
        );

        let tracked = ctx
            .tracker
            .get_by_message_id(&message.message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tracked.status, MessageStatus::Failed);
        assert!(tracked.error_message.is_some());
    }

    #[tokio::test]
    async fn test_redelivery_after_completion_is_duplicate() {
        let (ctx, _) = context();
        let message = EntityMessage::new("key-1", &payload());

        process_create_request(&ctx, message.clone()).await;
        // Simulate at-least-once redelivery of the very same message
        let redelivered = process_create_request(&ctx, message).await;
        assert_eq!(redelivered, ProcessOutcome::Duplicate);

        // Only one entity was ever created
        assert_eq!(ctx.entities.list().await.unwrap().len(), 1);
    }
}
