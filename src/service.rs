use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{parse_idempotency_key, BankEntity, CreationResult, NewBankEntity};
use crate::error::{AppError, AppResult};
use crate::idempotency::{IdempotencyCoordinator, IdempotencyKeyStore, WorkError};
use crate::metrics;
use crate::store::EntityStore;

/// Synchronous entity creation.
///
/// The idempotency key doubles as the entity id on this path, so one key can
/// only ever denote one entity. The coordinator serializes concurrent
/// submissions per key; the durable key store remains the source of truth
/// across restarts, with the coordinator's result cache as a fast path on top.
pub struct EntityService {
    coordinator: Arc<IdempotencyCoordinator>,
    keys: Arc<dyn IdempotencyKeyStore>,
    entities: Arc<dyn EntityStore>,
}

impl EntityService {
    pub fn new(
        coordinator: Arc<IdempotencyCoordinator>,
        keys: Arc<dyn IdempotencyKeyStore>,
        entities: Arc<dyn EntityStore>,
    ) -> Self {
        Self {
            coordinator,
            keys,
            entities,
        }
    }

    /// Create an entity exactly once per idempotency key.
    pub async fn create(&self, key: &str, payload: NewBankEntity) -> CreationResult {
        // Fast path: a cached prior success needs no lock at all
        if self.coordinator.is_claimed(key) {
            debug!(key = %key, "Duplicate rejected from result cache");
            metrics::DUPLICATES_REJECTED.inc();
            return CreationResult::Duplicate {
                reason: "request already processed".to_string(),
            };
        }

        let result = self
            .coordinator
            .process(key, || self.perform_create(key, payload))
            .await;

        match &result {
            CreationResult::Created { entity } => {
                metrics::ENTITIES_CREATED.inc();
                info!(key = %key, entity_id = %entity.id, "Entity created");
            }
            CreationResult::Duplicate { .. } => {
                metrics::DUPLICATES_REJECTED.inc();
            }
            CreationResult::Failed { kind, .. } => {
                if matches!(kind, crate::domain::FailureKind::LockTimeout) {
                    metrics::LOCK_TIMEOUTS.inc();
                }
            }
        }
        result
    }

    async fn perform_create(&self, key: &str, payload: NewBankEntity) -> Result<BankEntity, WorkError> {
        payload.validate().map_err(WorkError::Failed)?;

        let entity_id = parse_idempotency_key(key).map_err(WorkError::Failed)?;

        // Durable claim first: the key store decides, everything else follows
        if !self.keys.check_and_save(key).await? {
            return Err(WorkError::AlreadyClaimed(
                "idempotency key already used".to_string(),
            ));
        }

        let entity = payload.into_entity(entity_id);
        if !self.entities.save(&entity).await? {
            // The key id collided with an existing entity written outside
            // this coordinator (e.g. a prior deployment)
            return Err(WorkError::AlreadyClaimed(
                "entity already exists for this key".to_string(),
            ));
        }

        Ok(entity)
    }

    pub async fn find_by_id(&self, id: uuid::Uuid) -> AppResult<BankEntity> {
        self.entities
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("entity {id}")))
    }

    pub async fn list(&self) -> AppResult<Vec<BankEntity>> {
        Ok(self.entities.list().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::InMemoryKeyStore;
    use crate::store::InMemoryEntityStore;
    use std::time::Duration;
    use uuid::Uuid;

    fn service() -> EntityService {
        EntityService::new(
            Arc::new(IdempotencyCoordinator::new(Duration::from_secs(10))),
            Arc::new(InMemoryKeyStore::new()),
            Arc::new(InMemoryEntityStore::new()),
        )
    }

    fn payload() -> NewBankEntity {
        NewBankEntity {
            name: "Banco Santander".to_string(),
            code: "0049".to_string(),
            country: "España".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_uses_key_as_entity_id() {
        let svc = service();
        let key = Uuid::new_v4();

        let result = svc.create(&key.to_string(), payload()).await;
        let CreationResult::Created { entity } = result else {
            panic!("expected created, got {result:?}");
        };
        assert_eq!(entity.id, key);
        assert_eq!(svc.find_by_id(key).await.unwrap().name, "Banco Santander");
    }

    #[tokio::test]
    async fn test_second_submission_is_duplicate() {
        let svc = service();
        let key = Uuid::new_v4().to_string();

        assert!(svc.create(&key, payload()).await.is_created());
        assert!(svc.create(&key, payload()).await.is_duplicate());
        assert_eq!(svc.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_key_creates_nothing() {
        let svc = service();
        let result = svc.create("definitely-not-a-uuid", payload()).await;
        assert!(result.is_failed());
        assert!(svc.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_payload_leaves_key_unclaimed() {
        let svc = service();
        let key = Uuid::new_v4().to_string();
        let bad = NewBankEntity {
            name: String::new(),
            code: "0049".to_string(),
            country: "España".to_string(),
        };

        assert!(svc.create(&key, bad).await.is_failed());
        // The key was never claimed, so a corrected retry succeeds
        assert!(svc.create(&key, payload()).await.is_created());
    }

    #[tokio::test]
    async fn test_durable_claim_without_cache_is_duplicate() {
        // A key claimed durably (e.g. before a restart wiped the cache)
        // must still be refused
        let keys = Arc::new(InMemoryKeyStore::new());
        let svc = EntityService::new(
            Arc::new(IdempotencyCoordinator::new(Duration::from_secs(10))),
            keys.clone(),
            Arc::new(InMemoryEntityStore::new()),
        );
        let key = Uuid::new_v4().to_string();
        assert!(keys.check_and_save(&key).await.unwrap());

        assert!(svc.create(&key, payload()).await.is_duplicate());
    }
}
