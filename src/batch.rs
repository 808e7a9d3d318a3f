use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::info;

use crate::domain::{CreationResult, NewBankEntity};
use crate::service::EntityService;

/// One item of a batch submission: the caller supplies the idempotency key
/// per item, exactly as it would for a single synchronous request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub idempotency_key: String,
    #[serde(flatten)]
    pub payload: NewBankEntity,
}

/// Aggregate counts over one batch, derived from the per-item results.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub created: usize,
    pub duplicates: usize,
    pub errors: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[CreationResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result {
                CreationResult::Created { .. } => summary.created += 1,
                CreationResult::Duplicate { .. } => summary.duplicates += 1,
                CreationResult::Failed { .. } => summary.errors += 1,
            }
        }
        summary
    }
}

/// Fans a batch out over the synchronous creation path with bounded
/// parallelism. Per-item isolation comes for free: every item settles to its
/// own `CreationResult`, so one bad item never fails the batch.
pub struct BatchSubmitter {
    service: Arc<EntityService>,
    limiter: Arc<Semaphore>,
}

impl BatchSubmitter {
    pub fn new(service: Arc<EntityService>, max_concurrency: usize) -> Self {
        Self {
            service,
            limiter: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Submit all items concurrently and return their results in input order.
    pub async fn submit(&self, items: Vec<BatchItem>) -> Vec<CreationResult> {
        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            let service = self.service.clone();
            let limiter = self.limiter.clone();
            handles.push(tokio::spawn(async move {
                // Holding a permit for the duration of one create bounds the
                // number of in-flight creations. The semaphore is never
                // closed, so acquisition cannot fail.
                let _permit = limiter.acquire_owned().await.ok();
                service.create(&item.idempotency_key, item.payload).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => results.push(CreationResult::Failed {
                    kind: crate::domain::FailureKind::Processing,
                    message: format!("batch task panicked: {e}"),
                }),
            }
        }
        results
    }

    /// Submit a batch and fold the per-item results into a summary.
    pub async fn submit_summarized(
        &self,
        items: Vec<BatchItem>,
    ) -> (Vec<CreationResult>, BatchSummary) {
        let results = self.submit(items).await;
        let summary = BatchSummary::from_results(&results);
        info!(
            total = summary.total,
            created = summary.created,
            duplicates = summary.duplicates,
            errors = summary.errors,
            "Batch settled"
        );
        (results, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::{IdempotencyCoordinator, InMemoryKeyStore};
    use crate::store::InMemoryEntityStore;
    use std::time::Duration;
    use uuid::Uuid;

    fn submitter(max_concurrency: usize) -> BatchSubmitter {
        let service = Arc::new(EntityService::new(
            Arc::new(IdempotencyCoordinator::new(Duration::from_secs(10))),
            Arc::new(InMemoryKeyStore::new()),
            Arc::new(InMemoryEntityStore::new()),
        ));
        BatchSubmitter::new(service, max_concurrency)
    }

    fn item(key: &str, name: &str) -> BatchItem {
        BatchItem {
            idempotency_key: key.to_string(),
            payload: NewBankEntity {
                name: name.to_string(),
                code: "0049".to_string(),
                country: "España".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_results_preserve_input_order() {
        let submitter = submitter(4);
        let keys: Vec<String> = (0..8).map(|_| Uuid::new_v4().to_string()).collect();
        let items: Vec<BatchItem> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| item(key, &format!("Banco {i}")))
            .collect();

        let results = submitter.submit(items).await;
        assert_eq!(results.len(), 8);
        for (i, result) in results.iter().enumerate() {
            let CreationResult::Created { entity } = result else {
                panic!("expected created at {i}");
            };
            assert_eq!(entity.name, format!("Banco {i}"));
        }
    }

    #[tokio::test]
    async fn test_repeated_key_within_batch_yields_one_creation() {
        let submitter = submitter(16);
        let key = Uuid::new_v4().to_string();
        let items: Vec<BatchItem> = (0..10).map(|_| item(&key, "Banco Unico")).collect();

        let (results, summary) = submitter.submit_summarized(items).await;
        assert_eq!(summary, BatchSummary {
            total: 10,
            created: 1,
            duplicates: 9,
            errors: 0,
        });
        assert_eq!(results.iter().filter(|r| r.is_created()).count(), 1);
    }

    #[tokio::test]
    async fn test_bad_item_does_not_fail_batch() {
        let submitter = submitter(4);
        let good = Uuid::new_v4().to_string();
        let items = vec![item(&good, "Banco Bueno"), item("not-a-uuid", "Banco Malo")];

        let (_, summary) = submitter.submit_summarized(items).await;
        assert_eq!(summary.created, 1);
        assert_eq!(summary.errors, 1);
    }
}
