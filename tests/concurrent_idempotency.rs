// Concurrency tests for the synchronous creation path: under arbitrary
// same-key contention exactly one submission creates the entity and every
// other submission settles as a duplicate.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use keystone_server::domain::{CreationResult, FailureKind, NewBankEntity};
use keystone_server::idempotency::{
    IdempotencyCoordinator, IdempotencyKeyStore, InMemoryKeyStore,
};
use keystone_server::service::EntityService;
use keystone_server::store::{EntityStore, InMemoryEntityStore};

struct Fixture {
    service: Arc<EntityService>,
    keys: Arc<InMemoryKeyStore>,
    entities: Arc<InMemoryEntityStore>,
}

fn fixture_with_lock_wait(lock_wait: Duration) -> Fixture {
    let keys = Arc::new(InMemoryKeyStore::new());
    let entities = Arc::new(InMemoryEntityStore::new());
    let service = Arc::new(EntityService::new(
        Arc::new(IdempotencyCoordinator::new(lock_wait)),
        keys.clone(),
        entities.clone(),
    ));
    Fixture {
        service,
        keys,
        entities,
    }
}

fn fixture() -> Fixture {
    fixture_with_lock_wait(Duration::from_secs(10))
}

fn payload() -> NewBankEntity {
    NewBankEntity {
        name: "Banco Santander".to_string(),
        code: "0049".to_string(),
        country: "España".to_string(),
    }
}

async fn submit_concurrently(
    service: &Arc<EntityService>,
    keys: Vec<String>,
) -> Vec<CreationResult> {
    let handles: Vec<_> = keys
        .into_iter()
        .map(|key| {
            let service = service.clone();
            tokio::spawn(async move { service.create(&key, payload()).await })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn hundred_concurrent_same_key_create_exactly_once() {
    let fx = fixture();
    let key = Uuid::new_v4().to_string();

    let results = submit_concurrently(&fx.service, vec![key.clone(); 100]).await;

    assert_eq!(results.iter().filter(|r| r.is_created()).count(), 1);
    assert_eq!(results.iter().filter(|r| r.is_duplicate()).count(), 99);
    assert_eq!(results.iter().filter(|r| r.is_failed()).count(), 0);

    assert_eq!(fx.entities.list().await.unwrap().len(), 1);
    assert!(fx.keys.exists(&key).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn distinct_keys_do_not_contend() {
    let fx = fixture();
    let keys: Vec<String> = (0..50).map(|_| Uuid::new_v4().to_string()).collect();

    let results = submit_concurrently(&fx.service, keys).await;

    assert!(results.iter().all(|r| r.is_created()));
    assert_eq!(fx.entities.list().await.unwrap().len(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn mixed_workload_creates_one_entity_per_key() {
    let fx = fixture();
    let keys: Vec<String> = (0..100).map(|_| Uuid::new_v4().to_string()).collect();

    // 10 submissions per key, interleaved
    let mut submissions = Vec::with_capacity(1000);
    for _ in 0..10 {
        for key in &keys {
            submissions.push(key.clone());
        }
    }

    let results = submit_concurrently(&fx.service, submissions).await;

    assert_eq!(results.iter().filter(|r| r.is_created()).count(), 100);
    assert_eq!(results.iter().filter(|r| r.is_duplicate()).count(), 900);
    assert_eq!(fx.entities.list().await.unwrap().len(), 100);
}

#[tokio::test]
async fn malformed_key_touches_nothing() {
    let fx = fixture();

    let result = fx.service.create("definitely-not-a-uuid", payload()).await;
    assert!(matches!(
        result,
        CreationResult::Failed {
            kind: FailureKind::InvalidKey,
            ..
        }
    ));

    assert!(fx.entities.list().await.unwrap().is_empty());
    assert!(!fx.keys.exists("definitely-not-a-uuid").await.unwrap());
}

#[tokio::test]
async fn sequential_resubmission_is_duplicate() {
    let fx = fixture();
    let key = Uuid::new_v4().to_string();

    let first = fx.service.create(&key, payload()).await;
    let CreationResult::Created { entity } = first else {
        panic!("expected created");
    };
    assert_eq!(entity.id.to_string(), key);

    let second = fx.service.create(&key, payload()).await;
    assert!(second.is_duplicate());

    // The created entity is untouched by the duplicate attempt
    let stored = fx.entities.find_by_id(entity.id).await.unwrap().unwrap();
    assert_eq!(stored, entity);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lock_timeout_leaves_key_unclaimed() {
    let coordinator = Arc::new(IdempotencyCoordinator::new(Duration::from_millis(50)));
    let keys = Arc::new(InMemoryKeyStore::new());
    let key = Uuid::new_v4().to_string();

    // A holder that sits on the lock well past the waiter's bound
    let holder = {
        let coordinator = coordinator.clone();
        let key = key.clone();
        tokio::spawn(async move {
            coordinator
                .process(&key, || async {
                    tokio::time::sleep(Duration::from_millis(400)).await;
                    Ok(keystone_server::domain::BankEntity {
                        id: Uuid::new_v4(),
                        name: "Banco Lento".to_string(),
                        code: "0001".to_string(),
                        country: "Argentina".to_string(),
                    })
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let timed_out = coordinator
        .process(&key, || {
            let keys = keys.clone();
            let key = key.clone();
            async move {
                keys.check_and_save(&key).await?;
                unreachable!("work must not run after a lock timeout");
            }
        })
        .await;

    assert!(matches!(
        timed_out,
        CreationResult::Failed {
            kind: FailureKind::LockTimeout,
            ..
        }
    ));
    // The timed-out attempt never reached the durable store
    assert!(!keys.exists(&key).await.unwrap());

    assert!(holder.await.unwrap().is_created());
}
