use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::batch::BatchSubmitter;
use crate::broker::{
    KafkaRequestConsumer, KafkaTransport, MemoryBroker, PipelineContext, RequestTransport,
};
use crate::config::Config;
use crate::db;
use crate::idempotency::{
    CachedKeyStore, IdempotencyCoordinator, IdempotencyKeyStore, InMemoryKeyStore,
    PostgresKeyStore, RedisIdempotencyCache,
};
use crate::service::EntityService;
use crate::store::{EntityStore, InMemoryEntityStore, PostgresEntityStore};
use crate::tracking::{InMemoryTracker, MessageTracker, RedisTracker};

const RESULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const RESULT_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

/// Shared application state handed to every handler.
///
/// Backend selection happens here, once, at startup: Postgres and Redis and
/// Kafka when configured, in-memory equivalents otherwise. Handlers only see
/// the trait objects.
pub struct AppContext {
    pub config: Config,
    pub service: Arc<EntityService>,
    pub batch: Arc<BatchSubmitter>,
    pub coordinator: Arc<IdempotencyCoordinator>,
    pub keys: Arc<dyn IdempotencyKeyStore>,
    pub entities: Arc<dyn EntityStore>,
    pub tracker: Arc<dyn MessageTracker>,
    pub transport: Arc<dyn RequestTransport>,
}

impl AppContext {
    pub async fn from_config(config: Config) -> Result<Arc<Self>> {
        config.validate()?;

        // Durable storage
        let (keys, entities): (Arc<dyn IdempotencyKeyStore>, Arc<dyn EntityStore>) =
            match &config.database.url {
                Some(_) => {
                    let pool = db::create_pool(&config.database).await?;
                    db::init_schema(&pool).await?;
                    (
                        Arc::new(PostgresKeyStore::new(pool.clone())),
                        Arc::new(PostgresEntityStore::new(pool)),
                    )
                }
                None => {
                    info!("DATABASE_URL not set, using in-memory stores");
                    (
                        Arc::new(InMemoryKeyStore::new()),
                        Arc::new(InMemoryEntityStore::new()),
                    )
                }
            };

        // Optional cache-aside layer in front of the durable key store
        let keys: Arc<dyn IdempotencyKeyStore> = if config.redis.enabled {
            let cache = RedisIdempotencyCache::connect(&config.redis).await?;
            info!("Redis idempotency cache enabled");
            Arc::new(CachedKeyStore::new(keys, Arc::new(cache)))
        } else {
            keys
        };

        let tracker: Arc<dyn MessageTracker> = if config.redis.enabled {
            info!("Redis message tracker enabled");
            Arc::new(RedisTracker::connect(&config.redis).await?)
        } else {
            Arc::new(InMemoryTracker::new())
        };

        // Broker and its consumers
        let transport: Arc<dyn RequestTransport> = if config.kafka.enabled {
            let transport: Arc<dyn RequestTransport> =
                Arc::new(KafkaTransport::new(&config.kafka)?);
            let consumer = KafkaRequestConsumer::new(&config.kafka)?;
            let ctx = Arc::new(PipelineContext {
                keys: keys.clone(),
                entities: entities.clone(),
                tracker: tracker.clone(),
                transport: transport.clone(),
            });
            tokio::spawn(consumer.run(ctx));
            transport
        } else {
            let (broker, receivers) = MemoryBroker::new(config.broker.partitions);
            let transport: Arc<dyn RequestTransport> = broker;
            let ctx = Arc::new(PipelineContext {
                keys: keys.clone(),
                entities: entities.clone(),
                tracker: tracker.clone(),
                transport: transport.clone(),
            });
            MemoryBroker::spawn_partition_workers(receivers, ctx);
            info!(partitions = config.broker.partitions, "In-memory broker started");
            transport
        };

        let coordinator = Arc::new(IdempotencyCoordinator::new(Duration::from_secs(
            config.idempotency.lock_wait_secs,
        )));

        // Periodic sweep of the in-process result cache. Evicted entries fall
        // back to the durable key store, which still refuses the duplicate.
        {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(RESULT_SWEEP_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let removed = coordinator.cleanup_old_results(RESULT_MAX_AGE);
                    if removed > 0 {
                        info!(removed, "Evicted aged cached creation results");
                    }
                }
            });
        }
        let service = Arc::new(EntityService::new(
            coordinator.clone(),
            keys.clone(),
            entities.clone(),
        ));
        let batch = Arc::new(BatchSubmitter::new(
            service.clone(),
            config.batch.max_concurrency,
        ));

        Ok(Arc::new(Self {
            config,
            service,
            batch,
            coordinator,
            keys,
            entities,
            tracker,
            transport,
        }))
    }
}
