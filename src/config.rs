use anyhow::Result;

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_PORT: u16 = 8080;

// Bounded wait for a per-key lock. Contention beyond this is surfaced to the
// caller as a terminal lock-timeout result, never retried automatically.
const DEFAULT_LOCK_WAIT_SECS: u64 = 10;

// Maximum number of creation tasks a single batch runs concurrently.
const DEFAULT_BATCH_MAX_CONCURRENCY: usize = 64;

// Number of ordered partitions in the in-memory broker. Messages sharing an
// idempotency key always land in the same partition.
const DEFAULT_BROKER_PARTITIONS: usize = 4;

// Default TTL values (in seconds)
const DEFAULT_IDEMPOTENCY_CACHE_TTL_SECS: u64 = 604_800; // 7 days
const DEFAULT_TRACKING_TTL_SECS: u64 = 86_400; // 24 hours

pub const SECONDS_PER_MINUTE: i64 = 60;

// ============================================================================
// Configuration Structures
// ============================================================================

/// Idempotency coordinator configuration
#[derive(Clone, Debug)]
pub struct IdempotencyConfig {
    /// Bounded wait for per-key lock acquisition (seconds)
    pub lock_wait_secs: u64,
}

/// Batch submitter configuration
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Upper bound on concurrently running creation tasks per batch
    pub max_concurrency: usize,
}

/// Kafka transport configuration
///
/// When `enabled` is false the service runs on the in-memory partitioned
/// broker, which preserves the same per-key ordering guarantees.
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    pub enabled: bool,
    /// Comma-separated broker list
    pub brokers: String,
    /// Topic carrying creation requests, partitioned by idempotency key
    pub request_topic: String,
    /// Topic carrying processing results
    pub result_topic: String,
    /// Consumer group for the request consumers
    pub consumer_group: String,
}

/// In-memory broker configuration
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Number of ordered partitions (one consumer task each)
    pub partitions: usize,
}

/// Redis cache / tracking configuration
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub enabled: bool,
    pub url: String,
    /// TTL for cached idempotency-key claims (seconds)
    pub idempotency_ttl_secs: u64,
    /// TTL for tracked message records (seconds)
    pub tracking_ttl_secs: u64,
    /// Prefix for idempotency cache keys: "idempotency:{key}"
    pub idempotency_prefix: String,
    /// Prefix for tracked messages by id: "message:id:{message_id}"
    pub message_id_prefix: String,
    /// Prefix for the key -> message id index: "message:key:{idempotency_key}"
    pub message_key_prefix: String,
}

/// Database connection configuration
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// Postgres connection string; when absent, in-memory stores are used
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Timeout for acquiring a connection from the pool (seconds)
    pub acquire_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub idempotency: IdempotencyConfig,
    pub batch: BatchConfig,
    pub kafka: KafkaConfig,
    pub broker: BrokerConfig,
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            idempotency: IdempotencyConfig {
                lock_wait_secs: std::env::var("IDEMPOTENCY_LOCK_WAIT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_LOCK_WAIT_SECS),
            },
            batch: BatchConfig {
                max_concurrency: std::env::var("BATCH_MAX_CONCURRENCY")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_BATCH_MAX_CONCURRENCY),
            },
            kafka: KafkaConfig {
                enabled: std::env::var("KAFKA_ENABLED")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false),
                brokers: std::env::var("KAFKA_BROKERS")
                    .unwrap_or_else(|_| "localhost:9092".to_string()),
                request_topic: std::env::var("KAFKA_REQUEST_TOPIC")
                    .unwrap_or_else(|_| "entity-create-requests".to_string()),
                result_topic: std::env::var("KAFKA_RESULT_TOPIC")
                    .unwrap_or_else(|_| "entity-create-results".to_string()),
                consumer_group: std::env::var("KAFKA_CONSUMER_GROUP")
                    .unwrap_or_else(|_| "keystone-consumers".to_string()),
            },
            broker: BrokerConfig {
                partitions: std::env::var("BROKER_PARTITIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_BROKER_PARTITIONS),
            },
            redis: RedisConfig {
                enabled: std::env::var("REDIS_ENABLED")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false),
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
                idempotency_ttl_secs: std::env::var("REDIS_IDEMPOTENCY_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_IDEMPOTENCY_CACHE_TTL_SECS),
                tracking_ttl_secs: std::env::var("REDIS_TRACKING_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_TRACKING_TTL_SECS),
                idempotency_prefix: std::env::var("REDIS_IDEMPOTENCY_PREFIX")
                    .unwrap_or_else(|_| "idempotency:".to_string()),
                message_id_prefix: std::env::var("REDIS_MESSAGE_ID_PREFIX")
                    .unwrap_or_else(|_| "message:id:".to_string()),
                message_key_prefix: std::env::var("REDIS_MESSAGE_KEY_PREFIX")
                    .unwrap_or_else(|_| "message:key:".to_string()),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").ok(),
                max_connections: std::env::var("DB_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
                acquire_timeout_secs: std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            },
        })
    }

    /// Validate configuration consistency at startup.
    pub fn validate(&self) -> Result<()> {
        if self.idempotency.lock_wait_secs == 0 {
            anyhow::bail!("IDEMPOTENCY_LOCK_WAIT_SECS must be greater than zero");
        }
        if self.batch.max_concurrency == 0 {
            anyhow::bail!("BATCH_MAX_CONCURRENCY must be greater than zero");
        }
        if self.broker.partitions == 0 {
            anyhow::bail!("BROKER_PARTITIONS must be greater than zero");
        }
        if self.kafka.enabled {
            if self.kafka.brokers.trim().is_empty() {
                anyhow::bail!("KAFKA_BROKERS must be set when KAFKA_ENABLED=true");
            }
            if self.kafka.request_topic.trim().is_empty()
                || self.kafka.result_topic.trim().is_empty()
            {
                anyhow::bail!("Kafka topics must not be empty when KAFKA_ENABLED=true");
            }
        }
        if self.redis.enabled && self.redis.url.trim().is_empty() {
            anyhow::bail!("REDIS_URL must be set when REDIS_ENABLED=true");
        }
        Ok(())
    }

    /// Default configuration for tests and local development without any
    /// external infrastructure.
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            rust_log: "info".to_string(),
            idempotency: IdempotencyConfig {
                lock_wait_secs: DEFAULT_LOCK_WAIT_SECS,
            },
            batch: BatchConfig {
                max_concurrency: DEFAULT_BATCH_MAX_CONCURRENCY,
            },
            kafka: KafkaConfig {
                enabled: false,
                brokers: String::new(),
                request_topic: "entity-create-requests".to_string(),
                result_topic: "entity-create-results".to_string(),
                consumer_group: "keystone-test".to_string(),
            },
            broker: BrokerConfig {
                partitions: DEFAULT_BROKER_PARTITIONS,
            },
            redis: RedisConfig {
                enabled: false,
                url: String::new(),
                idempotency_ttl_secs: DEFAULT_IDEMPOTENCY_CACHE_TTL_SECS,
                tracking_ttl_secs: DEFAULT_TRACKING_TTL_SECS,
                idempotency_prefix: "idempotency:".to_string(),
                message_id_prefix: "message:id:".to_string(),
                message_key_prefix: "message:key:".to_string(),
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
                acquire_timeout_secs: 10,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::for_tests();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_lock_wait_rejected() {
        let mut config = Config::for_tests();
        config.idempotency.lock_wait_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_kafka_enabled_requires_brokers() {
        let mut config = Config::for_tests();
        config.kafka.enabled = true;
        config.kafka.brokers = String::new();
        assert!(config.validate().is_err());
    }
}
