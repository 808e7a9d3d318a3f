use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::BankEntity;

/// Storage interface for bank entities.
///
/// The store must provide a per-id atomic existence check: `save` returns
/// false instead of overwriting when the id is already present, which is the
/// last line of defense against races that slip past the application-level
/// lock (process restart, multi-instance deployment).
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert a new entity. Returns false when the id already exists.
    async fn save(&self, entity: &BankEntity) -> Result<bool>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<BankEntity>>;

    async fn exists(&self, id: Uuid) -> Result<bool>;

    async fn list(&self) -> Result<Vec<BankEntity>>;
}

/// In-memory implementation, the default for local runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    entities: Mutex<HashMap<Uuid, BankEntity>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn save(&self, entity: &BankEntity) -> Result<bool> {
        let mut entities = self
            .entities
            .lock()
            .map_err(|_| anyhow::anyhow!("entity store lock poisoned"))?;
        if entities.contains_key(&entity.id) {
            return Ok(false);
        }
        entities.insert(entity.id, entity.clone());
        Ok(true)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<BankEntity>> {
        let entities = self
            .entities
            .lock()
            .map_err(|_| anyhow::anyhow!("entity store lock poisoned"))?;
        Ok(entities.get(&id).cloned())
    }

    async fn exists(&self, id: Uuid) -> Result<bool> {
        let entities = self
            .entities
            .lock()
            .map_err(|_| anyhow::anyhow!("entity store lock poisoned"))?;
        Ok(entities.contains_key(&id))
    }

    async fn list(&self) -> Result<Vec<BankEntity>> {
        let entities = self
            .entities
            .lock()
            .map_err(|_| anyhow::anyhow!("entity store lock poisoned"))?;
        Ok(entities.values().cloned().collect())
    }
}

/// PostgreSQL implementation backed by the shared pool.
pub struct PostgresEntityStore {
    pool: PgPool,
}

impl PostgresEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EntityStore for PostgresEntityStore {
    async fn save(&self, entity: &BankEntity) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO bank_entities (id, name, code, country)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(entity.id)
        .bind(&entity.name)
        .bind(&entity.code)
        .bind(&entity.country)
        .execute(&self.pool)
        .await
        .context("Failed to insert bank entity")?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<BankEntity>> {
        let entity = sqlx::query_as::<_, PgBankEntity>(
            r#"
            SELECT id, name, code, country
            FROM bank_entities
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query bank entity")?;

        Ok(entity.map(Into::into))
    }

    async fn exists(&self, id: Uuid) -> Result<bool> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM bank_entities WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to check bank entity existence")?;

        Ok(exists.0)
    }

    async fn list(&self) -> Result<Vec<BankEntity>> {
        let entities = sqlx::query_as::<_, PgBankEntity>(
            "SELECT id, name, code, country FROM bank_entities ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list bank entities")?;

        Ok(entities.into_iter().map(Into::into).collect())
    }
}

#[derive(sqlx::FromRow)]
struct PgBankEntity {
    id: Uuid,
    name: String,
    code: String,
    country: String,
}

impl From<PgBankEntity> for BankEntity {
    fn from(row: PgBankEntity) -> Self {
        BankEntity {
            id: row.id,
            name: row.name,
            code: row.code,
            country: row.country,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: Uuid) -> BankEntity {
        BankEntity {
            id,
            name: "Banco Test".to_string(),
            code: "999".to_string(),
            country: "Argentina".to_string(),
        }
    }

    #[tokio::test]
    async fn test_save_is_insert_only() {
        let store = InMemoryEntityStore::new();
        let id = Uuid::new_v4();

        assert!(store.save(&entity(id)).await.unwrap());
        assert!(!store.save(&entity(id)).await.unwrap());
        assert!(store.exists(id).await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_missing_returns_none() {
        let store = InMemoryEntityStore::new();
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }
}
