//! PostgreSQL-backed key and migration stores.
//!
//! All queries are parameter-bound. Absence on single-record lookups is
//! `Ok(None)`; unique-constraint violations on insert surface as
//! `KeyError::Conflict` so the service layer can lean on the database as its
//! only serialization point.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use keymint_core::{
    AppliedMigration, EncryptionKey, KeyError, KeyResult, KeyStatus, KeyStore, MigrationStore,
    NewEncryptionKey,
};

/// Pool bounds: at most 10 open connections, recycled after 30 minutes.
const MAX_CONNECTIONS: u32 = 10;
const MAX_CONNECTION_LIFETIME: Duration = Duration::from_secs(30 * 60);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open a bounded connection pool against `database_url`.
pub async fn connect(database_url: &str) -> KeyResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .max_lifetime(MAX_CONNECTION_LIFETIME)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
        .map_err(|e| KeyError::Storage(format!("opening database pool: {e}")))
}

#[derive(FromRow)]
struct KeyRow {
    id: Uuid,
    tenant_id: String,
    generation: i64,
    wrapped_dek: Vec<u8>,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl KeyRow {
    fn into_key(self) -> KeyResult<EncryptionKey> {
        Ok(EncryptionKey {
            id: self.id,
            tenant_id: self.tenant_id,
            generation: self.generation,
            wrapped_dek: self.wrapped_dek,
            status: self.status.parse()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn storage_err(context: &str, e: sqlx::Error) -> KeyError {
    KeyError::Storage(format!("{context}: {e}"))
}

fn insert_err(context: &str, e: sqlx::Error) -> KeyError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            KeyError::Conflict("duplicate (tenant_id, generation)".into())
        }
        _ => storage_err(context, e),
    }
}

pub struct PgKeyStore {
    pool: PgPool,
}

impl PgKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyStore for PgKeyStore {
    async fn exists_for_tenant(&self, tenant_id: &str) -> KeyResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM encryption_keys WHERE tenant_id = $1)",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_err("counting keys by tenant", e))
    }

    async fn insert(&self, key: NewEncryptionKey) -> KeyResult<EncryptionKey> {
        let row = sqlx::query_as::<_, KeyRow>(
            "INSERT INTO encryption_keys (id, tenant_id, generation, wrapped_dek, status) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, tenant_id, generation, wrapped_dek, status, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(&key.tenant_id)
        .bind(key.generation)
        .bind(&key.wrapped_dek)
        .bind(key.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| insert_err("inserting key", e))?;
        row.into_key()
    }

    async fn find_by_tenant_and_generation(
        &self,
        tenant_id: &str,
        generation: i64,
    ) -> KeyResult<Option<EncryptionKey>> {
        let row = sqlx::query_as::<_, KeyRow>(
            "SELECT id, tenant_id, generation, wrapped_dek, status, created_at, updated_at \
             FROM encryption_keys WHERE tenant_id = $1 AND generation = $2",
        )
        .bind(tenant_id)
        .bind(generation)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_err("finding key by generation", e))?;
        row.map(KeyRow::into_key).transpose()
    }

    async fn find_latest_active(&self, tenant_id: &str) -> KeyResult<Option<EncryptionKey>> {
        let row = sqlx::query_as::<_, KeyRow>(
            "SELECT id, tenant_id, generation, wrapped_dek, status, created_at, updated_at \
             FROM encryption_keys WHERE tenant_id = $1 AND status = 'active' \
             ORDER BY generation DESC LIMIT 1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_err("finding latest active key", e))?;
        row.map(KeyRow::into_key).transpose()
    }

    async fn find_all_by_tenant(&self, tenant_id: &str) -> KeyResult<Vec<EncryptionKey>> {
        let rows = sqlx::query_as::<_, KeyRow>(
            "SELECT id, tenant_id, generation, wrapped_dek, status, created_at, updated_at \
             FROM encryption_keys WHERE tenant_id = $1 ORDER BY generation ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("finding all keys by tenant", e))?;
        rows.into_iter().map(KeyRow::into_key).collect()
    }

    async fn max_generation(&self, tenant_id: &str) -> KeyResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(generation), 0) FROM encryption_keys WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_err("getting max generation", e))
    }

    async fn update_status(&self, id: Uuid, status: KeyStatus) -> KeyResult<()> {
        sqlx::query("UPDATE encryption_keys SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("updating key status", e))?;
        Ok(())
    }
}

pub struct PgMigrationStore {
    pool: PgPool,
}

impl PgMigrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct MigrationRow {
    version: String,
    applied_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
impl MigrationStore for PgMigrationStore {
    async fn list_applied(&self) -> KeyResult<Vec<AppliedMigration>> {
        let rows = sqlx::query_as::<_, MigrationRow>(
            "SELECT version, applied_at FROM schema_migrations ORDER BY version ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("listing applied migrations", e))?;
        Ok(rows
            .into_iter()
            .map(|r| AppliedMigration {
                version: r.version,
                applied_at: r.applied_at,
            })
            .collect())
    }

    async fn record(&self, version: &str) -> KeyResult<()> {
        sqlx::query("INSERT INTO schema_migrations (version) VALUES ($1)")
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    KeyError::Conflict(format!("migration {version} already recorded"))
                }
                _ => storage_err("recording migration", e),
            })?;
        Ok(())
    }

    async fn is_applied(&self, version: &str) -> KeyResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = $1)",
        )
        .bind(version)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_err("checking migration status", e))
    }
}
