//! In-memory store backends for tests and local development.
//!
//! `MemoryKeyStore` enforces the same `(tenant_id, generation)` uniqueness as
//! the PostgreSQL store, so the create/rotate race semantics are observable
//! without a database.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use keymint_core::{
    AppliedMigration, EncryptionKey, KeyError, KeyResult, KeyStatus, KeyStore, MigrationStore,
    NewEncryptionKey,
};

#[derive(Default)]
pub struct MemoryKeyStore {
    rows: Mutex<Vec<EncryptionKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> KeyResult<std::sync::MutexGuard<'_, Vec<EncryptionKey>>> {
        self.rows
            .lock()
            .map_err(|e| KeyError::Storage(format!("store lock poisoned: {e}")))
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn exists_for_tenant(&self, tenant_id: &str) -> KeyResult<bool> {
        Ok(self.lock()?.iter().any(|k| k.tenant_id == tenant_id))
    }

    async fn insert(&self, key: NewEncryptionKey) -> KeyResult<EncryptionKey> {
        let mut rows = self.lock()?;
        if rows
            .iter()
            .any(|k| k.tenant_id == key.tenant_id && k.generation == key.generation)
        {
            return Err(KeyError::Conflict("duplicate (tenant_id, generation)".into()));
        }
        let now = Utc::now();
        let stored = EncryptionKey {
            id: Uuid::new_v4(),
            tenant_id: key.tenant_id,
            generation: key.generation,
            wrapped_dek: key.wrapped_dek,
            status: key.status,
            created_at: now,
            updated_at: now,
        };
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn find_by_tenant_and_generation(
        &self,
        tenant_id: &str,
        generation: i64,
    ) -> KeyResult<Option<EncryptionKey>> {
        Ok(self
            .lock()?
            .iter()
            .find(|k| k.tenant_id == tenant_id && k.generation == generation)
            .cloned())
    }

    async fn find_latest_active(&self, tenant_id: &str) -> KeyResult<Option<EncryptionKey>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|k| k.tenant_id == tenant_id && k.status == KeyStatus::Active)
            .max_by_key(|k| k.generation)
            .cloned())
    }

    async fn find_all_by_tenant(&self, tenant_id: &str) -> KeyResult<Vec<EncryptionKey>> {
        let mut keys: Vec<EncryptionKey> = self
            .lock()?
            .iter()
            .filter(|k| k.tenant_id == tenant_id)
            .cloned()
            .collect();
        keys.sort_by_key(|k| k.generation);
        Ok(keys)
    }

    async fn max_generation(&self, tenant_id: &str) -> KeyResult<i64> {
        Ok(self
            .lock()?
            .iter()
            .filter(|k| k.tenant_id == tenant_id)
            .map(|k| k.generation)
            .max()
            .unwrap_or(0))
    }

    async fn update_status(&self, id: Uuid, status: KeyStatus) -> KeyResult<()> {
        let mut rows = self.lock()?;
        if let Some(key) = rows.iter_mut().find(|k| k.id == id) {
            key.status = status;
            key.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMigrationStore {
    applied: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl MemoryMigrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> KeyResult<std::sync::MutexGuard<'_, BTreeMap<String, DateTime<Utc>>>> {
        self.applied
            .lock()
            .map_err(|e| KeyError::Storage(format!("store lock poisoned: {e}")))
    }
}

#[async_trait]
impl MigrationStore for MemoryMigrationStore {
    async fn list_applied(&self) -> KeyResult<Vec<AppliedMigration>> {
        Ok(self
            .lock()?
            .iter()
            .map(|(version, applied_at)| AppliedMigration {
                version: version.clone(),
                applied_at: *applied_at,
            })
            .collect())
    }

    async fn record(&self, version: &str) -> KeyResult<()> {
        let mut applied = self.lock()?;
        if applied.contains_key(version) {
            return Err(KeyError::Conflict(format!(
                "migration {version} already recorded"
            )));
        }
        applied.insert(version.to_string(), Utc::now());
        Ok(())
    }

    async fn is_applied(&self, version: &str) -> KeyResult<bool> {
        Ok(self.lock()?.contains_key(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_key(tenant: &str, generation: i64) -> NewEncryptionKey {
        NewEncryptionKey {
            tenant_id: tenant.into(),
            generation,
            wrapped_dek: vec![0xAA; 48],
            status: KeyStatus::Active,
        }
    }

    #[tokio::test]
    async fn insert_enforces_tenant_generation_uniqueness() {
        let store = MemoryKeyStore::new();
        store.insert(new_key("tenant-001", 1)).await.unwrap();
        let err = store.insert(new_key("tenant-001", 1)).await.unwrap_err();
        assert!(matches!(err, KeyError::Conflict(_)));

        // Same generation under another tenant is fine.
        store.insert(new_key("tenant-002", 1)).await.unwrap();
    }

    #[tokio::test]
    async fn latest_active_skips_disabled_generations() {
        let store = MemoryKeyStore::new();
        store.insert(new_key("t", 1)).await.unwrap();
        let second = store.insert(new_key("t", 2)).await.unwrap();
        store
            .update_status(second.id, KeyStatus::Disabled)
            .await
            .unwrap();

        let latest = store.find_latest_active("t").await.unwrap().unwrap();
        assert_eq!(latest.generation, 1);
    }

    #[tokio::test]
    async fn max_generation_is_zero_for_unknown_tenant() {
        let store = MemoryKeyStore::new();
        assert_eq!(store.max_generation("nobody").await.unwrap(), 0);
        store.insert(new_key("t", 1)).await.unwrap();
        store.insert(new_key("t", 2)).await.unwrap();
        assert_eq!(store.max_generation("t").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn find_all_orders_by_generation() {
        let store = MemoryKeyStore::new();
        store.insert(new_key("t", 2)).await.unwrap();
        store.insert(new_key("t", 1)).await.unwrap();
        store.insert(new_key("t", 3)).await.unwrap();
        let generations: Vec<i64> = store
            .find_all_by_tenant("t")
            .await
            .unwrap()
            .iter()
            .map(|k| k.generation)
            .collect();
        assert_eq!(generations, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn migration_store_rejects_duplicate_versions() {
        let store = MemoryMigrationStore::new();
        store.record("001").await.unwrap();
        assert!(store.is_applied("001").await.unwrap());
        assert!(!store.is_applied("002").await.unwrap());
        let err = store.record("001").await.unwrap_err();
        assert!(matches!(err, KeyError::Conflict(_)));

        store.record("002").await.unwrap();
        let versions: Vec<String> = store
            .list_applied()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(versions, vec!["001", "002"]);
    }
}
