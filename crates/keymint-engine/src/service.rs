//! Key lifecycle rules: generation assignment, wrap/unwrap choreography,
//! and the rotation/disable state machine.

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{error, instrument, warn};
use zeroize::Zeroizing;

use keymint_core::{
    KeyError, KeyMaterial, KeyMetadata, KeyResult, KeyStatus, KeyStore, KmsClient,
    NewEncryptionKey, DEK_SIZE,
};

/// Orchestrates the key store and the KMS client. Stateless and safe for
/// concurrent use; the store's unique constraint on
/// `(tenant_id, generation)` is the only serialization point.
pub struct KeyService {
    store: Arc<dyn KeyStore>,
    kms: Arc<dyn KmsClient>,
}

impl KeyService {
    pub fn new(store: Arc<dyn KeyStore>, kms: Arc<dyn KmsClient>) -> Self {
        Self { store, kms }
    }

    /// Fresh 32-byte DEK from the OS CSPRNG, zeroed on drop.
    fn generate_dek() -> Zeroizing<Vec<u8>> {
        let mut dek = Zeroizing::new(vec![0u8; DEK_SIZE]);
        OsRng.fill_bytes(&mut dek);
        dek
    }

    /// Issue the first key for a tenant at generation 1.
    ///
    /// Two racing calls may both pass the existence check; the loser fails
    /// the insert with a conflict, reported here as `KeyAlreadyExists`.
    #[instrument(skip(self))]
    pub async fn create_key(&self, tenant_id: &str) -> KeyResult<KeyMetadata> {
        let exists = self
            .store
            .exists_for_tenant(tenant_id)
            .await
            .map_err(|e| {
                error!(operation = "create_key", tenant_id, error = %e, "failed to check existing key");
                e.with_context("checking existing key")
            })?;
        if exists {
            warn!(operation = "create_key", tenant_id, "key already exists");
            return Err(KeyError::KeyAlreadyExists);
        }

        let dek = Self::generate_dek();
        let wrapped = self.kms.encrypt(&dek).await.map_err(|e| {
            error!(operation = "create_key", tenant_id, error = %e, "failed to wrap key");
            e.with_context("wrapping key")
        })?;
        drop(dek);

        let record = self
            .store
            .insert(NewEncryptionKey {
                tenant_id: tenant_id.to_string(),
                generation: 1,
                wrapped_dek: wrapped,
                status: KeyStatus::Active,
            })
            .await
            .map_err(|e| match e {
                KeyError::Conflict(_) => {
                    warn!(operation = "create_key", tenant_id, "lost create race");
                    KeyError::KeyAlreadyExists
                }
                other => {
                    error!(operation = "create_key", tenant_id, error = %other, "failed to store key");
                    other.with_context("storing key")
                }
            })?;

        Ok(KeyMetadata::from(&record))
    }

    /// Unwrap and return the highest-generation active key for a tenant.
    #[instrument(skip(self))]
    pub async fn current_key(&self, tenant_id: &str) -> KeyResult<KeyMaterial> {
        let record = self
            .store
            .find_latest_active(tenant_id)
            .await
            .map_err(|e| {
                error!(operation = "get_current_key", tenant_id, error = %e, "failed to find current key");
                e.with_context("finding current key")
            })?;
        let Some(record) = record else {
            warn!(operation = "get_current_key", tenant_id, "key not found");
            return Err(KeyError::KeyNotFound);
        };

        let dek = self.kms.decrypt(&record.wrapped_dek).await.map_err(|e| {
            error!(operation = "get_current_key", tenant_id, error = %e, "failed to unwrap key");
            e.with_context("unwrapping key")
        })?;

        Ok(KeyMaterial {
            tenant_id: record.tenant_id,
            generation: record.generation,
            dek,
        })
    }

    /// Unwrap and return one specific generation. A disabled generation is
    /// reported distinctly from an absent one: the caller learns it exists
    /// but is no longer usable.
    #[instrument(skip(self))]
    pub async fn key_by_generation(&self, tenant_id: &str, generation: i64) -> KeyResult<KeyMaterial> {
        let record = self
            .store
            .find_by_tenant_and_generation(tenant_id, generation)
            .await
            .map_err(|e| {
                error!(operation = "get_key_by_generation", tenant_id, generation, error = %e, "failed to find key");
                e.with_context("finding key")
            })?;
        let Some(record) = record else {
            warn!(operation = "get_key_by_generation", tenant_id, generation, "key not found");
            return Err(KeyError::KeyNotFound);
        };
        if record.status == KeyStatus::Disabled {
            warn!(operation = "get_key_by_generation", tenant_id, generation, "key is disabled");
            return Err(KeyError::KeyDisabled);
        }

        let dek = self.kms.decrypt(&record.wrapped_dek).await.map_err(|e| {
            error!(operation = "get_key_by_generation", tenant_id, generation, error = %e, "failed to unwrap key");
            e.with_context("unwrapping key")
        })?;

        Ok(KeyMaterial {
            tenant_id: record.tenant_id,
            generation: record.generation,
            dek,
        })
    }

    /// Issue the next generation for a tenant. Older generations stay
    /// untouched so previously encrypted data remains decryptable; only
    /// `disable_key` removes a generation from the decryption set.
    ///
    /// Two racing rotations observing the same max both insert at the same
    /// generation; the loser's `Conflict` is surfaced for the caller to
    /// retry at its own discretion.
    #[instrument(skip(self))]
    pub async fn rotate_key(&self, tenant_id: &str) -> KeyResult<KeyMetadata> {
        let max_generation = self.store.max_generation(tenant_id).await.map_err(|e| {
            error!(operation = "rotate_key", tenant_id, error = %e, "failed to get max generation");
            e.with_context("getting max generation")
        })?;
        if max_generation == 0 {
            warn!(operation = "rotate_key", tenant_id, "key not found for rotation");
            return Err(KeyError::KeyNotFound);
        }

        let dek = Self::generate_dek();
        let wrapped = self.kms.encrypt(&dek).await.map_err(|e| {
            error!(operation = "rotate_key", tenant_id, error = %e, "failed to wrap key");
            e.with_context("wrapping key")
        })?;
        drop(dek);

        let record = self
            .store
            .insert(NewEncryptionKey {
                tenant_id: tenant_id.to_string(),
                generation: max_generation + 1,
                wrapped_dek: wrapped,
                status: KeyStatus::Active,
            })
            .await
            .map_err(|e| match e {
                conflict @ KeyError::Conflict(_) => {
                    warn!(operation = "rotate_key", tenant_id, "lost rotate race");
                    conflict
                }
                other => {
                    error!(operation = "rotate_key", tenant_id, error = %other, "failed to store rotated key");
                    other.with_context("storing key")
                }
            })?;

        Ok(KeyMetadata::from(&record))
    }

    /// Metadata for every generation, in generation order. Never touches
    /// plaintext. Empty when the tenant has no keys.
    #[instrument(skip(self))]
    pub async fn list_keys(&self, tenant_id: &str) -> KeyResult<Vec<KeyMetadata>> {
        let keys = self.store.find_all_by_tenant(tenant_id).await.map_err(|e| {
            error!(operation = "list_keys", tenant_id, error = %e, "failed to find keys");
            e.with_context("finding keys")
        })?;
        Ok(keys.iter().map(KeyMetadata::from).collect())
    }

    /// Disable one generation. Not idempotent: disabling is an audited,
    /// rate-observable action, so a repeat call on an already-disabled
    /// generation is refused rather than silently accepted.
    #[instrument(skip(self))]
    pub async fn disable_key(&self, tenant_id: &str, generation: i64) -> KeyResult<()> {
        let record = self
            .store
            .find_by_tenant_and_generation(tenant_id, generation)
            .await
            .map_err(|e| {
                error!(operation = "disable_key", tenant_id, generation, error = %e, "failed to find key");
                e.with_context("finding key")
            })?;
        let Some(record) = record else {
            warn!(operation = "disable_key", tenant_id, generation, "key not found");
            return Err(KeyError::KeyNotFound);
        };
        if record.status == KeyStatus::Disabled {
            warn!(operation = "disable_key", tenant_id, generation, "key is already disabled");
            return Err(KeyError::KeyAlreadyDisabled);
        }

        self.store
            .update_status(record.id, KeyStatus::Disabled)
            .await
            .map_err(|e| {
                error!(operation = "disable_key", tenant_id, generation, error = %e, "failed to update status");
                e.with_context("updating status")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keymint_core::EncryptionKey;
    use keymint_storage::{LocalKmsClient, MemoryKeyStore};
    use uuid::Uuid;

    const KEK: [u8; 32] = [11u8; 32];

    fn service() -> KeyService {
        service_with_store(Arc::new(MemoryKeyStore::new()))
    }

    fn service_with_store(store: Arc<dyn KeyStore>) -> KeyService {
        let kms = Arc::new(LocalKmsClient::new("projects/test/keys/kek", &KEK));
        KeyService::new(store, kms)
    }

    /// Store stub whose insert always loses the unique-constraint race while
    /// reads pass through, mimicking a concurrent writer that got there first.
    struct ConflictingStore {
        inner: Arc<MemoryKeyStore>,
    }

    #[async_trait]
    impl KeyStore for ConflictingStore {
        async fn exists_for_tenant(&self, tenant_id: &str) -> KeyResult<bool> {
            self.inner.exists_for_tenant(tenant_id).await
        }

        async fn insert(&self, _key: NewEncryptionKey) -> KeyResult<EncryptionKey> {
            Err(KeyError::Conflict("duplicate (tenant_id, generation)".into()))
        }

        async fn find_by_tenant_and_generation(
            &self,
            tenant_id: &str,
            generation: i64,
        ) -> KeyResult<Option<EncryptionKey>> {
            self.inner
                .find_by_tenant_and_generation(tenant_id, generation)
                .await
        }

        async fn find_latest_active(&self, tenant_id: &str) -> KeyResult<Option<EncryptionKey>> {
            self.inner.find_latest_active(tenant_id).await
        }

        async fn find_all_by_tenant(&self, tenant_id: &str) -> KeyResult<Vec<EncryptionKey>> {
            self.inner.find_all_by_tenant(tenant_id).await
        }

        async fn max_generation(&self, tenant_id: &str) -> KeyResult<i64> {
            self.inner.max_generation(tenant_id).await
        }

        async fn update_status(&self, id: Uuid, status: KeyStatus) -> KeyResult<()> {
            self.inner.update_status(id, status).await
        }
    }

    #[tokio::test]
    async fn create_issues_generation_one_active() {
        let svc = service();
        let meta = svc.create_key("tenant-001").await.unwrap();
        assert_eq!(meta.tenant_id, "tenant-001");
        assert_eq!(meta.generation, 1);
        assert_eq!(meta.status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn create_twice_reports_already_exists() {
        let svc = service();
        svc.create_key("tenant-001").await.unwrap();
        let err = svc.create_key("tenant-001").await.unwrap_err();
        assert_eq!(err, KeyError::KeyAlreadyExists);
    }

    #[tokio::test]
    async fn create_race_loser_reports_already_exists() {
        // Existence check passes, insert loses the unique-constraint race.
        let svc = service_with_store(Arc::new(ConflictingStore {
            inner: Arc::new(MemoryKeyStore::new()),
        }));
        let err = svc.create_key("tenant-001").await.unwrap_err();
        assert_eq!(err, KeyError::KeyAlreadyExists);
    }

    #[tokio::test]
    async fn created_key_round_trips_through_kms() {
        let svc = service();
        svc.create_key("tenant-001").await.unwrap();

        let first = svc.key_by_generation("tenant-001", 1).await.unwrap();
        assert_eq!(first.dek.len(), DEK_SIZE);

        let second = svc.key_by_generation("tenant-001", 1).await.unwrap();
        assert_eq!(first.dek.as_slice(), second.dek.as_slice());

        let current = svc.current_key("tenant-001").await.unwrap();
        assert_eq!(current.generation, 1);
        assert_eq!(current.dek.as_slice(), first.dek.as_slice());
    }

    #[tokio::test]
    async fn distinct_tenants_get_distinct_deks() {
        let svc = service();
        svc.create_key("tenant-001").await.unwrap();
        svc.create_key("tenant-002").await.unwrap();
        let a = svc.current_key("tenant-001").await.unwrap();
        let b = svc.current_key("tenant-002").await.unwrap();
        assert_ne!(a.dek.as_slice(), b.dek.as_slice());
    }

    #[tokio::test]
    async fn rotate_requires_an_existing_key() {
        let svc = service();
        let err = svc.rotate_key("unknown").await.unwrap_err();
        assert_eq!(err, KeyError::KeyNotFound);
    }

    #[tokio::test]
    async fn rotate_increments_generation_by_one() {
        let svc = service();
        svc.create_key("tenant-001").await.unwrap();
        for expected in 2i64..=4 {
            let meta = svc.rotate_key("tenant-001").await.unwrap();
            assert_eq!(meta.generation, expected);
            assert_eq!(meta.status, KeyStatus::Active);
        }
        let current = svc.current_key("tenant-001").await.unwrap();
        assert_eq!(current.generation, 4);
    }

    #[tokio::test]
    async fn rotate_race_loser_surfaces_conflict() {
        // Seed one generation, then rotate through a store whose insert
        // always loses: max_generation observes 1 but the insert at 2 conflicts.
        let store = Arc::new(MemoryKeyStore::new());
        service_with_store(store.clone())
            .create_key("tenant-001")
            .await
            .unwrap();

        let racing = service_with_store(Arc::new(ConflictingStore { inner: store }));
        let err = racing.rotate_key("tenant-001").await.unwrap_err();
        assert!(matches!(err, KeyError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_returns_all_generations_in_order() {
        let svc = service();
        assert!(svc.list_keys("tenant-001").await.unwrap().is_empty());

        svc.create_key("tenant-001").await.unwrap();
        svc.rotate_key("tenant-001").await.unwrap();
        svc.rotate_key("tenant-001").await.unwrap();

        let keys = svc.list_keys("tenant-001").await.unwrap();
        let generations: Vec<i64> = keys.iter().map(|k| k.generation).collect();
        assert_eq!(generations, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn disabled_generation_is_gone_but_siblings_survive() {
        let svc = service();
        svc.create_key("tenant-001").await.unwrap();
        svc.rotate_key("tenant-001").await.unwrap();
        let original = svc.key_by_generation("tenant-001", 1).await.unwrap();

        svc.disable_key("tenant-001", 2).await.unwrap();

        let err = svc.key_by_generation("tenant-001", 2).await.unwrap_err();
        assert_eq!(err, KeyError::KeyDisabled);

        // The untouched generation still unwraps to the same bytes.
        let survivor = svc.key_by_generation("tenant-001", 1).await.unwrap();
        assert_eq!(survivor.dek.as_slice(), original.dek.as_slice());
    }

    #[tokio::test]
    async fn current_falls_back_to_highest_remaining_active() {
        let svc = service();
        svc.create_key("tenant-001").await.unwrap();
        svc.rotate_key("tenant-001").await.unwrap();
        svc.disable_key("tenant-001", 2).await.unwrap();

        let current = svc.current_key("tenant-001").await.unwrap();
        assert_eq!(current.generation, 1);
    }

    #[tokio::test]
    async fn disable_is_not_idempotent() {
        let svc = service();
        svc.create_key("tenant-001").await.unwrap();
        svc.disable_key("tenant-001", 1).await.unwrap();
        let err = svc.disable_key("tenant-001", 1).await.unwrap_err();
        assert_eq!(err, KeyError::KeyAlreadyDisabled);
    }

    #[tokio::test]
    async fn disable_unknown_generation_is_not_found() {
        let svc = service();
        svc.create_key("tenant-001").await.unwrap();
        let err = svc.disable_key("tenant-001", 9).await.unwrap_err();
        assert_eq!(err, KeyError::KeyNotFound);
    }

    #[tokio::test]
    async fn current_after_disabling_everything_is_not_found() {
        let svc = service();
        svc.create_key("tenant-001").await.unwrap();
        svc.disable_key("tenant-001", 1).await.unwrap();
        let err = svc.current_key("tenant-001").await.unwrap_err();
        assert_eq!(err, KeyError::KeyNotFound);
    }
}
