use async_trait::async_trait;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::KeyResult;
use crate::model::{AppliedMigration, EncryptionKey, KeyStatus, NewEncryptionKey};

/// Persistence of wrapped encryption keys.
///
/// Single-record lookups signal absence with `Ok(None)`; an `Err` always
/// means an I/O or schema failure. Callers lean on that distinction.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn exists_for_tenant(&self, tenant_id: &str) -> KeyResult<bool>;

    /// Insert a new key, minting `id` and both timestamps. Fails with
    /// [`KeyError::Conflict`](crate::KeyError::Conflict) when
    /// `(tenant_id, generation)` already exists.
    async fn insert(&self, key: NewEncryptionKey) -> KeyResult<EncryptionKey>;

    async fn find_by_tenant_and_generation(
        &self,
        tenant_id: &str,
        generation: i64,
    ) -> KeyResult<Option<EncryptionKey>>;

    /// Highest-generation record whose status is `active`, if any.
    async fn find_latest_active(&self, tenant_id: &str) -> KeyResult<Option<EncryptionKey>>;

    /// All generations for a tenant, ordered by generation ascending.
    async fn find_all_by_tenant(&self, tenant_id: &str) -> KeyResult<Vec<EncryptionKey>>;

    /// Highest generation for a tenant, 0 when the tenant has no keys.
    async fn max_generation(&self, tenant_id: &str) -> KeyResult<i64>;

    async fn update_status(&self, id: Uuid, status: KeyStatus) -> KeyResult<()>;
}

/// History of applied schema migrations.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Applied migrations, ordered by version ascending.
    async fn list_applied(&self) -> KeyResult<Vec<AppliedMigration>>;

    /// Record a version as applied. Fails on duplicates.
    async fn record(&self, version: &str) -> KeyResult<()>;

    async fn is_applied(&self, version: &str) -> KeyResult<bool>;
}

/// Envelope operations against an external KMS. Implementations are bound
/// to a single immutable KEK resource name at construction; callers never
/// name the KEK, which keeps the trust boundary in one place.
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Wrap a plaintext DEK; returns the ciphertext this service persists.
    async fn encrypt(&self, plaintext: &[u8]) -> KeyResult<Vec<u8>>;

    /// Unwrap a previously wrapped DEK. The plaintext is zeroed on drop.
    async fn decrypt(&self, ciphertext: &[u8]) -> KeyResult<Zeroizing<Vec<u8>>>;
}
