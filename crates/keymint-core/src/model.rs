use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::KeyError;

/// Size of a plaintext data-encryption key: AES-256, 32 bytes.
pub const DEK_SIZE: usize = 32;

/// Lifecycle state of an encryption key. Transitions are monotonic:
/// `Active` → `Disabled`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Disabled,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyStatus {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            other => Err(KeyError::Storage(format!("unknown key status {other:?}"))),
        }
    }
}

/// A persisted per-tenant encryption key. `wrapped_dek` is the KMS-wrapped
/// ciphertext of a 32-byte DEK; the plaintext never appears in this type.
#[derive(Debug, Clone)]
pub struct EncryptionKey {
    pub id: Uuid,
    pub tenant_id: String,
    pub generation: i64,
    pub wrapped_dek: Vec<u8>,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert form of [`EncryptionKey`]: the store mints `id`, `created_at`, and
/// `updated_at` itself.
#[derive(Debug, Clone)]
pub struct NewEncryptionKey {
    pub tenant_id: String,
    pub generation: i64,
    pub wrapped_dek: Vec<u8>,
    pub status: KeyStatus,
}

/// Key metadata returned on create/rotate/list paths. Deliberately contains
/// no key material, wrapped or otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct KeyMetadata {
    pub tenant_id: String,
    pub generation: i64,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&EncryptionKey> for KeyMetadata {
    fn from(key: &EncryptionKey) -> Self {
        Self {
            tenant_id: key.tenant_id.clone(),
            generation: key.generation,
            status: key.status,
            created_at: key.created_at,
        }
    }
}

/// An unwrapped DEK on its way to the caller. The plaintext lives only for
/// the duration of the retrieval call path and is zeroed on drop.
pub struct KeyMaterial {
    pub tenant_id: String,
    pub generation: i64,
    pub dek: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("tenant_id", &self.tenant_id)
            .field("generation", &self.generation)
            .field("dek", &"[REDACTED]")
            .finish()
    }
}

/// Applied/pending state of a schema migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Pending,
    Applied,
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Applied => f.write_str("applied"),
        }
    }
}

/// An on-disk schema migration, annotated with its applied state once known.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version token parsed from the filename prefix, e.g. "001".
    pub version: String,
    /// Human-readable name parsed from the filename remainder.
    pub name: String,
    pub file_path: PathBuf,
    pub status: MigrationStatus,
    pub applied_at: Option<DateTime<Utc>>,
}

/// A row of the migration history table.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub version: String,
    pub applied_at: DateTime<Utc>,
}
