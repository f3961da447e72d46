use thiserror::Error;

/// Every failure mode the service can surface.
///
/// Domain variants are expected outcomes checked by identity; the façade maps
/// them to specific status codes. Infrastructure variants carry their cause
/// flattened into the message, with each layer prepending a short context
/// phrase as the error propagates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("key not found")]
    KeyNotFound,

    #[error("key already exists")]
    KeyAlreadyExists,

    #[error("key is disabled")]
    KeyDisabled,

    #[error("key is already disabled")]
    KeyAlreadyDisabled,

    #[error("invalid tenant id: {0}")]
    InvalidTenantId(String),

    #[error("invalid generation: {0}")]
    InvalidGeneration(String),

    /// A unique-constraint violation on insert. `create_key` reinterprets
    /// this as `KeyAlreadyExists`; `rotate_key` surfaces it unchanged so the
    /// caller can retry at a higher level.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("kms error: {0}")]
    Kms(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("invalid migration file: {0}")]
    InvalidMigrationFile(String),

    #[error("config error: {0}")]
    Config(String),
}

impl KeyError {
    /// Prepend a context phrase to infrastructure errors. Domain and
    /// validation errors pass through untouched so identity checks keep
    /// working at every layer.
    pub fn with_context(self, context: &str) -> Self {
        match self {
            Self::Kms(msg) => Self::Kms(format!("{context}: {msg}")),
            Self::Storage(msg) => Self::Storage(format!("{context}: {msg}")),
            Self::Migration(msg) => Self::Migration(format!("{context}: {msg}")),
            Self::Config(msg) => Self::Config(format!("{context}: {msg}")),
            other => other,
        }
    }

    /// True for expected outcomes of well-formed requests (logged at warn
    /// level, mapped to 4xx), false for infrastructure failures (logged at
    /// error level, mapped to a generic 500).
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFound
                | Self::KeyAlreadyExists
                | Self::KeyDisabled
                | Self::KeyAlreadyDisabled
                | Self::InvalidTenantId(_)
                | Self::InvalidGeneration(_)
                | Self::Conflict(_)
        )
    }
}

pub type KeyResult<T> = Result<T, KeyError>;
