pub mod kms;
pub mod memory;
pub mod postgres;

pub use kms::{HttpKmsClient, LocalKmsClient};
pub use memory::{MemoryKeyStore, MemoryMigrationStore};
pub use postgres::{connect, PgKeyStore, PgMigrationStore};
