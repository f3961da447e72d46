pub mod config;
pub mod migrate;
pub mod service;

pub use config::{KmsConfig, KmsProvider, OtelConfig, ServiceConfig};
pub use migrate::MigrationEngine;
pub use service::KeyService;
