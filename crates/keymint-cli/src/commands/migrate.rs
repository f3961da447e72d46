//! Migration subcommands. Unlike the key commands these talk directly to
//! the database: migrations must be runnable before any server exists.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use keymint_core::MigrationStatus;
use keymint_engine::MigrationEngine;
use keymint_storage::PgMigrationStore;

use super::{CliError, OutputFormat};

const DEFAULT_MIGRATIONS_DIR: &str = "./migrations";

async fn engine() -> Result<MigrationEngine, CliError> {
    let database_url = std::env::var("DATABASE_URL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CliError::Usage("DATABASE_URL environment variable is required".into()))?;

    let migrations_dir = std::env::var("MIGRATIONS_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MIGRATIONS_DIR));

    let pool = keymint_storage::connect(&database_url)
        .await
        .map_err(|e| CliError::Transport(e.to_string()))?;
    let store = Arc::new(PgMigrationStore::new(pool.clone()));
    Ok(MigrationEngine::new(store, pool, migrations_dir))
}

pub async fn up(output: OutputFormat) -> Result<(), CliError> {
    let engine = engine().await?;
    let applied = engine.apply_pending().await?;
    match output {
        OutputFormat::Json => println!("{}", json!({ "applied": applied })),
        OutputFormat::Text => {
            if applied == 0 {
                println!("No pending migrations.");
            } else {
                println!("Applied {applied} migration(s) successfully.");
            }
        }
    }
    Ok(())
}

pub async fn status(output: OutputFormat) -> Result<(), CliError> {
    let engine = engine().await?;
    let migrations = engine.status().await?;

    match output {
        OutputFormat::Json => {
            let rows: Vec<_> = migrations
                .iter()
                .map(|m| {
                    json!({
                        "version": m.version,
                        "name": m.name,
                        "status": m.status.to_string(),
                        "applied_at": m.applied_at.map(|t| t.to_rfc3339()),
                    })
                })
                .collect();
            println!("{}", json!({ "migrations": rows }));
        }
        OutputFormat::Text => {
            println!("{:<10} {:<30} {:<10} {}", "VERSION", "NAME", "STATUS", "APPLIED AT");
            for m in migrations {
                let applied_at = m
                    .applied_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                let status = match m.status {
                    MigrationStatus::Applied => "applied",
                    MigrationStatus::Pending => "pending",
                };
                println!("{:<10} {:<30} {:<10} {}", m.version, m.name, status, applied_at);
            }
        }
    }
    Ok(())
}
