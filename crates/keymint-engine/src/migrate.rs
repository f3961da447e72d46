//! Schema-migration engine.
//!
//! Discovers `{version}_{description}.sql` files in a directory, applies the
//! unapplied ones in version order, and records each application in
//! `schema_migrations` inside the same transaction as the migration SQL, so
//! a file is either fully applied and recorded or not applied at all.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::PgPool;
use tracing::{error, info};

use keymint_core::{
    AppliedMigration, KeyError, KeyResult, Migration, MigrationStatus, MigrationStore,
};

pub struct MigrationEngine {
    store: Arc<dyn MigrationStore>,
    pool: PgPool,
    migrations_dir: PathBuf,
}

impl MigrationEngine {
    pub fn new(store: Arc<dyn MigrationStore>, pool: PgPool, migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            pool,
            migrations_dir: migrations_dir.into(),
        }
    }

    /// Create the history table when it does not exist yet. Runs before any
    /// scan so a fresh database can be migrated from zero.
    pub async fn ensure_history_table(&self) -> KeyResult<()> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS schema_migrations ( \
             version VARCHAR(64) PRIMARY KEY, \
             applied_at TIMESTAMPTZ NOT NULL DEFAULT now())",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| KeyError::Migration(format!("creating schema_migrations table: {e}")))?;
        Ok(())
    }

    /// Apply every pending migration in version order. Returns how many were
    /// applied. The run aborts on the first failing version; migrations that
    /// already committed stay committed.
    pub async fn apply_pending(&self) -> KeyResult<usize> {
        self.ensure_history_table().await?;

        let migrations = scan_migration_files(&self.migrations_dir)?;
        let mut applied = 0usize;
        for migration in &migrations {
            let already = self
                .store
                .is_applied(&migration.version)
                .await
                .map_err(|e| e.with_context("checking migration status"))?;
            if already {
                continue;
            }
            self.apply_one(migration).await.map_err(|e| {
                error!(version = %migration.version, error = %e, "migration failed");
                e
            })?;
            info!(version = %migration.version, name = %migration.name, "migration applied");
            applied += 1;
        }
        Ok(applied)
    }

    async fn apply_one(&self, migration: &Migration) -> KeyResult<()> {
        let sql = fs::read_to_string(&migration.file_path).map_err(|e| {
            KeyError::Migration(format!(
                "version {}: reading {}: {e}",
                migration.version,
                migration.file_path.display()
            ))
        })?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| KeyError::Migration(format!("version {}: starting transaction: {e}", migration.version)))?;

        sqlx::raw_sql(&sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| KeyError::Migration(format!("version {}: executing migration: {e}", migration.version)))?;

        sqlx::query("INSERT INTO schema_migrations (version) VALUES ($1)")
            .bind(&migration.version)
            .execute(&mut *tx)
            .await
            .map_err(|e| KeyError::Migration(format!("version {}: recording migration: {e}", migration.version)))?;

        tx.commit()
            .await
            .map_err(|e| KeyError::Migration(format!("version {}: committing: {e}", migration.version)))
    }

    /// Every on-disk migration annotated with its applied/pending state.
    pub async fn status(&self) -> KeyResult<Vec<Migration>> {
        self.ensure_history_table().await?;
        let migrations = scan_migration_files(&self.migrations_dir)?;
        let applied = self
            .store
            .list_applied()
            .await
            .map_err(|e| e.with_context("fetching applied migrations"))?;
        Ok(merge_status(migrations, &applied))
    }
}

/// Scan a directory for `{version}_{description}.sql` files, sorted by
/// version. Subdirectories and non-SQL files are ignored; a SQL file whose
/// name cannot be parsed aborts the scan.
pub fn scan_migration_files(dir: &Path) -> KeyResult<Vec<Migration>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        KeyError::Migration(format!("reading migrations directory {}: {e}", dir.display()))
    })?;

    let mut migrations = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            KeyError::Migration(format!("reading migrations directory {}: {e}", dir.display()))
        })?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.ends_with(".sql") {
            continue;
        }

        let (version, name) = parse_migration_file_name(file_name)?;
        migrations.push(Migration {
            version,
            name,
            file_path: path,
            status: MigrationStatus::Pending,
            applied_at: None,
        });
    }

    migrations.sort_by(|a, b| a.version.cmp(&b.version));
    Ok(migrations)
}

/// Split `{version}_{name}.sql` into its version and name parts.
pub fn parse_migration_file_name(file_name: &str) -> KeyResult<(String, String)> {
    let stem = file_name.strip_suffix(".sql").unwrap_or(file_name);
    match stem.split_once('_') {
        Some((version, name)) if !version.is_empty() => {
            Ok((version.to_string(), name.to_string()))
        }
        _ => Err(KeyError::InvalidMigrationFile(format!(
            "{file_name} (expected {{version}}_{{name}}.sql)"
        ))),
    }
}

fn merge_status(mut migrations: Vec<Migration>, applied: &[AppliedMigration]) -> Vec<Migration> {
    let by_version: HashMap<&str, &AppliedMigration> =
        applied.iter().map(|m| (m.version.as_str(), m)).collect();
    for migration in &mut migrations {
        if let Some(record) = by_version.get(migration.version.as_str()) {
            migration.status = MigrationStatus::Applied;
            migration.applied_at = Some(record.applied_at);
        }
    }
    migrations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn parses_version_and_name() {
        let (version, name) = parse_migration_file_name("001_create_keys.sql").unwrap();
        assert_eq!(version, "001");
        assert_eq!(name, "create_keys");

        let (version, name) = parse_migration_file_name("002_add_index.sql").unwrap();
        assert_eq!(version, "002");
        assert_eq!(name, "add_index");
    }

    #[test]
    fn rejects_names_without_version_prefix() {
        let err = parse_migration_file_name("abc.sql").unwrap_err();
        assert!(matches!(err, KeyError::InvalidMigrationFile(_)));

        let err = parse_migration_file_name("_missing_version.sql").unwrap_err();
        assert!(matches!(err, KeyError::InvalidMigrationFile(_)));
    }

    #[test]
    fn scan_orders_by_version_and_skips_non_sql() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("002_second.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("001_first.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("README.md"), "notes").unwrap();
        fs::create_dir(dir.path().join("003_not_a_file.sql")).unwrap();

        let migrations = scan_migration_files(dir.path()).unwrap();
        let versions: Vec<&str> = migrations.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, vec!["001", "002"]);
        assert!(migrations
            .iter()
            .all(|m| m.status == MigrationStatus::Pending));
    }

    #[test]
    fn scan_aborts_on_malformed_file_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("001_first.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("abc.sql"), "SELECT 0;").unwrap();

        let err = scan_migration_files(dir.path()).unwrap_err();
        assert!(matches!(err, KeyError::InvalidMigrationFile(_)));
    }

    #[test]
    fn scan_of_missing_directory_fails() {
        let err = scan_migration_files(Path::new("/nonexistent/migrations")).unwrap_err();
        assert!(matches!(err, KeyError::Migration(_)));
    }

    #[test]
    fn merge_annotates_applied_versions() {
        let migrations = vec![
            Migration {
                version: "001".into(),
                name: "first".into(),
                file_path: PathBuf::from("001_first.sql"),
                status: MigrationStatus::Pending,
                applied_at: None,
            },
            Migration {
                version: "002".into(),
                name: "second".into(),
                file_path: PathBuf::from("002_second.sql"),
                status: MigrationStatus::Pending,
                applied_at: None,
            },
        ];
        let applied_at = Utc::now();
        let applied = vec![AppliedMigration {
            version: "001".into(),
            applied_at,
        }];

        let merged = merge_status(migrations, &applied);
        assert_eq!(merged[0].status, MigrationStatus::Applied);
        assert_eq!(merged[0].applied_at, Some(applied_at));
        assert_eq!(merged[1].status, MigrationStatus::Pending);
        assert_eq!(merged[1].applied_at, None);
    }
}
