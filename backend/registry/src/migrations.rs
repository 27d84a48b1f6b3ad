//! Schema migration runner for module-declared SQL migrations.
//!
//! Applies `*.sql` files from a module's migrations directory in sorted
//! order, each inside its own transaction, and records applied file names so
//! reruns are no-ops. Records are removed with the module's registration.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;
use tracing::{debug, info};
use uuid::Uuid;

use modforge_core::ModuleError;

use crate::store::{storage_err, Database};

pub struct MigrationRunner {
    db: Arc<Database>,
}

impl MigrationRunner {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Apply pending migrations for a module. Returns how many were applied.
    pub async fn apply(&self, module: &str, dir: &Path) -> Result<usize, ModuleError> {
        if !dir.is_dir() {
            return Err(ModuleError::DirectoryNotFound(dir.to_path_buf()));
        }

        let mut files: Vec<String> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "sql"))
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        files.sort();

        let applied = self.applied(module).await?;
        let mut count = 0;

        for file in files {
            if applied.contains(&file) {
                debug!("[Migrations] {module}/{file} already applied, skipping");
                continue;
            }

            let sql = std::fs::read_to_string(dir.join(&file))?;

            let mut conn = self.db.conn().await;
            let tx = conn.transaction().map_err(storage_err)?;
            tx.execute_batch(&sql).map_err(|e| {
                ModuleError::Storage(format!("migration {module}/{file} failed: {e}"))
            })?;
            tx.execute(
                "INSERT INTO module_migrations (id, module_name, file_name, applied_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    module,
                    file,
                    Utc::now().timestamp()
                ],
            )
            .map_err(storage_err)?;
            tx.commit().map_err(storage_err)?;

            info!("[Migrations] Applied {module}/{file}");
            count += 1;
        }

        Ok(count)
    }

    /// File names already applied for a module.
    pub async fn applied(&self, module: &str) -> Result<Vec<String>, ModuleError> {
        let conn = self.db.conn().await;
        let mut stmt = conn
            .prepare(
                "SELECT file_name FROM module_migrations WHERE module_name = ?1 ORDER BY file_name",
            )
            .map_err(storage_err)?;
        let files = stmt
            .query_map(params![module], |row| row.get::<_, String>(0))
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_runs_each_file_once() {
        let db = Arc::new(Database::in_memory().unwrap());
        let runner = MigrationRunner::new(db.clone());

        let dir = std::env::temp_dir().join(format!("modforge-mig-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("001_init.sql"),
            "CREATE TABLE report_entries (id TEXT PRIMARY KEY, body TEXT);",
        )
        .unwrap();
        std::fs::write(
            dir.join("002_index.sql"),
            "CREATE INDEX idx_report_entries_body ON report_entries(body);",
        )
        .unwrap();

        let applied = runner.apply("report-center", &dir).await.unwrap();
        assert_eq!(applied, 2);

        // Second run is a no-op.
        let applied = runner.apply("report-center", &dir).await.unwrap();
        assert_eq!(applied, 0);

        let files = runner.applied("report-center").await.unwrap();
        assert_eq!(files, vec!["001_init.sql".to_string(), "002_index.sql".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let db = Arc::new(Database::in_memory().unwrap());
        let runner = MigrationRunner::new(db);
        let err = runner
            .apply("ghost", Path::new("/nonexistent/migrations"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::DirectoryNotFound(_)));
    }
}
