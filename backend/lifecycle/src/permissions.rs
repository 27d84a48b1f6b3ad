//! Runtime permission-code registration.
//!
//! Declared permission codes become rows in the shared `permissions` table on
//! install and are removed on uninstall. Codes are global: a re-declaring
//! module takes ownership of an existing code.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;
use tracing::info;
use uuid::Uuid;

use modforge_core::{ModuleError, PermissionEntry};
use modforge_registry::store::storage_err;
use modforge_registry::Database;

pub struct PermissionRegistrar {
    db: Arc<Database>,
}

impl PermissionRegistrar {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Upsert a module's declared permission codes.
    pub async fn register(
        &self,
        module: &str,
        permissions: &[PermissionEntry],
    ) -> Result<(), ModuleError> {
        if permissions.is_empty() {
            return Ok(());
        }

        let now = Utc::now().timestamp();
        let mut conn = self.db.conn().await;
        let tx = conn.transaction().map_err(storage_err)?;
        for perm in permissions {
            tx.execute(
                "INSERT INTO permissions (id, code, name, description, category, module_name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT (code) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    category = excluded.category,
                    module_name = excluded.module_name,
                    updated_at = excluded.updated_at",
                params![
                    Uuid::new_v4().to_string(),
                    perm.code,
                    perm.name,
                    perm.description,
                    perm.category,
                    module,
                    now,
                ],
            )
            .map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;

        info!(
            "[Permissions] Registered {} permissions for module {module}",
            permissions.len()
        );
        Ok(())
    }

    /// Remove every permission code owned by a module.
    pub async fn unregister(&self, module: &str) -> Result<(), ModuleError> {
        let conn = self.db.conn().await;
        let removed = conn
            .execute("DELETE FROM permissions WHERE module_name = ?1", params![module])
            .map_err(storage_err)?;
        info!("[Permissions] Unregistered {removed} permissions for module {module}");
        Ok(())
    }

    /// Codes currently owned by a module.
    pub async fn module_permissions(
        &self,
        module: &str,
    ) -> Result<Vec<PermissionEntry>, ModuleError> {
        let conn = self.db.conn().await;
        let mut stmt = conn
            .prepare(
                "SELECT code, name, description, category FROM permissions
                 WHERE module_name = ?1 ORDER BY code",
            )
            .map_err(storage_err)?;
        let entries = stmt
            .query_map(params![module], |row| {
                Ok(PermissionEntry {
                    code: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    category: row.get(3)?,
                })
            })
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        Ok(entries)
    }
}
