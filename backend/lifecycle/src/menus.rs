//! Menu registration for modules.
//!
//! Menus persist in the `module_menus` table; enabling a module upserts and
//! shows them, disabling hides them, uninstalling removes them. Visibility
//! is a flag flip so a disabled module's menu configuration survives.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;
use tracing::info;

use modforge_core::{MenuEntry, ModuleError};
use modforge_registry::store::storage_err;
use modforge_registry::Database;

/// A persisted menu row.
#[derive(Debug, Clone)]
pub struct MenuItem {
    pub id: String,
    pub module_name: String,
    pub title: String,
    pub path: String,
    pub icon: Option<String>,
    pub parent_id: Option<String>,
    pub sort_order: i64,
    pub permission: Option<String>,
    pub visible: bool,
}

pub struct MenuManager {
    db: Arc<Database>,
}

impl MenuManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Upsert a module's menus, leaving them visible.
    pub async fn register_menus(
        &self,
        module: &str,
        menus: &[MenuEntry],
    ) -> Result<(), ModuleError> {
        if menus.is_empty() {
            return Ok(());
        }

        let now = Utc::now().timestamp();
        let mut conn = self.db.conn().await;
        let tx = conn.transaction().map_err(storage_err)?;
        for menu in menus {
            tx.execute(
                "INSERT INTO module_menus (
                    id, module_name, title, path, icon, parent_id, sort_order,
                    permission, visible, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9)
                 ON CONFLICT (id, module_name) DO UPDATE SET
                    title = excluded.title,
                    path = excluded.path,
                    icon = excluded.icon,
                    parent_id = excluded.parent_id,
                    sort_order = excluded.sort_order,
                    permission = excluded.permission,
                    visible = 1,
                    updated_at = excluded.updated_at",
                params![
                    menu.id,
                    module,
                    menu.title,
                    menu.path,
                    menu.icon,
                    menu.parent_id,
                    menu.sort_order,
                    menu.permission,
                    now,
                ],
            )
            .map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;

        info!("[Menus] Registered {} menus for module {module}", menus.len());
        Ok(())
    }

    pub async fn unregister_menus(&self, module: &str) -> Result<(), ModuleError> {
        let conn = self.db.conn().await;
        conn.execute("DELETE FROM module_menus WHERE module_name = ?1", params![module])
            .map_err(storage_err)?;
        info!("[Menus] Unregistered menus for module {module}");
        Ok(())
    }

    pub async fn show_module_menus(&self, module: &str) -> Result<(), ModuleError> {
        self.set_visibility(module, true).await
    }

    pub async fn hide_module_menus(&self, module: &str) -> Result<(), ModuleError> {
        self.set_visibility(module, false).await
    }

    async fn set_visibility(&self, module: &str, visible: bool) -> Result<(), ModuleError> {
        let conn = self.db.conn().await;
        conn.execute(
            "UPDATE module_menus SET visible = ?1, updated_at = ?2 WHERE module_name = ?3",
            params![visible, Utc::now().timestamp(), module],
        )
        .map_err(storage_err)?;
        info!(
            "[Menus] Menus for module {module} are now {}",
            if visible { "visible" } else { "hidden" }
        );
        Ok(())
    }

    /// A module's menus, ordered by sort order.
    pub async fn get_module_menus(&self, module: &str) -> Result<Vec<MenuItem>, ModuleError> {
        let conn = self.db.conn().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, module_name, title, path, icon, parent_id, sort_order, permission, visible
                 FROM module_menus WHERE module_name = ?1 ORDER BY sort_order ASC",
            )
            .map_err(storage_err)?;
        let items = stmt
            .query_map(params![module], row_to_item)
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        Ok(items)
    }

    /// Every visible menu across modules, ordered by sort order.
    pub async fn visible_menus(&self) -> Result<Vec<MenuItem>, ModuleError> {
        let conn = self.db.conn().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, module_name, title, path, icon, parent_id, sort_order, permission, visible
                 FROM module_menus WHERE visible = 1 ORDER BY sort_order ASC",
            )
            .map_err(storage_err)?;
        let items = stmt
            .query_map([], row_to_item)
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        Ok(items)
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<MenuItem> {
    Ok(MenuItem {
        id: row.get(0)?,
        module_name: row.get(1)?,
        title: row.get(2)?,
        path: row.get(3)?,
        icon: row.get(4)?,
        parent_id: row.get(5)?,
        sort_order: row.get(6)?,
        permission: row.get(7)?,
        visible: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn menu(id: &str, sort_order: i64) -> MenuEntry {
        MenuEntry {
            id: id.to_string(),
            title: id.to_string(),
            path: format!("/{id}"),
            icon: None,
            parent_id: None,
            sort_order,
            permission: None,
        }
    }

    #[tokio::test]
    async fn test_register_show_hide_unregister() {
        let db = Arc::new(Database::in_memory().unwrap());
        let manager = MenuManager::new(db);

        manager
            .register_menus("reports", &[menu("inbox", 20), menu("archive", 10)])
            .await
            .unwrap();

        let items = manager.get_module_menus("reports").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "archive"); // sort order
        assert!(items.iter().all(|m| m.visible));

        manager.hide_module_menus("reports").await.unwrap();
        assert!(manager.visible_menus().await.unwrap().is_empty());

        manager.show_module_menus("reports").await.unwrap();
        assert_eq!(manager.visible_menus().await.unwrap().len(), 2);

        manager.unregister_menus("reports").await.unwrap();
        assert!(manager.get_module_menus("reports").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reregister_updates_in_place() {
        let db = Arc::new(Database::in_memory().unwrap());
        let manager = MenuManager::new(db);

        manager.register_menus("reports", &[menu("inbox", 1)]).await.unwrap();
        let mut updated = menu("inbox", 5);
        updated.title = "Inbox v2".to_string();
        manager.register_menus("reports", &[updated]).await.unwrap();

        let items = manager.get_module_menus("reports").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Inbox v2");
        assert_eq!(items[0].sort_order, 5);
    }
}
