//! Module registry.
//!
//! Owns the authoritative set of registered modules and their dependency
//! graph. Records are persisted to SQLite in one transaction per structural
//! change; an in-memory cache mirrors the store and is refreshed on every
//! write.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_recursion::async_recursion;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use semver::{Version, VersionReq};
use tracing::{info, warn};
use uuid::Uuid;

use modforge_core::{
    DependencyCheckResult, DependencyConflict, DependencyTreeNode, ManifestParser, ModuleError,
    ModuleInfo, ModuleManifest, ModuleStatus,
};

use crate::store::{storage_err, Database};

pub struct ModuleRegistry {
    db: Arc<Database>,
    cache: RwLock<HashMap<String, ModuleInfo>>,
    initialized: AtomicBool,
}

impl ModuleRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            cache: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Preload the cache from the backing store.
    pub async fn initialize(&self) -> Result<(), ModuleError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let rows = {
            let conn = self.db.conn().await;
            let mut stmt = conn
                .prepare("SELECT name, manifest, status, error_message, updated_at FROM modules")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })
                .map_err(storage_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err)?;
            rows
        };

        let mut cache = self.cache.write().unwrap();
        for (name, manifest_json, status, error, updated_at) in rows {
            match decode_info(&manifest_json, &status, error, updated_at) {
                Ok(info) => {
                    cache.insert(name, info);
                }
                Err(e) => warn!("[Registry] Skipping corrupt record for {name}: {e}"),
            }
        }
        info!("[Registry] Initialized with {} modules", cache.len());
        drop(cache);

        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Register a module. Persists the module together with its tags,
    /// dependencies, permissions, menus and endpoints as one transaction.
    pub async fn register(&self, manifest: &ModuleManifest) -> Result<(), ModuleError> {
        let value = serde_json::to_value(manifest)
            .map_err(|e| ModuleError::Storage(e.to_string()))?;
        let errors = ManifestParser::validate_value(&value);
        if !errors.is_empty() {
            return Err(ModuleError::Validation { errors });
        }

        if self.get_module(&manifest.name).await?.is_some() {
            return Err(ModuleError::AlreadyRegistered(manifest.name.clone()));
        }

        let manifest_json =
            serde_json::to_string(manifest).map_err(|e| ModuleError::Storage(e.to_string()))?;
        let now = Utc::now().timestamp();

        {
            let mut conn = self.db.conn().await;
            let tx = conn.transaction().map_err(storage_err)?;

            tx.execute(
                "INSERT INTO modules (
                    id, name, display_name, version, description, author, kind, category,
                    manifest, status, installed_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    Uuid::new_v4().to_string(),
                    manifest.name,
                    manifest.display_name,
                    manifest.version,
                    manifest.description,
                    manifest.author,
                    manifest.kind.map(|k| k.as_str()),
                    manifest.category,
                    manifest_json,
                    ModuleStatus::Installed.as_str(),
                    now,
                ],
            )
            .map_err(storage_err)?;

            for (dep_name, range) in &manifest.dependencies {
                tx.execute(
                    "INSERT INTO module_dependencies (id, module_name, dependency_name, version_range)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![Uuid::new_v4().to_string(), manifest.name, dep_name, range],
                )
                .map_err(storage_err)?;
            }

            for tag in &manifest.tags {
                tx.execute(
                    "INSERT OR IGNORE INTO module_tags (module_name, tag) VALUES (?1, ?2)",
                    params![manifest.name, tag],
                )
                .map_err(storage_err)?;
            }

            for perm in &manifest.permissions {
                tx.execute(
                    "INSERT INTO module_permissions (id, module_name, code, name, description, category)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        Uuid::new_v4().to_string(),
                        manifest.name,
                        perm.code,
                        perm.name,
                        perm.description,
                        perm.category,
                    ],
                )
                .map_err(storage_err)?;
            }

            for menu in &manifest.menus {
                tx.execute(
                    "INSERT INTO module_menus (
                        id, module_name, title, path, icon, parent_id, sort_order,
                        permission, visible, created_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
                    params![
                        menu.id,
                        manifest.name,
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

            for endpoint in &manifest.endpoints {
                tx.execute(
                    "INSERT INTO module_endpoints (id, module_name, method, path, description, permission)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        Uuid::new_v4().to_string(),
                        manifest.name,
                        endpoint.method,
                        endpoint.path,
                        endpoint.description,
                        endpoint.permission,
                    ],
                )
                .map_err(storage_err)?;
            }

            tx.commit().map_err(storage_err)?;
        }

        let info = ModuleInfo {
            manifest: manifest.clone(),
            status: ModuleStatus::Installed,
            error: None,
            updated_at: Utc::now(),
        };
        self.cache.write().unwrap().insert(manifest.name.clone(), info);

        info!("[Registry] Module {} v{} registered", manifest.name, manifest.version);
        Ok(())
    }

    /// Remove a module and all of its persisted records. Blocked while any
    /// other registered module declares a dependency on it, whatever that
    /// dependent's status.
    pub async fn unregister(&self, name: &str) -> Result<(), ModuleError> {
        if self.get_module(name).await?.is_none() {
            return Err(ModuleError::NotRegistered(name.to_string()));
        }

        let dependents = self.get_dependents(name).await?;
        if !dependents.is_empty() {
            return Err(ModuleError::HasDependents { name: name.to_string(), dependents });
        }

        {
            let mut conn = self.db.conn().await;
            let tx = conn.transaction().map_err(storage_err)?;
            tx.execute("DELETE FROM modules WHERE name = ?1", params![name])
                .map_err(storage_err)?;
            for table in [
                "module_dependencies",
                "module_tags",
                "module_permissions",
                "module_menus",
                "module_endpoints",
                "module_migrations",
                "permissions",
            ] {
                tx.execute(
                    &format!("DELETE FROM {table} WHERE module_name = ?1"),
                    params![name],
                )
                .map_err(storage_err)?;
            }
            tx.commit().map_err(storage_err)?;
        }

        self.cache.write().unwrap().remove(name);
        info!("[Registry] Module {name} unregistered");
        Ok(())
    }

    /// Fetch a module record, cache-first.
    pub async fn get_module(&self, name: &str) -> Result<Option<ModuleInfo>, ModuleError> {
        if let Some(info) = self.cache.read().unwrap().get(name) {
            return Ok(Some(info.clone()));
        }

        let row = {
            let conn = self.db.conn().await;
            conn.query_row(
                "SELECT manifest, status, error_message, updated_at FROM modules WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(storage_err)?
        };

        match row {
            Some((manifest_json, status, error, updated_at)) => {
                let info = decode_info(&manifest_json, &status, error, updated_at)?;
                self.cache.write().unwrap().insert(name.to_string(), info.clone());
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    pub async fn has_module(&self, name: &str) -> Result<bool, ModuleError> {
        Ok(self.get_module(name).await?.is_some())
    }

    pub async fn get_all_modules(&self) -> Result<Vec<ModuleInfo>, ModuleError> {
        self.initialize().await?;
        Ok(self.cache.read().unwrap().values().cloned().collect())
    }

    pub async fn get_enabled_modules(&self) -> Result<Vec<ModuleInfo>, ModuleError> {
        let all = self.get_all_modules().await?;
        Ok(all.into_iter().filter(|m| m.status == ModuleStatus::Enabled).collect())
    }

    /// Persist a status transition, stamping `enabled_at`/`disabled_at` as
    /// appropriate, and refresh the cache entry in place.
    pub async fn update_status(
        &self,
        name: &str,
        status: ModuleStatus,
        error: Option<String>,
    ) -> Result<(), ModuleError> {
        let now = Utc::now().timestamp();

        let affected = {
            let conn = self.db.conn().await;
            let sql = match status {
                ModuleStatus::Enabled => {
                    "UPDATE modules SET status = ?1, error_message = ?2, enabled_at = ?3,
                     updated_at = ?3 WHERE name = ?4"
                }
                ModuleStatus::Disabled => {
                    "UPDATE modules SET status = ?1, error_message = ?2, disabled_at = ?3,
                     updated_at = ?3 WHERE name = ?4"
                }
                _ => {
                    "UPDATE modules SET status = ?1, error_message = ?2,
                     updated_at = ?3 WHERE name = ?4"
                }
            };
            conn.execute(sql, params![status.as_str(), error, now, name])
                .map_err(storage_err)?
        };

        if affected == 0 {
            return Err(ModuleError::NotRegistered(name.to_string()));
        }

        let mut cache = self.cache.write().unwrap();
        if let Some(info) = cache.get_mut(name) {
            info.status = status;
            info.error = error;
            info.updated_at = Utc::now();
        }

        info!("[Registry] Module {name} status updated to {status}");
        Ok(())
    }

    /// Check a registered module's declared dependencies.
    pub async fn check_dependencies(&self, name: &str) -> Result<DependencyCheckResult, ModuleError> {
        let info = self
            .get_module(name)
            .await?
            .ok_or_else(|| ModuleError::NotRegistered(name.to_string()))?;
        self.check_dependencies_of(&info.manifest).await
    }

    /// Check a manifest's declared dependencies against the registry. Usable
    /// before the module itself is registered (the install path needs this).
    pub async fn check_dependencies_of(
        &self,
        manifest: &ModuleManifest,
    ) -> Result<DependencyCheckResult, ModuleError> {
        let mut result = DependencyCheckResult::satisfied();

        for (dep_name, range) in &manifest.dependencies {
            match self.get_module(dep_name).await? {
                None => {
                    result.satisfied = false;
                    result.missing.push(dep_name.clone());
                }
                Some(dep) => {
                    let matches = match (
                        VersionReq::parse(range),
                        Version::parse(&dep.manifest.version),
                    ) {
                        (Ok(req), Ok(version)) => req.matches(&version),
                        _ => false,
                    };
                    if !matches {
                        result.satisfied = false;
                        result.conflicts.push(DependencyConflict {
                            module: dep_name.clone(),
                            required: range.clone(),
                            installed: dep.manifest.version.clone(),
                        });
                    }
                }
            }
        }

        Ok(result)
    }

    /// Recursively expand a module's dependencies into a tree. Cycle
    /// detection uses a per-path visited set, so a module shared by two
    /// branches is not falsely flagged.
    pub async fn get_dependency_tree(&self, name: &str) -> Result<DependencyTreeNode, ModuleError> {
        let info = self
            .get_module(name)
            .await?
            .ok_or_else(|| ModuleError::NotRegistered(name.to_string()))?;
        self.build_tree(&info.manifest, HashSet::new()).await
    }

    #[async_recursion]
    async fn build_tree(
        &self,
        manifest: &ModuleManifest,
        mut visited: HashSet<String>,
    ) -> Result<DependencyTreeNode, ModuleError> {
        if visited.contains(&manifest.name) {
            return Err(ModuleError::CircularDependency(manifest.name.clone()));
        }
        visited.insert(manifest.name.clone());

        let mut dependencies = Vec::new();
        for dep_name in manifest.dependencies.keys() {
            if let Some(dep) = self.get_module(dep_name).await? {
                dependencies.push(self.build_tree(&dep.manifest, visited.clone()).await?);
            }
        }

        Ok(DependencyTreeNode {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            dependencies,
        })
    }

    /// Names of registered modules declaring a dependency on `name`.
    pub async fn get_dependents(&self, name: &str) -> Result<Vec<String>, ModuleError> {
        let conn = self.db.conn().await;
        let mut stmt = conn
            .prepare("SELECT module_name FROM module_dependencies WHERE dependency_name = ?1")
            .map_err(storage_err)?;
        let names = stmt
            .query_map(params![name], |row| row.get::<_, String>(0))
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        Ok(names)
    }

    /// Drop the in-memory mirror; the next read repopulates from the store.
    pub fn clear_cache(&self) {
        self.cache.write().unwrap().clear();
        self.initialized.store(false, Ordering::Release);
    }
}

fn decode_info(
    manifest_json: &str,
    status: &str,
    error: Option<String>,
    updated_at: i64,
) -> Result<ModuleInfo, ModuleError> {
    let manifest: ModuleManifest = serde_json::from_str(manifest_json)
        .map_err(|e| ModuleError::Storage(format!("corrupt manifest record: {e}")))?;
    let status = ModuleStatus::parse(status)
        .ok_or_else(|| ModuleError::Storage(format!("unknown module status: {status}")))?;
    let updated_at: DateTime<Utc> =
        DateTime::from_timestamp(updated_at, 0).unwrap_or_else(Utc::now);
    Ok(ModuleInfo { manifest, status, error, updated_at })
}

#[cfg(test)]
mod tests {
    use super::*;
    use modforge_core::ManifestParser;

    fn manifest(name: &str, version: &str, deps: &[(&str, &str)]) -> ModuleManifest {
        let deps_json: serde_json::Map<String, serde_json::Value> = deps
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        let raw = serde_json::json!({
            "name": name,
            "displayName": name,
            "version": version,
            "dependencies": deps_json,
        });
        ManifestParser::parse(&raw.to_string()).unwrap()
    }

    fn registry() -> ModuleRegistry {
        ModuleRegistry::new(Arc::new(Database::in_memory().unwrap()))
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = registry();
        registry.register(&manifest("alpha", "1.0.0", &[])).await.unwrap();

        let info = registry.get_module("alpha").await.unwrap().unwrap();
        assert_eq!(info.status, ModuleStatus::Installed);
        assert_eq!(info.manifest.version, "1.0.0");

        let err = registry.register(&manifest("alpha", "1.0.0", &[])).await.unwrap_err();
        assert!(matches!(err, ModuleError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn test_cache_miss_falls_back_to_store() {
        let registry = registry();
        registry.register(&manifest("alpha", "1.0.0", &[])).await.unwrap();
        registry.clear_cache();

        let info = registry.get_module("alpha").await.unwrap().unwrap();
        assert_eq!(info.manifest.name, "alpha");
    }

    #[tokio::test]
    async fn test_unregister_blocked_by_dependents_in_any_status() {
        let registry = registry();
        registry.register(&manifest("beta", "1.0.0", &[])).await.unwrap();
        registry
            .register(&manifest("alpha", "1.0.0", &[("beta", "^1.0.0")]))
            .await
            .unwrap();

        // alpha is merely installed, not enabled; the edge still blocks.
        let err = registry.unregister("beta").await.unwrap_err();
        match err {
            ModuleError::HasDependents { dependents, .. } => {
                assert_eq!(dependents, vec!["alpha".to_string()]);
            }
            other => panic!("expected HasDependents, got {other}"),
        }

        registry.unregister("alpha").await.unwrap();
        registry.unregister("beta").await.unwrap();
        assert!(registry.get_module("beta").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unregister_unknown_module() {
        let registry = registry();
        let err = registry.unregister("ghost").await.unwrap_err();
        assert!(matches!(err, ModuleError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn test_check_dependencies_version_conflict() {
        let registry = registry();
        registry.register(&manifest("alpha", "1.0.0", &[])).await.unwrap();
        registry
            .register(&manifest("beta", "1.0.0", &[("alpha", "^1.0.0")]))
            .await
            .unwrap();

        let result = registry.check_dependencies("beta").await.unwrap();
        assert!(result.satisfied);

        // Rewrite alpha's recorded version behind the cache.
        {
            let conn = registry.db.conn().await;
            let bumped = serde_json::to_string(&manifest("alpha", "2.0.0", &[])).unwrap();
            conn.execute(
                "UPDATE modules SET version = '2.0.0', manifest = ?1 WHERE name = 'alpha'",
                params![bumped],
            )
            .unwrap();
        }
        registry.clear_cache();

        let result = registry.check_dependencies("beta").await.unwrap();
        assert!(!result.satisfied);
        assert_eq!(
            result.conflicts,
            vec![DependencyConflict {
                module: "alpha".to_string(),
                required: "^1.0.0".to_string(),
                installed: "2.0.0".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_check_dependencies_missing() {
        let registry = registry();
        registry
            .register(&manifest("beta", "1.0.0", &[("alpha", "^1.0.0")]))
            .await
            .unwrap();

        let result = registry.check_dependencies("beta").await.unwrap();
        assert!(!result.satisfied);
        assert_eq!(result.missing, vec!["alpha".to_string()]);
    }

    #[tokio::test]
    async fn test_no_dependencies_always_satisfied() {
        let registry = registry();
        registry.register(&manifest("solo", "0.1.0", &[])).await.unwrap();
        let result = registry.check_dependencies("solo").await.unwrap();
        assert!(result.satisfied);
        assert!(result.missing.is_empty());
        assert!(result.conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_dependency_tree_chain() {
        let registry = registry();
        registry.register(&manifest("c", "1.0.0", &[])).await.unwrap();
        registry.register(&manifest("b", "1.0.0", &[("c", "^1.0.0")])).await.unwrap();
        registry.register(&manifest("a", "1.0.0", &[("b", "^1.0.0")])).await.unwrap();

        let tree = registry.get_dependency_tree("a").await.unwrap();
        assert_eq!(tree.name, "a");
        assert_eq!(tree.dependencies[0].name, "b");
        assert_eq!(tree.dependencies[0].dependencies[0].name, "c");
    }

    #[tokio::test]
    async fn test_dependency_tree_detects_cycle() {
        let registry = registry();
        registry.register(&manifest("x", "1.0.0", &[("y", "*")])).await.unwrap();
        registry.register(&manifest("y", "1.0.0", &[("z", "*")])).await.unwrap();
        registry.register(&manifest("z", "1.0.0", &[("x", "*")])).await.unwrap();

        let err = registry.get_dependency_tree("x").await.unwrap_err();
        assert!(matches!(err, ModuleError::CircularDependency(_)));
    }

    #[tokio::test]
    async fn test_diamond_sharing_is_not_a_cycle() {
        let registry = registry();
        registry.register(&manifest("base", "1.0.0", &[])).await.unwrap();
        registry.register(&manifest("left", "1.0.0", &[("base", "*")])).await.unwrap();
        registry.register(&manifest("right", "1.0.0", &[("base", "*")])).await.unwrap();
        registry
            .register(&manifest("top", "1.0.0", &[("left", "*"), ("right", "*")]))
            .await
            .unwrap();

        let tree = registry.get_dependency_tree("top").await.unwrap();
        assert_eq!(tree.dependencies.len(), 2);
    }

    #[tokio::test]
    async fn test_update_status_persists_and_refreshes_cache() {
        let registry = registry();
        registry.register(&manifest("alpha", "1.0.0", &[])).await.unwrap();

        registry
            .update_status("alpha", ModuleStatus::Enabled, None)
            .await
            .unwrap();
        let info = registry.get_module("alpha").await.unwrap().unwrap();
        assert_eq!(info.status, ModuleStatus::Enabled);

        registry
            .update_status("alpha", ModuleStatus::Error, Some("boom".to_string()))
            .await
            .unwrap();
        registry.clear_cache();
        let info = registry.get_module("alpha").await.unwrap().unwrap();
        assert_eq!(info.status, ModuleStatus::Error);
        assert_eq!(info.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_get_enabled_modules() {
        let registry = registry();
        registry.register(&manifest("a", "1.0.0", &[])).await.unwrap();
        registry.register(&manifest("b", "1.0.0", &[])).await.unwrap();
        registry.update_status("a", ModuleStatus::Enabled, None).await.unwrap();

        let enabled = registry.get_enabled_modules().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].manifest.name, "a");
    }
}
