//! Route table for module routers.
//!
//! Enabled modules mount an `axum::Router` under their declared prefix.
//! The table tracks which module owns which prefix and can compose every
//! mounted router into one application router for the gateway to serve.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::anyhow;
use axum::Router;
use chrono::{DateTime, Utc};
use tracing::info;

use modforge_core::ModuleError;

/// Mount metadata for one module.
#[derive(Debug, Clone)]
pub struct RouteInfo {
    pub module_name: String,
    pub prefix: String,
    pub registered_at: DateTime<Utc>,
}

struct Mounted {
    info: RouteInfo,
    router: Router,
}

#[derive(Default)]
pub struct RouteTable {
    mounted: RwLock<HashMap<String, Mounted>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a module's router under a prefix. Rejects a second mount for
    /// the same module and prefix collisions with other modules.
    pub fn register(
        &self,
        module: &str,
        router: Router,
        prefix: &str,
    ) -> Result<(), ModuleError> {
        let prefix = normalize_prefix(prefix);
        let mut mounted = self.mounted.write().unwrap();

        if mounted.contains_key(module) {
            return Err(ModuleError::Other(anyhow!(
                "routes for module {module} are already registered"
            )));
        }
        if let Some(existing) = mounted.values().find(|m| m.info.prefix == prefix) {
            return Err(ModuleError::Other(anyhow!(
                "route prefix {prefix} conflicts with module {}",
                existing.info.module_name
            )));
        }

        mounted.insert(
            module.to_string(),
            Mounted {
                info: RouteInfo {
                    module_name: module.to_string(),
                    prefix: prefix.clone(),
                    registered_at: Utc::now(),
                },
                router,
            },
        );

        info!("[Routes] Mounted module {module} at {prefix}");
        Ok(())
    }

    /// Unmount a module's router. Returns whether anything was mounted.
    pub fn unregister(&self, module: &str) -> bool {
        let removed = self.mounted.write().unwrap().remove(module).is_some();
        if removed {
            info!("[Routes] Unmounted module {module}");
        }
        removed
    }

    pub fn has_routes(&self, module: &str) -> bool {
        self.mounted.read().unwrap().contains_key(module)
    }

    pub fn get(&self, module: &str) -> Option<RouteInfo> {
        self.mounted.read().unwrap().get(module).map(|m| m.info.clone())
    }

    pub fn all(&self) -> Vec<RouteInfo> {
        self.mounted.read().unwrap().values().map(|m| m.info.clone()).collect()
    }

    /// Nest every mounted router into a single application router.
    pub fn compose(&self) -> Router {
        let mounted = self.mounted.read().unwrap();
        let mut app = Router::new();
        for entry in mounted.values() {
            if entry.info.prefix.is_empty() || entry.info.prefix == "/" {
                app = app.merge(entry.router.clone());
            } else {
                app = app.nest(&entry.info.prefix, entry.router.clone());
            }
        }
        app
    }
}

/// Leading slash, no trailing slash, empty stays empty.
fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        return String::new();
    }
    let mut prefix = prefix.to_string();
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.len() > 1 && prefix.ends_with('/') {
        prefix.pop();
    }
    prefix
}
