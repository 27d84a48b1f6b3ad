//! Capability bookkeeping for loaded modules.
//!
//! Each module gets a capability level and allow-lists of filesystem path
//! prefixes and network domains. Checks are advisory: they answer questions,
//! they do not intercept syscalls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Capability level granted to a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Minimal,
    Standard,
    Elevated,
    Full,
}

impl PermissionLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "minimal" => Some(Self::Minimal),
            "standard" => Some(Self::Standard),
            "elevated" => Some(Self::Elevated),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// Individual capability codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionType {
    #[serde(rename = "file:read")]
    FileRead,
    #[serde(rename = "file:write")]
    FileWrite,
    #[serde(rename = "file:delete")]
    FileDelete,
    #[serde(rename = "network:http")]
    NetworkHttp,
    #[serde(rename = "network:https")]
    NetworkHttps,
    #[serde(rename = "database:read")]
    DatabaseRead,
    #[serde(rename = "database:write")]
    DatabaseWrite,
    #[serde(rename = "process:spawn")]
    ProcessSpawn,
    #[serde(rename = "system:info")]
    SystemInfo,
}

const ALL_PERMISSIONS: &[PermissionType] = &[
    PermissionType::FileRead,
    PermissionType::FileWrite,
    PermissionType::FileDelete,
    PermissionType::NetworkHttp,
    PermissionType::NetworkHttps,
    PermissionType::DatabaseRead,
    PermissionType::DatabaseWrite,
    PermissionType::ProcessSpawn,
    PermissionType::SystemInfo,
];

/// Capabilities each level carries by default.
fn level_defaults(level: PermissionLevel) -> &'static [PermissionType] {
    match level {
        PermissionLevel::Minimal => &[PermissionType::FileRead],
        PermissionLevel::Standard => &[
            PermissionType::FileRead,
            PermissionType::FileWrite,
            PermissionType::NetworkHttps,
            PermissionType::DatabaseRead,
        ],
        PermissionLevel::Elevated => &[
            PermissionType::FileRead,
            PermissionType::FileWrite,
            PermissionType::FileDelete,
            PermissionType::NetworkHttp,
            PermissionType::NetworkHttps,
            PermissionType::DatabaseRead,
            PermissionType::DatabaseWrite,
            PermissionType::SystemInfo,
        ],
        PermissionLevel::Full => ALL_PERMISSIONS,
    }
}

/// Per-module capability record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulePermissions {
    pub level: PermissionLevel,
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub allowed_permissions: Vec<PermissionType>,
    #[serde(default)]
    pub denied_permissions: Vec<PermissionType>,
}

impl ModulePermissions {
    pub fn with_level(level: PermissionLevel) -> Self {
        Self {
            level,
            allowed_paths: Vec::new(),
            allowed_domains: Vec::new(),
            allowed_permissions: Vec::new(),
            denied_permissions: Vec::new(),
        }
    }
}

/// Tracks capability grants for every loaded module.
#[derive(Default)]
pub struct PermissionManager {
    permissions: RwLock<HashMap<String, ModulePermissions>>,
}

impl PermissionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_module_permissions(&self, module: &str, permissions: ModulePermissions) {
        debug!(module, level = ?permissions.level, "Sandbox permissions set");
        self.permissions.write().unwrap().insert(module.to_string(), permissions);
    }

    pub fn get_module_permissions(&self, module: &str) -> Option<ModulePermissions> {
        self.permissions.read().unwrap().get(module).cloned()
    }

    /// Capability check: explicit denial wins, then explicit grant, then the
    /// level defaults. Unknown modules fall back to minimal.
    pub fn has_permission(&self, module: &str, permission: PermissionType) -> bool {
        let permissions = self.permissions.read().unwrap();
        let Some(perms) = permissions.get(module) else {
            return level_defaults(PermissionLevel::Minimal).contains(&permission);
        };

        if perms.denied_permissions.contains(&permission) {
            return false;
        }
        if perms.allowed_permissions.contains(&permission) {
            return true;
        }
        level_defaults(perms.level).contains(&permission)
    }

    /// Whether a module may touch a filesystem path (prefix allow-list).
    pub fn can_access_path(&self, module: &str, target: &Path) -> bool {
        let permissions = self.permissions.read().unwrap();
        let Some(perms) = permissions.get(module) else {
            return false;
        };

        if perms.level == PermissionLevel::Full {
            return true;
        }
        if !perms.allowed_paths.is_empty() {
            return perms.allowed_paths.iter().any(|prefix| target.starts_with(prefix));
        }
        // No allow-list: only the module's own directory.
        target.starts_with(Path::new("modules").join(module))
    }

    /// Whether a module may reach a network domain. `*.example.com` matches
    /// subdomains only, not the apex.
    pub fn can_access_domain(&self, module: &str, domain: &str) -> bool {
        let permissions = self.permissions.read().unwrap();
        let Some(perms) = permissions.get(module) else {
            return false;
        };

        if perms.level == PermissionLevel::Full {
            return true;
        }
        perms.allowed_domains.iter().any(|allowed| {
            if let Some(base) = allowed.strip_prefix("*.") {
                domain.ends_with(&format!(".{base}"))
            } else {
                domain == allowed
            }
        })
    }

    pub fn grant_permission(&self, module: &str, permission: PermissionType) {
        let mut permissions = self.permissions.write().unwrap();
        let perms = permissions
            .entry(module.to_string())
            .or_insert_with(|| ModulePermissions::with_level(PermissionLevel::Minimal));
        if !perms.allowed_permissions.contains(&permission) {
            perms.allowed_permissions.push(permission);
        }
        perms.denied_permissions.retain(|p| *p != permission);
    }

    pub fn revoke_permission(&self, module: &str, permission: PermissionType) {
        let mut permissions = self.permissions.write().unwrap();
        let Some(perms) = permissions.get_mut(module) else {
            return;
        };
        perms.allowed_permissions.retain(|p| *p != permission);
        if !perms.denied_permissions.contains(&permission) {
            perms.denied_permissions.push(permission);
        }
    }

    pub fn add_allowed_path(&self, module: &str, path: PathBuf) {
        let mut permissions = self.permissions.write().unwrap();
        let perms = permissions
            .entry(module.to_string())
            .or_insert_with(|| ModulePermissions::with_level(PermissionLevel::Minimal));
        if !perms.allowed_paths.contains(&path) {
            perms.allowed_paths.push(path);
        }
    }

    pub fn add_allowed_domain(&self, module: &str, domain: String) {
        let mut permissions = self.permissions.write().unwrap();
        let perms = permissions
            .entry(module.to_string())
            .or_insert_with(|| ModulePermissions::with_level(PermissionLevel::Minimal));
        if !perms.allowed_domains.contains(&domain) {
            perms.allowed_domains.push(domain);
        }
    }

    pub fn remove_module_permissions(&self, module: &str) {
        self.permissions.write().unwrap().remove(module);
    }

    pub fn module_names(&self) -> Vec<String> {
        self.permissions.read().unwrap().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.permissions.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_defaults_apply() {
        let manager = PermissionManager::new();
        manager.set_module_permissions(
            "reports",
            ModulePermissions::with_level(PermissionLevel::Standard),
        );

        assert!(manager.has_permission("reports", PermissionType::FileRead));
        assert!(manager.has_permission("reports", PermissionType::NetworkHttps));
        assert!(!manager.has_permission("reports", PermissionType::ProcessSpawn));
    }

    #[test]
    fn test_denial_beats_grant_and_level() {
        let manager = PermissionManager::new();
        manager.set_module_permissions(
            "reports",
            ModulePermissions::with_level(PermissionLevel::Full),
        );
        manager.revoke_permission("reports", PermissionType::ProcessSpawn);
        assert!(!manager.has_permission("reports", PermissionType::ProcessSpawn));

        manager.grant_permission("reports", PermissionType::ProcessSpawn);
        assert!(manager.has_permission("reports", PermissionType::ProcessSpawn));
    }

    #[test]
    fn test_unknown_module_gets_minimal() {
        let manager = PermissionManager::new();
        assert!(manager.has_permission("ghost", PermissionType::FileRead));
        assert!(!manager.has_permission("ghost", PermissionType::FileWrite));
        assert!(!manager.can_access_path("ghost", Path::new("/tmp/x")));
    }

    #[test]
    fn test_path_allow_list_is_prefix_based() {
        let manager = PermissionManager::new();
        let mut perms = ModulePermissions::with_level(PermissionLevel::Standard);
        perms.allowed_paths.push(PathBuf::from("/srv/app/uploads"));
        manager.set_module_permissions("files", perms);

        assert!(manager.can_access_path("files", Path::new("/srv/app/uploads/2026/a.png")));
        assert!(!manager.can_access_path("files", Path::new("/etc/passwd")));
    }

    #[test]
    fn test_wildcard_domain_matches_subdomains_only() {
        let manager = PermissionManager::new();
        let mut perms = ModulePermissions::with_level(PermissionLevel::Standard);
        perms.allowed_domains.push("*.push.example.com".to_string());
        perms.allowed_domains.push("api.example.com".to_string());
        manager.set_module_permissions("notify", perms);

        assert!(manager.can_access_domain("notify", "eu.push.example.com"));
        assert!(!manager.can_access_domain("notify", "push.example.com"));
        assert!(manager.can_access_domain("notify", "api.example.com"));
        assert!(!manager.can_access_domain("notify", "evil.com"));
    }

    #[test]
    fn test_full_level_bypasses_allow_lists() {
        let manager = PermissionManager::new();
        manager.set_module_permissions(
            "system-core",
            ModulePermissions::with_level(PermissionLevel::Full),
        );
        assert!(manager.can_access_path("system-core", Path::new("/etc/hosts")));
        assert!(manager.can_access_domain("system-core", "anywhere.example.net"));
    }
}
