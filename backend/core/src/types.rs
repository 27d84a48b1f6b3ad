/// Data model for the module runtime.
///
/// `ModuleManifest` is the author-supplied `module.json`; everything else is
/// derived or runtime state. Wire-facing structs serialize camelCase and
/// round-trip losslessly (absent optional fields stay absent).
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Module classification declared in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Business,
    System,
    Tool,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Business => "business",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

/// Backend route mounting declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutesConfig {
    /// Path prefix the module's router is mounted under (e.g. `/api/reports`).
    pub prefix: String,
    /// Registered symbol providing the router (takes precedence over the entry's).
    pub file: String,
}

/// Schema migration declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationsConfig {
    /// Directory of `*.sql` files, relative to the module root.
    pub directory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
}

/// Backend integration points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Registered entry symbol for the module's backend implementation.
    pub entry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<RoutesConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrations: Option<MigrationsConfig>,
}

/// Frontend integration points. Carried through the manifest for the admin
/// UI; the backend runtime never loads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendConfig {
    pub entry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<String>,
}

/// A menu item contributed by the module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuEntry {
    pub id: String,
    pub title: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub sort_order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
}

/// A permission code declared by the module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionEntry {
    pub code: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// An HTTP endpoint the module documents for the admin API surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    pub method: String,
    pub path: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
}

/// Lifecycle hook declarations: a hook is invoked only when the manifest
/// names it here. Values are retained as metadata (originally relative file
/// paths); resolution goes through the typed [`crate::hooks::ModuleHooks`]
/// trait.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookPaths {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_install: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_install: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_uninstall: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_uninstall: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_enable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_enable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_disable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_disable: Option<String>,
}

/// Capability grants requested by the module, used to provision its sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxGrants {
    /// Requested capability level (`minimal`, `standard`, `elevated`, `full`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Extra filesystem path prefixes, relative to the process working dir.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_paths: Vec<String>,
    /// Network domains the module may reach (`*.example.com` wildcards allowed).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_domains: Vec<String>,
}

/// The declarative description of a module, parsed from `module.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleManifest {
    /// Unique kebab-case identifier.
    pub name: String,
    pub display_name: String,
    /// Semantic version.
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ModuleKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Module name -> semantic version range.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<FrontendConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub menus: Vec<MenuEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<PermissionEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxGrants>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<HookPaths>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<ApiEndpoint>,
}

/// Module status as persisted in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Installed,
    Enabled,
    Disabled,
    Error,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "installed" => Some(Self::Installed),
            "enabled" => Some(Self::Enabled),
            "disabled" => Some(Self::Disabled),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime record for a registered module. The registry owns the
/// authoritative copy; everything else sees clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    pub manifest: ModuleManifest,
    pub status: ModuleStatus,
    /// Message of the last failed lifecycle transition, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A version conflict on a declared dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyConflict {
    pub module: String,
    pub required: String,
    pub installed: String,
}

/// Outcome of checking a module's declared dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyCheckResult {
    pub satisfied: bool,
    pub missing: Vec<String>,
    pub conflicts: Vec<DependencyConflict>,
}

impl DependencyCheckResult {
    pub fn satisfied() -> Self {
        Self { satisfied: true, missing: Vec::new(), conflicts: Vec::new() }
    }
}

/// Node of a recursively expanded dependency tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyTreeNode {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<DependencyTreeNode>,
}
