//! Backend module loader.
//!
//! Brings a module's implementation into memory: checks the on-disk package,
//! gates on signature verification, provisions the sandbox before anything
//! else runs, resolves the declared entry/routes symbols, and caches the
//! result. Loading is idempotent per module name.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use axum::Router;
use tracing::{info, warn};

use modforge_core::{
    ModuleError, ModuleHooks, ModuleManifest, NoopHooks, RuntimeConfig, SignatureFailure,
};
use modforge_sandbox::{
    ModulePermissions, PermissionLevel, PermissionManager, ResourceLimits, ResourceMonitor,
    ResourceUsage,
};
use modforge_security::ModuleSigner;

use crate::runtime::{BackendModule, EntryRegistry};

/// In-memory handle to a loaded module. Ephemeral; never persisted.
pub struct LoadedBackendModule {
    pub name: String,
    pub router: Option<Router>,
    pub service: Option<Arc<dyn Any + Send + Sync>>,
    pub hooks: Arc<dyn ModuleHooks>,
    /// The resolved entry implementation, when the module declares a backend.
    pub instance: Option<Arc<dyn BackendModule>>,
}

impl std::fmt::Debug for LoadedBackendModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedBackendModule")
            .field("name", &self.name)
            .field("router", &self.router.is_some())
            .field("service", &self.service.is_some())
            .field("instance", &self.instance.is_some())
            .finish()
    }
}

/// Current/average/peak usage plus the configured budget for one module.
#[derive(Debug, Clone)]
pub struct ModuleResourceReport {
    pub current: Option<ResourceUsage>,
    pub average: Option<ResourceUsage>,
    pub peak: Option<ResourceUsage>,
    pub limits: ResourceLimits,
}

/// Shared symbol->instance cache with a per-module lease index. Unloading a
/// module drops its leases; an instance is evicted only when no module
/// leases it anymore.
#[derive(Default)]
struct ArtifactCache {
    instances: HashMap<String, Arc<dyn BackendModule>>,
    leases: HashMap<String, HashSet<String>>,
}

pub struct BackendModuleLoader {
    modules_dir: PathBuf,
    uploads_dir: PathBuf,
    data_dir: PathBuf,
    entries: Arc<EntryRegistry>,
    signer: ModuleSigner,
    permissions: Arc<PermissionManager>,
    monitor: Arc<ResourceMonitor>,
    loaded: RwLock<HashMap<String, Arc<LoadedBackendModule>>>,
    artifacts: RwLock<ArtifactCache>,
    verify_signatures: AtomicBool,
    sandbox_enabled: AtomicBool,
}

impl BackendModuleLoader {
    pub fn new(
        config: &RuntimeConfig,
        entries: Arc<EntryRegistry>,
        signer: ModuleSigner,
        permissions: Arc<PermissionManager>,
        monitor: Arc<ResourceMonitor>,
    ) -> Self {
        Self {
            modules_dir: config.modules_dir.clone(),
            uploads_dir: config.uploads_dir.clone(),
            data_dir: config.data_dir.clone(),
            entries,
            signer,
            permissions,
            monitor,
            loaded: RwLock::new(HashMap::new()),
            artifacts: RwLock::new(ArtifactCache::default()),
            verify_signatures: AtomicBool::new(config.verify_signatures),
            sandbox_enabled: AtomicBool::new(config.sandbox_enabled),
        }
    }

    pub fn module_dir(&self, name: &str) -> PathBuf {
        self.modules_dir.join(name)
    }

    /// Load a module. A second call for an already-loaded name returns the
    /// identical cached instance without re-reading disk.
    pub async fn load(
        &self,
        name: &str,
        manifest: &ModuleManifest,
    ) -> Result<Arc<LoadedBackendModule>, ModuleError> {
        if let Some(loaded) = self.loaded.read().unwrap().get(name) {
            return Ok(loaded.clone());
        }

        let module_dir = self.module_dir(name);
        match tokio::fs::metadata(&module_dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(ModuleError::NotADirectory(module_dir)),
            Err(_) => return Err(ModuleError::DirectoryNotFound(module_dir)),
        }

        if self.verify_signatures.load(Ordering::Relaxed) {
            self.verify_signature(name, &module_dir)?;
        }

        // Provision the sandbox before any module code can run.
        if self.sandbox_enabled.load(Ordering::Relaxed) {
            self.initialize_sandbox(name, manifest, &module_dir);
        }

        let mut router = None;
        let mut service = None;
        let mut hooks: Arc<dyn ModuleHooks> = Arc::new(NoopHooks);
        let mut instance = None;

        if let Some(backend) = &manifest.backend {
            let entry = self.resolve_artifact(name, &backend.entry).ok_or_else(|| {
                ModuleError::EntryNotRegistered {
                    module: name.to_string(),
                    entry: backend.entry.clone(),
                }
            })?;

            router = entry.router();
            service = entry.service();
            hooks = entry.hooks();

            if let Some(routes) = &backend.routes {
                // A dedicated routes symbol overrides the entry's router.
                // Missing is logged, not fatal.
                match self.resolve_artifact(name, &routes.file) {
                    Some(routes_impl) => {
                        if let Some(r) = routes_impl.router() {
                            router = Some(r);
                        }
                    }
                    None => warn!(
                        "[Loader] Routes symbol '{}' not registered for module {name}",
                        routes.file
                    ),
                }
            }

            instance = Some(entry);
        }

        let loaded = Arc::new(LoadedBackendModule {
            name: name.to_string(),
            router,
            service,
            hooks,
            instance,
        });
        self.loaded.write().unwrap().insert(name.to_string(), loaded.clone());

        info!("[Loader] Module {name} loaded");
        Ok(loaded)
    }

    /// Unload a module: sandbox teardown, lease purge, loaded-map removal.
    /// A no-op for modules that are not loaded.
    pub fn unload(&self, name: &str) {
        if self.loaded.write().unwrap().remove(name).is_none() {
            return;
        }

        if self.sandbox_enabled.load(Ordering::Relaxed) {
            self.monitor.stop_monitoring(name);
            self.monitor.clear_module(name);
            self.permissions.remove_module_permissions(name);
        }

        let mut artifacts = self.artifacts.write().unwrap();
        if let Some(symbols) = artifacts.leases.remove(name) {
            for symbol in symbols {
                let still_leased = artifacts.leases.values().any(|held| held.contains(&symbol));
                if !still_leased {
                    artifacts.instances.remove(&symbol);
                }
            }
        }

        info!("[Loader] Module {name} unloaded");
    }

    pub async fn reload(
        &self,
        name: &str,
        manifest: &ModuleManifest,
    ) -> Result<Arc<LoadedBackendModule>, ModuleError> {
        self.unload(name);
        self.load(name, manifest).await
    }

    pub fn get_loaded(&self, name: &str) -> Option<Arc<LoadedBackendModule>> {
        self.loaded.read().unwrap().get(name).cloned()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.read().unwrap().contains_key(name)
    }

    pub fn loaded_modules(&self) -> Vec<String> {
        self.loaded.read().unwrap().keys().cloned().collect()
    }

    /// Hooks for a module: the loaded instance's when available, otherwise a
    /// transient instantiation of the declared entry, otherwise no-ops. Lets
    /// install/uninstall boundaries fire without a full load.
    pub fn resolve_hooks(&self, name: &str, manifest: &ModuleManifest) -> Arc<dyn ModuleHooks> {
        if let Some(loaded) = self.get_loaded(name) {
            return loaded.hooks.clone();
        }
        if let Some(backend) = &manifest.backend {
            if let Some(factory) = self.entries.resolve(&backend.entry) {
                return factory().hooks();
            }
        }
        Arc::new(NoopHooks)
    }

    pub fn set_signature_verification(&self, enabled: bool) {
        self.verify_signatures.store(enabled, Ordering::Relaxed);
    }

    pub fn is_signature_verification_enabled(&self) -> bool {
        self.verify_signatures.load(Ordering::Relaxed)
    }

    pub fn set_sandbox(&self, enabled: bool) {
        self.sandbox_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_sandbox_enabled(&self) -> bool {
        self.sandbox_enabled.load(Ordering::Relaxed)
    }

    pub fn resource_usage(&self, name: &str) -> ModuleResourceReport {
        ModuleResourceReport {
            current: self.monitor.current_usage(name),
            average: self.monitor.average_usage(name),
            peak: self.monitor.peak_usage(name),
            limits: self.monitor.get_limits(name),
        }
    }

    fn resolve_artifact(&self, module: &str, symbol: &str) -> Option<Arc<dyn BackendModule>> {
        let mut artifacts = self.artifacts.write().unwrap();
        if let Some(instance) = artifacts.instances.get(symbol).cloned() {
            artifacts
                .leases
                .entry(module.to_string())
                .or_default()
                .insert(symbol.to_string());
            return Some(instance);
        }

        let factory = self.entries.resolve(symbol)?;
        let instance = factory();
        artifacts.instances.insert(symbol.to_string(), instance.clone());
        artifacts
            .leases
            .entry(module.to_string())
            .or_default()
            .insert(symbol.to_string());
        Some(instance)
    }

    fn verify_signature(&self, name: &str, module_dir: &Path) -> Result<(), ModuleError> {
        let outcome = self.signer.verify_module(module_dir).map_err(ModuleError::Other)?;

        if outcome.is_valid() {
            info!("[Loader] Signature verified for module {name}");
            return Ok(());
        }

        // Unsigned packages load with a warning: a deliberate
        // backward-compatibility trade-off, not a silent bypass.
        if outcome.failures == [SignatureFailure::RecordMissing] {
            warn!("[Loader] Module {name} has no signature record, skipping verification");
            return Ok(());
        }

        Err(ModuleError::SignatureInvalid {
            module: name.to_string(),
            failure: outcome.failures[0].clone(),
        })
    }

    /// Derive the capability level and allow-lists and start monitoring.
    fn initialize_sandbox(&self, name: &str, manifest: &ModuleManifest, module_dir: &Path) {
        let level = if manifest.category.as_deref() == Some("system") {
            PermissionLevel::Full
        } else {
            manifest
                .sandbox
                .as_ref()
                .and_then(|grants| grants.level.as_deref())
                .and_then(PermissionLevel::parse)
                .unwrap_or(PermissionLevel::Standard)
        };

        let mut permissions = ModulePermissions::with_level(level);
        permissions.allowed_paths.push(module_dir.to_path_buf());
        permissions.allowed_paths.push(self.uploads_dir.clone());
        permissions.allowed_paths.push(self.data_dir.clone());

        if let Some(grants) = &manifest.sandbox {
            let cwd = std::env::current_dir().unwrap_or_default();
            for path in &grants.allowed_paths {
                permissions.allowed_paths.push(cwd.join(path));
            }
            permissions.allowed_domains.extend(grants.allowed_domains.iter().cloned());
        }

        self.permissions.set_module_permissions(name, permissions);
        self.monitor.set_limits(name, ResourceLimits::default());
        self.monitor.start_monitoring(name);
        info!("[Loader] Sandbox initialized for module {name} ({level:?})");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use modforge_core::ManifestParser;
    use tempfile::TempDir;

    struct ReportModule;

    impl BackendModule for ReportModule {
        fn router(&self) -> Option<Router> {
            Some(Router::new().route("/entries", get(|| async { "ok" })))
        }
    }

    struct SharedAudit;

    impl BackendModule for SharedAudit {}

    fn manifest(name: &str, entry: Option<&str>) -> ModuleManifest {
        let mut raw = serde_json::json!({
            "name": name,
            "displayName": name,
            "version": "1.0.0",
        });
        if let Some(entry) = entry {
            raw["backend"] = serde_json::json!({ "entry": entry });
        }
        ManifestParser::parse(&raw.to_string()).unwrap()
    }

    fn loader_in(dir: &TempDir) -> BackendModuleLoader {
        let config = RuntimeConfig {
            modules_dir: dir.path().to_path_buf(),
            verify_signatures: true,
            sandbox_enabled: true,
            ..Default::default()
        };
        let entries = Arc::new(EntryRegistry::new());
        entries.register("report-center", || Arc::new(ReportModule));
        entries.register("shared-audit", || Arc::new(SharedAudit));
        BackendModuleLoader::new(
            &config,
            entries,
            ModuleSigner::new(),
            Arc::new(PermissionManager::new()),
            Arc::new(ResourceMonitor::new()),
        )
    }

    fn make_module_dir(root: &TempDir, name: &str) {
        let dir = root.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("module.json"),
            format!(
                r#"{{ "name": "{name}", "displayName": "{name}", "version": "1.0.0" }}"#
            ),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_double_load_returns_cached_instance() {
        let root = TempDir::new().unwrap();
        make_module_dir(&root, "report-center");
        let loader = loader_in(&root);
        let manifest = manifest("report-center", Some("report-center"));

        let first = loader.load("report-center", &manifest).await.unwrap();

        // Remove the directory: a cache hit must not re-touch disk.
        std::fs::remove_dir_all(root.path().join("report-center")).unwrap();
        let second = loader.load("report-center", &manifest).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.router.is_some());
    }

    #[tokio::test]
    async fn test_missing_directory_and_unregistered_entry() {
        let root = TempDir::new().unwrap();
        let loader = loader_in(&root);

        let err = loader
            .load("ghost", &manifest("ghost", Some("ghost")))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::DirectoryNotFound(_)));

        make_module_dir(&root, "mystery");
        let err = loader
            .load("mystery", &manifest("mystery", Some("mystery")))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::EntryNotRegistered { .. }));
    }

    #[tokio::test]
    async fn test_unsigned_module_loads_with_soft_allow() {
        let root = TempDir::new().unwrap();
        make_module_dir(&root, "report-center");
        let loader = loader_in(&root);

        // No module.signature present: allowed, with a logged warning.
        assert!(loader.is_signature_verification_enabled());
        let loaded = loader
            .load("report-center", &manifest("report-center", Some("report-center")))
            .await
            .unwrap();
        assert_eq!(loaded.name, "report-center");
    }

    #[tokio::test]
    async fn test_tampered_module_is_rejected() {
        let root = TempDir::new().unwrap();
        make_module_dir(&root, "report-center");

        let mut signer = ModuleSigner::new();
        signer.generate_key_pair().unwrap();
        signer.sign_module(&root.path().join("report-center")).unwrap();
        std::fs::write(root.path().join("report-center/extra.txt"), "tamper").unwrap();

        let loader = loader_in(&root);
        let err = loader
            .load("report-center", &manifest("report-center", Some("report-center")))
            .await
            .unwrap_err();
        match err {
            ModuleError::SignatureInvalid { failure, .. } => {
                assert_eq!(failure, SignatureFailure::UnexpectedFile("extra.txt".to_string()));
            }
            other => panic!("expected SignatureInvalid, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_unload_tears_down_sandbox_and_leases() {
        let root = TempDir::new().unwrap();
        make_module_dir(&root, "report-center");
        let loader = loader_in(&root);
        let manifest = manifest("report-center", Some("report-center"));

        loader.load("report-center", &manifest).await.unwrap();
        assert!(loader.is_loaded("report-center"));
        assert!(loader.monitor.is_monitored("report-center"));
        assert!(loader.permissions.get_module_permissions("report-center").is_some());

        loader.unload("report-center");
        assert!(!loader.is_loaded("report-center"));
        assert!(!loader.monitor.is_monitored("report-center"));
        assert!(loader.permissions.get_module_permissions("report-center").is_none());

        // Unloading again is a no-op, not an error.
        loader.unload("report-center");
    }

    #[tokio::test]
    async fn test_shared_artifact_survives_one_unload() {
        let root = TempDir::new().unwrap();
        make_module_dir(&root, "report-center");
        make_module_dir(&root, "audit-view");
        let loader = loader_in(&root);

        // Both modules lease the same entry symbol.
        let m1 = manifest("report-center", Some("shared-audit"));
        let m2 = manifest("audit-view", Some("shared-audit"));
        let first = loader.load("report-center", &m1).await.unwrap();
        let second = loader.load("audit-view", &m2).await.unwrap();

        let a = first.instance.as_ref().unwrap();
        let b = second.instance.as_ref().unwrap();
        assert!(Arc::ptr_eq(a, b));

        loader.unload("report-center");
        // audit-view still holds a lease; the artifact is retained.
        assert!(loader.artifacts.read().unwrap().instances.contains_key("shared-audit"));

        loader.unload("audit-view");
        assert!(!loader.artifacts.read().unwrap().instances.contains_key("shared-audit"));
    }

    #[tokio::test]
    async fn test_system_category_gets_full_level() {
        let root = TempDir::new().unwrap();
        make_module_dir(&root, "core-admin");
        let loader = loader_in(&root);
        loader.entries.register("core-admin", || Arc::new(SharedAudit));

        let raw = serde_json::json!({
            "name": "core-admin",
            "displayName": "Core Admin",
            "version": "1.0.0",
            "category": "system",
            "backend": { "entry": "core-admin" },
        });
        let manifest = ManifestParser::parse(&raw.to_string()).unwrap();
        loader.load("core-admin", &manifest).await.unwrap();

        let perms = loader.permissions.get_module_permissions("core-admin").unwrap();
        assert_eq!(perms.level, PermissionLevel::Full);
    }
}
