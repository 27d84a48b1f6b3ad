//! Lifecycle orchestration.
//!
//! Drives modules through install/enable/disable/uninstall. Each transition
//! is a sequential multi-step saga with hook boundaries; a hook or step
//! failure aborts the remaining steps and surfaces to the caller. Steps that
//! already committed are NOT rolled back automatically - a failed transition
//! leaves the module for manual inspection, with the error persisted on its
//! status record once it exists.
//!
//! Transitions for the same module name serialize on a per-name async mutex,
//! so two concurrent calls cannot interleave their read-then-write steps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info};

use modforge_core::{
    HookKind, ModuleError, ModuleHooks, ModuleManifest, ModuleStatus,
};
use modforge_loader::BackendModuleLoader;
use modforge_registry::{MigrationRunner, ModuleRegistry};

use crate::menus::MenuManager;
use crate::permissions::PermissionRegistrar;
use crate::routes::RouteTable;

pub struct LifecycleManager {
    registry: Arc<ModuleRegistry>,
    loader: Arc<BackendModuleLoader>,
    menus: Arc<MenuManager>,
    permissions: Arc<PermissionRegistrar>,
    migrations: Arc<MigrationRunner>,
    routes: Arc<RouteTable>,
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        loader: Arc<BackendModuleLoader>,
        menus: Arc<MenuManager>,
        permissions: Arc<PermissionRegistrar>,
        migrations: Arc<MigrationRunner>,
        routes: Arc<RouteTable>,
    ) -> Self {
        Self {
            registry,
            loader,
            menus,
            permissions,
            migrations,
            routes,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, name: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Install a module from its manifest: dependency check, hook, register,
    /// migrations, permission codes, hook.
    pub async fn install(&self, manifest: &ModuleManifest) -> Result<(), ModuleError> {
        let name = manifest.name.clone();
        let lock = self.lock_for(&name);
        let _guard = lock.lock().await;

        if self.registry.has_module(&name).await? {
            return Err(ModuleError::AlreadyRegistered(name));
        }

        let check = self.registry.check_dependencies_of(manifest).await?;
        if !check.missing.is_empty() {
            return Err(ModuleError::DependencyMissing { module: name, missing: check.missing });
        }
        if let Some(conflict) = check.conflicts.into_iter().next() {
            return Err(ModuleError::DependencyConflict {
                module: name,
                dependency: conflict.module,
                required: conflict.required,
                installed: conflict.installed,
            });
        }

        let hooks = self.loader.resolve_hooks(&name, manifest);
        self.run_hook(&hooks, manifest, HookKind::BeforeInstall).await?;

        self.registry.register(manifest).await?;

        // From here the module exists; failures are persisted on its record.
        if let Err(e) = self.finish_install(&name, manifest, &hooks).await {
            let _ = self
                .registry
                .update_status(&name, ModuleStatus::Error, Some(e.to_string()))
                .await;
            return Err(e);
        }

        info!("[Lifecycle] Module {name} installed");
        Ok(())
    }

    async fn finish_install(
        &self,
        name: &str,
        manifest: &ModuleManifest,
        hooks: &Arc<dyn ModuleHooks>,
    ) -> Result<(), ModuleError> {
        if let Some(migrations) = manifest.backend.as_ref().and_then(|b| b.migrations.as_ref()) {
            let dir = self.loader.module_dir(name).join(&migrations.directory);
            self.migrations.apply(name, &dir).await?;
        }

        if !manifest.permissions.is_empty() {
            self.permissions.register(name, &manifest.permissions).await?;
        }

        self.run_hook(hooks, manifest, HookKind::AfterInstall).await
    }

    /// Enable an installed/disabled module: load its code, mount its router,
    /// show its menus. Every declared dependency must already be enabled.
    pub async fn enable(&self, name: &str) -> Result<(), ModuleError> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let info = self
            .registry
            .get_module(name)
            .await?
            .ok_or_else(|| ModuleError::NotRegistered(name.to_string()))?;

        if info.status == ModuleStatus::Enabled {
            debug!("[Lifecycle] Module {name} is already enabled");
            return Ok(());
        }

        let manifest = info.manifest;
        for dependency in manifest.dependencies.keys() {
            match self.registry.get_module(dependency).await? {
                Some(dep) if dep.status == ModuleStatus::Enabled => {}
                _ => {
                    return Err(ModuleError::DependencyNotEnabled {
                        module: name.to_string(),
                        dependency: dependency.clone(),
                    })
                }
            }
        }

        let hooks = self.loader.resolve_hooks(name, &manifest);
        if let Err(e) = self.enable_steps(name, &manifest, &hooks).await {
            let _ = self
                .registry
                .update_status(name, ModuleStatus::Error, Some(e.to_string()))
                .await;
            return Err(e);
        }

        info!("[Lifecycle] Module {name} enabled");
        Ok(())
    }

    async fn enable_steps(
        &self,
        name: &str,
        manifest: &ModuleManifest,
        hooks: &Arc<dyn ModuleHooks>,
    ) -> Result<(), ModuleError> {
        self.run_hook(hooks, manifest, HookKind::BeforeEnable).await?;

        if let Some(backend) = &manifest.backend {
            let loaded = self.loader.load(name, manifest).await?;
            if let (Some(router), Some(routes)) = (loaded.router.clone(), backend.routes.as_ref())
            {
                self.routes.register(name, router, &routes.prefix)?;
            }
        }

        if !manifest.menus.is_empty() {
            self.menus.register_menus(name, &manifest.menus).await?;
            self.menus.show_module_menus(name).await?;
        }

        self.registry.update_status(name, ModuleStatus::Enabled, None).await?;
        self.run_hook(hooks, manifest, HookKind::AfterEnable).await
    }

    /// Disable an enabled module: unmount its router, unload its code, hide
    /// its menus. Blocked while another enabled module depends on it.
    pub async fn disable(&self, name: &str) -> Result<(), ModuleError> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        self.disable_locked(name).await
    }

    async fn disable_locked(&self, name: &str) -> Result<(), ModuleError> {
        let info = self
            .registry
            .get_module(name)
            .await?
            .ok_or_else(|| ModuleError::NotRegistered(name.to_string()))?;

        if info.status != ModuleStatus::Enabled {
            debug!("[Lifecycle] Module {name} is not enabled, nothing to disable");
            return Ok(());
        }

        let enabled_dependents: Vec<String> = self
            .registry
            .get_all_modules()
            .await?
            .into_iter()
            .filter(|m| {
                m.status == ModuleStatus::Enabled
                    && m.manifest.dependencies.contains_key(name)
            })
            .map(|m| m.manifest.name)
            .collect();
        if !enabled_dependents.is_empty() {
            return Err(ModuleError::HasDependents {
                name: name.to_string(),
                dependents: enabled_dependents,
            });
        }

        let manifest = info.manifest;
        let hooks = self.loader.resolve_hooks(name, &manifest);
        if let Err(e) = self.disable_steps(name, &manifest, &hooks).await {
            let _ = self
                .registry
                .update_status(name, ModuleStatus::Error, Some(e.to_string()))
                .await;
            return Err(e);
        }

        info!("[Lifecycle] Module {name} disabled");
        Ok(())
    }

    async fn disable_steps(
        &self,
        name: &str,
        manifest: &ModuleManifest,
        hooks: &Arc<dyn ModuleHooks>,
    ) -> Result<(), ModuleError> {
        self.run_hook(hooks, manifest, HookKind::BeforeDisable).await?;

        self.routes.unregister(name);
        self.loader.unload(name);

        if !manifest.menus.is_empty() {
            self.menus.hide_module_menus(name).await?;
        }

        self.registry.update_status(name, ModuleStatus::Disabled, None).await?;
        self.run_hook(hooks, manifest, HookKind::AfterDisable).await
    }

    /// Uninstall a module: disable it first if needed, then remove its
    /// permission codes, menus, and registration. Blocked while any module,
    /// whatever its status, still depends on it.
    pub async fn uninstall(&self, name: &str) -> Result<(), ModuleError> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let info = self
            .registry
            .get_module(name)
            .await?
            .ok_or_else(|| ModuleError::NotRegistered(name.to_string()))?;
        let manifest = info.manifest.clone();

        // Resolve hooks while the loaded instance (if any) is still around.
        let hooks = self.loader.resolve_hooks(name, &manifest);

        if info.status == ModuleStatus::Enabled {
            self.disable_locked(name).await?;
        }

        let dependents = self.registry.get_dependents(name).await?;
        if !dependents.is_empty() {
            return Err(ModuleError::HasDependents { name: name.to_string(), dependents });
        }

        if let Err(e) = self.uninstall_steps(name, &manifest, &hooks).await {
            // Best effort: the registration may already be gone.
            let _ = self
                .registry
                .update_status(name, ModuleStatus::Error, Some(e.to_string()))
                .await;
            return Err(e);
        }

        info!("[Lifecycle] Module {name} uninstalled");
        Ok(())
    }

    async fn uninstall_steps(
        &self,
        name: &str,
        manifest: &ModuleManifest,
        hooks: &Arc<dyn ModuleHooks>,
    ) -> Result<(), ModuleError> {
        self.run_hook(hooks, manifest, HookKind::BeforeUninstall).await?;

        if !manifest.permissions.is_empty() {
            self.permissions.unregister(name).await?;
        }
        if !manifest.menus.is_empty() {
            self.menus.unregister_menus(name).await?;
        }

        self.registry.unregister(name).await?;
        self.run_hook(hooks, manifest, HookKind::AfterUninstall).await
    }

    /// Invoke one hook boundary if the manifest declares it. A hook error
    /// wraps into `HookExecution` and aborts the transition.
    async fn run_hook(
        &self,
        hooks: &Arc<dyn ModuleHooks>,
        manifest: &ModuleManifest,
        kind: HookKind,
    ) -> Result<(), ModuleError> {
        let declared = manifest
            .hooks
            .as_ref()
            .is_some_and(|declared| kind.declared_in(declared));
        if !declared {
            return Ok(());
        }

        match hooks.invoke(kind).await {
            Ok(()) => {
                info!("[Lifecycle] Hook {kind} executed for module {}", manifest.name);
                Ok(())
            }
            Err(e) => {
                error!("[Lifecycle] Hook {kind} failed for module {}: {e}", manifest.name);
                Err(ModuleError::HookExecution {
                    hook: kind.to_string(),
                    module: manifest.name.clone(),
                    source: e,
                })
            }
        }
    }
}
