//! Typed plugin contract.
//!
//! Modules do not get their code read off disk and executed; instead each
//! backend entry is a [`BackendModule`] implementation registered under the
//! symbol the manifest declares. The loader resolves symbols through this
//! registry, so only code compiled (or explicitly linked) into the host can
//! ever run.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::Router;

use modforge_core::{ModuleHooks, NoopHooks};

/// A module's backend implementation. Every accessor has a default so
/// minimal modules implement nothing.
pub trait BackendModule: Send + Sync {
    /// Router to mount under the manifest-declared prefix.
    fn router(&self) -> Option<Router> {
        None
    }

    /// Opaque service handle other modules may downcast.
    fn service(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }

    /// Lifecycle callbacks. Defaults to no-ops.
    fn hooks(&self) -> Arc<dyn ModuleHooks> {
        Arc::new(NoopHooks)
    }
}

pub type ModuleFactory = Arc<dyn Fn() -> Arc<dyn BackendModule> + Send + Sync>;

/// Registry of entry symbols to module factories, populated at process start.
#[derive(Default)]
pub struct EntryRegistry {
    factories: RwLock<HashMap<String, ModuleFactory>>,
}

impl EntryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under an entry symbol. Later registrations replace
    /// earlier ones.
    pub fn register<F>(&self, symbol: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn BackendModule> + Send + Sync + 'static,
    {
        self.factories.write().unwrap().insert(symbol.into(), Arc::new(factory));
    }

    pub fn resolve(&self, symbol: &str) -> Option<ModuleFactory> {
        self.factories.read().unwrap().get(symbol).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.factories.read().unwrap().contains_key(symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.factories.read().unwrap().keys().cloned().collect()
    }
}
