//! Typed lifecycle hook contract.
//!
//! A module implementation supplies a [`ModuleHooks`] value; every method has
//! a no-op default, so modules implement only the boundaries they care about.
//! A returned error aborts the enclosing lifecycle transition.

use anyhow::Result;
use async_trait::async_trait;

use crate::types::HookPaths;

/// Named hook boundaries of the install/enable/disable/uninstall state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    BeforeInstall,
    AfterInstall,
    BeforeUninstall,
    AfterUninstall,
    BeforeEnable,
    AfterEnable,
    BeforeDisable,
    AfterDisable,
}

impl HookKind {
    /// Manifest key for this hook.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeInstall => "beforeInstall",
            Self::AfterInstall => "afterInstall",
            Self::BeforeUninstall => "beforeUninstall",
            Self::AfterUninstall => "afterUninstall",
            Self::BeforeEnable => "beforeEnable",
            Self::AfterEnable => "afterEnable",
            Self::BeforeDisable => "beforeDisable",
            Self::AfterDisable => "afterDisable",
        }
    }

    /// Whether the manifest declares this hook.
    pub fn declared_in(&self, hooks: &HookPaths) -> bool {
        match self {
            Self::BeforeInstall => hooks.before_install.is_some(),
            Self::AfterInstall => hooks.after_install.is_some(),
            Self::BeforeUninstall => hooks.before_uninstall.is_some(),
            Self::AfterUninstall => hooks.after_uninstall.is_some(),
            Self::BeforeEnable => hooks.before_enable.is_some(),
            Self::AfterEnable => hooks.after_enable.is_some(),
            Self::BeforeDisable => hooks.before_disable.is_some(),
            Self::AfterDisable => hooks.after_disable.is_some(),
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle callbacks a module may implement.
#[async_trait]
pub trait ModuleHooks: Send + Sync {
    async fn before_install(&self) -> Result<()> {
        Ok(())
    }
    async fn after_install(&self) -> Result<()> {
        Ok(())
    }
    async fn before_uninstall(&self) -> Result<()> {
        Ok(())
    }
    async fn after_uninstall(&self) -> Result<()> {
        Ok(())
    }
    async fn before_enable(&self) -> Result<()> {
        Ok(())
    }
    async fn after_enable(&self) -> Result<()> {
        Ok(())
    }
    async fn before_disable(&self) -> Result<()> {
        Ok(())
    }
    async fn after_disable(&self) -> Result<()> {
        Ok(())
    }

    /// Dispatch by kind. Used by the lifecycle manager.
    async fn invoke(&self, kind: HookKind) -> Result<()> {
        match kind {
            HookKind::BeforeInstall => self.before_install().await,
            HookKind::AfterInstall => self.after_install().await,
            HookKind::BeforeUninstall => self.before_uninstall().await,
            HookKind::AfterUninstall => self.after_uninstall().await,
            HookKind::BeforeEnable => self.before_enable().await,
            HookKind::AfterEnable => self.after_enable().await,
            HookKind::BeforeDisable => self.before_disable().await,
            HookKind::AfterDisable => self.after_disable().await,
        }
    }
}

/// Default no-op hook implementation.
pub struct NoopHooks;

#[async_trait]
impl ModuleHooks for NoopHooks {}
