pub mod config;
pub mod error;
pub mod hooks;
pub mod manifest;
pub mod types;

pub use config::RuntimeConfig;
pub use error::{ModuleError, SignatureFailure};
pub use hooks::{HookKind, ModuleHooks, NoopHooks};
pub use manifest::ManifestParser;
pub use types::{
    ApiEndpoint, BackendConfig, DependencyCheckResult, DependencyConflict, DependencyTreeNode,
    FrontendConfig, HookPaths, MenuEntry, MigrationsConfig, ModuleInfo, ModuleKind, ModuleManifest,
    ModuleStatus, PermissionEntry, RoutesConfig, SandboxGrants,
};
