//! Advisory per-module sandbox.
//!
//! "Sandboxing" here is declarative capability bookkeeping plus soft
//! resource-usage observation. Nothing in this crate isolates address spaces
//! or uses OS primitives; exceeding a limit is observed and reported, never
//! enforced. Callers that need hard isolation must layer it elsewhere.

pub mod monitor;
pub mod permissions;

pub use monitor::{
    spawn_sampler, LimitCheck, ResourceLimits, ResourceMonitor, ResourceUsage, MAX_USAGE_HISTORY,
};
pub use permissions::{ModulePermissions, PermissionLevel, PermissionManager, PermissionType};
