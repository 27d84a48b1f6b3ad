pub mod loader;
pub mod runtime;
pub mod scanner;

pub use loader::{BackendModuleLoader, LoadedBackendModule, ModuleResourceReport};
pub use runtime::{BackendModule, EntryRegistry, ModuleFactory};
pub use scanner::{ModuleScanner, ScanResult};
