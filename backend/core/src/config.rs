use std::path::PathBuf;

use serde::Deserialize;

/// Runtime configuration, loaded from `MODFORGE_*` environment variables
/// with sensible defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Directory containing module packages.
    pub modules_dir: PathBuf,
    /// SQLite database path for the module registry.
    pub db_path: String,
    /// Shared upload directory modules may write to.
    pub uploads_dir: PathBuf,
    /// Shared data directory modules may write to.
    pub data_dir: PathBuf,
    /// Gate module loading on signature verification.
    pub verify_signatures: bool,
    /// Provision capability/resource sandboxes for loaded modules.
    pub sandbox_enabled: bool,
    /// Log level used when RUST_LOG is unset.
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            modules_dir: PathBuf::from("modules"),
            db_path: "modforge.db".to_string(),
            uploads_dir: PathBuf::from("uploads"),
            data_dir: PathBuf::from("data"),
            verify_signatures: true,
            sandbox_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            modules_dir: std::env::var("MODFORGE_MODULES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.modules_dir),
            db_path: std::env::var("MODFORGE_DB").unwrap_or(defaults.db_path),
            uploads_dir: std::env::var("MODFORGE_UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_dir),
            data_dir: std::env::var("MODFORGE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            verify_signatures: std::env::var("MODFORGE_VERIFY_SIGNATURES")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(defaults.verify_signatures),
            sandbox_enabled: std::env::var("MODFORGE_SANDBOX")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(defaults.sandbox_enabled),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }
}
