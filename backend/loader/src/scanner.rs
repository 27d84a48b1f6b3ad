//! Modules directory scanner.
//!
//! Walks the modules directory, parses each package's `module.json`, and
//! reports per-module validity without registering or loading anything.

use std::path::PathBuf;

use tracing::debug;

use modforge_core::{ManifestParser, ModuleError, ModuleManifest};

/// What the scanner found for one module directory.
#[derive(Debug)]
pub struct ScanResult {
    pub module_name: String,
    pub path: PathBuf,
    pub manifest: Option<ModuleManifest>,
    pub errors: Vec<String>,
}

impl ScanResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.manifest.is_some()
    }
}

pub struct ModuleScanner {
    modules_dir: PathBuf,
}

impl ModuleScanner {
    pub fn new(modules_dir: impl Into<PathBuf>) -> Self {
        Self { modules_dir: modules_dir.into() }
    }

    /// Scan every subdirectory of the modules directory.
    pub fn scan(&self) -> Result<Vec<ScanResult>, ModuleError> {
        if !self.modules_dir.is_dir() {
            return Err(ModuleError::DirectoryNotFound(self.modules_dir.clone()));
        }

        let mut results = Vec::new();
        let mut entries: Vec<_> = std::fs::read_dir(&self.modules_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        entries.sort();

        for name in entries {
            results.push(self.scan_module(&name));
        }
        Ok(results)
    }

    /// Scan a single module directory.
    pub fn scan_module(&self, name: &str) -> ScanResult {
        let path = self.modules_dir.join(name);
        let mut result = ScanResult {
            module_name: name.to_string(),
            path: path.clone(),
            manifest: None,
            errors: Vec::new(),
        };

        if !path.is_dir() {
            result.errors.push("module path is not a directory".to_string());
            return result;
        }

        match ManifestParser::parse_dir(&path) {
            Ok(manifest) => {
                if manifest.name != name {
                    result.errors.push(format!(
                        "module name mismatch: directory is \"{name}\" but manifest says \"{}\"",
                        manifest.name
                    ));
                }
                result.manifest = Some(manifest);
            }
            Err(ModuleError::Validation { errors }) => {
                result.errors.extend(errors);
            }
            Err(e) => {
                result.errors.push(format!("failed to read module.json: {e}"));
            }
        }

        debug!(
            module = name,
            valid = result.is_valid(),
            "Scanned module directory"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_module(root: &Path, dir_name: &str, manifest: &str) {
        let dir = root.join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("module.json"), manifest).unwrap();
    }

    #[test]
    fn test_scan_reports_valid_invalid_and_mismatched() {
        let root = TempDir::new().unwrap();
        write_module(
            root.path(),
            "good",
            r#"{ "name": "good", "displayName": "Good", "version": "1.0.0" }"#,
        );
        write_module(
            root.path(),
            "bad",
            r#"{ "name": "bad", "version": "not-a-version" }"#,
        );
        write_module(
            root.path(),
            "renamed",
            r#"{ "name": "other", "displayName": "Other", "version": "1.0.0" }"#,
        );
        // A directory with no manifest at all.
        std::fs::create_dir_all(root.path().join("empty")).unwrap();

        let scanner = ModuleScanner::new(root.path());
        let results = scanner.scan().unwrap();
        assert_eq!(results.len(), 4);

        let by_name = |name: &str| results.iter().find(|r| r.module_name == name).unwrap();
        assert!(by_name("good").is_valid());
        assert!(!by_name("bad").is_valid());
        assert!(by_name("bad").errors.iter().any(|e| e.contains("displayName")));
        assert!(!by_name("renamed").is_valid());
        assert!(by_name("renamed").errors.iter().any(|e| e.contains("mismatch")));
        assert!(!by_name("empty").is_valid());
    }

    #[test]
    fn test_missing_modules_dir_is_an_error() {
        let scanner = ModuleScanner::new("/nonexistent/modules");
        assert!(matches!(
            scanner.scan().unwrap_err(),
            ModuleError::DirectoryNotFound(_)
        ));
    }
}
