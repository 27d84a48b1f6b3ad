//! Manifest parsing and validation.
//!
//! Validation runs over the raw JSON value and collects every violated rule
//! before anything is deserialized, so a bad manifest reports the complete
//! list of problems in one pass.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use semver::{Version, VersionReq};
use serde_json::Value;

use crate::error::ModuleError;
use crate::types::ModuleManifest;

/// Manifest file name inside a module directory.
pub const MANIFEST_FILE: &str = "module.json";

static MODULE_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").unwrap());

pub struct ManifestParser;

impl ManifestParser {
    /// Parse and validate a manifest from raw JSON text.
    pub fn parse(raw: &str) -> Result<ModuleManifest, ModuleError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ModuleError::validation(format!("invalid JSON: {e}")))?;

        let errors = Self::validate_value(&value);
        if !errors.is_empty() {
            return Err(ModuleError::Validation { errors });
        }

        serde_json::from_value(value)
            .map_err(|e| ModuleError::validation(format!("manifest shape mismatch: {e}")))
    }

    /// Parse a manifest file.
    pub fn parse_file(path: &Path) -> Result<ModuleManifest, ModuleError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse `module.json` from a module directory.
    pub fn parse_dir(dir: &Path) -> Result<ModuleManifest, ModuleError> {
        Self::parse_file(&dir.join(MANIFEST_FILE))
    }

    /// Serialize a manifest back to pretty JSON. Lossless for every field the
    /// parser recognizes.
    pub fn stringify(manifest: &ModuleManifest) -> String {
        serde_json::to_string_pretty(manifest).expect("manifest serialization cannot fail")
    }

    /// Collect every violated validation rule. Empty means valid.
    pub fn validate_value(value: &Value) -> Vec<String> {
        let mut errors = Vec::new();

        let obj = match value.as_object() {
            Some(obj) => obj,
            None => {
                errors.push("manifest must be a JSON object".to_string());
                return errors;
            }
        };

        // Required fields.
        match obj.get("name") {
            None => errors.push("missing required field: name".to_string()),
            Some(Value::String(name)) => {
                if !MODULE_NAME_RE.is_match(name) {
                    errors.push(
                        "field \"name\" must be kebab-case (lowercase letters, digits, hyphens)"
                            .to_string(),
                    );
                }
            }
            Some(_) => errors.push("field \"name\" must be a string".to_string()),
        }

        match obj.get("displayName") {
            None => errors.push("missing required field: displayName".to_string()),
            Some(Value::String(_)) => {}
            Some(_) => errors.push("field \"displayName\" must be a string".to_string()),
        }

        match obj.get("version") {
            None => errors.push("missing required field: version".to_string()),
            Some(Value::String(version)) => {
                if Version::parse(version).is_err() {
                    errors.push(format!(
                        "invalid version format: {version} (must be a semantic version, e.g. 1.0.0)"
                    ));
                }
            }
            Some(_) => errors.push("field \"version\" must be a string".to_string()),
        }

        // Optional scalar fields.
        for field in ["description", "author", "license", "category"] {
            if let Some(v) = obj.get(field) {
                if !v.is_string() {
                    errors.push(format!("field \"{field}\" must be a string"));
                }
            }
        }

        if let Some(kind) = obj.get("type") {
            match kind.as_str() {
                Some("business") | Some("system") | Some("tool") => {}
                _ => errors.push("field \"type\" must be one of: business, system, tool".to_string()),
            }
        }

        if let Some(tags) = obj.get("tags") {
            match tags.as_array() {
                Some(items) if items.iter().all(Value::is_string) => {}
                Some(_) => errors.push("all tags must be strings".to_string()),
                None => errors.push("field \"tags\" must be an array".to_string()),
            }
        }

        if let Some(deps) = obj.get("dependencies") {
            match deps.as_object() {
                Some(map) => {
                    for (dep_name, range) in map {
                        match range.as_str() {
                            Some(range) => {
                                if VersionReq::parse(range).is_err() {
                                    errors.push(format!(
                                        "invalid version range for dependency \"{dep_name}\": {range}"
                                    ));
                                }
                            }
                            None => errors
                                .push(format!("dependency \"{dep_name}\" version must be a string")),
                        }
                    }
                }
                None => errors.push("field \"dependencies\" must be an object".to_string()),
            }
        }

        if let Some(backend) = obj.get("backend") {
            Self::validate_backend(backend, &mut errors);
        }

        if let Some(frontend) = obj.get("frontend") {
            match frontend.as_object() {
                Some(map) => match map.get("entry") {
                    Some(Value::String(_)) => {}
                    Some(_) => errors.push("field \"frontend.entry\" must be a string".to_string()),
                    None => errors
                        .push("field \"frontend.entry\" is required when frontend is specified"
                            .to_string()),
                },
                None => errors.push("field \"frontend\" must be an object".to_string()),
            }
        }

        if let Some(menus) = obj.get("menus") {
            match menus.as_array() {
                Some(items) => {
                    for (index, menu) in items.iter().enumerate() {
                        for field in ["id", "title", "path"] {
                            if menu.get(field).and_then(Value::as_str).is_none() {
                                errors.push(format!(
                                    "menu[{index}]: missing required field \"{field}\""
                                ));
                            }
                        }
                        if menu.get("sortOrder").and_then(Value::as_i64).is_none() {
                            errors.push(format!(
                                "menu[{index}]: missing required field \"sortOrder\""
                            ));
                        }
                    }
                }
                None => errors.push("field \"menus\" must be an array".to_string()),
            }
        }

        if let Some(permissions) = obj.get("permissions") {
            match permissions.as_array() {
                Some(items) => {
                    for (index, perm) in items.iter().enumerate() {
                        for field in ["code", "name", "description"] {
                            if perm.get(field).and_then(Value::as_str).is_none() {
                                errors.push(format!(
                                    "permission[{index}]: missing required field \"{field}\""
                                ));
                            }
                        }
                    }
                }
                None => errors.push("field \"permissions\" must be an array".to_string()),
            }
        }

        if let Some(hooks) = obj.get("hooks") {
            match hooks.as_object() {
                Some(map) => {
                    for (hook_name, path) in map {
                        if !path.is_string() {
                            errors.push(format!("hook \"{hook_name}\" must be a string path"));
                        }
                    }
                }
                None => errors.push("field \"hooks\" must be an object".to_string()),
            }
        }

        if let Some(sandbox) = obj.get("sandbox") {
            match sandbox.as_object() {
                Some(map) => {
                    if let Some(level) = map.get("level") {
                        match level.as_str() {
                            Some("minimal") | Some("standard") | Some("elevated")
                            | Some("full") => {}
                            _ => errors.push(
                                "field \"sandbox.level\" must be one of: minimal, standard, elevated, full"
                                    .to_string(),
                            ),
                        }
                    }
                    for field in ["allowedPaths", "allowedDomains"] {
                        if let Some(v) = map.get(field) {
                            match v.as_array() {
                                Some(items) if items.iter().all(Value::is_string) => {}
                                _ => errors.push(format!(
                                    "field \"sandbox.{field}\" must be an array of strings"
                                )),
                            }
                        }
                    }
                }
                None => errors.push("field \"sandbox\" must be an object".to_string()),
            }
        }

        errors
    }

    fn validate_backend(backend: &Value, errors: &mut Vec<String>) {
        let map = match backend.as_object() {
            Some(map) => map,
            None => {
                errors.push("field \"backend\" must be an object".to_string());
                return;
            }
        };

        match map.get("entry") {
            Some(Value::String(_)) => {}
            Some(_) => errors.push("field \"backend.entry\" must be a string".to_string()),
            None => errors
                .push("field \"backend.entry\" is required when backend is specified".to_string()),
        }

        if let Some(routes) = map.get("routes") {
            match routes.as_object() {
                Some(routes) => {
                    for field in ["prefix", "file"] {
                        if routes.get(field).and_then(Value::as_str).is_none() {
                            errors.push(format!("field \"backend.routes.{field}\" must be a string"));
                        }
                    }
                }
                None => errors.push("field \"backend.routes\" must be an object".to_string()),
            }
        }

        if let Some(migrations) = map.get("migrations") {
            match migrations.as_object() {
                Some(migrations) => {
                    if migrations.get("directory").and_then(Value::as_str).is_none() {
                        errors.push(
                            "field \"backend.migrations.directory\" must be a string".to_string(),
                        );
                    }
                }
                None => errors.push("field \"backend.migrations\" must be an object".to_string()),
            }
        }
    }
}
