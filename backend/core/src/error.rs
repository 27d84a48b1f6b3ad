use std::path::PathBuf;

use thiserror::Error;

/// Why signature verification rejected a module. Each tamper class is a
/// distinct kind so logs and callers can tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureFailure {
    #[error("no signature record present")]
    RecordMissing,

    #[error("no public key available for verification")]
    NoKey,

    #[error("signature does not match the signed record")]
    BadSignature,

    #[error("file hash mismatch: {0}")]
    HashMismatch(String),

    #[error("file not covered by the signature: {0}")]
    UnexpectedFile(String),

    #[error("signed file missing from module: {0}")]
    MissingFile(String),
}

/// Top-level error type for the module runtime.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Malformed manifest. Always carries the complete list of violations.
    #[error("manifest validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("module {module} has unregistered dependencies: {}", .missing.join(", "))]
    DependencyMissing { module: String, missing: Vec<String> },

    #[error("module {module} requires {dependency} {required}, but {installed} is installed")]
    DependencyConflict {
        module: String,
        dependency: String,
        required: String,
        installed: String,
    },

    #[error("dependency {dependency} of module {module} is not enabled")]
    DependencyNotEnabled { module: String, dependency: String },

    #[error("circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("module {0} is already registered")]
    AlreadyRegistered(String),

    #[error("module {0} is not registered")]
    NotRegistered(String),

    #[error("cannot remove module {name}, it is required by: {}", .dependents.join(", "))]
    HasDependents { name: String, dependents: Vec<String> },

    #[error("signature verification failed for module {module}: {failure}")]
    SignatureInvalid { module: String, failure: SignatureFailure },

    #[error("module directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("module path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("no backend entry '{entry}' registered for module {module}")]
    EntryNotRegistered { module: String, entry: String },

    #[error("hook {hook} failed for module {module}: {source}")]
    HookExecution {
        hook: String,
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ModuleError {
    /// Shorthand for a single-violation validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { errors: vec![message.into()] }
    }
}
