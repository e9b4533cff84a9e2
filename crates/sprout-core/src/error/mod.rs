//! Error types and result aliases for Sprout operations.
//!
//! Provides a unified error type that covers concretization-time and
//! install-time failures with enough context to identify the failing node.

use thiserror::Error;

/// Unified error type for all Sprout operations
#[derive(Error, Debug)]
pub enum SproutError {
    // Spec errors
    #[error("Failed to parse spec '{input}': {message} at position {position}")]
    Parse {
        input: String,
        message: String,
        position: usize,
    },

    #[error("Conflicting {field} constraints on '{package}': {left} vs {right}")]
    Conflict {
        package: String,
        field: String,
        left: String,
        right: String,
    },

    // Concretization errors
    #[error("Package '{name}' not found in any repository")]
    PackageNotFound { name: String },

    #[error("Unsatisfiable spec for '{package}': {reason}")]
    Unsatisfiable { package: String, reason: String },

    #[error("Circular dependency detected: {cycle}")]
    CyclicDependency { cycle: String },

    #[error("Invalid variant '{variant}' for '{package}': {reason}")]
    InvalidVariant {
        package: String,
        variant: String,
        reason: String,
    },

    #[error("No compiler matching '{constraint}' is available for '{package}'")]
    NoMatchingCompiler { package: String, constraint: String },

    // Install errors
    #[error("Build of {package} ({hash}) failed: {message}")]
    BuildFailure {
        package: String,
        hash: String,
        message: String,
    },

    #[error("Stale lock for {hash} left by process {pid} at {path}")]
    StaleLockDetected { hash: String, pid: u32, path: String },

    #[error("Timed out after {waited_secs}s waiting for the lock on {hash}")]
    LockTimeout { hash: String, waited_secs: u64 },

    #[error("Install database error: {message}")]
    Database { message: String },

    // Config errors
    #[error("Failed to parse {file}: {message}")]
    TomlParse { file: String, message: String },

    #[error("Configuration field '{field}' is invalid: {reason}")]
    ConfigValidation { field: String, reason: String },

    // IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for Sprout operations
pub type SproutResult<T> = Result<T, SproutError>;

impl SproutError {
    /// Create an IO error from std::io::Error
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an unsatisfiable-spec error
    pub fn unsatisfiable(package: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unsatisfiable {
            package: package.into(),
            reason: reason.into(),
        }
    }

    /// True for errors raised while resolving a spec, before any build work
    pub fn is_concretization_error(&self) -> bool {
        matches!(
            self,
            SproutError::Parse { .. }
                | SproutError::Conflict { .. }
                | SproutError::PackageNotFound { .. }
                | SproutError::Unsatisfiable { .. }
                | SproutError::CyclicDependency { .. }
                | SproutError::InvalidVariant { .. }
                | SproutError::NoMatchingCompiler { .. }
        )
    }

    /// Check if retrying the same operation may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SproutError::Io { .. }
                | SproutError::StaleLockDetected { .. }
                | SproutError::LockTimeout { .. }
        )
    }

    /// Get a user-friendly suggestion for fixing this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            SproutError::PackageNotFound { .. } => {
                Some("Check the package name spelling or add a repository that provides it")
            },
            SproutError::Conflict { .. } | SproutError::Unsatisfiable { .. } => {
                Some("Relax the version or variant constraints, or enable the duplicates sharing policy")
            },
            SproutError::CyclicDependency { .. } => {
                Some("Break the cycle by making one of the dependencies conditional")
            },
            SproutError::InvalidVariant { .. } => {
                Some("Run 'sprout info <package>' to list the variants the package declares")
            },
            SproutError::NoMatchingCompiler { .. } => {
                Some("Register a compiler in the [[compilers]] section of sprout.toml")
            },
            SproutError::LockTimeout { .. } => {
                Some("Another process is building the same package; retry later or raise lock_timeout_secs")
            },
            _ => None,
        }
    }
}
