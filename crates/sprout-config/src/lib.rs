//! Configuration for Sprout
//!
//! This crate parses and validates `sprout.toml` and the global
//! `~/.sprout/config.toml`, and stacks them with environment and
//! command-line overrides into one resolved [`SproutConfig`].

pub mod merge;
pub mod settings;

// Re-export main types
pub use merge::{ConfigLayering, ConfigLoader, ConfigSource, ENV_PREFIX, PROJECT_FILE};
pub use settings::{
    parse_sprout_toml, serialize_sprout_toml, CompilerEntry, ConcretizerSection, InstallSection, PlatformSection,
    RepositoriesSection, SproutConfig, SproutToml,
};

use sprout_core::error::SproutError;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, SproutError>;
