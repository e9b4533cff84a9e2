//! Concretization engine for Sprout
//!
//! This crate turns abstract specs into concrete spec DAGs: version
//! selection, constraint merging across the dependency closure, cycle
//! detection and identity-stable node reuse.

pub mod concretize;
pub mod graph;
pub mod version;

// Re-export main types
pub use concretize::{concretize, Concretizer, MAX_PASSES};
pub use graph::{find_cycle, format_cycle, SpecDag};
pub use version::VersionSelector;

use sprout_core::error::SproutError;

/// Result type for resolver operations
pub type ResolverResult<T> = Result<T, SproutError>;
