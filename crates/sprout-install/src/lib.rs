//! Installer and build orchestration for Sprout
//!
//! This crate executes concrete spec DAGs: it plans builds in dependency
//! order, runs them on a bounded worker pool under per-hash file locks,
//! isolates failures to the failing subtree and records results in a
//! persistent install database.

pub mod database;
pub mod installer;
pub mod layout;
pub mod lock;

// Re-export main types
pub use database::{InstallDatabase, InstallRecord};
pub use installer::{
    CancelToken, InstallOptions, InstallPlan, InstallReport, Installer, NodeReport, NodeState, PlanStep,
};
pub use layout::InstallLayout;
pub use lock::{HashLock, LockMetadata};

use sprout_core::error::SproutError;

/// Result type for install operations
pub type InstallResult<T> = Result<T, SproutError>;
