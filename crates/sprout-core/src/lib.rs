//! # sprout-core
//!
//! Core types shared across all Sprout crates.
//!
//! This crate provides:
//! - Version, VersionConstraint and the spec data model
//! - The spec syntax parser
//! - SproutError for unified error handling
//! - Identity hashing of concrete specs
//!
//! ## Architecture
//!
//! - `types`: Spec, versions, variants, compilers, dependency edges
//! - `parser`: text to [`Spec`]
//! - `error`: Error types and result aliases
//! - `utils`: Hashing helpers

pub mod error;
pub mod parser;
pub mod types;
pub mod utils;

pub use error::{SproutError, SproutResult};
pub use parser::parse_spec;
pub use types::{
    ArchSpec, CompilerSpec, DepType, DepTypes, DependencyEdge, Spec, SpecHash, SpecNode, VariantDefinition,
    VariantValue, Version, VersionConstraint, VersionRange,
};
