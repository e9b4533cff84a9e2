//! Core data types for describing package configurations.
//!
//! - Versions and version constraints
//! - Variants, compilers and target architectures
//! - Specs, their dependency edges and identity hashes

pub mod compiler;
pub mod dependency;
pub mod hash;
pub mod spec;
pub mod variant;
pub mod version;

pub use compiler::{ArchSpec, CompilerSpec};
pub use dependency::{DepType, DepTypes};
pub use hash::{SpecHash, SHORT_HASH_LEN};
pub use spec::{DependencyEdge, NodeRef, Spec, SpecNode};
pub use variant::{AllowedValues, VariantDefinition, VariantValue};
pub use version::{Segment, Version, VersionConstraint, VersionError, VersionRange, HEAD_NAMES};
