//! Package repositories and platform detection for Sprout
//!
//! This crate answers the questions the concretizer and installer ask
//! about packages (versions, variants, dependencies, build recipe) and
//! about the host (compilers, architecture).

pub mod context;
pub mod definition;
pub mod package;
pub mod platform;
pub mod recipe;
pub mod repository;

// Re-export main types
pub use context::{ConcretizerPolicy, RepositoryContext, SharingPolicy};
pub use definition::{DependencyDecl, PackageDefinition, MAINTAINERS_ATTRIBUTE};
pub use package::{RecipePackage, RecipePackageBuilder};
pub use platform::{detect_compilers, host_arch, CompilerProbe, ConfiguredCompilers, PathProbe};
pub use recipe::{BuildContext, BuildRecipe, NoopRecipe, ScriptRecipe};
pub use repository::{FileRepository, PackageRegistry, PACKAGE_FILE};

use sprout_core::error::SproutError;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, SproutError>;
