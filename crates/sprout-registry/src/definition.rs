//! The capability interface every package definition exposes.

use crate::recipe::BuildRecipe;
use sprout_core::types::{DepTypes, Spec, VariantDefinition, Version};
use std::fmt;
use std::sync::Arc;

/// A dependency declared by a package, optionally guarded by a condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDecl {
    /// Constraint on the dependency; always named
    pub spec: Spec,
    pub types: DepTypes,
    /// Anonymous spec the dependent must satisfy for the edge to apply
    pub when: Option<Spec>,
}

impl DependencyDecl {
    pub fn new(spec: Spec, types: DepTypes) -> Self {
        Self { spec, types, when: None }
    }

    pub fn when(mut self, condition: Spec) -> Self {
        self.when = Some(condition);
        self
    }

    /// Check if this edge applies to a dependent resolved as `resolved`
    pub fn applies_to(&self, resolved: &Spec) -> bool {
        self.when
            .as_ref()
            .map_or(true, |condition| resolved.satisfies_node(condition))
    }
}

impl fmt::Display for DependencyDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.spec, self.types)?;
        if let Some(condition) = &self.when {
            write!(f, " when {}", condition)?;
        }
        Ok(())
    }
}

/// Attribute naming a package's maintainers, comma separated
pub const MAINTAINERS_ATTRIBUTE: &str = "maintainers";

/// What the concretizer and installer may ask of a package.
///
/// Optional metadata is queried explicitly through [`has_attribute`]
/// rather than probed for.
///
/// [`has_attribute`]: PackageDefinition::has_attribute
pub trait PackageDefinition: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Known versions, ascending
    fn versions(&self) -> &[Version];

    /// Version to prefer when several satisfy a constraint equally
    fn preferred_version(&self) -> Option<&Version>;

    fn variants(&self) -> &[VariantDefinition];

    fn variant(&self, name: &str) -> Option<&VariantDefinition> {
        self.variants().iter().find(|v| v.name == name)
    }

    /// Every declared dependency, conditional or not
    fn declared_dependencies(&self) -> &[DependencyDecl];

    /// Dependencies that apply to a dependent resolved as `resolved`
    fn dependencies(&self, resolved: &Spec) -> Vec<&DependencyDecl> {
        self.declared_dependencies()
            .iter()
            .filter(|d| d.applies_to(resolved))
            .collect()
    }

    fn has_attribute(&self, key: &str) -> bool {
        self.attribute(key).is_some()
    }

    fn attribute(&self, key: &str) -> Option<&str>;

    /// Users responsible for the package; empty when it is unmaintained
    fn maintainers(&self) -> Vec<&str> {
        self.attribute(MAINTAINERS_ATTRIBUTE)
            .map(|list| list.split(',').map(str::trim).filter(|user| !user.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Opaque build handle, consumed only by the installer
    fn recipe(&self) -> Arc<dyn BuildRecipe>;
}
