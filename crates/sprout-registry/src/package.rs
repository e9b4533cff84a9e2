//! Declarative package definitions.
//!
//! A [`RecipePackage`] is built either programmatically through
//! [`RecipePackageBuilder`] or from a `package.toml` file:
//!
//! ```toml
//! [package]
//! name = "pmix"
//! versions = ["4.2.9", "5.0.1"]
//! preferred = "4.2.9"
//! homepage = "https://pmix.org"
//! maintainers = ["rhc54"]
//!
//! [variants.docs]
//! default = false
//! description = "Build manpages"
//!
//! [variants.libs]
//! values = ["shared", "static"]
//! default = "shared"
//! multi = true
//!
//! [[dependencies]]
//! spec = "hwloc@2:"
//! types = ["build", "link"]
//!
//! [[dependencies]]
//! spec = "pandoc"
//! types = ["build"]
//! when = "+docs"
//!
//! [build]
//! steps = ["./configure --prefix={prefix}", "make install"]
//! ```

use crate::definition::{DependencyDecl, PackageDefinition, MAINTAINERS_ATTRIBUTE};
use crate::recipe::{BuildRecipe, NoopRecipe, ScriptRecipe};
use crate::RegistryResult;
use serde::Deserialize;
use sprout_core::error::SproutError;
use sprout_core::parser::parse_spec;
use sprout_core::types::{DepType, DepTypes, VariantDefinition, Version};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// A package described by data rather than code
#[derive(Debug, Clone)]
pub struct RecipePackage {
    name: String,
    versions: Vec<Version>,
    preferred: Option<Version>,
    variants: Vec<VariantDefinition>,
    dependencies: Vec<DependencyDecl>,
    attributes: BTreeMap<String, String>,
    recipe: Arc<dyn BuildRecipe>,
}

impl RecipePackage {
    pub fn builder(name: impl Into<String>) -> RecipePackageBuilder {
        RecipePackageBuilder::new(name)
    }

    /// Load a definition from a `package.toml` file
    pub fn from_file(path: &Path) -> RegistryResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SproutError::io(format!("Failed to read {}", path.display()), e))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Parse a definition from TOML text; `origin` names the source in errors
    pub fn from_toml_str(content: &str, origin: &str) -> RegistryResult<Self> {
        let file: PackageFile = toml::from_str(content).map_err(|e| SproutError::TomlParse {
            file: origin.to_string(),
            message: e.to_string(),
        })?;
        file.into_package(origin)
    }
}

impl PackageDefinition for RecipePackage {
    fn name(&self) -> &str {
        &self.name
    }

    fn versions(&self) -> &[Version] {
        &self.versions
    }

    fn preferred_version(&self) -> Option<&Version> {
        self.preferred.as_ref()
    }

    fn variants(&self) -> &[VariantDefinition] {
        &self.variants
    }

    fn declared_dependencies(&self) -> &[DependencyDecl] {
        &self.dependencies
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    fn recipe(&self) -> Arc<dyn BuildRecipe> {
        self.recipe.clone()
    }
}

/// Builder for [`RecipePackage`]; spec strings are parsed in [`build`].
///
/// [`build`]: RecipePackageBuilder::build
#[derive(Debug)]
pub struct RecipePackageBuilder {
    name: String,
    versions: Vec<String>,
    preferred: Option<String>,
    variants: Vec<VariantDefinition>,
    dependencies: Vec<(String, DepTypes, Option<String>)>,
    attributes: BTreeMap<String, String>,
    recipe: Option<Arc<dyn BuildRecipe>>,
}

impl RecipePackageBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: Vec::new(),
            preferred: None,
            variants: Vec::new(),
            dependencies: Vec::new(),
            attributes: BTreeMap::new(),
            recipe: None,
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.versions.push(version.to_string());
        self
    }

    pub fn versions(mut self, versions: &[&str]) -> Self {
        self.versions.extend(versions.iter().map(|v| v.to_string()));
        self
    }

    pub fn preferred(mut self, version: &str) -> Self {
        self.preferred = Some(version.to_string());
        self
    }

    pub fn variant(mut self, variant: VariantDefinition) -> Self {
        self.variants.push(variant);
        self
    }

    /// Build and link dependency
    pub fn depends_on(self, spec: &str) -> Self {
        self.depends_on_with(spec, DepTypes::default(), None)
    }

    /// Dependency that applies only when the dependent satisfies `when`
    pub fn depends_on_when(self, spec: &str, when: &str) -> Self {
        self.depends_on_with(spec, DepTypes::default(), Some(when))
    }

    pub fn depends_on_with(mut self, spec: &str, types: DepTypes, when: Option<&str>) -> Self {
        self.dependencies
            .push((spec.to_string(), types, when.map(str::to_string)));
        self
    }

    pub fn attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn maintainers(self, users: &[&str]) -> Self {
        if users.is_empty() {
            return self;
        }
        let list = users.join(",");
        self.attribute(MAINTAINERS_ATTRIBUTE, &list)
    }

    pub fn recipe(mut self, recipe: Arc<dyn BuildRecipe>) -> Self {
        self.recipe = Some(recipe);
        self
    }

    pub fn build(self) -> RegistryResult<RecipePackage> {
        let invalid = |reason: String| SproutError::TomlParse {
            file: self.name.clone(),
            message: reason,
        };

        let mut versions = self
            .versions
            .iter()
            .map(|v| Version::parse(v).map_err(|e| invalid(e.to_string())))
            .collect::<RegistryResult<Vec<_>>>()?;
        versions.sort();
        versions.dedup();

        let preferred = match &self.preferred {
            Some(text) => {
                let version = Version::parse(text).map_err(|e| invalid(e.to_string()))?;
                if !versions.contains(&version) {
                    return Err(invalid(format!("preferred version {} is not a known version", version)));
                }
                Some(version)
            },
            None => None,
        };

        let mut dependencies = Vec::with_capacity(self.dependencies.len());
        for (text, types, when) in &self.dependencies {
            let spec = parse_spec(text)?;
            if spec.is_anonymous() {
                return Err(invalid(format!("dependency '{}' needs a package name", text)));
            }
            if spec.name == self.name {
                return Err(invalid(format!("'{}' cannot depend on itself", self.name)));
            }
            let mut decl = DependencyDecl::new(spec, types.clone());
            if let Some(when) = when {
                decl = decl.when(parse_spec(when)?);
            }
            dependencies.push(decl);
        }

        for (i, variant) in self.variants.iter().enumerate() {
            if self.variants[..i].iter().any(|v| v.name == variant.name) {
                return Err(invalid(format!("variant '{}' declared twice", variant.name)));
            }
            variant.validate(&self.name, &variant.default)?;
        }

        Ok(RecipePackage {
            name: self.name.clone(),
            versions,
            preferred,
            variants: self.variants.clone(),
            dependencies,
            attributes: self.attributes.clone(),
            recipe: self.recipe.clone().unwrap_or_else(|| Arc::new(NoopRecipe)),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageFile {
    package: PackageSection,
    #[serde(default)]
    variants: BTreeMap<String, VariantSection>,
    #[serde(default)]
    dependencies: Vec<DependencySection>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    build: BuildSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageSection {
    name: String,
    versions: Vec<String>,
    preferred: Option<String>,
    description: Option<String>,
    homepage: Option<String>,
    #[serde(default)]
    maintainers: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DefaultValue {
    Bool(bool),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VariantSection {
    default: DefaultValue,
    values: Option<Vec<String>>,
    #[serde(default)]
    multi: bool,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DependencySection {
    spec: String,
    types: Option<Vec<DepType>>,
    when: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildSection {
    #[serde(default)]
    steps: Vec<String>,
}

impl PackageFile {
    fn into_package(self, origin: &str) -> RegistryResult<RecipePackage> {
        let invalid = |message: String| SproutError::TomlParse {
            file: origin.to_string(),
            message,
        };

        let mut builder = RecipePackage::builder(&self.package.name);
        for version in &self.package.versions {
            builder = builder.version(version);
        }
        if let Some(preferred) = &self.package.preferred {
            builder = builder.preferred(preferred);
        }
        if let Some(description) = &self.package.description {
            builder = builder.attribute("description", description);
        }
        if let Some(homepage) = &self.package.homepage {
            builder = builder.attribute("homepage", homepage);
        }
        if !self.package.maintainers.is_empty() {
            if let Some(user) = self.package.maintainers.iter().find(|u| u.contains(',') || u.trim().is_empty()) {
                return Err(invalid(format!("maintainer '{}' is not a single user name", user)));
            }
            let users: Vec<&str> = self.package.maintainers.iter().map(|u| u.trim()).collect();
            builder = builder.maintainers(&users);
        }

        for (name, section) in self.variants {
            let definition = match (section.default, section.values) {
                (DefaultValue::Bool(default), None) => VariantDefinition::boolean(&name, default),
                (DefaultValue::Text(default), Some(values)) => {
                    VariantDefinition::values(&name, &default, values, section.multi)
                },
                (DefaultValue::Bool(_), Some(_)) => {
                    return Err(invalid(format!("variant '{}' has values but a boolean default", name)))
                },
                (DefaultValue::Text(_), None) => {
                    return Err(invalid(format!("variant '{}' has a text default but no values", name)))
                },
            };
            builder = builder.variant(definition.with_description(section.description));
        }

        for dep in &self.dependencies {
            let types = dep
                .types
                .as_ref()
                .map(|t| DepTypes::from_types(t.iter().copied()))
                .unwrap_or_default();
            builder = builder.depends_on_with(&dep.spec, types, dep.when.as_deref());
        }

        for (key, value) in &self.attributes {
            builder = builder.attribute(key, value);
        }

        if !self.build.steps.is_empty() {
            builder = builder.recipe(Arc::new(ScriptRecipe::new(self.build.steps)));
        }

        builder.build().map_err(|e| match e {
            SproutError::TomlParse { message, .. } => invalid(message),
            other => other,
        })
    }
}
