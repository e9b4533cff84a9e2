//! Name-keyed package registry and on-disk repositories.

use crate::definition::PackageDefinition;
use crate::package::RecipePackage;
use crate::RegistryResult;
use camino::Utf8Path;
use indexmap::IndexMap;
use sprout_core::error::SproutError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File name of a package definition inside a repository
pub const PACKAGE_FILE: &str = "package.toml";

/// All package definitions visible to one session, keyed by name
#[derive(Debug, Default, Clone)]
pub struct PackageRegistry {
    packages: IndexMap<String, Arc<dyn PackageDefinition>>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, replacing any earlier one of the same name
    pub fn register(&mut self, definition: Arc<dyn PackageDefinition>) -> Option<Arc<dyn PackageDefinition>> {
        let name = definition.name().to_string();
        let previous = self.packages.insert(name.clone(), definition);
        if previous.is_some() {
            debug!(package = %name, "Package definition overridden");
        }
        previous
    }

    /// Look up a package by name
    pub fn get(&self, name: &str) -> RegistryResult<Arc<dyn PackageDefinition>> {
        self.packages
            .get(name)
            .cloned()
            .ok_or_else(|| SproutError::PackageNotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Package names in sorted order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.packages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Merge `other` into `self`; definitions in `other` win
    pub fn extend(&mut self, other: PackageRegistry) {
        for (_, definition) in other.packages {
            self.register(definition);
        }
    }

    /// Package names split into those with maintainers and those without
    pub fn maintained(&self) -> (Vec<&str>, Vec<&str>) {
        self.names().into_iter().partition(|name| {
            self.packages
                .get(*name)
                .map_or(false, |definition| !definition.maintainers().is_empty())
        })
    }

    /// Maintainers of each package in `names` that has any; every package
    /// when `names` is empty
    pub fn maintainers_of(&self, names: &[&str]) -> RegistryResult<BTreeMap<String, BTreeSet<String>>> {
        let names = if names.is_empty() { self.names() } else { names.to_vec() };
        let mut out = BTreeMap::new();
        for name in names {
            let definition = self.get(name)?;
            let users: BTreeSet<String> = definition.maintainers().into_iter().map(str::to_string).collect();
            if !users.is_empty() {
                out.insert(name.to_string(), users);
            }
        }
        Ok(out)
    }

    /// Packages of each maintainer in `users`, matched case-insensitively;
    /// every maintainer when `users` is empty
    pub fn packages_by_maintainer(&self, users: &[&str]) -> BTreeMap<String, BTreeSet<String>> {
        let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for name in self.names() {
            let Some(definition) = self.packages.get(name) else {
                continue;
            };
            for user in definition.maintainers() {
                if users.is_empty() || users.iter().any(|u| u.eq_ignore_ascii_case(user)) {
                    out.entry(user.to_string()).or_default().insert(name.to_string());
                }
            }
        }
        out
    }

    /// Load several repositories; earlier paths take precedence
    pub fn load_all<P: AsRef<Utf8Path>>(paths: &[P]) -> RegistryResult<Self> {
        let mut registry = PackageRegistry::new();
        for path in paths.iter().rev() {
            registry.extend(FileRepository::load(path.as_ref())?);
        }
        Ok(registry)
    }
}

/// A directory of declarative packages laid out as
/// `<root>/packages/<name>/package.toml`
pub struct FileRepository;

impl FileRepository {
    /// Load every package definition under `root`
    pub fn load(root: &Utf8Path) -> RegistryResult<PackageRegistry> {
        let packages_dir = root.join("packages");
        if !packages_dir.is_dir() {
            return Err(SproutError::ConfigValidation {
                field: "repositories".to_string(),
                reason: format!("{} has no packages/ directory", root),
            });
        }

        let mut registry = PackageRegistry::new();
        let walker = WalkDir::new(&packages_dir)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(|e| {
                let message = format!("Failed to walk {}", packages_dir);
                match e.into_io_error() {
                    Some(io) => SproutError::io(message, io),
                    None => SproutError::ConfigValidation {
                        field: "repositories".to_string(),
                        reason: message,
                    },
                }
            })?;
            if entry.file_name() != PACKAGE_FILE {
                continue;
            }

            let package = RecipePackage::from_file(entry.path())?;
            let dir_name = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if dir_name != package.name() {
                warn!(
                    package = %package.name(),
                    directory = %dir_name,
                    "Package name does not match its directory"
                );
            }
            registry.register(Arc::new(package));
        }

        info!(repository = %root, packages = registry.len(), "Loaded repository");
        Ok(registry)
    }
}
