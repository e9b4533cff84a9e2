//! Session-scoped view of repositories, compilers and policy.
//!
//! A [`RepositoryContext`] is created once per resolution session and
//! passed explicitly to whatever needs it. It never changes while a
//! session is running.

use crate::definition::PackageDefinition;
use crate::repository::PackageRegistry;
use crate::RegistryResult;
use serde::{Deserialize, Serialize};
use sprout_core::error::SproutError;
use sprout_core::types::{ArchSpec, CompilerSpec};
use std::fmt;
use std::sync::Arc;

/// How many concrete instances of one package a DAG may hold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingPolicy {
    /// One node per package name; diamond dependencies converge
    #[default]
    Single,
    /// A dependent whose constraint is irreconcilable with the existing
    /// instance gets its own instance
    Duplicates,
}

impl fmt::Display for SharingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharingPolicy::Single => f.write_str("single"),
            SharingPolicy::Duplicates => f.write_str("duplicates"),
        }
    }
}

impl std::str::FromStr for SharingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(SharingPolicy::Single),
            "duplicates" => Ok(SharingPolicy::Duplicates),
            other => Err(format!("unknown sharing policy '{}' (expected single or duplicates)", other)),
        }
    }
}

/// Selection policy applied by the concretizer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcretizerPolicy {
    pub sharing: SharingPolicy,
    /// Compiler request used at roots that do not name one
    pub default_compiler: Option<CompilerSpec>,
}

/// Immutable bundle of everything one resolution session consults
#[derive(Debug, Clone)]
pub struct RepositoryContext {
    registry: Arc<PackageRegistry>,
    compilers: Vec<CompilerSpec>,
    default_arch: ArchSpec,
    policy: ConcretizerPolicy,
}

impl RepositoryContext {
    pub fn new(registry: PackageRegistry, compilers: Vec<CompilerSpec>, default_arch: ArchSpec) -> Self {
        Self {
            registry: Arc::new(registry),
            compilers,
            default_arch,
            policy: ConcretizerPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ConcretizerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &PackageRegistry {
        &self.registry
    }

    /// Shared handle to the registry, for consumers that outlive a borrow
    pub fn shared_registry(&self) -> Arc<PackageRegistry> {
        self.registry.clone()
    }

    pub fn package(&self, name: &str) -> RegistryResult<Arc<dyn PackageDefinition>> {
        self.registry.get(name)
    }

    pub fn compilers(&self) -> &[CompilerSpec] {
        &self.compilers
    }

    pub fn default_arch(&self) -> &ArchSpec {
        &self.default_arch
    }

    pub fn policy(&self) -> &ConcretizerPolicy {
        &self.policy
    }

    /// Pick the concrete compiler for `package`.
    ///
    /// With a request, the newest available compiler satisfying it wins.
    /// Without one, the policy default applies, then the first available
    /// compiler.
    pub fn select_compiler(&self, request: Option<&CompilerSpec>, package: &str) -> RegistryResult<CompilerSpec> {
        let request = request.or(self.policy.default_compiler.as_ref());
        let chosen = match request {
            Some(wanted) => self
                .compilers
                .iter()
                .filter(|c| c.satisfies(wanted))
                .max_by(|a, b| a.versions.concrete().cmp(&b.versions.concrete())),
            None => self.compilers.first(),
        };

        chosen.cloned().ok_or_else(|| SproutError::NoMatchingCompiler {
            package: package.to_string(),
            constraint: request
                .map(|r| r.to_string())
                .unwrap_or_else(|| "any compiler".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprout_core::types::{Version, VersionConstraint};

    fn context() -> RepositoryContext {
        let compilers = vec![
            CompilerSpec::concrete("clang", Version::parse("17.0").unwrap(), None),
            CompilerSpec::concrete("gcc", Version::parse("13.1").unwrap(), None),
            CompilerSpec::concrete("gcc", Version::parse("11.4").unwrap(), None),
        ];
        RepositoryContext::new(
            PackageRegistry::new(),
            compilers,
            ArchSpec::new("linux", "test", "x86_64"),
        )
    }

    #[test]
    fn test_select_newest_matching() {
        let ctx = context();
        let chosen = ctx.select_compiler(Some(&CompilerSpec::new("gcc")), "zlib").unwrap();
        assert_eq!(chosen.to_string(), "%gcc@=13.1");

        let mut old = CompilerSpec::new("gcc");
        old.versions = VersionConstraint::parse(":12").unwrap();
        let chosen = ctx.select_compiler(Some(&old), "zlib").unwrap();
        assert_eq!(chosen.to_string(), "%gcc@=11.4");
    }

    #[test]
    fn test_default_compiler_policy() {
        let ctx = context().with_policy(ConcretizerPolicy {
            default_compiler: Some(CompilerSpec::new("gcc")),
            ..Default::default()
        });
        assert_eq!(ctx.select_compiler(None, "zlib").unwrap().name, "gcc");
        assert_eq!(context().select_compiler(None, "zlib").unwrap().name, "clang");
    }

    #[test]
    fn test_no_matching_compiler() {
        let ctx = context();
        let err = ctx
            .select_compiler(Some(&CompilerSpec::new("intel")), "zlib")
            .unwrap_err();
        assert!(matches!(err, SproutError::NoMatchingCompiler { .. }));

        let empty = RepositoryContext::new(PackageRegistry::new(), Vec::new(), ArchSpec::default());
        assert!(empty.select_compiler(None, "zlib").is_err());
    }

    #[test]
    fn test_policy_serde_names() {
        let policy: SharingPolicy = serde_json::from_str("\"duplicates\"").unwrap();
        assert_eq!(policy, SharingPolicy::Duplicates);
        assert_eq!(SharingPolicy::default().to_string(), "single");
        assert_eq!("Duplicates".parse::<SharingPolicy>().unwrap(), SharingPolicy::Duplicates);
        assert!("shared".parse::<SharingPolicy>().is_err());
    }
}
