//! Compiler and target architecture attributes of a spec.

use super::version::{Version, VersionConstraint};
use crate::error::{SproutError, SproutResult};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A compiler request or a concrete compiler (`%gcc@12.2`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompilerSpec {
    pub name: String,
    #[serde(default)]
    pub versions: VersionConstraint,
    /// Location of the compiler executable; not part of spec identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Utf8PathBuf>,
}

impl CompilerSpec {
    /// Compiler request for any version of `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: VersionConstraint::any(),
            path: None,
        }
    }

    /// Concrete compiler found on the system
    pub fn concrete(name: impl Into<String>, version: Version, path: Option<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            versions: VersionConstraint::exact(version),
            path,
        }
    }

    /// Check if the compiler pins one version
    pub fn is_concrete(&self) -> bool {
        self.versions.concrete().is_some()
    }

    /// Merge two compiler requests
    pub fn intersect(&self, other: &CompilerSpec, package: &str) -> SproutResult<CompilerSpec> {
        let conflict = || SproutError::Conflict {
            package: package.to_string(),
            field: "compiler".to_string(),
            left: self.to_string(),
            right: other.to_string(),
        };
        if self.name != other.name {
            return Err(conflict());
        }
        let versions = self.versions.intersect(&other.versions).ok_or_else(conflict)?;
        Ok(CompilerSpec {
            name: self.name.clone(),
            versions,
            path: self.path.clone().or_else(|| other.path.clone()),
        })
    }

    /// Check if `self` meets the request `other`
    pub fn satisfies(&self, other: &CompilerSpec) -> bool {
        self.name == other.name && self.versions.satisfies(&other.versions)
    }
}

impl fmt::Display for CompilerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name)?;
        if !self.versions.is_any() {
            write!(f, "@{}", self.versions)?;
        }
        Ok(())
    }
}

/// Target architecture triple: platform, operating system, microarchitecture
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl ArchSpec {
    /// Fully specified architecture
    pub fn new(platform: impl Into<String>, os: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            platform: Some(platform.into()),
            os: Some(os.into()),
            target: Some(target.into()),
        }
    }

    /// Parse the `platform-os-target` form; `-` may appear inside target
    pub fn parse_triple(input: &str) -> Option<Self> {
        let mut parts = input.splitn(3, '-');
        let platform = parts.next().filter(|p| !p.is_empty())?;
        let os = parts.next().filter(|p| !p.is_empty())?;
        let target = parts.next().filter(|p| !p.is_empty())?;
        Some(Self::new(platform, os, target))
    }

    /// Check if no field is set
    pub fn is_empty(&self) -> bool {
        self.platform.is_none() && self.os.is_none() && self.target.is_none()
    }

    /// Check if every field is set
    pub fn is_concrete(&self) -> bool {
        self.platform.is_some() && self.os.is_some() && self.target.is_some()
    }

    /// Merge field by field; set fields must agree
    pub fn intersect(&self, other: &ArchSpec, package: &str) -> SproutResult<ArchSpec> {
        fn merge(
            field: &str,
            a: &Option<String>,
            b: &Option<String>,
            package: &str,
        ) -> SproutResult<Option<String>> {
            match (a, b) {
                (Some(x), Some(y)) if x != y => Err(SproutError::Conflict {
                    package: package.to_string(),
                    field: field.to_string(),
                    left: x.clone(),
                    right: y.clone(),
                }),
                (a, b) => Ok(a.clone().or_else(|| b.clone())),
            }
        }

        Ok(ArchSpec {
            platform: merge("platform", &self.platform, &other.platform, package)?,
            os: merge("os", &self.os, &other.os, package)?,
            target: merge("target", &self.target, &other.target, package)?,
        })
    }

    /// Check if every field set on `other` matches `self`
    pub fn satisfies(&self, other: &ArchSpec) -> bool {
        fn field_ok(mine: &Option<String>, theirs: &Option<String>) -> bool {
            theirs.is_none() || mine == theirs
        }
        field_ok(&self.platform, &other.platform)
            && field_ok(&self.os, &other.os)
            && field_ok(&self.target, &other.target)
    }

    /// Fill unset fields from `fallback`
    pub fn or(&self, fallback: &ArchSpec) -> ArchSpec {
        ArchSpec {
            platform: self.platform.clone().or_else(|| fallback.platform.clone()),
            os: self.os.clone().or_else(|| fallback.os.clone()),
            target: self.target.clone().or_else(|| fallback.target.clone()),
        }
    }
}

impl fmt::Display for ArchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.platform, &self.os, &self.target) {
            (Some(p), Some(o), Some(t)) => write!(f, "arch={}-{}-{}", p, o, t),
            _ => {
                let mut parts = Vec::new();
                if let Some(p) = &self.platform {
                    parts.push(format!("platform={}", p));
                }
                if let Some(o) = &self.os {
                    parts.push(format!("os={}", o));
                }
                if let Some(t) = &self.target {
                    parts.push(format!("target={}", t));
                }
                f.write_str(&parts.join(" "))
            },
        }
    }
}
