//! Dependency edge types.
//!
//! An edge records which dependency a spec needs and in which phases
//! (build, link, run, test) it is needed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Phase in which a dependency is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepType {
    /// Needed while building
    Build,
    /// Linked into the result
    Link,
    /// Needed when the installed package runs
    Run,
    /// Needed only to run the package's tests
    Test,
}

impl DepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepType::Build => "build",
            DepType::Link => "link",
            DepType::Run => "run",
            DepType::Test => "test",
        }
    }
}

impl FromStr for DepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" => Ok(DepType::Build),
            "link" => Ok(DepType::Link),
            "run" => Ok(DepType::Run),
            "test" => Ok(DepType::Test),
            other => Err(format!("unknown dependency type '{}'", other)),
        }
    }
}

impl fmt::Display for DepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of phases a dependency is needed in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepTypes(BTreeSet<DepType>);

impl DepTypes {
    /// Build from an explicit list
    pub fn from_types<I: IntoIterator<Item = DepType>>(types: I) -> Self {
        Self(types.into_iter().collect())
    }

    pub fn contains(&self, dep_type: DepType) -> bool {
        self.0.contains(&dep_type)
    }

    /// Union of two sets
    pub fn union(&self, other: &DepTypes) -> DepTypes {
        Self(self.0.union(&other.0).copied().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = DepType> + '_ {
        self.0.iter().copied()
    }
}

impl Default for DepTypes {
    fn default() -> Self {
        Self::from_types([DepType::Build, DepType::Link])
    }
}

impl fmt::Display for DepTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(DepType::as_str).collect();
        f.write_str(&names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_types() {
        let types = DepTypes::default();
        assert!(types.contains(DepType::Build));
        assert!(types.contains(DepType::Link));
        assert!(!types.contains(DepType::Run));
        assert_eq!(types.to_string(), "build,link");
    }

    #[test]
    fn test_union_and_parse() {
        let run = DepTypes::from_types(["run".parse::<DepType>().unwrap()]);
        let all = run.union(&DepTypes::default());
        assert_eq!(all.iter().count(), 3);
        assert!("compile".parse::<DepType>().is_err());
    }

    #[test]
    fn test_serde_as_strings() {
        let json = serde_json::to_string(&DepTypes::default()).unwrap();
        assert_eq!(json, r#"["build","link"]"#);
    }
}
