//! Version selection against a package's known versions
//!
//! Picks the highest known version inside a constraint. Development heads
//! (`develop`, `main`, ...) are only chosen when the constraint names one
//! or nothing else matches.

use sprout_core::types::{Version, VersionConstraint};
use sprout_registry::PackageDefinition;

/// Version selector for finding best matching versions
#[derive(Debug, Clone)]
pub struct VersionSelector {
    /// Available versions in ascending order
    available_versions: Vec<Version>,
    /// Wins ties between equally ranked candidates
    preferred: Option<Version>,
}

impl VersionSelector {
    /// Create new version selector with available versions
    pub fn new(mut versions: Vec<Version>, preferred: Option<Version>) -> Self {
        versions.sort();
        Self {
            available_versions: versions,
            preferred,
        }
    }

    /// Selector over a package definition's versions
    pub fn for_package(definition: &dyn PackageDefinition) -> Self {
        Self::new(
            definition.versions().to_vec(),
            definition.preferred_version().cloned(),
        )
    }

    /// Find all versions matching a constraint, ascending
    pub fn find_matching(&self, constraint: &VersionConstraint) -> Vec<&Version> {
        self.available_versions
            .iter()
            .filter(|version| constraint.contains(version))
            .collect()
    }

    /// Select the best version satisfying `constraint`
    pub fn select_best(&self, constraint: &VersionConstraint) -> Option<Version> {
        let matching = self.find_matching(constraint);
        let numbered: Vec<&Version> = matching.iter().copied().filter(|v| !v.is_head()).collect();
        let pool = if constraint.mentions_head() || numbered.is_empty() {
            matching
        } else {
            numbered
        };

        let best = pool.iter().rev().next()?;
        // equal-ranked spellings of the same version
        let tied: Vec<&&Version> = pool.iter().filter(|v| **v == *best).collect();
        let chosen = self
            .preferred
            .as_ref()
            .and_then(|preferred| {
                tied.iter()
                    .find(|v| v.as_str() == preferred.as_str())
                    .map(|v| (**v).clone())
            })
            .unwrap_or_else(|| (*best).clone());
        Some(chosen)
    }

    /// Get the highest available version
    pub fn highest_version(&self) -> Option<&Version> {
        self.available_versions.iter().rev().next()
    }

    /// Check if any version satisfies the constraint
    pub fn has_matching(&self, constraint: &VersionConstraint) -> bool {
        self.available_versions
            .iter()
            .any(|version| constraint.contains(version))
    }

    /// Known versions rendered for error messages
    pub fn describe(&self) -> String {
        self.available_versions
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(versions: &[&str], preferred: Option<&str>) -> VersionSelector {
        VersionSelector::new(
            versions.iter().map(|v| Version::parse(v).unwrap()).collect(),
            preferred.map(|p| Version::parse(p).unwrap()),
        )
    }

    fn c(text: &str) -> VersionConstraint {
        VersionConstraint::parse(text).unwrap()
    }

    #[test]
    fn test_select_highest_matching() {
        let s = selector(&["1.0", "1.2.11", "1.2.13", "1.3"], None);
        assert_eq!(s.select_best(&c(":")).unwrap().to_string(), "1.3");
        assert_eq!(s.select_best(&c("1.2")).unwrap().to_string(), "1.2.13");
        assert_eq!(s.select_best(&c(":1.2.12")).unwrap().to_string(), "1.2.11");
        assert!(s.select_best(&c("2:")).is_none());
        assert!(!s.has_matching(&c("2:")));
    }

    #[test]
    fn test_heads_only_when_named_or_alone() {
        let s = selector(&["1.0", "2.0", "develop"], None);
        assert_eq!(s.select_best(&c(":")).unwrap().to_string(), "2.0");
        assert_eq!(s.select_best(&c("develop")).unwrap().to_string(), "develop");
        assert_eq!(s.highest_version().unwrap().to_string(), "develop");

        let heads_only = selector(&["main"], None);
        assert_eq!(heads_only.select_best(&c(":")).unwrap().to_string(), "main");
    }

    #[test]
    fn test_preferred_breaks_ties() {
        let s = selector(&["1.2.0", "1-2-0"], Some("1-2-0"));
        assert_eq!(s.select_best(&c("1.2")).unwrap().as_str(), "1-2-0");

        let s = selector(&["1.2.0", "1-2-0"], None);
        assert_eq!(s.select_best(&c("1.2")).unwrap().as_str(), "1-2-0");
    }

    #[test]
    fn test_preferred_does_not_beat_higher() {
        let s = selector(&["1.0", "2.0"], Some("1.0"));
        assert_eq!(s.select_best(&c(":")).unwrap().to_string(), "2.0");
        assert_eq!(s.select_best(&c(":1")).unwrap().to_string(), "1.0");
    }
}
