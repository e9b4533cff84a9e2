//! Version and version-constraint types.
//!
//! Versions are dotted tokens made of numeric and alphabetic segments
//! (`1.2.11`, `2.0rc1`, `develop`). Constraints are unions of inclusive
//! ranges whose upper bounds match by prefix, so `1.2` admits `1.2.7`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Names that mark a development head rather than a numbered release
pub const HEAD_NAMES: &[&str] = &["develop", "main", "master", "head", "trunk"];

/// One component of a version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Number(u64),
    Text(String),
}

/// A package version such as `1.2.11` or `develop`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    segments: Vec<Segment>,
    text: String,
}

/// Version parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Empty version string")]
    Empty,

    #[error("Invalid character '{ch}' in version '{input}'")]
    InvalidCharacter { input: String, ch: char },

    #[error("Invalid version range '{input}'")]
    InvalidRange { input: String },

    #[error("Number out of range in version '{input}'")]
    Overflow { input: String },
}

impl Version {
    /// Parse a version string
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(VersionError::Empty);
        }

        let mut segments = Vec::new();
        let mut current = String::new();

        let flush = |current: &mut String, segments: &mut Vec<Segment>| -> Result<(), VersionError> {
            if current.is_empty() {
                return Ok(());
            }
            let segment = if current.chars().all(|c| c.is_ascii_digit()) {
                Segment::Number(current.parse().map_err(|_| VersionError::Overflow {
                    input: text.to_string(),
                })?)
            } else {
                Segment::Text(current.clone())
            };
            segments.push(segment);
            current.clear();
            Ok(())
        };

        for ch in text.chars() {
            match ch {
                '.' | '-' | '_' => flush(&mut current, &mut segments)?,
                c if c.is_ascii_alphanumeric() => {
                    // digit/letter boundaries start a new segment
                    if let Some(last) = current.chars().last() {
                        if last.is_ascii_digit() != c.is_ascii_digit() {
                            flush(&mut current, &mut segments)?;
                        }
                    }
                    current.push(c);
                },
                c => {
                    return Err(VersionError::InvalidCharacter {
                        input: text.to_string(),
                        ch: c,
                    })
                },
            }
        }
        flush(&mut current, &mut segments)?;

        if segments.is_empty() {
            return Err(VersionError::Empty);
        }

        Ok(Self {
            segments,
            text: text.to_string(),
        })
    }

    /// Segments of this version
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Check if this version is a development head (`develop`, `main`, ...)
    pub fn is_head(&self) -> bool {
        match self.segments.as_slice() {
            [Segment::Text(name)] => HEAD_NAMES.contains(&name.as_str()),
            _ => false,
        }
    }

    /// Check if every segment of `self` leads `other` (`1.2` is a prefix of `1.2.7`)
    pub fn is_prefix_of(&self, other: &Version) -> bool {
        self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// Text as originally written
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Segments joined by dots; equal versions render identically
    /// (`1-2-0`, `1_2_0` and `1.2.0` all become `1.2.0`)
    pub fn canonical(&self) -> String {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Number(n) => n.to_string(),
                Segment::Text(t) => t.clone(),
            })
            .collect();
        parts.join(".")
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Version::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.text
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_head(), other.is_head()) {
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            _ => {},
        }

        for (a, b) in self.segments.iter().zip(&other.segments) {
            let ord = match (a, b) {
                (Segment::Number(x), Segment::Number(y)) => x.cmp(y),
                (Segment::Text(x), Segment::Text(y)) => x.cmp(y),
                (Segment::Number(_), Segment::Text(_)) => Ordering::Greater,
                (Segment::Text(_), Segment::Number(_)) => Ordering::Less,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }

        self.segments.len().cmp(&other.segments.len())
    }
}

/// A contiguous set of versions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionRange {
    /// Exactly one version (`=1.2.3`)
    Exact(Version),
    /// Inclusive bounds; the upper bound also admits versions it prefixes.
    /// `lo == hi` is written as a single version (`1.2`).
    Between {
        lo: Option<Version>,
        hi: Option<Version>,
    },
}

impl VersionRange {
    /// The unbounded range
    pub fn any() -> Self {
        VersionRange::Between { lo: None, hi: None }
    }

    /// Range matching `version` and every version it prefixes
    pub fn point(version: Version) -> Self {
        VersionRange::Between {
            lo: Some(version.clone()),
            hi: Some(version),
        }
    }

    /// Parse `1.2`, `=1.2`, `1.2:1.4`, `1.2:`, `:1.4` or `:`
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let input = input.trim();
        if let Some(exact) = input.strip_prefix('=') {
            return Ok(VersionRange::Exact(Version::parse(exact)?));
        }

        match input.split_once(':') {
            Some((lo, hi)) => {
                if hi.contains(':') {
                    return Err(VersionError::InvalidRange {
                        input: input.to_string(),
                    });
                }
                let lo = if lo.is_empty() { None } else { Some(Version::parse(lo)?) };
                let hi = if hi.is_empty() { None } else { Some(Version::parse(hi)?) };
                let range = VersionRange::Between { lo, hi };
                if range.is_empty() {
                    return Err(VersionError::InvalidRange {
                        input: input.to_string(),
                    });
                }
                Ok(range)
            },
            None => Ok(VersionRange::point(Version::parse(input)?)),
        }
    }

    /// Check if `version` lies in this range
    pub fn contains(&self, version: &Version) -> bool {
        match self {
            VersionRange::Exact(v) => v == version,
            VersionRange::Between { lo, hi } => {
                lo.as_ref().map_or(true, |lo| version >= lo)
                    && hi.as_ref().map_or(true, |hi| version <= hi || hi.is_prefix_of(version))
            },
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            VersionRange::Exact(_) => false,
            VersionRange::Between {
                lo: Some(lo),
                hi: Some(hi),
            } => !(lo <= hi || hi.is_prefix_of(lo)),
            VersionRange::Between { .. } => false,
        }
    }

    /// Intersection of two ranges, `None` when disjoint
    pub fn intersect(&self, other: &VersionRange) -> Option<VersionRange> {
        match (self, other) {
            (VersionRange::Exact(a), VersionRange::Exact(b)) => {
                (a == b).then(|| VersionRange::Exact(a.clone()))
            },
            (VersionRange::Exact(v), range) | (range, VersionRange::Exact(v)) => {
                range.contains(v).then(|| VersionRange::Exact(v.clone()))
            },
            (
                VersionRange::Between { lo: lo1, hi: hi1 },
                VersionRange::Between { lo: lo2, hi: hi2 },
            ) => {
                let lo = match (lo1, lo2) {
                    (Some(a), Some(b)) => Some(a.max(b).clone()),
                    (a, b) => a.clone().or_else(|| b.clone()),
                };
                let hi = match (hi1, hi2) {
                    (Some(a), Some(b)) => Some(tighter_upper(a, b).clone()),
                    (a, b) => a.clone().or_else(|| b.clone()),
                };
                let range = VersionRange::Between { lo, hi };
                (!range.is_empty()).then_some(range)
            },
        }
    }

    /// Check if every version in `self` is also in `other`
    pub fn is_subset_of(&self, other: &VersionRange) -> bool {
        match (self, other) {
            (VersionRange::Exact(v), _) => other.contains(v),
            (VersionRange::Between { .. }, VersionRange::Exact(_)) => false,
            (
                VersionRange::Between { lo: lo1, hi: hi1 },
                VersionRange::Between { lo: lo2, hi: hi2 },
            ) => {
                let lower_ok = match (lo1, lo2) {
                    (_, None) => true,
                    (None, Some(_)) => false,
                    (Some(a), Some(b)) => a >= b,
                };
                let upper_ok = match (hi1, hi2) {
                    (_, None) => true,
                    (None, Some(_)) => false,
                    (Some(a), Some(b)) => b.is_prefix_of(a) || (a < b && !a.is_prefix_of(b)),
                };
                lower_ok && upper_ok
            },
        }
    }
}

/// Pick the more restrictive of two prefix-inclusive upper bounds
fn tighter_upper<'a>(a: &'a Version, b: &'a Version) -> &'a Version {
    if a.is_prefix_of(b) {
        b
    } else if b.is_prefix_of(a) {
        a
    } else {
        a.min(b)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRange::Exact(v) => write!(f, "={}", v),
            VersionRange::Between {
                lo: Some(lo),
                hi: Some(hi),
            } if lo == hi => write!(f, "{}", lo),
            VersionRange::Between { lo, hi } => {
                if let Some(lo) = lo {
                    write!(f, "{}", lo)?;
                }
                f.write_str(":")?;
                if let Some(hi) = hi {
                    write!(f, "{}", hi)?;
                }
                Ok(())
            },
        }
    }
}

/// A union of version ranges (`1.2:1.4,2.0`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionConstraint {
    ranges: Vec<VersionRange>,
}

impl VersionConstraint {
    /// Constraint admitting every version
    pub fn any() -> Self {
        Self {
            ranges: vec![VersionRange::any()],
        }
    }

    /// Constraint admitting exactly `version`
    pub fn exact(version: Version) -> Self {
        Self {
            ranges: vec![VersionRange::Exact(version)],
        }
    }

    /// Build a constraint from ranges, normalizing their order
    pub fn from_ranges(ranges: Vec<VersionRange>) -> Self {
        let mut constraint = Self { ranges };
        constraint.normalize();
        constraint
    }

    /// Parse a comma-separated list of ranges
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let ranges = input
            .split(',')
            .map(VersionRange::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_ranges(ranges))
    }

    fn normalize(&mut self) {
        self.ranges.sort_by_key(|r| r.to_string());
        self.ranges.dedup();
        if self.ranges.iter().any(|r| *r == VersionRange::any()) {
            self.ranges = vec![VersionRange::any()];
        }
    }

    /// Ranges making up this constraint
    pub fn ranges(&self) -> &[VersionRange] {
        &self.ranges
    }

    /// Check if this constraint admits every version
    pub fn is_any(&self) -> bool {
        self.ranges == [VersionRange::any()]
    }

    /// The single version this constraint pins, if it is exact
    pub fn concrete(&self) -> Option<&Version> {
        match self.ranges.as_slice() {
            [VersionRange::Exact(v)] => Some(v),
            _ => None,
        }
    }

    /// Check if `version` satisfies this constraint
    pub fn contains(&self, version: &Version) -> bool {
        self.ranges.iter().any(|r| r.contains(version))
    }

    /// Check if this constraint names development heads explicitly
    pub fn mentions_head(&self) -> bool {
        self.ranges.iter().any(|r| match r {
            VersionRange::Exact(v) => v.is_head(),
            VersionRange::Between { lo, hi } => {
                lo.as_ref().map_or(false, Version::is_head) || hi.as_ref().map_or(false, Version::is_head)
            },
        })
    }

    /// Intersect two constraints, `None` when no version can satisfy both
    pub fn intersect(&self, other: &VersionConstraint) -> Option<VersionConstraint> {
        let ranges: Vec<VersionRange> = self
            .ranges
            .iter()
            .flat_map(|a| other.ranges.iter().filter_map(move |b| a.intersect(b)))
            .collect();
        if ranges.is_empty() {
            None
        } else {
            Some(Self::from_ranges(ranges))
        }
    }

    /// Check if every version admitted by `self` is admitted by `other`
    pub fn satisfies(&self, other: &VersionConstraint) -> bool {
        self.ranges
            .iter()
            .all(|a| other.ranges.iter().any(|b| a.is_subset_of(b)))
    }
}

impl Default for VersionConstraint {
    fn default() -> Self {
        Self::any()
    }
}

impl FromStr for VersionConstraint {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionConstraint::parse(s)
    }
}

impl TryFrom<String> for VersionConstraint {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VersionConstraint::parse(&value)
    }
}

impl From<VersionConstraint> for String {
    fn from(constraint: VersionConstraint) -> Self {
        constraint.to_string()
    }
}

impl VersionRange {
    fn canonical(&self) -> String {
        let bound = |v: &Option<Version>| v.as_ref().map(Version::canonical).unwrap_or_default();
        match self {
            VersionRange::Exact(v) => format!("={}", v.canonical()),
            VersionRange::Between {
                lo: Some(lo),
                hi: Some(hi),
            } if lo == hi => lo.canonical(),
            VersionRange::Between { lo, hi } => format!("{}:{}", bound(lo), bound(hi)),
        }
    }
}

impl VersionConstraint {
    /// Rendering built from segments rather than the text as written
    pub fn canonical(&self) -> String {
        let parts: Vec<String> = self.ranges.iter().map(VersionRange::canonical).collect();
        parts.join(",")
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.ranges.iter().map(|r| r.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn version_strategy() -> impl Strategy<Value = Version> {
        prop::collection::vec(0u64..20, 1..4).prop_map(|parts| {
            let text = parts
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(".");
            Version::parse(&text).unwrap()
        })
    }

    proptest! {
        #[test]
        fn version_comparison_transitivity(
            a in version_strategy(),
            b in version_strategy(),
            c in version_strategy(),
        ) {
            if a < b && b < c {
                prop_assert!(a < c, "Transitivity violated: {} < {} < {}", a, b, c);
            }
        }

        #[test]
        fn intersection_is_contained_in_both(
            lo1 in version_strategy(),
            lo2 in version_strategy(),
            probe in version_strategy(),
        ) {
            let a = VersionConstraint::parse(&format!("{}:", lo1)).unwrap();
            let b = VersionConstraint::parse(&format!(":{}", lo2)).unwrap();
            if let Some(both) = a.intersect(&b) {
                prop_assert!(both.satisfies(&a));
                prop_assert!(both.satisfies(&b));
                if both.contains(&probe) {
                    prop_assert!(a.contains(&probe) && b.contains(&probe));
                }
            }
        }
    }
}
