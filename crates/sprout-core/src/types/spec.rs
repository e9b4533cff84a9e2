//! The spec: a package name plus constraints, possibly with dependencies.
//!
//! An *abstract* spec carries partial constraints (`zlib@1.2: +shared`).
//! A *concrete* spec has every attribute pinned and every dependency
//! concrete; only concrete specs carry a [`SpecHash`], and the hash is
//! derived from the node's own attributes plus its dependencies' hashes.

use super::compiler::{ArchSpec, CompilerSpec};
use super::dependency::DepTypes;
use super::hash::{SpecHash, SHORT_HASH_LEN};
use super::variant::VariantValue;
use super::version::{Version, VersionConstraint};
use crate::error::{SproutError, SproutResult};
use crate::utils::hash::hash_lines;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A dependency of a spec and the phases it is needed in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub spec: Arc<Spec>,
    pub types: DepTypes,
}

impl DependencyEdge {
    pub fn new(spec: Arc<Spec>, types: DepTypes) -> Self {
        Self { spec, types }
    }
}

/// A package request or a fully resolved package configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spec {
    /// Package name; empty for anonymous constraints such as `when` guards
    pub name: String,
    pub versions: VersionConstraint,
    pub variants: BTreeMap<String, VariantValue>,
    pub compiler: Option<CompilerSpec>,
    pub arch: ArchSpec,
    /// Direct dependencies, sorted by name
    pub dependencies: Vec<DependencyEdge>,
    hash: Option<SpecHash>,
}

impl Spec {
    /// Abstract spec constraining nothing but the name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: VersionConstraint::any(),
            variants: BTreeMap::new(),
            compiler: None,
            arch: ArchSpec::default(),
            dependencies: Vec::new(),
            hash: None,
        }
    }

    /// Spec with no name, used for conditions
    pub fn anonymous() -> Self {
        Self::new("")
    }

    /// Build a concrete spec, checking that every attribute is pinned.
    pub fn concrete(
        name: impl Into<String>,
        version: Version,
        variants: BTreeMap<String, VariantValue>,
        compiler: CompilerSpec,
        arch: ArchSpec,
        mut dependencies: Vec<DependencyEdge>,
    ) -> SproutResult<Arc<Spec>> {
        let name = name.into();
        if name.is_empty() {
            return Err(SproutError::unsatisfiable("<anonymous>", "a concrete spec needs a name"));
        }
        if !compiler.is_concrete() {
            return Err(SproutError::unsatisfiable(
                &name,
                format!("compiler {} is not concrete", compiler),
            ));
        }
        if !arch.is_concrete() {
            return Err(SproutError::unsatisfiable(
                &name,
                format!("architecture '{}' is not fully specified", arch),
            ));
        }
        dependencies.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        for pair in dependencies.windows(2) {
            if pair[0].spec.name == pair[1].spec.name {
                return Err(SproutError::unsatisfiable(
                    &name,
                    format!("two dependency edges to '{}'", pair[0].spec.name),
                ));
            }
        }
        if let Some(edge) = dependencies.iter().find(|e| !e.spec.is_concrete()) {
            return Err(SproutError::unsatisfiable(
                &name,
                format!("dependency '{}' is not concrete", edge.spec.name),
            ));
        }

        let mut spec = Spec {
            name,
            versions: VersionConstraint::exact(version),
            variants,
            compiler: Some(compiler),
            arch,
            dependencies,
            hash: None,
        };
        spec.hash = Some(hash_lines(&spec.canonical_lines()));
        Ok(Arc::new(spec))
    }

    /// Lines feeding the identity hash. The compiler path and dependency
    /// types do not participate.
    fn canonical_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("name={}", self.name),
            format!("version={}", self.versions.canonical()),
        ];
        for (name, value) in &self.variants {
            lines.push(format!("variant={}", value.render(name)));
        }
        if let Some(compiler) = &self.compiler {
            lines.push(format!("compiler={}@{}", compiler.name, compiler.versions.canonical()));
        }
        lines.push(self.arch.to_string());
        for edge in &self.dependencies {
            if let Some(hash) = edge.spec.hash {
                lines.push(format!("dep={}:{}", edge.spec.name, hash));
            }
        }
        lines
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }

    pub fn is_concrete(&self) -> bool {
        self.hash.is_some()
    }

    /// Identity hash; present only on concrete specs
    pub fn hash(&self) -> Option<SpecHash> {
        self.hash
    }

    /// The pinned version, if any
    pub fn version(&self) -> Option<&Version> {
        self.versions.concrete()
    }

    pub fn with_versions(mut self, versions: VersionConstraint) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_variant(mut self, name: impl Into<String>, value: VariantValue) -> Self {
        self.variants.insert(name.into(), value);
        self
    }

    pub fn with_compiler(mut self, compiler: CompilerSpec) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn with_arch(mut self, arch: ArchSpec) -> Self {
        self.arch = arch;
        self
    }

    /// Add a dependency constraint, merging with an existing edge of the same name
    pub fn with_dependency(mut self, dep: Spec, types: DepTypes) -> SproutResult<Self> {
        match self.dependencies.iter_mut().find(|e| e.spec.name == dep.name) {
            Some(edge) => {
                edge.spec = Arc::new(edge.spec.intersect(&dep)?);
                edge.types = edge.types.union(&types);
            },
            None => {
                self.dependencies.push(DependencyEdge::new(Arc::new(dep), types));
                self.dependencies.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
            },
        }
        Ok(self)
    }

    /// Direct dependency named `name`
    pub fn dependency(&self, name: &str) -> Option<&Arc<Spec>> {
        self.dependencies
            .iter()
            .find(|e| e.spec.name == name)
            .map(|e| &e.spec)
    }

    /// Merge two constraint sets on the same package.
    ///
    /// A concrete side is returned unchanged when it already satisfies the
    /// other side and is an error otherwise.
    pub fn intersect(&self, other: &Spec) -> SproutResult<Spec> {
        let package = if self.name.is_empty() { &other.name } else { &self.name };
        let conflict = |field: &str, left: String, right: String| SproutError::Conflict {
            package: package.to_string(),
            field: field.to_string(),
            left,
            right,
        };

        if self.is_concrete() || other.is_concrete() {
            let (concrete, constraint) = if self.is_concrete() { (self, other) } else { (other, self) };
            return if concrete.satisfies(constraint) {
                Ok(concrete.clone())
            } else {
                Err(conflict("spec", concrete.to_string(), constraint.to_string()))
            };
        }

        if !self.name.is_empty() && !other.name.is_empty() && self.name != other.name {
            return Err(conflict("name", self.name.clone(), other.name.clone()));
        }

        let versions = self
            .versions
            .intersect(&other.versions)
            .ok_or_else(|| conflict("version", self.versions.to_string(), other.versions.to_string()))?;

        let mut variants = self.variants.clone();
        for (name, value) in &other.variants {
            let merged = match variants.get(name) {
                Some(existing) => existing.intersect(value, package, name)?,
                None => value.clone(),
            };
            variants.insert(name.clone(), merged);
        }

        let compiler = match (&self.compiler, &other.compiler) {
            (Some(a), Some(b)) => Some(a.intersect(b, package)?),
            (a, b) => a.clone().or_else(|| b.clone()),
        };

        let arch = self.arch.intersect(&other.arch, package)?;

        let mut merged = Spec {
            name: package.clone(),
            versions,
            variants,
            compiler,
            arch,
            dependencies: self.dependencies.clone(),
            hash: None,
        };
        for edge in &other.dependencies {
            merged = merged.with_dependency((*edge.spec).clone(), edge.types.clone())?;
        }
        Ok(merged)
    }

    /// Check if this node alone meets the constraints of `other`'s node
    pub fn satisfies_node(&self, other: &Spec) -> bool {
        (other.name.is_empty() || self.name == other.name)
            && self.versions.satisfies(&other.versions)
            && other.variants.iter().all(|(name, wanted)| {
                self.variants
                    .get(name)
                    .map_or(false, |mine| mine.satisfies(wanted))
            })
            && other.compiler.as_ref().map_or(true, |wanted| {
                self.compiler
                    .as_ref()
                    .map_or(false, |mine| mine.satisfies(wanted))
            })
            && self.arch.satisfies(&other.arch)
    }

    /// Check if this spec, including its dependency graph, meets `other`.
    ///
    /// Each dependency constraint in `other` must be met by some node of
    /// the same name anywhere below `self`.
    pub fn satisfies(&self, other: &Spec) -> bool {
        if !self.satisfies_node(other) {
            return false;
        }
        let mine = self.traverse();
        other.traverse().into_iter().skip(1).all(|wanted| {
            mine.iter()
                .skip(1)
                .any(|node| node.name == wanted.name && node.satisfies_node(wanted))
        })
    }

    /// All nodes reachable from this spec, root first, each once
    pub fn traverse(&self) -> Vec<&Spec> {
        fn visit<'a>(spec: &'a Spec, seen: &mut HashSet<(String, Option<SpecHash>)>, out: &mut Vec<&'a Spec>) {
            if !seen.insert((spec.name.clone(), spec.hash)) {
                return;
            }
            out.push(spec);
            for edge in &spec.dependencies {
                visit(&edge.spec, seen, out);
            }
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        visit(self, &mut seen, &mut out);
        out
    }

    /// First node named `name` in traversal order
    pub fn find(&self, name: &str) -> Option<&Spec> {
        self.traverse().into_iter().find(|s| s.name == name)
    }

    /// This node's attributes in spec syntax, without dependencies
    pub fn node_string(&self) -> String {
        let mut out = self.name.clone();
        if !self.versions.is_any() {
            out.push('@');
            out.push_str(&self.versions.to_string());
        }
        if let Some(compiler) = &self.compiler {
            out.push_str(&compiler.to_string());
        }
        let mut valued = Vec::new();
        for (name, value) in &self.variants {
            match value {
                VariantValue::Bool(_) => out.push_str(&value.render(name)),
                VariantValue::Values(_) => valued.push(value.render(name)),
            }
        }
        for part in valued {
            out.push(' ');
            out.push_str(&part);
        }
        if !self.arch.is_empty() {
            out.push(' ');
            out.push_str(&self.arch.to_string());
        }
        out.trim_start().to_string()
    }

    /// Indented dependency tree with abbreviated hashes
    pub fn tree(&self) -> String {
        fn render(spec: &Spec, depth: usize, out: &mut String) {
            let hash = spec
                .hash
                .map(|h| h.short())
                .unwrap_or_else(|| " ".repeat(SHORT_HASH_LEN));
            let prefix = if depth == 0 { String::new() } else { format!("{}^", "    ".repeat(depth)) };
            out.push_str(&format!("{}  {}{}\n", hash, prefix, spec.node_string()));
            for edge in &spec.dependencies {
                render(&edge.spec, depth + 1, out);
            }
        }

        let mut out = String::new();
        render(self, 0, &mut out);
        out
    }

    /// Flatten a concrete spec into records suitable for storage
    pub fn to_nodes(&self) -> SproutResult<Vec<SpecNode>> {
        self.traverse()
            .into_iter()
            .map(|spec| {
                let not_concrete = || SproutError::unsatisfiable(&spec.name, "only concrete specs can be stored");
                let hash = spec.hash.ok_or_else(not_concrete)?;
                let version = spec.version().cloned().ok_or_else(not_concrete)?;
                let compiler = spec.compiler.clone().ok_or_else(not_concrete)?;
                Ok(SpecNode {
                    name: spec.name.clone(),
                    version,
                    variants: spec.variants.clone(),
                    compiler,
                    arch: spec.arch.clone(),
                    dependencies: spec
                        .dependencies
                        .iter()
                        .filter_map(|e| {
                            e.spec.hash.map(|hash| NodeRef {
                                name: e.spec.name.clone(),
                                hash,
                                types: e.types.clone(),
                            })
                        })
                        .collect(),
                    hash,
                })
            })
            .collect()
    }

    /// Rebuild a concrete spec from stored records, root first.
    ///
    /// Every recomputed hash must match the stored one.
    pub fn from_nodes(nodes: &[SpecNode]) -> SproutResult<Arc<Spec>> {
        fn build(
            node: &SpecNode,
            by_hash: &HashMap<SpecHash, &SpecNode>,
            built: &mut HashMap<SpecHash, Arc<Spec>>,
        ) -> SproutResult<Arc<Spec>> {
            if let Some(spec) = built.get(&node.hash) {
                return Ok(spec.clone());
            }
            let mut edges = Vec::with_capacity(node.dependencies.len());
            for dep in &node.dependencies {
                let child = by_hash.get(&dep.hash).ok_or_else(|| {
                    SproutError::database(format!("{} refers to missing node {}", node.name, dep.hash))
                })?;
                edges.push(DependencyEdge::new(build(child, by_hash, built)?, dep.types.clone()));
            }
            let spec = Spec::concrete(
                node.name.clone(),
                node.version.clone(),
                node.variants.clone(),
                node.compiler.clone(),
                node.arch.clone(),
                edges,
            )?;
            if spec.hash != Some(node.hash) {
                return Err(SproutError::database(format!(
                    "stored hash {} does not match recomputed hash for {}",
                    node.hash, node.name
                )));
            }
            built.insert(node.hash, spec.clone());
            Ok(spec)
        }

        let root = nodes
            .first()
            .ok_or_else(|| SproutError::database("empty spec record"))?;
        let by_hash: HashMap<SpecHash, &SpecNode> = nodes.iter().map(|n| (n.hash, n)).collect();
        let mut built = HashMap::new();
        build(root, &by_hash, &mut built)
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.node_string())?;
        for dep in self.traverse().into_iter().skip(1) {
            write!(f, " ^{}", dep.node_string())?;
        }
        Ok(())
    }
}

/// Storage form of one concrete node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecNode {
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub variants: BTreeMap<String, VariantValue>,
    pub compiler: CompilerSpec,
    pub arch: ArchSpec,
    #[serde(default)]
    pub dependencies: Vec<NodeRef>,
    pub hash: SpecHash,
}

/// Reference from a stored node to one of its dependencies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub name: String,
    pub hash: SpecHash,
    pub types: DepTypes,
}
