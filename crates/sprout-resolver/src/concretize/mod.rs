//! Concretizer: abstract spec in, fully resolved spec DAG out
//!
//! Resolution runs in closure passes. Each pass walks the dependency
//! closure breadth-first from the requested roots, resolving every node from the
//! constraints its dependents contributed in the previous pass, and
//! records the constraints it contributes to its own dependencies. Passes
//! repeat until the contributions stop changing; the concrete DAG is then
//! built bottom-up from the stable resolution.

use dashmap::DashMap;
use indexmap::IndexMap;
use petgraph::graph::DiGraph;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

use crate::graph::{find_cycle, format_cycle, SpecDag};
use crate::version::VersionSelector;
use crate::ResolverResult;
use sprout_core::error::SproutError;
use sprout_core::types::{CompilerSpec, DepTypes, DependencyEdge, Spec, VariantValue, VersionConstraint};
use sprout_registry::{PackageDefinition, RepositoryContext, SharingPolicy};

/// Upper bound on closure passes before giving up
pub const MAX_PASSES: usize = 64;

/// One concrete node slot: a package name plus an instance number.
/// Instance 0 is the only one under the single-instance policy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct NodeKey {
    name: String,
    instance: usize,
}

impl NodeKey {
    fn new(name: &str, instance: usize) -> Self {
        Self {
            name: name.to_string(),
            instance,
        }
    }
}

/// Constraint one dependent places on one of its dependencies
type Contributions = BTreeMap<(NodeKey, String), (Spec, DepTypes)>;

/// A node resolved within one pass
#[derive(Debug, Clone)]
struct Tentative {
    /// Merged constraint the node was resolved from
    constraint: Spec,
    /// Pinned attributes, no dependencies
    resolved: Spec,
    /// Chosen compiler, including its path
    compiler: CompilerSpec,
}

/// Outcome of one closure pass
#[derive(Debug, Default)]
struct Pass {
    nodes: HashMap<NodeKey, Tentative>,
    /// Edges per dependent, in declaration order
    edges: IndexMap<NodeKey, Vec<(NodeKey, DepTypes)>>,
    contributions: Contributions,
}

/// Roots of one resolution with their merged constraints
#[derive(Debug)]
struct Request {
    /// Node slot of each requested root, in request order
    roots: Vec<NodeKey>,
    constraints: BTreeMap<NodeKey, Spec>,
    /// `^dep` constraints from every request, merged per name
    user_deps: BTreeMap<String, Spec>,
}

/// Resolves abstract specs against one session's repository context
pub struct Concretizer<'a> {
    ctx: &'a RepositoryContext,
    /// Concrete nodes by merged constraint, inherited attributes and
    /// dependency hashes
    memo: DashMap<String, Arc<Spec>>,
}

impl<'a> Concretizer<'a> {
    pub fn new(ctx: &'a RepositoryContext) -> Self {
        Self {
            ctx,
            memo: DashMap::new(),
        }
    }

    /// Number of memoized concrete nodes
    pub fn memo_size(&self) -> usize {
        self.memo.len()
    }

    /// Resolve `spec` into a concrete spec.
    ///
    /// A spec that is already concrete is validated against the current
    /// repository state and returned unchanged when still valid.
    pub fn concretize(&self, spec: &Spec) -> ResolverResult<Arc<Spec>> {
        if spec.is_concrete() {
            if self.is_still_valid(spec) {
                debug!(package = %spec.name, "Concrete spec still valid");
                return Ok(Arc::new(spec.clone()));
            }
            info!(package = %spec.name, "Concrete spec no longer valid; re-resolving");
            return self.resolve_one(&root_attributes(spec));
        }
        self.resolve_one(spec)
    }

    /// Resolve independent requests; one failing request leaves the others
    /// untouched
    pub fn concretize_all(&self, specs: &[Spec]) -> Vec<ResolverResult<Arc<Spec>>> {
        specs.par_iter().map(|spec| self.concretize(spec)).collect()
    }

    /// Resolve requests together into one DAG.
    ///
    /// All roots share one closure, so under the single-instance policy a
    /// dependency reached from several roots gets one merged constraint and
    /// one node. Concrete requests that are still valid keep their pinned
    /// configuration.
    pub fn concretize_dag(&self, specs: &[Spec]) -> ResolverResult<SpecDag> {
        let requests: Vec<Spec> = specs
            .iter()
            .map(|spec| match spec.is_concrete() {
                true if self.is_still_valid(spec) => pinned_request(spec),
                true => root_attributes(spec),
                false => spec.clone(),
            })
            .collect();
        let roots = self.resolve(&requests)?;
        SpecDag::from_roots(&roots, self.ctx.policy().sharing)
    }

    fn resolve_one(&self, request: &Spec) -> ResolverResult<Arc<Spec>> {
        self.resolve(std::slice::from_ref(request))?
            .pop()
            .ok_or_else(|| SproutError::unsatisfiable(&request.name, "resolution produced no root"))
    }

    /// Resolve every request in one closure; roots come back in request order
    fn resolve(&self, requests: &[Spec]) -> ResolverResult<Vec<Arc<Spec>>> {
        let request = self.seed(requests)?;
        let label = requests.iter().map(|r| r.name.as_str()).collect::<Vec<_>>().join(",");

        let mut previous = Contributions::new();
        let mut stable = None;
        for pass_number in 1..=MAX_PASSES {
            let pass = self.closure_pass(&request, &previous)?;
            debug!(
                packages = %label,
                pass = pass_number,
                nodes = pass.nodes.len(),
                "Closure pass finished"
            );
            if pass.contributions == previous {
                stable = Some(pass);
                break;
            }
            previous = pass.contributions;
        }
        let pass = stable.ok_or_else(|| {
            SproutError::unsatisfiable(&label, format!("constraints did not settle after {} passes", MAX_PASSES))
        })?;

        for spec in requests {
            for edge in &spec.dependencies {
                let name = &edge.spec.name;
                if !pass.nodes.keys().any(|k| &k.name == name) {
                    return Err(SproutError::unsatisfiable(
                        &spec.name,
                        format!("^{} is not a dependency of {}", name, spec.name),
                    ));
                }
            }
        }

        let mut built = HashMap::new();
        let mut roots = Vec::with_capacity(requests.len());
        for (key, spec) in request.roots.iter().zip(requests) {
            let root = self.build(key, &pass, &mut built)?;
            self.verify(&pass, &built, spec, &root)?;
            info!(
                package = %root.name,
                hash = %root.hash().map(|h| h.short()).unwrap_or_default(),
                nodes = built.len(),
                "Concretized"
            );
            roots.push(root);
        }
        Ok(roots)
    }

    /// Root slots and `^dep` constraints of one resolution
    fn seed(&self, requests: &[Spec]) -> ResolverResult<Request> {
        let mut user_deps: BTreeMap<String, Spec> = BTreeMap::new();
        for spec in requests {
            if spec.is_anonymous() {
                return Err(SproutError::unsatisfiable("<anonymous>", "cannot concretize a spec without a name"));
            }
            for edge in &spec.dependencies {
                let constraint = node_only(&edge.spec);
                let merged = match user_deps.get(&edge.spec.name) {
                    Some(existing) => existing
                        .intersect(&constraint)
                        .map_err(|e| unsatisfiable_edge(&spec.name, &edge.spec.name, e))?,
                    None => constraint,
                };
                user_deps.insert(edge.spec.name.clone(), merged);
            }
        }

        let mut request = Request {
            roots: Vec::with_capacity(requests.len()),
            constraints: BTreeMap::new(),
            user_deps,
        };
        for spec in requests {
            let constraint = node_only(spec)
                .intersect(&base_constraint(&spec.name, &request.user_deps))
                .map_err(|e| SproutError::unsatisfiable(&spec.name, e.to_string()))?;
            let mut instance = 0;
            let key = loop {
                let key = NodeKey::new(&spec.name, instance);
                let merged = match request.constraints.get(&key) {
                    None => Ok(constraint.clone()),
                    Some(existing) => existing.intersect(&constraint),
                };
                match (merged, self.ctx.policy().sharing) {
                    (Ok(merged), _) => {
                        request.constraints.insert(key.clone(), merged);
                        break key;
                    },
                    (Err(e), SharingPolicy::Single) => {
                        return Err(SproutError::unsatisfiable(
                            &spec.name,
                            format!("requested more than once with conflicting constraints: {}", e),
                        ));
                    },
                    (Err(_), SharingPolicy::Duplicates) => instance += 1,
                }
            };
            request.roots.push(key);
        }
        Ok(request)
    }

    /// One breadth-first walk of the closure
    fn closure_pass(&self, request: &Request, previous: &Contributions) -> ResolverResult<Pass> {
        let (constraints, assignment) = self.merge_contributions(request, previous)?;

        let mut pass = Pass::default();
        let mut queue: VecDeque<(NodeKey, Option<NodeKey>)> =
            request.roots.iter().map(|key| (key.clone(), None)).collect();

        while let Some((key, parent)) = queue.pop_front() {
            if pass.nodes.contains_key(&key) {
                continue;
            }

            let constraint = match constraints.get(&key) {
                Some(c) => c.clone(),
                None => base_constraint(&key.name, &request.user_deps),
            };
            let parent_node = parent.as_ref().and_then(|p| pass.nodes.get(p));
            let definition = self.ctx.package(&key.name)?;
            let tentative = self.resolve_node(definition.as_ref(), &constraint, parent_node)?;

            let mut children: Vec<(NodeKey, DepTypes)> = Vec::new();
            for decl in definition.dependencies(&tentative.resolved) {
                let child = decl.spec.name.clone();
                let child_key = assignment
                    .get(&(key.clone(), child.clone()))
                    .cloned()
                    .unwrap_or_else(|| NodeKey::new(&child, 0));

                let entry = pass.contributions.entry((key.clone(), child.clone()));
                let merged = match entry {
                    std::collections::btree_map::Entry::Occupied(mut slot) => {
                        let (existing, types) = slot.get().clone();
                        let merged = existing
                            .intersect(&node_only(&decl.spec))
                            .map_err(|e| unsatisfiable_edge(&key.name, &child, e))?;
                        let types = types.union(&decl.types);
                        slot.insert((merged, types.clone()));
                        types
                    },
                    std::collections::btree_map::Entry::Vacant(slot) => {
                        slot.insert((node_only(&decl.spec), decl.types.clone()));
                        decl.types.clone()
                    },
                };

                match children.iter_mut().find(|(k, _)| k.name == child) {
                    Some((_, types)) => *types = merged,
                    None => children.push((child_key.clone(), merged)),
                }
                queue.push_back((child_key, Some(key.clone())));
            }

            pass.edges.insert(key.clone(), children);
            pass.nodes.insert(key, tentative);
        }

        check_cycles(&pass)?;
        Ok(pass)
    }

    /// Fold the previous pass's contributions into one constraint per node,
    /// assigning each (dependent, dependency) pair to an instance
    fn merge_contributions(
        &self,
        request: &Request,
        previous: &Contributions,
    ) -> ResolverResult<(BTreeMap<NodeKey, Spec>, BTreeMap<(NodeKey, String), NodeKey>)> {
        let user_deps = &request.user_deps;
        let mut constraints = request.constraints.clone();

        let mut assignment = BTreeMap::new();
        for ((parent, child), (constraint, _)) in previous {
            let key = match self.ctx.policy().sharing {
                SharingPolicy::Single => {
                    let key = NodeKey::new(child, 0);
                    let current = constraints
                        .get(&key)
                        .cloned()
                        .unwrap_or_else(|| base_constraint(child, user_deps));
                    let merged = current
                        .intersect(constraint)
                        .map_err(|e| unsatisfiable_edge(&parent.name, child, e))?;
                    constraints.insert(key.clone(), merged);
                    key
                },
                SharingPolicy::Duplicates => {
                    let mut instance = 0;
                    loop {
                        let key = NodeKey::new(child, instance);
                        let current = constraints
                            .get(&key)
                            .cloned()
                            .unwrap_or_else(|| base_constraint(child, user_deps));
                        match current.intersect(constraint) {
                            Ok(merged) => {
                                if instance > 0 {
                                    debug!(package = %child, instance, dependent = %parent.name, "Using separate instance");
                                }
                                constraints.insert(key.clone(), merged);
                                break key;
                            },
                            Err(e) if !constraints.contains_key(&key) => {
                                return Err(unsatisfiable_edge(&parent.name, child, e));
                            },
                            Err(_) => instance += 1,
                        }
                    }
                },
            };
            assignment.insert((parent.clone(), child.clone()), key);
        }
        Ok((constraints, assignment))
    }

    /// Pick version, variants, compiler and architecture for one node
    fn resolve_node(
        &self,
        definition: &dyn PackageDefinition,
        constraint: &Spec,
        parent: Option<&Tentative>,
    ) -> ResolverResult<Tentative> {
        let name = definition.name();

        let selector = VersionSelector::for_package(definition);
        let version = selector.select_best(&constraint.versions).ok_or_else(|| {
            SproutError::unsatisfiable(
                name,
                format!(
                    "no known version satisfies @{} (known: {})",
                    constraint.versions,
                    selector.describe()
                ),
            )
        })?;

        for (variant, value) in &constraint.variants {
            match definition.variant(variant) {
                Some(declared) => declared.validate(name, value)?,
                None => {
                    return Err(SproutError::InvalidVariant {
                        package: name.to_string(),
                        variant: variant.clone(),
                        reason: "not declared by the package".to_string(),
                    })
                },
            }
        }
        let variants: BTreeMap<String, VariantValue> = definition
            .variants()
            .iter()
            .map(|declared| {
                let value = constraint
                    .variants
                    .get(&declared.name)
                    .cloned()
                    .unwrap_or_else(|| declared.default.clone());
                (declared.name.clone(), value)
            })
            .collect();

        let compiler = match (&constraint.compiler, parent) {
            (Some(request), _) => self.ctx.select_compiler(Some(request), name)?,
            (None, Some(parent)) => parent.compiler.clone(),
            (None, None) => self.ctx.select_compiler(None, name)?,
        };

        let inherited = parent.map(|p| p.resolved.arch.clone()).unwrap_or_default();
        let arch = constraint.arch.or(&inherited).or(self.ctx.default_arch());
        if !arch.is_concrete() {
            return Err(SproutError::unsatisfiable(
                name,
                format!("architecture '{}' is not fully specified", arch),
            ));
        }

        let mut resolved = Spec::new(name)
            .with_versions(VersionConstraint::exact(version))
            .with_compiler(CompilerSpec {
                path: None,
                ..compiler.clone()
            })
            .with_arch(arch);
        resolved.variants = variants;

        Ok(Tentative {
            constraint: constraint.clone(),
            resolved,
            compiler,
        })
    }

    /// Build concrete nodes bottom-up, reusing memoized nodes
    fn build(
        &self,
        key: &NodeKey,
        pass: &Pass,
        built: &mut HashMap<NodeKey, Arc<Spec>>,
    ) -> ResolverResult<Arc<Spec>> {
        if let Some(spec) = built.get(key) {
            return Ok(spec.clone());
        }
        let node = pass
            .nodes
            .get(key)
            .ok_or_else(|| SproutError::unsatisfiable(&key.name, "node missing from resolution"))?;

        let mut edges = Vec::new();
        if let Some(children) = pass.edges.get(key) {
            for (child_key, types) in children {
                let child = self.build(child_key, pass, built)?;
                edges.push(DependencyEdge::new(child, types.clone()));
            }
        }

        let mut dep_hashes: Vec<String> = edges
            .iter()
            .filter_map(|e| e.spec.hash().map(|h| format!("{}:{}", e.spec.name, h)))
            .collect();
        dep_hashes.sort();
        let memo_key = format!(
            "{}|{}|{}|{}",
            node.constraint,
            node.compiler,
            node.resolved.arch,
            dep_hashes.join(",")
        );

        let cached = self.memo.get(&memo_key).map(|hit| hit.clone());
        let spec = match cached {
            Some(hit) => hit,
            None => {
                let version = node
                    .resolved
                    .version()
                    .cloned()
                    .ok_or_else(|| SproutError::unsatisfiable(&key.name, "version was not pinned"))?;
                let spec = Spec::concrete(
                    key.name.clone(),
                    version,
                    node.resolved.variants.clone(),
                    node.compiler.clone(),
                    node.resolved.arch.clone(),
                    edges,
                )?;
                self.memo.insert(memo_key, spec.clone());
                spec
            },
        };

        built.insert(key.clone(), spec.clone());
        Ok(spec)
    }

    /// Every concrete node satisfies every constraint pointing into it, and
    /// the root satisfies the request
    fn verify(
        &self,
        pass: &Pass,
        built: &HashMap<NodeKey, Arc<Spec>>,
        request: &Spec,
        root: &Arc<Spec>,
    ) -> ResolverResult<()> {
        for (parent, children) in &pass.edges {
            for (child_key, _) in children {
                let Some((constraint, _)) = pass.contributions.get(&(parent.clone(), child_key.name.clone())) else {
                    continue;
                };
                let Some(child) = built.get(child_key) else {
                    continue;
                };
                if !child.satisfies(constraint) {
                    return Err(SproutError::unsatisfiable(
                        &child.name,
                        format!(
                            "resolved as {} but {} requires {}",
                            child.node_string(),
                            parent.name,
                            constraint
                        ),
                    ));
                }
            }
        }

        if !root.satisfies(request) {
            return Err(SproutError::unsatisfiable(
                &request.name,
                format!("resolved spec {} does not satisfy request {}", root, request),
            ));
        }
        Ok(())
    }

    /// Check a concrete spec against the current repository and platform
    fn is_still_valid(&self, spec: &Spec) -> bool {
        let nodes = spec.traverse();

        if self.ctx.policy().sharing == SharingPolicy::Single {
            let mut names = HashSet::new();
            if !nodes.iter().all(|n| names.insert(n.name.as_str())) {
                return false;
            }
        }

        nodes.iter().all(|node| {
            let Ok(definition) = self.ctx.package(&node.name) else {
                return false;
            };
            let version_known = node
                .version()
                .map_or(false, |v| definition.versions().contains(v));

            let variants_ok = node.variants.len() == definition.variants().len()
                && definition.variants().iter().all(|declared| {
                    node.variants
                        .get(&declared.name)
                        .map_or(false, |value| declared.validate(&node.name, value).is_ok())
                });

            let compiler_ok = node.compiler.as_ref().map_or(false, |compiler| {
                self.ctx
                    .compilers()
                    .iter()
                    .any(|c| c.name == compiler.name && c.versions == compiler.versions)
            });

            let applicable = definition.dependencies(node);
            let deps_ok = applicable.len() == node.dependencies.len()
                && applicable.iter().all(|decl| {
                    node.dependency(&decl.spec.name)
                        .map_or(false, |child| child.satisfies(&decl.spec))
                });

            version_known && variants_ok && compiler_ok && node.arch.is_concrete() && deps_ok
        })
    }
}

/// Resolve one request in a fresh session
pub fn concretize(spec: &Spec, ctx: &RepositoryContext) -> ResolverResult<Arc<Spec>> {
    Concretizer::new(ctx).concretize(spec)
}

/// Copy of `spec` without its dependency constraints
fn node_only(spec: &Spec) -> Spec {
    let mut node = Spec::new(spec.name.clone())
        .with_versions(spec.versions.clone())
        .with_arch(spec.arch.clone());
    node.variants = spec.variants.clone();
    node.compiler = spec.compiler.clone();
    node
}

/// Abstract request carrying a concrete spec's own attributes
fn root_attributes(spec: &Spec) -> Spec {
    let mut request = node_only(spec);
    if let Some(compiler) = &mut request.compiler {
        compiler.path = None;
    }
    request
}

/// Request that keeps a concrete spec's whole configuration, every
/// single-instance dependency pinned through a `^dep` constraint
fn pinned_request(spec: &Spec) -> Spec {
    let nodes = spec.traverse();
    let mut request = root_attributes(spec);
    for node in nodes.iter().filter(|n| n.name != spec.name) {
        if nodes.iter().filter(|other| other.name == node.name).count() == 1 {
            request
                .dependencies
                .push(DependencyEdge::new(Arc::new(root_attributes(node)), DepTypes::default()));
        }
    }
    request
}

/// Constraint every instance of `name` starts from
fn base_constraint(name: &str, user_deps: &BTreeMap<String, Spec>) -> Spec {
    user_deps
        .get(name)
        .cloned()
        .unwrap_or_else(|| Spec::new(name))
}

fn unsatisfiable_edge(parent: &str, child: &str, cause: SproutError) -> SproutError {
    SproutError::unsatisfiable(
        child,
        format!("constraint from {} cannot be merged: {}", parent, cause),
    )
}

/// Fail with the cycle path if the pass's edges contain a cycle
fn check_cycles(pass: &Pass) -> ResolverResult<()> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut index = HashMap::new();
    let label = |key: &NodeKey| {
        if key.instance == 0 {
            key.name.clone()
        } else {
            format!("{}#{}", key.name, key.instance)
        }
    };

    for key in pass.edges.keys() {
        index.insert(key.clone(), graph.add_node(label(key)));
    }
    for (parent, children) in &pass.edges {
        for (child, _) in children {
            if let (Some(from), Some(to)) = (index.get(parent), index.get(child)) {
                graph.add_edge(*from, *to, ());
            }
        }
    }

    match find_cycle(&graph) {
        Some(cycle) => Err(SproutError::CyclicDependency {
            cycle: format_cycle(&cycle),
        }),
        None => Ok(()),
    }
}
