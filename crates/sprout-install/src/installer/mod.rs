//! Parallel, lock-protected installation of a concrete spec DAG
//!
//! Nodes move `QUEUED -> LOCK_WAIT -> BUILDING -> INSTALLED | FAILED`;
//! dependents of a failed node become `SKIPPED`. A bounded set of tokio
//! tasks pulls from a ready queue of nodes whose dependencies are all
//! installed, and recipe bodies run on the blocking pool.

pub mod report;

use camino::Utf8PathBuf;
use dashmap::DashMap;
use parking_lot::Mutex;
use sprout_core::error::SproutError;
use sprout_core::types::{Spec, SpecHash};
use sprout_registry::{BuildContext, PackageRegistry};
use sprout_resolver::SpecDag;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::database::{InstallDatabase, InstallRecord};
use crate::layout::InstallLayout;
use crate::lock::HashLock;
use crate::InstallResult;

pub use report::{InstallReport, NodeReport, NodeState};

/// Knobs for one installer
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Give up waiting for a build lock after this long; `None` waits forever
    pub lock_timeout: Option<Duration>,
    pub lock_poll: Duration,
    /// Per-node build deadline
    pub build_timeout: Option<Duration>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            lock_timeout: None,
            lock_poll: Duration::from_millis(100),
            build_timeout: None,
        }
    }
}

/// Stops new nodes from starting; nodes already running finish
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One node of an install plan
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub hash: SpecHash,
    pub spec: Arc<Spec>,
    pub dependencies: Vec<SpecHash>,
    /// Already present in the database with a verified prefix
    pub installed: bool,
}

/// Nodes in dependency order
#[derive(Debug, Clone, Default)]
pub struct InstallPlan {
    pub steps: Vec<PlanStep>,
}

impl InstallPlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps that would trigger a build
    pub fn to_build(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| !s.installed)
    }
}

struct Shared {
    registry: Arc<PackageRegistry>,
    layout: InstallLayout,
    database: InstallDatabase,
    options: InstallOptions,
    cancel: CancelToken,
    /// Live state of nodes in the current run
    progress: DashMap<SpecHash, NodeState>,
    stale_locks: Mutex<Vec<String>>,
}

/// Result of one node task
struct NodeOutcome {
    state: NodeState,
    reused: bool,
    prefix: Option<Utf8PathBuf>,
    cause: Option<String>,
}

/// Installs concrete DAGs into one install root
#[derive(Clone)]
pub struct Installer {
    shared: Arc<Shared>,
}

impl Installer {
    pub fn new(registry: Arc<PackageRegistry>, layout: InstallLayout, options: InstallOptions) -> InstallResult<Self> {
        let database = InstallDatabase::open(layout.database_dir())?;
        Ok(Self {
            shared: Arc::new(Shared {
                registry,
                layout,
                database,
                options,
                cancel: CancelToken::new(),
                progress: DashMap::new(),
                stale_locks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn database(&self) -> &InstallDatabase {
        &self.shared.database
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.shared.layout
    }

    /// Handle that cancels runs of this installer
    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }

    /// Current state of a node in the running install
    pub fn node_state(&self, hash: &SpecHash) -> Option<NodeState> {
        self.shared.progress.get(hash).map(|s| *s)
    }

    /// Dependencies strictly before dependents
    pub fn plan(&self, dag: &SpecDag) -> InstallResult<InstallPlan> {
        let steps = dag
            .topological_order()?
            .into_iter()
            .filter_map(|hash| dag.get(&hash).map(|spec| (hash, spec)))
            .map(|(hash, spec)| PlanStep {
                hash,
                installed: self.shared.database.get_verified(&hash).is_some(),
                dependencies: dag.dependencies(&hash),
                spec,
            })
            .collect();
        Ok(InstallPlan { steps })
    }

    /// Install every node of `dag` with up to `max_parallel` concurrent builds
    pub async fn install(&self, dag: &SpecDag, max_parallel: usize) -> InstallResult<InstallReport> {
        self.shared.database.blocking(|db| db.refresh()).await?;
        self.shared.progress.clear();
        self.shared.stale_locks.lock().clear();

        let plan = self.plan(dag)?;
        let roots: HashSet<SpecHash> = dag.roots().iter().copied().collect();
        let max_parallel = max_parallel.max(1);
        info!(
            nodes = plan.len(),
            to_build = plan.to_build().count(),
            max_parallel,
            "Starting install"
        );

        let steps: HashMap<SpecHash, PlanStep> = plan.steps.iter().map(|s| (s.hash, s.clone())).collect();
        let mut pending: HashMap<SpecHash, usize> = HashMap::new();
        let mut ready = VecDeque::new();
        for step in &plan.steps {
            self.shared.progress.insert(step.hash, NodeState::Queued);
            pending.insert(step.hash, step.dependencies.len());
            if step.dependencies.is_empty() {
                ready.push_back(step.hash);
            }
        }

        let mut outcomes: HashMap<SpecHash, NodeOutcome> = HashMap::new();
        let mut tasks = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, SpecHash> = HashMap::new();

        loop {
            while tasks.len() < max_parallel && !self.shared.cancel.is_cancelled() {
                let Some(hash) = ready.pop_front() else {
                    break;
                };
                if outcomes.contains_key(&hash) {
                    continue;
                }
                let Some(step) = steps.get(&hash).cloned() else {
                    continue;
                };
                let shared = self.shared.clone();
                let explicit = roots.contains(&hash);
                let handle = tasks.spawn(async move { install_node(&shared, &step, explicit).await });
                running.insert(handle.id(), hash);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            let (hash, outcome) = match joined {
                Ok((id, outcome)) => match running.remove(&id) {
                    Some(hash) => (hash, outcome),
                    None => continue,
                },
                Err(e) => {
                    let Some(hash) = running.remove(&e.id()) else {
                        error!(error = %e, "Unknown install task aborted");
                        continue;
                    };
                    let cause = join_error_message(e);
                    let name = steps.get(&hash).map(|s| s.spec.name.as_str()).unwrap_or_default();
                    error!(package = %name, hash = %hash.short(), error = %cause, "Install task aborted");
                    (hash, NodeOutcome::failed(format!("install task aborted: {}", cause)))
                },
            };

            self.shared.progress.insert(hash, outcome.state);
            let state = outcome.state;
            outcomes.insert(hash, outcome);

            match state {
                NodeState::Installed => {
                    for dependent in dag.dependents(&hash) {
                        if let Some(count) = pending.get_mut(&dependent) {
                            *count = count.saturating_sub(1);
                            if *count == 0 && !outcomes.contains_key(&dependent) {
                                ready.push_back(dependent);
                            }
                        }
                    }
                },
                _ => {
                    let failed_name = steps.get(&hash).map(|s| s.spec.name.clone()).unwrap_or_default();
                    for dependent in dag.transitive_dependents(&hash) {
                        if outcomes.contains_key(&dependent) {
                            continue;
                        }
                        if let Some(step) = steps.get(&dependent) {
                            warn!(
                                package = %step.spec.name,
                                failed_dep = %failed_name,
                                "Skipping build due to failed dependency"
                            );
                        }
                        self.shared.progress.insert(dependent, NodeState::Skipped);
                        outcomes.insert(
                            dependent,
                            NodeOutcome::skipped(format!("dependency {} ({}) failed", failed_name, hash.short())),
                        );
                    }
                },
            }
        }

        let cancelled = self.shared.cancel.is_cancelled();
        let mut report = InstallReport {
            roots: dag.roots().to_vec(),
            cancelled,
            ..Default::default()
        };
        for step in &plan.steps {
            let outcome = outcomes.remove(&step.hash).unwrap_or_else(|| {
                NodeOutcome::skipped(if cancelled {
                    "cancelled".to_string()
                } else {
                    "never started".to_string()
                })
            });
            self.shared.progress.insert(step.hash, outcome.state);
            report.nodes.insert(
                step.hash,
                NodeReport {
                    hash: step.hash,
                    name: step.spec.name.clone(),
                    version: step.spec.version().map(|v| v.to_string()).unwrap_or_default(),
                    state: outcome.state,
                    reused: outcome.reused,
                    prefix: outcome.prefix,
                    cause: outcome.cause,
                },
            );
        }
        report.stale_locks = self.shared.stale_locks.lock().clone();

        info!(
            built = report.built_count(),
            reused = report.reused_count(),
            failed = report.failed().len(),
            skipped = report.skipped().len(),
            success = report.success(),
            "Install finished"
        );
        Ok(report)
    }

    /// Remove an installed node.
    ///
    /// Refuses while other installed records depend on it, unless `force`.
    pub async fn uninstall(&self, hash: &SpecHash, force: bool) -> InstallResult<InstallRecord> {
        let db = &self.shared.database;
        db.blocking(|db| db.refresh()).await?;
        let record = db
            .get(hash)
            .ok_or_else(|| SproutError::database(format!("no installed package with hash {}", hash.short())))?;

        let dependents = db.dependents(hash);
        if !dependents.is_empty() && !force {
            let names: Vec<String> = dependents
                .iter()
                .map(|r| format!("{}@{}/{}", r.name, r.version, r.hash.short()))
                .collect();
            return Err(SproutError::database(format!(
                "{} is still required by {}",
                record.name,
                names.join(", ")
            )));
        }

        let options = &self.shared.options;
        let _lock = HashLock::acquire(
            &self.shared.layout.lock_path(hash),
            hash,
            options.lock_timeout,
            options.lock_poll,
        )
        .await?;

        if record.prefix.exists() {
            fs::remove_dir_all(&record.prefix)
                .map_err(|e| SproutError::io(format!("Failed to remove {}", record.prefix), e))?;
        }
        let removed = *hash;
        db.blocking(move |db| db.remove(&removed)).await?;
        info!(package = %record.name, hash = %hash.short(), forced = force && !dependents.is_empty(), "Uninstalled");
        Ok(record)
    }
}

impl NodeOutcome {
    fn skipped(cause: String) -> Self {
        Self {
            state: NodeState::Skipped,
            reused: false,
            prefix: None,
            cause: Some(cause),
        }
    }

    fn failed(cause: String) -> Self {
        Self {
            state: NodeState::Failed,
            reused: false,
            prefix: None,
            cause: Some(cause),
        }
    }
}

/// Panic payload text of a task, or why it stopped otherwise
fn join_error_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    match payload.downcast_ref::<&str>() {
        Some(text) => format!("panicked: {}", text),
        None => match payload.downcast_ref::<String>() {
            Some(text) => format!("panicked: {}", text),
            None => "panicked".to_string(),
        },
    }
}

async fn install_node(shared: &Shared, step: &PlanStep, explicit: bool) -> NodeOutcome {
    match run_node(shared, step, explicit).await {
        Ok((prefix, reused)) => NodeOutcome {
            state: NodeState::Installed,
            reused,
            prefix: Some(prefix),
            cause: None,
        },
        Err(e) => {
            error!(package = %step.spec.name, hash = %step.hash.short(), error = %e, "Install failed");
            NodeOutcome::failed(e.to_string())
        },
    }
}

/// Reuse or build one node; returns its prefix and whether it was reused
async fn run_node(shared: &Shared, step: &PlanStep, explicit: bool) -> InstallResult<(Utf8PathBuf, bool)> {
    let spec = &step.spec;
    let hash = step.hash;
    let db = &shared.database;

    if let Some(record) = db.get_verified(&hash) {
        return reuse(db, record, explicit).await;
    }

    shared.progress.insert(hash, NodeState::LockWait);
    let options = &shared.options;
    let prefix = shared.layout.prefix_for(spec)?;
    let mut acquired = HashLock::acquire(
        &shared.layout.lock_path(&hash),
        &hash,
        options.lock_timeout,
        options.lock_poll,
    )
    .await?;

    if let Some(stale) = acquired.stale.take() {
        shared.stale_locks.lock().push(stale.to_string());
        if prefix.exists() {
            info!(package = %spec.name, prefix = %prefix, "Clearing partial prefix left by stale lock");
            fs::remove_dir_all(&prefix).map_err(|e| SproutError::io(format!("Failed to clear {}", prefix), e))?;
        }
    }

    // another process may have finished while we waited
    db.blocking(|db| db.refresh()).await?;
    if let Some(record) = db.get_verified(&hash) {
        debug!(package = %spec.name, "Installed by another process while waiting");
        return reuse(db, record, explicit).await;
    }

    shared.progress.insert(hash, NodeState::Building);
    if prefix.exists() {
        fs::remove_dir_all(&prefix).map_err(|e| SproutError::io(format!("Failed to clear {}", prefix), e))?;
    }
    fs::create_dir_all(&prefix).map_err(|e| SproutError::io(format!("Failed to create {}", prefix), e))?;

    if let Err(e) = build(shared, spec, &prefix).await {
        let _ = fs::remove_dir_all(&prefix);
        return Err(e);
    }

    write_spec_file(spec, &prefix)?;
    let record = InstallRecord::new(spec, prefix.clone(), explicit)?;
    db.blocking(move |db| db.add(record)).await?;
    info!(package = %spec.name, hash = %hash.short(), prefix = %prefix, "Installed");

    drop(acquired);
    Ok((prefix, false))
}

async fn reuse(db: &InstallDatabase, record: InstallRecord, explicit: bool) -> InstallResult<(Utf8PathBuf, bool)> {
    if explicit && !record.explicit {
        let hash = record.hash;
        db.blocking(move |db| db.mark_explicit(&hash)).await?;
    }
    debug!(package = %record.name, hash = %record.hash.short(), "Reusing installed package");
    Ok((record.prefix, true))
}

async fn build(shared: &Shared, spec: &Arc<Spec>, prefix: &Utf8PathBuf) -> InstallResult<()> {
    let recipe = shared.registry.get(&spec.name)?.recipe();
    let dependency_prefixes = spec
        .dependencies
        .iter()
        .map(|edge| Ok((edge.spec.name.clone(), shared.layout.prefix_for(&edge.spec)?)))
        .collect::<InstallResult<BTreeMap<_, _>>>()?;
    let limit = shared.options.build_timeout;
    let ctx = BuildContext {
        spec: spec.clone(),
        prefix: prefix.clone(),
        dependency_prefixes,
        deadline: limit.map(|limit| Instant::now() + limit),
    };

    info!(package = %spec.name, version = %spec.version().map(|v| v.to_string()).unwrap_or_default(), "Building");
    let failure_ctx = ctx.clone();
    let mut task = tokio::task::spawn_blocking(move || recipe.build(&ctx));

    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                // the caller clears the prefix and releases the lock, so the
                // recipe has to be done writing first
                warn!(package = %spec.name, "Build passed its deadline; waiting for the recipe to stop");
                let _ = task.await;
                return Err(failure_ctx.failure(format!("build exceeded its {}s deadline", limit.as_secs_f64())));
            },
        },
        None => task.await,
    };
    joined.map_err(|e| failure_ctx.failure(format!("build {}", join_error_message(e))))?
}

fn write_spec_file(spec: &Spec, prefix: &Utf8PathBuf) -> InstallResult<()> {
    let path = InstallLayout::spec_file(prefix);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SproutError::io("Failed to create metadata directory", e))?;
    }
    let json = serde_json::to_string_pretty(&spec.to_nodes()?)
        .map_err(|e| SproutError::database(format!("Failed to serialize {}: {}", spec.name, e)))?;
    fs::write(&path, json).map_err(|e| SproutError::io(format!("Failed to write {}", path), e))
}

#[cfg(test)]
mod tests;
