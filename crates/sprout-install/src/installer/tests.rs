use super::*;
use crate::lock::LockMetadata;
use chrono::Utc;
use sprout_core::parse_spec;
use sprout_core::types::{ArchSpec, CompilerSpec, VariantDefinition, Version};
use sprout_core::SproutResult;
use sprout_registry::{BuildRecipe, DependencyDecl, PackageDefinition, RecipePackage, RepositoryContext};
use sprout_resolver::Concretizer;
use std::sync::atomic::AtomicUsize;
use tempfile::TempDir;

/// Counts builds and records their order
#[derive(Debug, Default)]
struct CountingRecipe {
    builds: AtomicUsize,
    order: Mutex<Vec<String>>,
    delay: Duration,
}

impl CountingRecipe {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl BuildRecipe for CountingRecipe {
    fn build(&self, ctx: &BuildContext) -> SproutResult<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.order.lock().push(ctx.spec.name.clone());
        std::thread::sleep(self.delay);
        for (name, prefix) in &ctx.dependency_prefixes {
            if !prefix.join("built").exists() {
                return Err(ctx.failure(format!("dependency {} is not installed", name)));
            }
        }
        fs::write(ctx.prefix.join("built"), &ctx.spec.name)
            .map_err(|e| SproutError::io("Failed to write marker", e))
    }
}

#[derive(Debug)]
struct FailingRecipe;

impl BuildRecipe for FailingRecipe {
    fn build(&self, ctx: &BuildContext) -> SproutResult<()> {
        fs::write(ctx.prefix.join("partial"), "half").map_err(|e| SproutError::io("write", e))?;
        Err(ctx.failure("compiler exploded"))
    }
}

/// Sleeps past any deadline, then writes into its prefix
#[derive(Debug)]
struct LateRecipe {
    delay: Duration,
}

impl BuildRecipe for LateRecipe {
    fn build(&self, ctx: &BuildContext) -> SproutResult<()> {
        std::thread::sleep(self.delay);
        fs::create_dir_all(&ctx.prefix).map_err(|e| SproutError::io("mkdir", e))?;
        fs::write(ctx.prefix.join("late"), "written after the deadline").map_err(|e| SproutError::io("write", e))
    }
}

#[derive(Debug)]
struct PanickingRecipe;

impl BuildRecipe for PanickingRecipe {
    fn build(&self, _ctx: &BuildContext) -> SproutResult<()> {
        panic!("configure script segfaulted")
    }
}

/// Package whose recipe lookup blows up on the install task itself
#[derive(Debug)]
struct BrokenDefinition(RecipePackage);

impl PackageDefinition for BrokenDefinition {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn versions(&self) -> &[Version] {
        self.0.versions()
    }

    fn preferred_version(&self) -> Option<&Version> {
        self.0.preferred_version()
    }

    fn variants(&self) -> &[VariantDefinition] {
        self.0.variants()
    }

    fn declared_dependencies(&self) -> &[DependencyDecl] {
        self.0.declared_dependencies()
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.0.attribute(key)
    }

    fn recipe(&self) -> Arc<dyn BuildRecipe> {
        panic!("recipe table corrupted")
    }
}

struct Fixture {
    _temp: TempDir,
    root: Utf8PathBuf,
    ctx: RepositoryContext,
    recipe: Arc<CountingRecipe>,
}

/// r -> (x -> z), y; plus an unrelated `solo`
fn fixture(failing: &[&str], delay: Duration) -> Fixture {
    let recipe = Arc::new(CountingRecipe::with_delay(delay));

    let mut registry = PackageRegistry::new();
    for (name, deps) in [
        ("z", vec![]),
        ("x", vec!["z"]),
        ("y", vec![]),
        ("r", vec!["x", "y"]),
        ("solo", vec![]),
    ] {
        let handle: Arc<dyn BuildRecipe> = if failing.contains(&name) {
            Arc::new(FailingRecipe)
        } else {
            recipe.clone()
        };
        let mut builder = RecipePackage::builder(name).version("1.0").recipe(handle);
        for dep in deps {
            builder = builder.depends_on(dep);
        }
        registry.register(Arc::new(builder.build().unwrap()));
    }
    fixture_with(registry, recipe)
}

fn fixture_with(registry: PackageRegistry, recipe: Arc<CountingRecipe>) -> Fixture {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("opt")).unwrap();
    let ctx = RepositoryContext::new(
        registry,
        vec![CompilerSpec::concrete("gcc", Version::parse("12.2").unwrap(), None)],
        ArchSpec::new("linux", "test", "x86_64"),
    );
    Fixture {
        _temp: temp,
        root,
        ctx,
        recipe,
    }
}

impl Fixture {
    fn dag(&self, specs: &[&str]) -> SpecDag {
        let specs: Vec<Spec> = specs.iter().map(|s| parse_spec(s).unwrap()).collect();
        Concretizer::new(&self.ctx).concretize_dag(&specs).unwrap()
    }

    fn installer(&self, options: InstallOptions) -> Installer {
        Installer::new(
            self.ctx.shared_registry(),
            InstallLayout::new(&self.root).unwrap(),
            options,
        )
        .unwrap()
    }
}

fn fast_options() -> InstallOptions {
    InstallOptions {
        lock_poll: Duration::from_millis(10),
        ..Default::default()
    }
}

fn hash_of(dag: &SpecDag, name: &str) -> SpecHash {
    dag.nodes_named(name)[0].hash().unwrap()
}

#[tokio::test]
async fn test_installs_in_dependency_order() {
    let fx = fixture(&[], Duration::ZERO);
    let dag = fx.dag(&["r"]);
    let installer = fx.installer(fast_options());

    let report = installer.install(&dag, 4).await.unwrap();
    assert!(report.success(), "{:?}", report);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.built_count(), 4);
    assert_eq!(fx.recipe.count(), 4);

    let order = fx.recipe.order.lock().clone();
    let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(pos("z") < pos("x"));
    assert!(pos("x") < pos("r"));
    assert!(pos("y") < pos("r"));

    let r = hash_of(&dag, "r");
    let z = hash_of(&dag, "z");
    let record = installer.database().get(&r).unwrap();
    assert!(record.explicit);
    assert!(InstallLayout::spec_file(&record.prefix).is_file());
    assert!(!installer.database().get(&z).unwrap().explicit);
    assert_eq!(installer.database().get(&z).unwrap().ref_count, 1);
    assert_eq!(installer.node_state(&r), Some(NodeState::Installed));
}

#[tokio::test]
async fn test_spec_file_round_trips() {
    let fx = fixture(&[], Duration::ZERO);
    let dag = fx.dag(&["x"]);
    let installer = fx.installer(fast_options());
    installer.install(&dag, 1).await.unwrap();

    let x = &dag.nodes_named("x")[0];
    let record = installer.database().get(&x.hash().unwrap()).unwrap();
    let json = fs::read_to_string(InstallLayout::spec_file(&record.prefix)).unwrap();
    let nodes: Vec<sprout_core::SpecNode> = serde_json::from_str(&json).unwrap();
    let restored = Spec::from_nodes(&nodes).unwrap();
    assert_eq!(restored.hash(), x.hash());
}

#[tokio::test]
async fn test_partial_failure_isolated() {
    let fx = fixture(&["z"], Duration::ZERO);
    let dag = fx.dag(&["r"]);
    let installer = fx.installer(fast_options());

    let report = installer.install(&dag, 2).await.unwrap();
    assert_eq!(report.state(&hash_of(&dag, "z")), Some(NodeState::Failed));
    assert_eq!(report.state(&hash_of(&dag, "x")), Some(NodeState::Skipped));
    assert_eq!(report.state(&hash_of(&dag, "y")), Some(NodeState::Installed));
    assert_eq!(report.state(&hash_of(&dag, "r")), Some(NodeState::Skipped));
    assert!(!report.success());
    assert_ne!(report.exit_code(), 0);

    let z = report.node_named("z").unwrap();
    assert!(z.cause.as_ref().unwrap().contains("compiler exploded"));
    assert!(report.node_named("x").unwrap().cause.as_ref().unwrap().contains("dependency z"));

    // failed prefix cleared, nothing recorded for it
    let z_spec = &dag.nodes_named("z")[0];
    assert!(!installer.layout().prefix_for(z_spec).unwrap().exists());
    assert!(installer.database().get(&hash_of(&dag, "z")).is_none());
    assert_eq!(installer.database().len(), 1);
}

#[tokio::test]
async fn test_unrelated_roots_continue() {
    let fx = fixture(&["z"], Duration::ZERO);
    let dag = fx.dag(&["x", "solo"]);
    let report = fx.installer(fast_options()).install(&dag, 2).await.unwrap();

    assert_eq!(report.node_named("solo").unwrap().state, NodeState::Installed);
    assert_eq!(report.node_named("x").unwrap().state, NodeState::Skipped);
    assert!(!report.success());
    assert_eq!(report.failed().len(), 1);
    assert_eq!(report.skipped().len(), 1);
}

#[tokio::test]
async fn test_reuse_on_rerun() {
    let fx = fixture(&[], Duration::ZERO);
    let dag = fx.dag(&["r"]);
    let installer = fx.installer(fast_options());

    installer.install(&dag, 4).await.unwrap();
    let plan = installer.plan(&dag).unwrap();
    assert_eq!(plan.len(), 4);
    assert_eq!(plan.to_build().count(), 0);

    let again = fx.installer(fast_options()).install(&dag, 4).await.unwrap();
    assert!(again.success());
    assert_eq!(again.built_count(), 0);
    assert_eq!(again.reused_count(), 4);
    assert_eq!(fx.recipe.count(), 4);
}

#[tokio::test]
async fn test_missing_prefix_is_rebuilt() {
    let fx = fixture(&[], Duration::ZERO);
    let dag = fx.dag(&["y"]);
    let installer = fx.installer(fast_options());
    installer.install(&dag, 1).await.unwrap();

    let record = installer.database().get(&hash_of(&dag, "y")).unwrap();
    fs::remove_dir_all(&record.prefix).unwrap();

    let report = installer.install(&dag, 1).await.unwrap();
    assert!(report.success());
    assert_eq!(report.built_count(), 1);
    assert_eq!(fx.recipe.count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_installs_build_once() {
    let fx = fixture(&[], Duration::from_millis(150));
    let dag = fx.dag(&["r"]);
    let first = fx.installer(fast_options());
    let second = fx.installer(fast_options());

    let (a, b) = tokio::join!(first.install(&dag, 2), second.install(&dag, 2));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.success());
    assert!(b.success());
    assert_eq!(fx.recipe.count(), 4);
    assert_eq!(a.built_count() + b.built_count(), 4);
    assert_eq!(first.database().len(), 4);
}

#[tokio::test]
async fn test_stale_lock_recovered() {
    let fx = fixture(&[], Duration::ZERO);
    let dag = fx.dag(&["y"]);
    let installer = fx.installer(fast_options());
    let y = &dag.nodes_named("y")[0];
    let hash = y.hash().unwrap();

    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();
    let metadata = LockMetadata {
        pid: dead_pid,
        hash: hash.to_hex(),
        started_at: Utc::now(),
    };
    fs::write(installer.layout().lock_path(&hash), serde_json::to_string(&metadata).unwrap()).unwrap();
    let prefix = installer.layout().prefix_for(y).unwrap();
    fs::create_dir_all(&prefix).unwrap();
    fs::write(prefix.join("junk"), "left over").unwrap();

    let report = installer.install(&dag, 1).await.unwrap();
    assert!(report.success());
    assert_eq!(report.stale_locks.len(), 1);
    assert!(report.stale_locks[0].contains(&dead_pid.to_string()));
    assert!(!prefix.join("junk").exists());
    assert!(prefix.join("built").exists());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let fx = fixture(&[], Duration::ZERO);
    let dag = fx.dag(&["r"]);
    let installer = fx.installer(fast_options());
    installer.cancel_token().cancel();

    let report = installer.install(&dag, 4).await.unwrap();
    assert!(report.cancelled);
    assert!(!report.success());
    assert_eq!(report.skipped().len(), 4);
    assert_eq!(report.node_named("z").unwrap().cause.as_deref(), Some("cancelled"));
    assert_eq!(fx.recipe.count(), 0);
}

#[tokio::test]
async fn test_build_deadline() {
    let fx = fixture(&[], Duration::from_millis(300));
    let dag = fx.dag(&["solo"]);
    let installer = fx.installer(InstallOptions {
        build_timeout: Some(Duration::from_millis(50)),
        ..fast_options()
    });

    let report = installer.install(&dag, 1).await.unwrap();
    let solo = report.node_named("solo").unwrap();
    assert_eq!(solo.state, NodeState::Failed);
    assert!(solo.cause.as_ref().unwrap().contains("deadline"));
}

#[tokio::test]
async fn test_lock_wait_timeout() {
    let fx = fixture(&[], Duration::ZERO);
    let dag = fx.dag(&["solo"]);
    let installer = fx.installer(InstallOptions {
        lock_timeout: Some(Duration::from_millis(60)),
        ..fast_options()
    });
    let hash = hash_of(&dag, "solo");
    let _held = HashLock::try_acquire(&installer.layout().lock_path(&hash), &hash)
        .unwrap()
        .unwrap();

    let report = installer.install(&dag, 1).await.unwrap();
    let solo = report.node_named("solo").unwrap();
    assert_eq!(solo.state, NodeState::Failed);
    assert!(solo.cause.as_ref().unwrap().contains("Timed out"));
    assert_eq!(fx.recipe.count(), 0);
}

#[tokio::test]
async fn test_uninstall_respects_dependents() {
    let fx = fixture(&[], Duration::ZERO);
    let dag = fx.dag(&["r"]);
    let installer = fx.installer(fast_options());
    installer.install(&dag, 4).await.unwrap();

    let z = hash_of(&dag, "z");
    let x = hash_of(&dag, "x");
    let r = hash_of(&dag, "r");

    let err = installer.uninstall(&z, false).await.unwrap_err();
    assert!(err.to_string().contains("still required"));

    let removed = installer.uninstall(&r, false).await.unwrap();
    assert!(!removed.prefix.exists());
    assert!(installer.database().get(&r).is_none());
    assert_eq!(installer.database().get(&x).unwrap().ref_count, 0);

    let forced = installer.uninstall(&z, true).await.unwrap();
    assert_eq!(forced.name, "z");
    assert_eq!(installer.database().len(), 2);

    assert!(installer.uninstall(&z, false).await.is_err());
}

#[tokio::test]
async fn test_deadline_holds_node_until_recipe_returns() {
    let mut registry = PackageRegistry::new();
    let slow = RecipePackage::builder("slow")
        .version("1.0")
        .recipe(Arc::new(LateRecipe {
            delay: Duration::from_millis(300),
        }));
    registry.register(Arc::new(slow.build().unwrap()));
    let fx = fixture_with(registry, Arc::new(CountingRecipe::default()));
    let dag = fx.dag(&["slow"]);
    let hash = hash_of(&dag, "slow");
    let installer = fx.installer(InstallOptions {
        build_timeout: Some(Duration::from_millis(50)),
        ..fast_options()
    });
    let prefix = installer.layout().prefix_for(&dag.nodes_named("slow")[0]).unwrap();

    let started = Instant::now();
    let report = installer.install(&dag, 1).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(300));
    let node = report.node_named("slow").unwrap();
    assert_eq!(node.state, NodeState::Failed);
    assert!(node.cause.as_ref().unwrap().contains("deadline"));

    // the recipe finished before cleanup, so nothing reappears later
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!prefix.exists());
    assert!(installer.database().get(&hash).is_none());
    assert!(HashLock::try_acquire(&installer.layout().lock_path(&hash), &hash)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_panicking_recipe_fails_node() {
    let recipe = Arc::new(CountingRecipe::default());
    let mut registry = PackageRegistry::new();
    let z = RecipePackage::builder("z").version("1.0").recipe(Arc::new(PanickingRecipe));
    registry.register(Arc::new(z.build().unwrap()));
    let x = RecipePackage::builder("x").version("1.0").depends_on("z").recipe(recipe.clone());
    registry.register(Arc::new(x.build().unwrap()));
    let solo = RecipePackage::builder("solo").version("1.0").recipe(recipe.clone());
    registry.register(Arc::new(solo.build().unwrap()));
    let fx = fixture_with(registry, recipe);
    let dag = fx.dag(&["x", "solo"]);

    let report = fx.installer(fast_options()).install(&dag, 2).await.unwrap();
    let z = report.node_named("z").unwrap();
    assert_eq!(z.state, NodeState::Failed);
    assert!(z.cause.as_ref().unwrap().contains("configure script segfaulted"));
    let x = report.node_named("x").unwrap();
    assert_eq!(x.state, NodeState::Skipped);
    assert!(x.cause.as_ref().unwrap().contains("dependency z"));
    assert_eq!(report.node_named("solo").unwrap().state, NodeState::Installed);
}

#[tokio::test]
async fn test_aborted_task_recorded_as_failure() {
    let recipe = Arc::new(CountingRecipe::default());
    let mut registry = PackageRegistry::new();
    let z = RecipePackage::builder("z").version("1.0").recipe(recipe.clone());
    registry.register(Arc::new(BrokenDefinition(z.build().unwrap())));
    let x = RecipePackage::builder("x").version("1.0").depends_on("z").recipe(recipe.clone());
    registry.register(Arc::new(x.build().unwrap()));
    let fx = fixture_with(registry, recipe);
    let dag = fx.dag(&["x"]);

    let report = fx.installer(fast_options()).install(&dag, 1).await.unwrap();
    let z = report.node_named("z").unwrap();
    assert_eq!(z.state, NodeState::Failed);
    assert!(z.cause.as_ref().unwrap().contains("recipe table corrupted"));
    let x = report.node_named("x").unwrap();
    assert_eq!(x.state, NodeState::Skipped);
    assert!(x.cause.as_ref().unwrap().contains("dependency z"));
    assert_eq!(fx.recipe.count(), 0);
}

#[tokio::test]
async fn test_join_error_message() {
    let panicked = tokio::spawn(async { panic!("boom") }).await.unwrap_err();
    assert_eq!(join_error_message(panicked), "panicked: boom");

    let owned = tokio::spawn(async { panic!("{} failed", "step") }).await.unwrap_err();
    assert_eq!(join_error_message(owned), "panicked: step failed");

    let handle = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
    handle.abort();
    assert!(join_error_message(handle.await.unwrap_err()).contains("cancelled"));
}

#[tokio::test]
async fn test_database_lock_wait_leaves_runtime_free() {
    let fx = fixture(&[], Duration::ZERO);
    let dag = fx.dag(&["solo"]);
    let installer = fx.installer(fast_options());

    // another process holds the database lock for a while
    let held = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(installer.layout().database_dir().join(crate::database::LOCK_FILE))
        .unwrap();
    fs2::FileExt::lock_exclusive(&held).unwrap();
    let holder = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        let released = Instant::now();
        fs2::FileExt::unlock(&held).unwrap();
        released
    });

    // on a single-threaded runtime this only ticks if the install yields
    let ticker = async {
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Instant::now()
    };
    let (report, ticked) = tokio::join!(installer.install(&dag, 1), ticker);
    let released = holder.join().unwrap();

    assert!(report.unwrap().success());
    assert!(ticked < released);
}
