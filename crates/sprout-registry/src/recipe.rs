//! Build recipe handles.
//!
//! The installer only ever calls [`BuildRecipe::build`]; what happens
//! inside belongs to the recipe.

use camino::{Utf8Path, Utf8PathBuf};
use sprout_core::error::{SproutError, SproutResult};
use sprout_core::types::Spec;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Everything a recipe gets to see while building one node
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub spec: Arc<Spec>,
    pub prefix: Utf8PathBuf,
    /// Install prefix of every direct dependency, by name
    pub dependency_prefixes: BTreeMap<String, Utf8PathBuf>,
    /// Point after which the build must stop
    pub deadline: Option<Instant>,
}

impl BuildContext {
    /// Identity used in error reports
    fn identity(&self) -> (String, String) {
        (
            self.spec.name.clone(),
            self.spec.hash().map(|h| h.short()).unwrap_or_default(),
        )
    }

    /// Build a `BuildFailure` for this node
    pub fn failure(&self, message: impl Into<String>) -> SproutError {
        let (package, hash) = self.identity();
        SproutError::BuildFailure {
            package,
            hash,
            message: message.into(),
        }
    }
}

/// A handle that knows how to build one package into a prefix.
///
/// The installer holds the node's lock until `build` returns, so a recipe
/// must stop on its own once `ctx.deadline` passes.
pub trait BuildRecipe: Send + Sync + fmt::Debug {
    fn build(&self, ctx: &BuildContext) -> SproutResult<()>;
}

/// Recipe for packages that need no build steps
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecipe;

impl BuildRecipe for NoopRecipe {
    fn build(&self, _ctx: &BuildContext) -> SproutResult<()> {
        Ok(())
    }
}

/// Runs shell steps in a scratch stage directory.
///
/// `{prefix}`, `{name}`, `{version}` and `{dep.NAME}` are substituted in
/// each step; `PREFIX` is exported as well.
#[derive(Debug, Clone)]
pub struct ScriptRecipe {
    steps: Vec<String>,
    shell: String,
}

impl ScriptRecipe {
    pub fn new(steps: Vec<String>) -> Self {
        Self {
            steps,
            shell: "sh".to_string(),
        }
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    fn expand(&self, step: &str, ctx: &BuildContext) -> String {
        let mut out = step
            .replace("{prefix}", ctx.prefix.as_str())
            .replace("{name}", &ctx.spec.name);
        if let Some(version) = ctx.spec.version() {
            out = out.replace("{version}", version.as_str());
        }
        for (name, prefix) in &ctx.dependency_prefixes {
            out = out.replace(&format!("{{dep.{}}}", name), prefix.as_str());
        }
        out
    }

    fn run_step(&self, step: &str, stage: &Utf8Path, ctx: &BuildContext) -> SproutResult<()> {
        debug!(package = %ctx.spec.name, step = %step, "Running build step");
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(step)
            .current_dir(stage)
            .env("PREFIX", ctx.prefix.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ctx.failure(format!("failed to spawn '{}': {}", step, e)))?;

        // drained on its own thread so a chatty step cannot fill the pipe
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        let waited = match ctx.deadline {
            Some(deadline) => child.wait_timeout(deadline.saturating_duration_since(Instant::now())),
            None => child.wait().map(Some),
        };
        let status = match waited {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!(package = %ctx.spec.name, step = %step, "Build step passed the deadline; killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(ctx.failure(format!("step '{}' killed: build exceeded its deadline", step)));
            },
            Err(e) => return Err(ctx.failure(format!("failed to wait for '{}': {}", step, e))),
        };

        if !status.success() {
            let stderr = stderr.and_then(|reader| reader.join().ok()).unwrap_or_default();
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(ctx.failure(format!(
                "step '{}' exited with {}: {}",
                step,
                status,
                tail.join(" | ")
            )));
        }
        Ok(())
    }
}

impl BuildRecipe for ScriptRecipe {
    fn build(&self, ctx: &BuildContext) -> SproutResult<()> {
        let stage = tempfile::Builder::new()
            .prefix(&format!("sprout-stage-{}-", ctx.spec.name))
            .tempdir()
            .map_err(|e| SproutError::io("Failed to create stage directory", e))?;
        let stage_path = Utf8Path::from_path(stage.path())
            .ok_or_else(|| ctx.failure("stage directory path is not valid UTF-8"))?;

        for step in &self.steps {
            let expanded = self.expand(step, ctx);
            self.run_step(&expanded, stage_path, ctx)?;
        }

        info!(package = %ctx.spec.name, steps = self.steps.len(), "Build steps completed");
        Ok(())
    }
}
