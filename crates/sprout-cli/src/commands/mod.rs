//! Command implementations and dispatch logic.
//!
//! Each command is an async function taking the shared [`CommandContext`]
//! and returning the process exit status.

use anyhow::{bail, Context};
use camino::Utf8PathBuf;
use sprout_config::{ConfigLayering, ConfigLoader, SproutConfig};
use sprout_core::error::{SproutError, SproutResult};
use sprout_core::parser::parse_spec;
use sprout_core::types::{CompilerSpec, Spec};
use sprout_install::{InstallLayout, InstallOptions};
use sprout_registry::{
    detect_compilers, host_arch, CompilerProbe, ConfiguredCompilers, PackageRegistry, PathProbe, RepositoryContext,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub mod compilers;
pub mod find;
pub mod info;
pub mod install;
pub mod maintainers;
pub mod spec;
pub mod uninstall;


use crate::{output::OutputHandler, Commands};

/// Shared context for all commands
pub struct CommandContext {
    pub config: SproutConfig,
    pub output: OutputHandler,
    /// Probe PATH for compilers in addition to configured ones
    pub detect_compilers: bool,
}

impl CommandContext {
    /// Load configuration for the current directory
    pub async fn new(
        cli_overrides: HashMap<String, String>,
        detect_compilers: bool,
        color: bool,
    ) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| SproutError::io("Failed to get current directory", e))?;
        let cwd = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|p| anyhow::anyhow!("current directory {} is not valid UTF-8", p.display()))?;

        let env_overrides = ConfigLayering::collect_env_overrides();
        let (config, sources) = ConfigLoader::new(cwd).load(&env_overrides, &cli_overrides).await?;
        info!(
            root = %config.install_root,
            repositories = config.repositories.len(),
            layers = sources.len(),
            "Configuration loaded"
        );

        Ok(Self {
            config,
            output: if color { OutputHandler::new() } else { OutputHandler::plain() },
            detect_compilers,
        })
    }

    /// Every package from the configured repositories; earlier ones win
    pub fn load_registry(&self) -> SproutResult<PackageRegistry> {
        if self.config.repositories.is_empty() {
            warn!("No repositories configured; add one under [repositories] in sprout.toml");
        }
        PackageRegistry::load_all(&self.config.repositories)
    }

    /// Configured compilers plus, unless disabled, the ones found on PATH
    pub fn available_compilers(&self) -> SproutResult<Vec<CompilerSpec>> {
        let configured = ConfiguredCompilers::new(self.config.compilers.clone());
        let path_probes = if self.detect_compilers { PathProbe::defaults() } else { Vec::new() };

        let mut probes: Vec<&dyn CompilerProbe> = vec![&configured];
        probes.extend(path_probes.iter().map(|p| p as &dyn CompilerProbe));
        detect_compilers(&probes, self.config.max_parallel)
    }

    /// Session context the concretizer resolves against
    pub fn repository_context(&self) -> SproutResult<RepositoryContext> {
        let registry = self.load_registry()?;
        let compilers = self.available_compilers()?;
        let arch = self.config.arch_or(&host_arch());
        debug!(packages = registry.len(), compilers = compilers.len(), arch = %arch, "Repository context ready");
        Ok(RepositoryContext::new(registry, compilers, arch).with_policy(self.config.concretizer_policy()))
    }

    pub fn layout(&self) -> SproutResult<InstallLayout> {
        InstallLayout::new(&self.config.install_root)
    }

    pub fn install_options(&self) -> InstallOptions {
        InstallOptions {
            lock_timeout: self.config.lock_timeout,
            lock_poll: self.config.lock_poll,
            build_timeout: self.config.build_timeout,
        }
    }
}

/// Dispatch a command to its handler
pub async fn dispatch_command(command: Commands, ctx: &CommandContext) -> anyhow::Result<u8> {
    match command {
        Commands::Spec { specs, json } => {
            info!("Concretizing {} spec(s)", specs.len());
            spec::execute(&specs, json, ctx).await
        },
        Commands::Install { specs, jobs, dry_run } => {
            info!("Installing {} spec(s) (jobs: {:?}, dry_run: {})", specs.len(), jobs, dry_run);
            install::execute(&specs, jobs, dry_run, ctx).await
        },
        Commands::Find { name, explicit } => find::execute(name.as_deref(), explicit, ctx).await,
        Commands::Uninstall { hash, force } => {
            info!("Uninstalling {} (force: {})", hash, force);
            uninstall::execute(&hash, force, ctx).await
        },
        Commands::Info { package } => info::execute(&package, ctx).await,
        Commands::Maintainers {
            names,
            all,
            maintained,
            unmaintained,
            by_user,
        } => {
            let query = maintainers::MaintainerQuery {
                names,
                all,
                maintained,
                unmaintained,
                by_user,
            };
            maintainers::execute(&query, ctx).await
        },
        Commands::Compilers => compilers::execute(ctx).await,
    }
}

/// Parse `-c key=value` arguments
pub fn parse_overrides(raw: &[String]) -> anyhow::Result<HashMap<String, String>> {
    let mut overrides = HashMap::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            bail!("invalid override '{}': expected KEY=VALUE", item);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("invalid override '{}': empty key", item);
        }
        overrides.insert(key.to_string(), value.trim().to_string());
    }
    Ok(overrides)
}

/// Parse every command-line spec, naming the offending argument on failure
pub fn parse_specs(raw: &[String]) -> anyhow::Result<Vec<Spec>> {
    raw.iter()
        .map(|text| {
            let spec = parse_spec(text).with_context(|| format!("in argument '{}'", text))?;
            if spec.is_anonymous() {
                bail!("spec '{}' does not name a package", text);
            }
            Ok(spec)
        })
        .collect()
}

/// Closest package name to a misspelled one
pub fn suggest_similar_package<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let limit = (input.len() / 3).max(1);
    candidates
        .iter()
        .map(|candidate| (edit_distance(input, candidate), *candidate))
        .filter(|(distance, _)| *distance <= limit)
        .min()
        .map(|(_, candidate)| candidate)
}

/// Levenshtein distance between two strings
fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0; b_chars.len() + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        current[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = usize::from(a_char != b_char);
            current[j + 1] = (previous[j + 1] + 1).min(current[j] + 1).min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}

/// Print a library error with its suggestion, plus a spelling hint for unknown packages
pub(crate) fn report_error(ctx: &CommandContext, error: &SproutError, registry: Option<&PackageRegistry>) {
    let formatter = crate::output::errors::ErrorFormatter::with_colors(*ctx.output.colors());
    eprint!("{}", formatter.format_error(error));
    if let (SproutError::PackageNotFound { name }, Some(registry)) = (error, registry) {
        if let Some(similar) = suggest_similar_package(name, &registry.names()) {
            eprintln!("Did you mean '{}'?", similar);
        }
    }
}
