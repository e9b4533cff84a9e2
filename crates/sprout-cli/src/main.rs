//! # sprout-cli
//!
//! Command-line front end for the Sprout package manager.
//!
//! Parses arguments, sets up logging, loads the layered configuration and
//! dispatches to the command handlers. Exit status is 0 on success and 1
//! when any requested spec fails to concretize or install.

use clap::{Parser, Subcommand};
use sprout_core::error::SproutError;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::CommandContext;
use output::errors::ErrorFormatter;

/// Build and install software from source, many configurations side by side
#[derive(Parser)]
#[command(name = "sprout", version, about = "Source-based package manager")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Override a configuration value, e.g. `-c install.max_parallel=4`
    #[arg(short = 'c', long = "config", value_name = "KEY=VALUE", global = true)]
    pub overrides: Vec<String>,

    /// Only use compilers listed in configuration
    #[arg(long, global = true)]
    pub no_detect: bool,

    /// Never color output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Concretize specs and print the resolved DAG
    Spec {
        #[arg(required = true)]
        specs: Vec<String>,
        /// Print the DAG as JSON nodes
        #[arg(long)]
        json: bool,
    },
    /// Concretize and install specs
    Install {
        #[arg(required = true)]
        specs: Vec<String>,
        /// Maximum concurrent builds
        #[arg(short = 'j', long)]
        jobs: Option<usize>,
        /// Print the install plan without building
        #[arg(long)]
        dry_run: bool,
    },
    /// List installed packages
    Find {
        name: Option<String>,
        /// Only packages installed on request
        #[arg(long)]
        explicit: bool,
    },
    /// Remove an installed package by hash prefix
    Uninstall {
        hash: String,
        /// Remove even when other installs depend on it
        #[arg(short, long)]
        force: bool,
    },
    /// Show what a package declares
    Info { package: String },
    /// Show who maintains packages
    Maintainers {
        /// Package names, or user names with --by-user
        names: Vec<String>,
        /// Show maintainers for every package
        #[arg(short, long)]
        all: bool,
        /// List packages that have maintainers
        #[arg(long, conflicts_with = "unmaintained")]
        maintained: bool,
        /// List packages without maintainers
        #[arg(long)]
        unmaintained: bool,
        /// Show packages for users instead of users for packages
        #[arg(long)]
        by_user: bool,
    },
    /// List available compilers
    Compilers,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_json);
    setup_panic_handler();

    info!("Starting Sprout v{}", env!("CARGO_PKG_VERSION"));

    match run_cli(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let formatter = ErrorFormatter::new();
            match e.downcast_ref::<SproutError>() {
                Some(sprout_error) => eprint!("{}", formatter.format_error(sprout_error)),
                None => eprintln!("{}", formatter.format_simple(&format!("{:#}", e))),
            }
            ExitCode::FAILURE
        },
    }
}

fn run_cli(cli: Cli) -> anyhow::Result<u8> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| SproutError::io("Failed to create async runtime", e))?;

    rt.block_on(async {
        let overrides = commands::parse_overrides(&cli.overrides)?;
        let ctx = CommandContext::new(overrides, !cli.no_detect, !cli.no_color).await?;
        commands::dispatch_command(cli.command, &ctx).await
    })
}

fn setup_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "sprout_cli={level},sprout_core={level},sprout_config={level},sprout_registry={level},\
             sprout_resolver={level},sprout_install={level}"
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        error!("Sprout encountered an unexpected error: {}", panic_info);
        eprintln!("sprout crashed! This is a bug.");
        eprintln!("Error: {}", panic_info);
    }));
}
