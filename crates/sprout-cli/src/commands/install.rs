//! `sprout install` command implementation.
//!
//! Concretizes every argument on its own first, so a spec that cannot be
//! resolved is reported while the rest still install. The surviving specs
//! are then resolved together into one DAG and handed to the installer.

use sprout_install::Installer;
use sprout_resolver::Concretizer;
use std::time::Instant;
use tracing::warn;

use super::{parse_specs, report_error, CommandContext};
use crate::output::report::{render_plan, render_report};

/// Execute the `sprout install` command
pub async fn execute(raw: &[String], jobs: Option<usize>, dry_run: bool, ctx: &CommandContext) -> anyhow::Result<u8> {
    let start_time = Instant::now();
    let specs = parse_specs(raw)?;
    let repo = ctx.repository_context()?;

    ctx.output.step("Concretizing");
    let concretizer = Concretizer::new(&repo);
    let mut accepted = Vec::new();
    let mut status = 0;
    for (spec, result) in specs.iter().zip(concretizer.concretize_all(&specs)) {
        match result {
            Ok(_) => accepted.push(spec.clone()),
            Err(e) => {
                report_error(ctx, &e, Some(repo.registry()));
                status = 1;
            },
        }
    }
    if accepted.is_empty() {
        return Ok(status);
    }

    let dag = match concretizer.concretize_dag(&accepted) {
        Ok(dag) => dag,
        Err(e) => {
            report_error(ctx, &e, Some(repo.registry()));
            return Ok(1);
        },
    };
    let installer = Installer::new(repo.shared_registry(), ctx.layout()?, ctx.install_options())?;

    if dry_run {
        let plan = installer.plan(&dag)?;
        ctx.output.print(&render_plan(ctx.output.colors(), &plan));
        return Ok(status);
    }

    let jobs = jobs.unwrap_or(ctx.config.max_parallel).max(1);
    ctx.output.step(&format!("Installing {} packages with {} jobs", dag.len(), jobs));

    let cancel = installer.cancel_token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; waiting for running builds to finish");
            cancel.cancel();
        }
    });
    let result = installer.install(&dag, jobs).await;
    watcher.abort();
    let report = result?;

    ctx.output.print(&render_report(ctx.output.colors(), &report));
    if report.success() {
        ctx.output.success(&format!("Done in {:.2}s", start_time.elapsed().as_secs_f64()));
    }

    let code = u8::try_from(report.exit_code()).unwrap_or(1);
    Ok(status.max(code))
}

