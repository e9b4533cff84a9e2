//! `sprout spec` command implementation.
//!
//! Concretizes each argument independently and prints the resolved DAG
//! with abbreviated hashes, or the flattened nodes as JSON.

use sprout_resolver::Concretizer;
use tracing::debug;

use super::{parse_specs, report_error, CommandContext};

/// Execute the `sprout spec` command
pub async fn execute(raw: &[String], json: bool, ctx: &CommandContext) -> anyhow::Result<u8> {
    let specs = parse_specs(raw)?;
    let repo = ctx.repository_context()?;
    let concretizer = Concretizer::new(&repo);

    let mut status = 0;
    for (text, result) in raw.iter().zip(concretizer.concretize_all(&specs)) {
        match result {
            Ok(concrete) => {
                debug!(spec = %text, hash = ?concrete.hash(), "Concretized");
                if json {
                    let nodes = concrete.to_nodes()?;
                    ctx.output.info(&serde_json::to_string_pretty(&nodes)?);
                } else {
                    ctx.output.step(&format!("Concretized {}", text));
                    ctx.output.print(&concrete.tree());
                }
            },
            Err(e) => {
                report_error(ctx, &e, Some(repo.registry()));
                status = 1;
            },
        }
    }
    Ok(status)
}
