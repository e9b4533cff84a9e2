//! `sprout compilers` command implementation.

use super::CommandContext;

/// Print every compiler the concretizer may choose from
pub async fn execute(ctx: &CommandContext) -> anyhow::Result<u8> {
    let compilers = ctx.available_compilers()?;
    if compilers.is_empty() {
        ctx.output.warn("No compilers found; list them under [[compilers]] in sprout.toml");
        return Ok(1);
    }

    ctx.output.step(&format!("{} available compilers", compilers.len()));
    for compiler in &compilers {
        let path = compiler.path.as_ref().map(|p| p.to_string()).unwrap_or_default();
        ctx.output.info(&format!("{:<24} {}", compiler.to_string(), path));
    }
    Ok(0)
}
