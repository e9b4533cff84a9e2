//! `sprout find` command implementation.

use sprout_install::InstallDatabase;

use super::CommandContext;
use crate::output::report::render_records;

/// List installed packages, optionally only those named `name`
pub async fn execute(name: Option<&str>, explicit: bool, ctx: &CommandContext) -> anyhow::Result<u8> {
    let layout = ctx.layout()?;
    let database = InstallDatabase::open(layout.database_dir())?;

    let mut records = match name {
        Some(name) => database.find_by_name(name),
        None => database.all(),
    };
    if explicit {
        records.retain(|r| r.explicit);
    }

    if records.is_empty() {
        ctx.output.info("No installed packages match");
        return Ok(0);
    }
    ctx.output.step(&format!("{} installed packages", records.len()));
    ctx.output.print(&render_records(ctx.output.colors(), &records));
    Ok(0)
}
