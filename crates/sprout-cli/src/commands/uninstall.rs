//! `sprout uninstall` command implementation.
//!
//! The argument is a hash prefix as shown by `sprout find`; it must match
//! exactly one installed package.

use sprout_core::error::SproutError;
use sprout_install::{InstallDatabase, Installer};
use sprout_registry::PackageRegistry;
use std::sync::Arc;

use super::CommandContext;

/// Execute the `sprout uninstall` command
pub async fn execute(hash_prefix: &str, force: bool, ctx: &CommandContext) -> anyhow::Result<u8> {
    let layout = ctx.layout()?;
    let database = InstallDatabase::open(layout.database_dir())?;

    let matches = database.find_by_hash_prefix(hash_prefix);
    let record = match matches.as_slice() {
        [] => {
            return Err(SproutError::database(format!("no installed package matches hash '{}'", hash_prefix)).into());
        },
        [record] => record.clone(),
        several => {
            let names: Vec<String> = several
                .iter()
                .map(|r| format!("{}@{}/{}", r.name, r.version, r.hash.short()))
                .collect();
            return Err(SproutError::database(format!(
                "hash '{}' is ambiguous: {}",
                hash_prefix,
                names.join(", ")
            ))
            .into());
        },
    };

    // Removal never consults package definitions
    let installer = Installer::new(Arc::new(PackageRegistry::new()), layout, ctx.install_options())?;
    let removed = installer.uninstall(&record.hash, force).await?;
    ctx.output.success(&format!(
        "Removed {}@{}/{} from {}",
        removed.name,
        removed.version,
        removed.hash.short(),
        removed.prefix
    ));
    Ok(0)
}
