//! `sprout info` command implementation.

use sprout_core::error::SproutError;
use sprout_registry::PackageDefinition;

use super::{report_error, CommandContext};

/// Describe one package: versions, variants and declared dependencies
pub async fn execute(package: &str, ctx: &CommandContext) -> anyhow::Result<u8> {
    let registry = ctx.load_registry()?;
    let definition = match registry.get(package) {
        Ok(definition) => definition,
        Err(e @ SproutError::PackageNotFound { .. }) => {
            report_error(ctx, &e, Some(&registry));
            return Ok(1);
        },
        Err(e) => return Err(e.into()),
    };

    ctx.output.print(&describe(definition.as_ref()));
    Ok(0)
}

/// Plain-text description of a package definition
pub fn describe(definition: &dyn PackageDefinition) -> String {
    let mut out = format!("Package: {}\n", definition.name());
    if let Some(homepage) = definition.attribute("homepage") {
        out.push_str(&format!("Homepage: {}\n", homepage));
    }
    let maintainers = definition.maintainers();
    if !maintainers.is_empty() {
        out.push_str(&format!("Maintainers: {}\n", maintainers.join(", ")));
    }

    out.push_str("\nVersions:\n");
    let preferred = definition.preferred_version();
    for version in definition.versions().iter().rev() {
        let marker = if Some(version) == preferred { " (preferred)" } else { "" };
        out.push_str(&format!("    {}{}\n", version, marker));
    }

    out.push_str("\nVariants:\n");
    if definition.variants().is_empty() {
        out.push_str("    None\n");
    }
    for variant in definition.variants() {
        out.push_str(&format!("    {}\n", variant));
    }

    out.push_str("\nDependencies:\n");
    if definition.declared_dependencies().is_empty() {
        out.push_str("    None\n");
    }
    for decl in definition.declared_dependencies() {
        out.push_str(&format!("    {} [{}]", decl.spec, decl.types));
        if let Some(when) = &decl.when {
            out.push_str(&format!(" when {}", when));
        }
        out.push('\n');
    }
    out
}
