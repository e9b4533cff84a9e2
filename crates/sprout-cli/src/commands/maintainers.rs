//! `sprout maintainers` command implementation.
//!
//! Answers who maintains a package, what a user maintains, and which
//! packages have nobody. Exit status is 1 when nothing matched.

use anyhow::bail;
use sprout_registry::PackageRegistry;
use std::collections::{BTreeMap, BTreeSet};

use super::CommandContext;

/// Parsed `sprout maintainers` arguments
#[derive(Debug, Clone, Default)]
pub struct MaintainerQuery {
    /// Package names, or user names with `by_user`
    pub names: Vec<String>,
    pub all: bool,
    pub maintained: bool,
    pub unmaintained: bool,
    pub by_user: bool,
}

impl MaintainerQuery {
    /// Lines to print; empty when nothing matched
    pub fn run(&self, registry: &PackageRegistry) -> anyhow::Result<Vec<String>> {
        let names: Vec<&str> = self.names.iter().map(String::as_str).collect();

        if self.maintained || self.unmaintained {
            let (maintained, unmaintained) = registry.maintained();
            let listed = if self.maintained { maintained } else { unmaintained };
            return Ok(listed.into_iter().map(str::to_string).collect());
        }

        if !self.all && names.is_empty() {
            if self.by_user {
                bail!("sprout maintainers --by-user requires a user or --all");
            }
            bail!("sprout maintainers requires a package or --all");
        }

        let table = if self.by_user {
            registry.packages_by_maintainer(&names)
        } else {
            registry.maintainers_of(&names)?
        };
        if self.all {
            return Ok(table
                .iter()
                .map(|(key, values)| format!("{}: {}", key, join(values)))
                .collect());
        }
        Ok(merged(&table).into_iter().collect())
    }
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Union of every value set
fn merged(table: &BTreeMap<String, BTreeSet<String>>) -> BTreeSet<String> {
    table.values().flatten().cloned().collect()
}

/// Execute the `sprout maintainers` command
pub async fn execute(query: &MaintainerQuery, ctx: &CommandContext) -> anyhow::Result<u8> {
    let registry = ctx.load_registry()?;
    let lines = query.run(&registry)?;
    for line in &lines {
        ctx.output.info(line);
    }
    Ok(if lines.is_empty() { 1 } else { 0 })
}
