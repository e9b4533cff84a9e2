//! Rendering of install plans, reports and database listings.
//!
//! Renderers return strings so commands decide where output goes.

use super::colors::ColorSupport;
use sprout_install::{InstallPlan, InstallRecord, InstallReport, NodeReport, NodeState};

fn paint_state(colors: &ColorSupport, state: NodeState) -> String {
    let label = format!("{:<9}", state.as_str());
    match state {
        NodeState::Installed => colors.green(&label),
        NodeState::Failed => colors.red(&label),
        NodeState::Skipped | NodeState::LockWait => colors.yellow(&label),
        NodeState::Queued | NodeState::Building => colors.dim(&label),
    }
}

fn render_node(colors: &ColorSupport, node: &NodeReport) -> String {
    let mut line = format!("{} {}", paint_state(colors, node.state), node.identity());
    if node.reused {
        line.push_str(&colors.dim(" (reused)"));
    }
    if let Some(cause) = &node.cause {
        line.push_str(&format!("\n          {}", colors.dim(cause)));
    }
    line
}

/// Per-node outcome lines followed by the summary
pub fn render_report(colors: &ColorSupport, report: &InstallReport) -> String {
    let mut out = String::new();
    for node in report.nodes.values() {
        out.push_str(&render_node(colors, node));
        out.push('\n');
    }
    for stale in &report.stale_locks {
        out.push_str(&format!("{}: {}\n", colors.yellow("recovered"), stale));
    }
    if report.cancelled {
        out.push_str(&format!("{}\n", colors.yellow("install cancelled before every node started")));
    }
    let summary = report.summary();
    if report.success() {
        out.push_str(&colors.green(&summary));
    } else {
        out.push_str(&colors.red(&summary));
    }
    out.push('\n');
    out
}

/// What an install would do, in build order
pub fn render_plan(colors: &ColorSupport, plan: &InstallPlan) -> String {
    let mut out = String::new();
    for step in &plan.steps {
        let action = if step.installed { colors.dim("[reuse]") } else { colors.cyan("[build]") };
        out.push_str(&format!("{} {}  {}\n", action, step.hash.short(), step.spec.node_string()));
    }
    let to_build = plan.to_build().count();
    out.push_str(&format!("{} to build, {} already installed\n", to_build, plan.len() - to_build));
    out
}

/// One line per installed package
pub fn render_records(colors: &ColorSupport, records: &[InstallRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let marker = if record.explicit { colors.bold("*") } else { " ".to_string() };
        out.push_str(&format!(
            "{} {}  {}@{}  {}\n",
            marker,
            colors.dim(&record.hash.short()),
            record.name,
            record.version,
            record.prefix
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprout_core::types::SpecHash;

    fn node(name: &str, byte: u8, state: NodeState, cause: Option<&str>) -> NodeReport {
        NodeReport {
            hash: SpecHash::new([byte; 32]),
            name: name.to_string(),
            version: "1.0".to_string(),
            state,
            reused: false,
            prefix: None,
            cause: cause.map(str::to_string),
        }
    }

    #[test]
    fn test_report_lists_causes_and_summary() {
        let mut report = InstallReport::default();
        for n in [
            node("z", 1, NodeState::Failed, Some("compiler exploded")),
            node("x", 2, NodeState::Skipped, Some("dependency z failed")),
        ] {
            report.nodes.insert(n.hash, n);
        }
        report.roots.push(SpecHash::new([2; 32]));

        let text = render_report(&ColorSupport::disabled(), &report);
        assert!(text.contains("FAILED    z@1.0/"));
        assert!(text.contains("compiler exploded"));
        assert!(text.contains("SKIPPED   x@1.0/"));
        assert!(text.ends_with("0 built, 0 reused, 1 failed, 1 skipped\n"));
    }
}
