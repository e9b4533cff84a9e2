//! Node states and the aggregate install report

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sprout_core::types::SpecHash;
use std::fmt;

/// Lifecycle of one node during an install run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Queued,
    LockWait,
    Building,
    Installed,
    Failed,
    Skipped,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Installed | NodeState::Failed | NodeState::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Queued => "QUEUED",
            NodeState::LockWait => "LOCK_WAIT",
            NodeState::Building => "BUILDING",
            NodeState::Installed => "INSTALLED",
            NodeState::Failed => "FAILED",
            NodeState::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub hash: SpecHash,
    pub name: String,
    pub version: String,
    pub state: NodeState,
    /// Satisfied by an existing install instead of a build
    pub reused: bool,
    pub prefix: Option<Utf8PathBuf>,
    /// Why the node failed or was skipped
    pub cause: Option<String>,
}

impl NodeReport {
    /// `name@version/hash` for listings
    pub fn identity(&self) -> String {
        format!("{}@{}/{}", self.name, self.version, self.hash.short())
    }
}

/// Outcome of one install run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallReport {
    /// Every node in install order
    pub nodes: IndexMap<SpecHash, NodeReport>,
    /// Requested roots
    pub roots: Vec<SpecHash>,
    /// Stale locks found and cleared during the run
    pub stale_locks: Vec<String>,
    pub cancelled: bool,
}

impl InstallReport {
    /// True when every requested root is installed
    pub fn success(&self) -> bool {
        self.roots
            .iter()
            .all(|root| self.state(root) == Some(NodeState::Installed))
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }

    pub fn state(&self, hash: &SpecHash) -> Option<NodeState> {
        self.nodes.get(hash).map(|n| n.state)
    }

    pub fn node(&self, hash: &SpecHash) -> Option<&NodeReport> {
        self.nodes.get(hash)
    }

    /// First node named `name`
    pub fn node_named(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.values().find(|n| n.name == name)
    }

    fn in_state(&self, state: NodeState) -> Vec<&NodeReport> {
        self.nodes.values().filter(|n| n.state == state).collect()
    }

    pub fn installed(&self) -> Vec<&NodeReport> {
        self.in_state(NodeState::Installed)
    }

    pub fn failed(&self) -> Vec<&NodeReport> {
        self.in_state(NodeState::Failed)
    }

    pub fn skipped(&self) -> Vec<&NodeReport> {
        self.in_state(NodeState::Skipped)
    }

    /// Nodes built during this run
    pub fn built_count(&self) -> usize {
        self.installed().iter().filter(|n| !n.reused).count()
    }

    pub fn reused_count(&self) -> usize {
        self.installed().iter().filter(|n| n.reused).count()
    }

    /// One-line summary
    pub fn summary(&self) -> String {
        format!(
            "{} built, {} reused, {} failed, {} skipped",
            self.built_count(),
            self.reused_count(),
            self.failed().len(),
            self.skipped().len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, byte: u8, state: NodeState, reused: bool) -> NodeReport {
        NodeReport {
            hash: SpecHash::new([byte; 32]),
            name: name.to_string(),
            version: "1.0".to_string(),
            state,
            reused,
            prefix: None,
            cause: None,
        }
    }

    #[test]
    fn test_success_depends_on_roots_only() {
        let mut install = InstallReport::default();
        for node in [
            report("dep", 1, NodeState::Failed, false),
            report("root", 2, NodeState::Installed, true),
        ] {
            install.nodes.insert(node.hash, node);
        }
        install.roots.push(SpecHash::new([2; 32]));
        assert!(install.success());
        assert_eq!(install.exit_code(), 0);

        install.roots.push(SpecHash::new([1; 32]));
        assert!(!install.success());
        assert_eq!(install.exit_code(), 1);
        assert_eq!(install.summary(), "0 built, 1 reused, 1 failed, 0 skipped");
    }

    #[test]
    fn test_state_names() {
        assert_eq!(NodeState::LockWait.to_string(), "LOCK_WAIT");
        assert!(NodeState::Skipped.is_terminal());
        assert!(!NodeState::Building.is_terminal());
        assert_eq!(report("zlib", 9, NodeState::Queued, false).identity(), format!("zlib@1.0/{}", SpecHash::new([9; 32]).short()));
    }
}
