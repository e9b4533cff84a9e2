//! On-disk layout of an install root
//!
//! ```text
//! <root>/
//!   <name>-<version>-<hash>/      one prefix per concrete node
//!     .sprout/spec.json           the concrete node and its dependencies
//!   .sprout/db/index.json         install database
//!   .sprout/db/db.lock
//!   .sprout/locks/<hash>.lock     per-node build locks
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use sprout_core::error::SproutError;
use sprout_core::types::{Spec, SpecHash};
use std::fs;

use crate::InstallResult;

/// Directory holding per-prefix metadata
pub const METADATA_DIR: &str = ".sprout";
/// Concrete spec written into every installed prefix
pub const SPEC_FILE: &str = "spec.json";

/// Paths under one install root
#[derive(Debug, Clone)]
pub struct InstallLayout {
    root: Utf8PathBuf,
}

impl InstallLayout {
    /// Open an install root, creating its bookkeeping directories
    pub fn new<P: AsRef<Utf8Path>>(root: P) -> InstallResult<Self> {
        let layout = Self {
            root: root.as_ref().to_path_buf(),
        };
        for dir in [layout.database_dir(), layout.locks_dir()] {
            fs::create_dir_all(&dir)
                .map_err(|e| SproutError::io(format!("Failed to create directory {}", dir), e))?;
        }
        Ok(layout)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn database_dir(&self) -> Utf8PathBuf {
        self.root.join(METADATA_DIR).join("db")
    }

    pub fn locks_dir(&self) -> Utf8PathBuf {
        self.root.join(METADATA_DIR).join("locks")
    }

    /// Lock file guarding the build of `hash`
    pub fn lock_path(&self, hash: &SpecHash) -> Utf8PathBuf {
        self.locks_dir().join(format!("{}.lock", hash.to_hex()))
    }

    /// Install prefix of a concrete node
    pub fn prefix_for(&self, spec: &Spec) -> InstallResult<Utf8PathBuf> {
        let hash = spec.hash().ok_or_else(|| {
            SproutError::database(format!("{} is not concrete and has no install prefix", spec.name))
        })?;
        let version = spec
            .version()
            .ok_or_else(|| SproutError::database(format!("{} has no pinned version", spec.name)))?;
        Ok(self
            .root
            .join(format!("{}-{}-{}", spec.name, version, hash.to_hex())))
    }

    /// `.sprout/spec.json` inside `prefix`
    pub fn spec_file(prefix: &Utf8Path) -> Utf8PathBuf {
        prefix.join(METADATA_DIR).join(SPEC_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprout_core::types::{ArchSpec, CompilerSpec, Version};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let layout = InstallLayout::new(&root).unwrap();
        assert!(layout.database_dir().is_dir());
        assert!(layout.locks_dir().is_dir());

        let spec = Spec::concrete(
            "zlib",
            Version::parse("1.3").unwrap(),
            BTreeMap::new(),
            CompilerSpec::concrete("gcc", Version::parse("12").unwrap(), None),
            ArchSpec::new("linux", "test", "x86_64"),
            Vec::new(),
        )
        .unwrap();
        let hash = spec.hash().unwrap();

        let prefix = layout.prefix_for(&spec).unwrap();
        assert_eq!(prefix, root.join(format!("zlib-1.3-{}", hash.to_hex())));
        assert!(layout.lock_path(&hash).as_str().ends_with(&format!("{}.lock", hash.to_hex())));
        assert!(InstallLayout::spec_file(&prefix).ends_with(".sprout/spec.json"));

        assert!(layout.prefix_for(&Spec::new("zlib")).is_err());
    }
}
