//! Install database
//!
//! One JSON index under the install root records every installed node.
//! Every mutation is a read-modify-write of the file under an exclusive
//! `fs2` lock on `db.lock`, so concurrent processes never clobber each
//! other's records. An in-memory copy serves lookups between refreshes.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sprout_core::error::SproutError;
use sprout_core::types::{Spec, SpecHash};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::sync::Arc;
use tracing::debug;

use crate::InstallResult;

pub const INDEX_FILE: &str = "index.json";
pub const LOCK_FILE: &str = "db.lock";
const INDEX_VERSION: u32 = 1;

/// One installed concrete node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub hash: SpecHash,
    pub name: String,
    pub version: String,
    /// Printable concrete spec
    pub spec: String,
    pub prefix: Utf8PathBuf,
    pub installed_at: DateTime<Utc>,
    /// Requested by a user rather than pulled in as a dependency
    pub explicit: bool,
    /// Number of installed records depending on this one
    pub ref_count: u32,
    pub dependencies: Vec<SpecHash>,
}

impl InstallRecord {
    pub fn new(spec: &Spec, prefix: Utf8PathBuf, explicit: bool) -> InstallResult<Self> {
        let hash = spec
            .hash()
            .ok_or_else(|| SproutError::database(format!("cannot record non-concrete spec {}", spec.name)))?;
        let version = spec
            .version()
            .map(|v| v.to_string())
            .ok_or_else(|| SproutError::database(format!("{} has no pinned version", spec.name)))?;
        Ok(Self {
            hash,
            name: spec.name.clone(),
            version,
            spec: spec.to_string(),
            prefix,
            installed_at: Utc::now(),
            explicit,
            ref_count: 0,
            dependencies: spec.dependencies.iter().filter_map(|e| e.spec.hash()).collect(),
        })
    }

    /// Record present and its prefix still on disk
    pub fn is_verified(&self) -> bool {
        self.prefix.is_dir()
    }

    /// Seconds since install
    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.installed_at).num_seconds()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    records: Vec<InstallRecord>,
}

type Records = BTreeMap<SpecHash, InstallRecord>;

/// Persistent record of installed nodes.
///
/// Clones share one in-memory copy. Refreshes and mutations wait on a
/// file lock other processes may hold, so async callers run them on the
/// blocking pool through [`InstallDatabase::blocking`].
#[derive(Debug, Clone)]
pub struct InstallDatabase {
    dir: Utf8PathBuf,
    records: Arc<RwLock<Records>>,
}

impl InstallDatabase {
    /// Open the database in `dir`, creating it if missing
    pub fn open<P: AsRef<Utf8Path>>(dir: P) -> InstallResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| SproutError::io("Failed to create database directory", e))?;

        let db = Self {
            dir,
            records: Arc::new(RwLock::new(Records::new())),
        };
        db.refresh()?;
        Ok(db)
    }

    /// Run `op` against this database on tokio's blocking pool
    pub async fn blocking<T, F>(&self, op: F) -> InstallResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&InstallDatabase) -> InstallResult<T> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| SproutError::database(format!("database task failed: {}", e)))?
    }

    pub fn index_path(&self) -> Utf8PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn lock_file(&self) -> InstallResult<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))
            .map_err(|e| SproutError::io("Failed to open database lock", e))
    }

    /// Re-read the index from disk
    pub fn refresh(&self) -> InstallResult<()> {
        let lock = self.lock_file()?;
        lock.lock_shared()
            .map_err(|e| SproutError::io("Failed to lock install database", e))?;
        let loaded = self.read_index();
        let _ = lock.unlock();

        *self.records.write() = loaded?;
        Ok(())
    }

    fn read_index(&self) -> InstallResult<Records> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Records::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| SproutError::io("Failed to read install database", e))?;
        let index: IndexFile = serde_json::from_str(&content)
            .map_err(|e| SproutError::database(format!("{} is corrupt: {}", path, e)))?;
        if index.version != INDEX_VERSION {
            return Err(SproutError::database(format!(
                "{} has unsupported format version {}",
                path, index.version
            )));
        }
        Ok(index.records.into_iter().map(|r| (r.hash, r)).collect())
    }

    fn write_index(&self, records: &Records) -> InstallResult<()> {
        let index = IndexFile {
            version: INDEX_VERSION,
            records: records.values().cloned().collect(),
        };
        let content = serde_json::to_string_pretty(&index)
            .map_err(|e| SproutError::database(format!("Failed to serialize install database: {}", e)))?;

        let path = self.index_path();
        let tmp = self.dir.join(format!("{}.tmp", INDEX_FILE));
        fs::write(&tmp, content).map_err(|e| SproutError::io("Failed to write install database", e))?;
        fs::rename(&tmp, &path).map_err(|e| SproutError::io("Failed to replace install database", e))?;
        Ok(())
    }

    /// Read-modify-write the on-disk index under the exclusive lock
    fn transact<T>(&self, change: impl FnOnce(&mut Records) -> T) -> InstallResult<T> {
        let lock = self.lock_file()?;
        lock.lock_exclusive()
            .map_err(|e| SproutError::io("Failed to lock install database", e))?;

        let result = self.read_index().and_then(|mut records| {
            let out = change(&mut records);
            self.write_index(&records)?;
            *self.records.write() = records;
            Ok(out)
        });
        let _ = lock.unlock();
        result
    }

    /// Add a record, bumping the reference counts of its dependencies.
    ///
    /// Adding a hash that is already present only upgrades it to explicit.
    pub fn add(&self, record: InstallRecord) -> InstallResult<()> {
        let hash = record.hash;
        self.transact(|records| {
            if let Some(existing) = records.get_mut(&hash) {
                existing.explicit |= record.explicit;
                return;
            }
            for dep in &record.dependencies {
                if let Some(dep_record) = records.get_mut(dep) {
                    dep_record.ref_count += 1;
                }
            }
            let mut record = record;
            record.ref_count = records
                .values()
                .filter(|r| r.dependencies.contains(&hash))
                .count() as u32;
            records.insert(hash, record);
        })?;
        debug!(hash = %hash.short(), "Recorded install");
        Ok(())
    }

    /// Remove a record, releasing its references on its dependencies
    pub fn remove(&self, hash: &SpecHash) -> InstallResult<Option<InstallRecord>> {
        self.transact(|records| {
            let removed = records.remove(hash)?;
            for dep in &removed.dependencies {
                if let Some(dep_record) = records.get_mut(dep) {
                    dep_record.ref_count = dep_record.ref_count.saturating_sub(1);
                }
            }
            Some(removed)
        })
    }

    pub fn mark_explicit(&self, hash: &SpecHash) -> InstallResult<()> {
        self.transact(|records| {
            if let Some(record) = records.get_mut(hash) {
                record.explicit = true;
            }
        })
    }

    pub fn get(&self, hash: &SpecHash) -> Option<InstallRecord> {
        self.records.read().get(hash).cloned()
    }

    /// Record whose prefix still exists on disk
    pub fn get_verified(&self, hash: &SpecHash) -> Option<InstallRecord> {
        self.get(hash).filter(|r| r.is_verified())
    }

    pub fn contains(&self, hash: &SpecHash) -> bool {
        self.records.read().contains_key(hash)
    }

    pub fn find_by_name(&self, name: &str) -> Vec<InstallRecord> {
        self.records
            .read()
            .values()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    /// Records whose hash starts with `prefix`
    pub fn find_by_hash_prefix(&self, prefix: &str) -> Vec<InstallRecord> {
        self.records
            .read()
            .values()
            .filter(|r| r.hash.matches_prefix(prefix))
            .cloned()
            .collect()
    }

    /// Installed records that depend on `hash`
    pub fn dependents(&self, hash: &SpecHash) -> Vec<InstallRecord> {
        self.records
            .read()
            .values()
            .filter(|r| r.dependencies.contains(hash))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<InstallRecord> {
        let mut records: Vec<InstallRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
        records
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests;
