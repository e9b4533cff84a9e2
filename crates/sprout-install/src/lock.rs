//! Per-hash build locks
//!
//! Each concrete node gets an advisory `fs2` lock file under the install
//! root. The holder writes its pid and start time into the file and clears
//! it on release; a file still carrying metadata of a process that no
//! longer exists marks a build that died half way.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sprout_core::error::SproutError;
use sprout_core::types::SpecHash;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::InstallResult;

/// Contents of a held lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
    pub pid: u32,
    pub hash: String,
    pub started_at: DateTime<Utc>,
}

impl LockMetadata {
    pub fn current(hash: &SpecHash) -> Self {
        Self {
            pid: std::process::id(),
            hash: hash.to_hex(),
            started_at: Utc::now(),
        }
    }
}

/// Exclusive lock on one node's build; released on drop
#[derive(Debug)]
pub struct HashLock {
    file: File,
    path: Utf8PathBuf,
}

/// A freshly acquired lock, plus the stale holder it replaced if any
#[derive(Debug)]
pub struct AcquiredLock {
    pub lock: HashLock,
    pub stale: Option<SproutError>,
}

impl HashLock {
    /// Try to take the lock without waiting.
    ///
    /// Returns `Ok(None)` while another holder has it.
    pub fn try_acquire(path: &Utf8Path, hash: &SpecHash) -> InstallResult<Option<AcquiredLock>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SproutError::io("Failed to create lock directory", e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| SproutError::io(format!("Failed to open lock file {}", path), e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                return Ok(None);
            },
            Err(e) => return Err(SproutError::io(format!("Failed to lock {}", path), e)),
        }

        let mut lock = HashLock {
            file,
            path: path.to_path_buf(),
        };

        let stale = match lock.read_metadata() {
            Some(previous) if !process_alive(previous.pid) => {
                warn!(
                    hash = %hash.short(),
                    pid = previous.pid,
                    started_at = %previous.started_at,
                    "Stale build lock; previous holder is gone"
                );
                Some(SproutError::StaleLockDetected {
                    hash: hash.short(),
                    pid: previous.pid,
                    path: path.to_string(),
                })
            },
            _ => None,
        };

        lock.write_metadata(&LockMetadata::current(hash))?;
        Ok(Some(AcquiredLock { lock, stale }))
    }

    /// Wait for the lock, polling every `poll`.
    ///
    /// Without a timeout this waits as long as the holder keeps it.
    pub async fn acquire(
        path: &Utf8Path,
        hash: &SpecHash,
        timeout: Option<Duration>,
        poll: Duration,
    ) -> InstallResult<AcquiredLock> {
        let started = Instant::now();
        let mut logged = false;
        loop {
            if let Some(acquired) = Self::try_acquire(path, hash)? {
                return Ok(acquired);
            }
            if !logged {
                debug!(hash = %hash.short(), path = %path, "Waiting for build lock");
                logged = true;
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(SproutError::LockTimeout {
                        hash: hash.short(),
                        waited_secs: started.elapsed().as_secs(),
                    });
                }
            }
            tokio::time::sleep(poll).await;
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Metadata left by the previous holder, if readable
    pub fn read_metadata(&mut self) -> Option<LockMetadata> {
        let mut contents = String::new();
        self.file.seek(SeekFrom::Start(0)).ok()?;
        self.file.read_to_string(&mut contents).ok()?;
        serde_json::from_str(&contents).ok()
    }

    fn write_metadata(&mut self, metadata: &LockMetadata) -> InstallResult<()> {
        let json = serde_json::to_vec(metadata)
            .map_err(|e| SproutError::io("Failed to encode lock metadata", io::Error::other(e)))?;
        self.file
            .set_len(0)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(&json))
            .and_then(|_| self.file.flush())
            .map_err(|e| SproutError::io(format!("Failed to write lock metadata to {}", self.path), e))
    }
}

impl Drop for HashLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = self.file.unlock();
    }
}

/// Whether a process with `pid` still exists
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}
