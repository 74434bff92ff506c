//! Data directory lock
//!
//! The sled database tolerates only one opener. The server, the seeder and
//! `reset-db` all take this lock first so two of them never share a data
//! directory. The lock file records who holds it:
//!
//! ```text
//! { "pid": 4242, "binary": "wafer-sentinel", "acquired_at": "2025-03-01T08:00:00Z" }
//! ```

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const LOCK_FILE_NAME: &str = ".wafer-sentinel.lock";

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub binary: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockOwner {
    fn current() -> Self {
        let binary = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "wafer-sentinel".to_string());
        Self {
            pid: std::process::id(),
            binary,
            acquired_at: Utc::now(),
        }
    }

    /// Whether the recorded process still exists.
    #[cfg(unix)]
    fn is_alive(&self) -> bool {
        Path::new(&format!("/proc/{}", self.pid)).exists()
    }

    #[cfg(not(unix))]
    fn is_alive(&self) -> bool {
        true
    }
}

/// Exclusive hold on a data directory, released on drop.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    owner: LockOwner,
}

impl ProcessLock {
    /// Take the lock for `data_dir`, creating the directory if needed.
    ///
    /// A lock left behind by a dead process, or one that cannot be parsed,
    /// is taken over.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let path = data_dir.join(LOCK_FILE_NAME);

        // Second pass only after clearing a stale lock
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let owner = LockOwner::current();
                    file.write_all(&serde_json::to_vec(&owner)?)
                        .with_context(|| format!("Failed to write lock file {}", path.display()))?;
                    tracing::debug!(pid = owner.pid, path = %path.display(), "Data directory locked");
                    return Ok(Self { path, owner });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match read_owner(&path) {
                        Some(holder) if holder.is_alive() && holder.pid != std::process::id() => bail!(
                            "Data directory {} is held by {} (PID {}) since {}. Stop it, or remove {}",
                            data_dir.display(),
                            holder.binary,
                            holder.pid,
                            holder.acquired_at,
                            path.display()
                        ),
                        holder => {
                            tracing::warn!(
                                path = %path.display(),
                                stale_pid = holder.as_ref().map(|h| h.pid),
                                "Taking over stale data directory lock"
                            );
                            fs::remove_file(&path).context("Failed to remove stale lock file")?;
                        }
                    }
                }
                Err(e) => return Err(e).with_context(|| format!("Failed to create lock file {}", path.display())),
            }
        }
        bail!("Lock file {} keeps reappearing; another process is racing for it", path.display())
    }

    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_owner(path: &Path) -> Option<LockOwner> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        // Only remove a file that still names us
        if read_owner(&self.path).is_some_and(|o| o.pid == self.owner.pid) {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), "Failed to release data directory lock: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_records_owner_and_releases() {
        let dir = tempdir().unwrap();
        let path = {
            let lock = ProcessLock::acquire(dir.path().join("data")).unwrap();
            let on_disk = read_owner(lock.path()).unwrap();
            assert_eq!(on_disk.pid, std::process::id());
            assert_eq!(&on_disk, lock.owner());
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_live_foreign_holder_blocks() {
        let dir = tempdir().unwrap();
        // PID 1 always exists on unix
        let holder = LockOwner {
            pid: 1,
            binary: "wafer-sentinel".into(),
            acquired_at: Utc::now(),
        };
        fs::write(dir.path().join(LOCK_FILE_NAME), serde_json::to_vec(&holder).unwrap()).unwrap();
        let err = ProcessLock::acquire(dir.path()).unwrap_err();
        assert!(err.to_string().contains("PID 1"));
    }

    #[test]
    fn test_dead_holder_is_taken_over() {
        let dir = tempdir().unwrap();
        let holder = LockOwner {
            pid: 999_999_999,
            binary: "seed-history".into(),
            acquired_at: Utc::now(),
        };
        fs::write(dir.path().join(LOCK_FILE_NAME), serde_json::to_vec(&holder).unwrap()).unwrap();
        let lock = ProcessLock::acquire(dir.path()).unwrap();
        assert_eq!(lock.owner().pid, std::process::id());
    }

    #[test]
    fn test_unparseable_lock_is_replaced() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LOCK_FILE_NAME), "12345\n").unwrap();
        assert!(ProcessLock::acquire(dir.path()).is_ok());
    }
}
