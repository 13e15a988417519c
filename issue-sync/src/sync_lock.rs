//! Sync lock for serialized pull/push operations.
//!
//! Only one pull or push may touch a store at a time. Uses mkdir-based atomic
//! locking at `<sync-dir>/lock` with stale lock detection. The lock is
//! released when the [`SyncLock`] guard is dropped, on every exit path.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::loader::read_config;
use crate::config::paths::Paths;
use crate::error::SyncError;

const LOCK_DIR_NAME: &str = "lock";
const LOCK_METADATA_FILE: &str = "lock.json";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const STALE_LOCK_AGE: Duration = Duration::from_secs(10 * 60);
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Metadata stored in the lock directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LockMetadata {
    pid: u32,
    acquired: String, // ISO-8601 timestamp
    hostname: String,
}

/// An acquired lock. Dropping it removes the lock directory.
#[derive(Debug)]
pub struct SyncLock {
    lock_path: PathBuf,
    pub acquired: chrono::DateTime<Utc>,
    pub pid: u32,
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.lock_path) {
            Ok(()) => debug!("released lock {}", self.lock_path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("failed to release lock {}: {e}", self.lock_path.display()),
        }
    }
}

/// Get the lock directory path for a sync directory.
pub fn lock_path(sync_dir: &Path) -> PathBuf {
    sync_dir.join(LOCK_DIR_NAME)
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

fn read_lock_metadata(lock_path: &Path) -> Option<LockMetadata> {
    let content = fs::read_to_string(lock_path.join(LOCK_METADATA_FILE)).ok()?;
    serde_json::from_str(&content).ok()
}

fn lock_age(lock_path: &Path) -> Option<Duration> {
    fs::metadata(lock_path).ok()?.modified().ok()?.elapsed().ok()
}

/// Check if the process holding the lock is still alive.
fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // Sending signal 0 tests if process exists without killing it
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        // On non-unix, assume alive (conservative)
        let _ = pid;
        true
    }
}

/// Decide whether the lock is stale. A holder on this host is stale only when
/// its process is gone; the age limit applies when liveness cannot be checked
/// (another host, or no readable metadata). Returns the metadata the verdict
/// was made on, `None` when the lock is live.
fn stale_lock(lock_path: &Path) -> Option<Option<LockMetadata>> {
    let metadata = read_lock_metadata(lock_path);
    let stale = match &metadata {
        Some(m) if m.hostname == hostname() => !is_process_alive(m.pid),
        _ => lock_age(lock_path).is_some_and(|age| age > STALE_LOCK_AGE),
    };
    stale.then_some(metadata)
}

/// Move a stale lock aside under a unique name, then delete it. When the
/// moved directory is not the lock that was judged stale, another process
/// took the lock in between and it is moved back.
fn break_stale_lock(lock_path: &Path, judged: &Option<LockMetadata>) {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let aside = lock_path.with_file_name(format!(
        "{LOCK_DIR_NAME}.stale-{}-{nanos}",
        std::process::id()
    ));
    if let Err(e) = fs::rename(lock_path, &aside) {
        debug!("stale lock {} already gone: {e}", lock_path.display());
        return;
    }

    let same_holder = read_lock_metadata(&aside) == *judged
        && (judged.is_some() || lock_age(&aside).is_some_and(|age| age > STALE_LOCK_AGE));
    if !same_holder {
        debug!("lock {} changed hands; putting it back", lock_path.display());
        if lock_path.exists() {
            warn!("lost track of lock moved to {}", aside.display());
        } else if let Err(e) = fs::rename(&aside, lock_path) {
            warn!("failed to restore lock {}: {e}", lock_path.display());
        }
        return;
    }

    warn!("removing stale lock {}", lock_path.display());
    if let Err(e) = fs::remove_dir_all(&aside) {
        warn!("failed to remove {}: {e}", aside.display());
    }
}

/// Attempt to acquire the lock once.
fn try_acquire(lock_path: &Path) -> Result<bool> {
    // mkdir acts as atomic lock - fails with AlreadyExists if lock exists
    match fs::create_dir(lock_path) {
        Ok(()) => {
            let metadata = LockMetadata {
                pid: std::process::id(),
                acquired: Utc::now().to_rfc3339(),
                hostname: hostname(),
            };
            let content = serde_json::to_string_pretty(&metadata)
                .context("failed to serialize lock metadata")?;
            if let Err(e) = fs::write(lock_path.join(LOCK_METADATA_FILE), content) {
                let _ = fs::remove_dir_all(lock_path);
                return Err(e).context("failed to write lock metadata");
            }
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e).context("failed to create lock directory"),
    }
}

/// Acquire the store lock.
///
/// Retries every 100ms until the lock is acquired or `timeout` passes, then
/// fails with [`SyncError::Locked`]. Stale locks are cleaned up on the way.
pub async fn acquire(sync_dir: &Path, timeout: Duration) -> Result<SyncLock> {
    fs::create_dir_all(sync_dir)
        .with_context(|| format!("Failed to create {}", sync_dir.display()))?;
    let lock_path = lock_path(sync_dir);
    let start = Instant::now();

    loop {
        if try_acquire(&lock_path)? {
            debug!("acquired lock {}", lock_path.display());
            return Ok(SyncLock {
                lock_path,
                acquired: Utc::now(),
                pid: std::process::id(),
            });
        }

        if let Some(judged) = stale_lock(&lock_path) {
            break_stale_lock(&lock_path, &judged);
            continue;
        }

        if start.elapsed() >= timeout {
            let owner = match read_lock_metadata(&lock_path) {
                Some(m) => format!("PID {} on {} since {}", m.pid, m.hostname, m.acquired),
                None => "unknown owner".to_string(),
            };
            return Err(SyncError::Locked {
                path: lock_path,
                owner,
                timeout,
            }
            .into());
        }

        sleep(RETRY_INTERVAL).await;
    }
}

/// Acquire the lock guarding a store, honouring its configured timeout.
pub async fn acquire_store(paths: &Paths) -> Result<SyncLock> {
    let timeout = match read_config(&paths.config_path) {
        Ok(config) => config.lock_timeout().unwrap_or(DEFAULT_TIMEOUT),
        Err(e) => {
            debug!("using default lock timeout: {e}");
            DEFAULT_TIMEOUT
        }
    };
    acquire(&paths.sync_dir, timeout).await
}
