//! Exclusive advisory lock over the task store, using `flock(2)` directly.
//!
//! Uses raw `libc::flock` instead of RAII lock wrappers to avoid the
//! self-referential struct problem: an RAII guard borrows the lock owner,
//! making it impossible to store both in the same struct.
//!
//! By calling `flock(2)` directly, we only need to own the `File` (which
//! owns the fd). `Drop` calls `flock(fd, LOCK_UN)` to release.
//!
//! The lock file lives next to the store: `{store_dir}/.{store_name}.lock`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tpa_core::AppError;

const INITIAL_BACKOFF_MS: u64 = 25;
const MAX_BACKOFF_MS: u64 = 500;

/// Diagnostic information written to lock files
#[derive(Debug, Serialize, Deserialize)]
struct LockDiagnostic {
    pid: u32,
    acquired_at: DateTime<Utc>,
    reason: String,
}

/// Store lock guard backed by `flock(2)`.
///
/// Holds the open `File` whose fd carries the advisory lock.
/// On `Drop`, the lock is explicitly released via `flock(fd, LOCK_UN)`.
pub struct StoreLock {
    file: File,
    lock_path: PathBuf,
}

impl std::fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLock")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is a valid file descriptor owned by `self.file`.
        // If unlocking fails the lock is still released when the fd closes.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}

impl StoreLock {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

/// Lock file path for a store: a hidden sibling of the store file.
pub fn lock_path_for(store_path: &Path) -> PathBuf {
    let name = store_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "store".to_string());
    let dir = store_path.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(".{name}.lock"))
}

/// Try once to take the lock without blocking.
///
/// Returns `Ok(None)` when another holder has it.
pub fn try_acquire(store_path: &Path, reason: &str) -> Result<Option<StoreLock>> {
    let lock_path = lock_path_for(store_path);
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

    let fd = file.as_raw_fd();

    // SAFETY: `fd` is a valid file descriptor from the `File` we just opened.
    // `LOCK_EX | LOCK_NB` requests an exclusive non-blocking lock.
    let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Ok(None);
        }
        return Err(err).with_context(|| format!("flock failed on {}", lock_path.display()));
    }

    let mut lock = StoreLock { file, lock_path };
    let diagnostic = LockDiagnostic {
        pid: std::process::id(),
        acquired_at: Utc::now(),
        reason: reason.to_string(),
    };
    let json = serde_json::to_string(&diagnostic).context("Failed to serialize lock diagnostic")?;
    lock.file
        .set_len(0)
        .context("Failed to truncate lock file")?;
    lock.file
        .write_all(json.as_bytes())
        .context("Failed to write lock diagnostic")?;
    lock.file.flush().context("Failed to flush lock file")?;

    Ok(Some(lock))
}

/// Take the store lock, polling with exponential backoff until `timeout`.
///
/// On timeout the error carries an [`AppError::StoreLocked`] describing the
/// current holder, read from the lock file diagnostic.
pub fn acquire_store_lock(store_path: &Path, reason: &str, timeout: Duration) -> Result<StoreLock> {
    let start = Instant::now();
    let mut sleep_ms = INITIAL_BACKOFF_MS;

    loop {
        if let Some(lock) = try_acquire(store_path, reason)? {
            tracing::debug!(
                store = %store_path.display(),
                waited_ms = start.elapsed().as_millis() as u64,
                "acquired task store lock"
            );
            return Ok(lock);
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            let holder = describe_holder(&lock_path_for(store_path));
            tracing::warn!(store = %store_path.display(), %holder, "task store lock timed out");
            return Err(AppError::StoreLocked {
                path: store_path.display().to_string(),
                waited_ms: elapsed.as_millis() as u64,
                holder,
            }
            .into());
        }

        let remaining = timeout.saturating_sub(elapsed);
        std::thread::sleep(Duration::from_millis(sleep_ms).min(remaining));
        sleep_ms = (sleep_ms * 2).min(MAX_BACKOFF_MS);
    }
}

fn describe_holder(lock_path: &Path) -> String {
    let mut contents = String::new();
    let read = File::open(lock_path).and_then(|mut f| f.read_to_string(&mut contents));
    match read
        .ok()
        .and_then(|_| serde_json::from_str::<LockDiagnostic>(&contents).ok())
    {
        Some(diag) => format!(
            "held by PID {} for '{}' since {}",
            diag.pid, diag.reason, diag.acquired_at
        ),
        None => "holder unknown".to_string(),
    }
}
