// Execution lock
//
// At most one sync pass and one retention pass per host. The lock file is held
// with an advisory exclusive lock (fs2, flock on unix), so a holder that dies
// releases it with its file descriptors. The file also records who holds it.
// When the advisory lock is free but the record names a different, still
// running process on this host, the record wins: the lock file may live on a
// filesystem that does not enforce advisory locks.
//
// The record is cleared when the guard is dropped. The file itself is kept;
// unlinking it would let a concurrent opener lock an orphaned inode.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::constants::RETENTION_LOCK_QUALIFIER;
use crate::error::{CamSyncError, Result};

/// Lock identities. Sync and retention passes never block each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    Sync,
    Retention,
}

impl LockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockKind::Sync => "sync",
            LockKind::Retention => "retention",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    host: String,
    kind: LockKind,
    acquired_at: String,
}

/// Result of a lock attempt.
#[derive(Debug)]
pub enum LockOutcome {
    Held(LockGuard),
    /// Another live pass holds the lock. `owner` is the recorded pid, when readable.
    AlreadyHeld { owner: Option<u32> },
}

/// Holds the lock until dropped.
pub struct LockGuard {
    file: File,
    path: PathBuf,
    kind: LockKind,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!("Releasing {} lock: {}", self.kind.as_str(), self.path.display());
        if let Err(e) = self.file.set_len(0) {
            debug!("Failed to clear lock record {}: {}", self.path.display(), e);
        }
        let _ = FileExt::unlock(&self.file);
    }
}

/// Lock file for a pass kind.
///
/// The sync lock is `base` itself; the retention lock sits next to it:
/// - `/tmp/camsync.lock` -> `/tmp/camsync.retention.lock`
/// - `/tmp/camsync` -> `/tmp/camsync.retention`
pub fn lock_path_for(base: &Path, kind: LockKind) -> PathBuf {
    match kind {
        LockKind::Sync => base.to_path_buf(),
        LockKind::Retention => {
            let stem = base
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "camsync".to_string());
            let name = match base.extension() {
                Some(ext) => format!("{}.{}.{}", stem, RETENTION_LOCK_QUALIFIER, ext.to_string_lossy()),
                None => format!("{}.{}", stem, RETENTION_LOCK_QUALIFIER),
            };
            base.with_file_name(name)
        }
    }
}

/// Try to take the lock without blocking.
///
/// Errors only when the lock file itself cannot be opened or written; contention
/// is reported as `LockOutcome::AlreadyHeld`.
pub fn acquire(path: &Path, kind: LockKind) -> Result<LockOutcome> {
    let lock_err = |source: io::Error| CamSyncError::Lock {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(lock_err)?;
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(lock_err)?;

    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {}
        Err(e) if is_contended(&e) => {
            let owner = read_record(&mut file).map(|r| r.pid);
            if let Some(pid) = owner {
                if !process_alive(pid) {
                    warn!(
                        "{} lock {} is held although recorded owner pid {} has exited",
                        kind.as_str(),
                        path.display(),
                        pid
                    );
                }
            }
            debug!("{} lock {} is held by {:?}", kind.as_str(), path.display(), owner);
            return Ok(LockOutcome::AlreadyHeld { owner });
        }
        Err(e) => return Err(lock_err(e)),
    }

    if let Some(record) = read_record(&mut file) {
        if owner_is_live(&record) {
            warn!(
                "{} lock {} is unlocked but recorded as held by running pid {}; treating as held",
                kind.as_str(),
                path.display(),
                record.pid
            );
            let _ = FileExt::unlock(&file);
            return Ok(LockOutcome::AlreadyHeld { owner: Some(record.pid) });
        }
        if record.pid != std::process::id() {
            info!(
                "Recovered stale {} lock {} left by pid {} ({})",
                kind.as_str(),
                path.display(),
                record.pid,
                record.acquired_at
            );
        }
    }

    if let Err(e) = write_record(&mut file, kind) {
        let _ = FileExt::unlock(&file);
        return Err(lock_err(e));
    }

    info!("Acquired {} lock: {}", kind.as_str(), path.display());
    Ok(LockOutcome::Held(LockGuard {
        file,
        path: path.to_path_buf(),
        kind,
    }))
}

/// Run `f` while holding the lock. Returns `Ok(None)` without running it when
/// another pass holds the lock.
pub fn run_exclusive<T>(path: &Path, kind: LockKind, f: impl FnOnce() -> Result<T>) -> Result<Option<T>> {
    match acquire(path, kind)? {
        LockOutcome::Held(_guard) => f().map(Some),
        LockOutcome::AlreadyHeld { owner } => {
            match owner {
                Some(pid) => info!("Another {} pass is already running (pid {}), exiting", kind.as_str(), pid),
                None => info!("Another {} pass is already running, exiting", kind.as_str()),
            }
            Ok(None)
        }
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Read the holder record. Older lock files hold just a bare pid.
fn read_record(file: &mut File) -> Option<LockRecord> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;

    let contents = contents.trim();
    if contents.is_empty() {
        return None;
    }

    serde_json::from_str(contents).ok().or_else(|| {
        contents.parse::<u32>().ok().map(|pid| LockRecord {
            pid,
            host: current_host(),
            kind: LockKind::Sync,
            acquired_at: String::from("unknown"),
        })
    })
}

fn write_record(file: &mut File, kind: LockKind) -> io::Result<()> {
    let record = LockRecord {
        pid: std::process::id(),
        host: current_host(),
        kind,
        acquired_at: Utc::now().to_rfc3339(),
    };
    let payload = serde_json::to_vec(&record).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&payload)?;
    file.sync_data()
}

/// A record from another host cannot be probed and is assumed live.
fn owner_is_live(record: &LockRecord) -> bool {
    if record.pid == std::process::id() && record.host == current_host() {
        return false;
    }
    if record.host != current_host() {
        return true;
    }
    process_alive(record.pid)
}

fn current_host() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 probes for existence without delivering anything.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DEAD_PID: u32 = 999_999_999;

    fn write_raw(path: &Path, contents: &str) {
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_lock_path_for() {
        let base = Path::new("/tmp/camsync.lock");
        assert_eq!(lock_path_for(base, LockKind::Sync), PathBuf::from("/tmp/camsync.lock"));
        assert_eq!(
            lock_path_for(base, LockKind::Retention),
            PathBuf::from("/tmp/camsync.retention.lock")
        );
        assert_eq!(
            lock_path_for(Path::new("/run/camsync"), LockKind::Retention),
            PathBuf::from("/run/camsync.retention")
        );
    }

    #[test]
    fn test_acquire_and_release() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sync.lock");

        let guard = match acquire(&path, LockKind::Sync).unwrap() {
            LockOutcome::Held(g) => g,
            other => panic!("expected Held, got {:?}", other),
        };
        assert_eq!(guard.path(), path.as_path());
        assert_eq!(guard.kind(), LockKind::Sync);

        let record: LockRecord = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(record.pid, std::process::id());
        assert_eq!(record.kind, LockKind::Sync);

        drop(guard);

        // Record cleared, file kept
        assert!(path.exists());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        assert!(matches!(acquire(&path, LockKind::Sync).unwrap(), LockOutcome::Held(_)));
    }

    #[test]
    fn test_lock_contention() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sync.lock");

        let _guard = acquire(&path, LockKind::Sync).unwrap();
        match acquire(&path, LockKind::Sync).unwrap() {
            LockOutcome::AlreadyHeld { owner } => assert_eq!(owner, Some(std::process::id())),
            other => panic!("expected AlreadyHeld, got {:?}", other),
        }
    }

    #[test]
    fn test_sync_and_retention_are_independent() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("camsync.lock");

        let sync = acquire(&lock_path_for(&base, LockKind::Sync), LockKind::Sync).unwrap();
        let retention = acquire(&lock_path_for(&base, LockKind::Retention), LockKind::Retention).unwrap();
        assert!(matches!(sync, LockOutcome::Held(_)));
        assert!(matches!(retention, LockOutcome::Held(_)));
    }

    #[test]
    fn test_stale_record_from_dead_pid_is_recovered() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sync.lock");
        let stale = LockRecord {
            pid: DEAD_PID,
            host: current_host(),
            kind: LockKind::Sync,
            acquired_at: "2020-01-01T00:00:00Z".to_string(),
        };
        write_raw(&path, &serde_json::to_string(&stale).unwrap());

        assert!(matches!(acquire(&path, LockKind::Sync).unwrap(), LockOutcome::Held(_)));
    }

    #[test]
    fn test_legacy_bare_pid_record() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sync.lock");
        write_raw(&path, &format!("{}\n", DEAD_PID));

        assert!(matches!(acquire(&path, LockKind::Sync).unwrap(), LockOutcome::Held(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_live_recorded_owner_wins_over_free_advisory_lock() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sync.lock");
        // pid 1 always exists
        let live = LockRecord {
            pid: 1,
            host: current_host(),
            kind: LockKind::Sync,
            acquired_at: Utc::now().to_rfc3339(),
        };
        write_raw(&path, &serde_json::to_string(&live).unwrap());

        match acquire(&path, LockKind::Sync).unwrap() {
            LockOutcome::AlreadyHeld { owner } => assert_eq!(owner, Some(1)),
            other => panic!("expected AlreadyHeld, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_process_alive() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(DEAD_PID));
        assert!(!process_alive(0));
    }

    #[test]
    fn test_run_exclusive() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sync.lock");

        let ran = run_exclusive(&path, LockKind::Sync, || Ok(42)).unwrap();
        assert_eq!(ran, Some(42));

        let _guard = acquire(&path, LockKind::Sync).unwrap();
        let skipped = run_exclusive(&path, LockKind::Sync, || -> Result<i32> {
            panic!("must not run while the lock is held")
        })
        .unwrap();
        assert_eq!(skipped, None);
    }
}
