//! Per-application deployment lock.
//!
//! A lock is a small JSON file `<dir>/<app>.lock` created with
//! `create_new(true)`, so acquisition is atomic acquire-if-absent across
//! processes. [`LockManager::acquire`] hands back a [`LockGuard`]; the
//! file is removed when the guard is released or dropped, including on
//! early returns and panics. Every lock carries a token and a guard only
//! removes the file while it still holds its own token.
//!
//! Locks older than `stale_after` (or unreadable) are treated as left
//! behind by a crashed process and may be reclaimed. Reclaiming renames
//! the stale file aside first, so of several contenders only one moves it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LockError;
use crate::store::epoch_secs;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub app: String,
    /// What is holding the lock, e.g. `deploy v42` or `rollback`.
    pub holder: String,
    pub pid: u32,
    /// Unix timestamp (seconds) of acquisition.
    pub acquired_at: u64,
    /// Identifies the acquisition that wrote the file.
    #[serde(default)]
    pub token: String,
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (pid {}, since {})",
            self.holder, self.pid, self.acquired_at
        )
    }
}

/// Creates and inspects lock files in one directory.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
    stale_after: Duration,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            dir: dir.into(),
            stale_after,
        }
    }

    fn path_for(&self, app: &str) -> PathBuf {
        self.dir.join(format!("{app}.lock"))
    }

    /// Acquire the lock for `app`, waiting up to `timeout`.
    ///
    /// A zero timeout fails immediately if the lock is held.
    pub async fn acquire(
        &self,
        app: &str,
        holder: &str,
        timeout: Duration,
    ) -> Result<LockGuard, LockError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.try_acquire(app, holder)? {
                Ok(guard) => return Ok(guard),
                Err(existing) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(LockError::Held {
                            app: app.to_string(),
                            holder: existing,
                        });
                    }
                    debug!(%app, holder = %existing, "lock held, waiting");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// One acquisition attempt. The inner `Err` carries the current holder.
    pub fn try_acquire(
        &self,
        app: &str,
        holder: &str,
    ) -> Result<Result<LockGuard, String>, LockError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| LockError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(app);
        let info = LockInfo {
            app: app.to_string(),
            holder: holder.to_string(),
            pid: std::process::id(),
            acquired_at: epoch_secs(),
            token: new_token(),
        };

        if create_lock_file(&path, &info)? {
            debug!(%app, %holder, "lock acquired");
            return Ok(Ok(LockGuard::new(path, info)));
        }

        let existing = read_lock_file(&path)?;
        if !self.is_stale(&path, existing.as_ref()) {
            return Ok(Err(describe(existing)));
        }

        warn!(
            %app,
            previous = ?existing.as_ref().map(|i| i.to_string()),
            "reclaiming stale lock"
        );
        let aside = path.with_extension(format!("lock.stale-{}", info.token));
        if !rename_if_exists(&path, &aside)? {
            // A peer moved it first.
            return Ok(Err(describe(read_lock_file(&path)?)));
        }
        let moved = read_lock_file(&aside)?;
        if !self.is_stale(&aside, moved.as_ref()) {
            // Reclaimed by a peer between our read and the rename: put it back.
            restore(&aside, &path)?;
            return Ok(Err(describe(moved)));
        }
        remove_if_exists(&aside)?;

        if create_lock_file(&path, &info)? {
            return Ok(Ok(LockGuard::new(path, info)));
        }
        // Someone else won the race for the reclaimed lock.
        Ok(Err(describe(read_lock_file(&path)?)))
    }

    /// Corrupt files, or files a peer has not written yet, are judged by age.
    fn is_stale(&self, path: &Path, info: Option<&LockInfo>) -> bool {
        match info {
            Some(info) => epoch_secs().saturating_sub(info.acquired_at) > self.stale_after.as_secs(),
            None => file_age(path).is_some_and(|age| age > self.stale_after),
        }
    }

    /// Current holder of `app`'s lock, if any.
    pub fn holder(&self, app: &str) -> Result<Option<LockInfo>, LockError> {
        read_lock_file(&self.path_for(app))
    }

    /// Remove `app`'s lock regardless of holder. Returns whether one existed.
    pub fn force_release(&self, app: &str) -> Result<bool, LockError> {
        let removed = remove_if_exists(&self.path_for(app))?;
        if removed {
            warn!(%app, "lock forcibly released");
        }
        Ok(removed)
    }
}

/// Scoped ownership of an application lock.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    app: String,
    token: String,
    released: bool,
}

impl LockGuard {
    fn new(path: PathBuf, info: LockInfo) -> Self {
        Self {
            path,
            app: info.app,
            token: info.token,
            released: false,
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release now and report I/O errors. Dropping the guard does the
    /// same but can only log them.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.remove_own()
    }

    /// Remove the lock file if it still carries this guard's token.
    fn remove_own(&self) -> Result<(), LockError> {
        match read_lock_file(&self.path)? {
            Some(current) if current.token == self.token => {
                remove_if_exists(&self.path)?;
                info!(app = %self.app, "lock released");
            }
            Some(current) => warn!(
                app = %self.app,
                holder = %current,
                "lock was reclaimed by another run, leaving it in place"
            ),
            None => debug!(app = %self.app, "lock already removed"),
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.remove_own() {
            warn!(app = %self.app, error = %e, "failed to release lock");
        }
    }
}

/// Process-unique acquisition token.
fn new_token() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{:x}-{nanos:x}-{n}", std::process::id())
}

fn describe(info: Option<LockInfo>) -> String {
    info.map(|i| i.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Atomically create a lock file. Returns `Ok(false)` if it already exists.
fn create_lock_file(path: &Path, info: &LockInfo) -> Result<bool, LockError> {
    let io_err = |source: std::io::Error| LockError::Io {
        path: path.to_path_buf(),
        source,
    };
    let content = serde_json::to_vec(info).map_err(|e| io_err(std::io::Error::other(e)))?;

    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(&content).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(io_err(e)),
    }
}

/// Read a lock file. Missing or corrupt files read as `None`.
fn read_lock_file(path: &Path) -> Result<Option<LockInfo>, LockError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn file_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified.elapsed().ok()
}

/// Returns `Ok(false)` if `from` no longer exists.
fn rename_if_exists(from: &Path, to: &Path) -> Result<bool, LockError> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(LockError::Io {
            path: from.to_path_buf(),
            source,
        }),
    }
}

/// Move a lock set aside back into place unless a new one appeared there.
fn restore(aside: &Path, path: &Path) -> Result<(), LockError> {
    match std::fs::hard_link(aside, path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(source) => {
            return Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    remove_if_exists(aside)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<bool, LockError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &Path) -> LockManager {
        LockManager::new(dir, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn second_acquire_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());

        let _guard = locks.acquire("shop", "deploy v1", Duration::ZERO).await.unwrap();
        let err = locks
            .acquire("shop", "deploy v2", Duration::ZERO)
            .await
            .unwrap_err();
        match err {
            LockError::Held { app, holder } => {
                assert_eq!(app, "shop");
                assert!(holder.contains("deploy v1"));
            }
            other => panic!("expected Held, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());

        {
            let _guard = locks.acquire("shop", "deploy", Duration::ZERO).await.unwrap();
            assert!(locks.holder("shop").unwrap().is_some());
        }
        assert!(locks.holder("shop").unwrap().is_none());
        assert!(locks.acquire("shop", "deploy", Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn explicit_release() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());

        let guard = locks.acquire("shop", "rollback", Duration::ZERO).await.unwrap();
        assert_eq!(guard.app(), "shop");
        guard.release().unwrap();
        assert!(locks.holder("shop").unwrap().is_none());
    }

    #[tokio::test]
    async fn different_apps_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());

        let _a = locks.acquire("shop", "deploy", Duration::ZERO).await.unwrap();
        let _b = locks.acquire("blog", "deploy", Duration::ZERO).await.unwrap();
    }

    #[tokio::test]
    async fn waits_for_release_within_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());

        let guard = locks.acquire("shop", "deploy", Duration::ZERO).await.unwrap();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .acquire("shop", "rollback", Duration::from_secs(5))
                    .await
                    .map(|g| g.app().to_string())
            })
        };
        tokio::time::sleep(Duration::from_millis(250)).await;
        drop(guard);

        assert_eq!(waiter.await.unwrap().unwrap(), "shop");
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let old = LockInfo {
            app: "shop".to_string(),
            holder: "deploy v0".to_string(),
            pid: 1,
            acquired_at: 10,
            token: "old".to_string(),
        };
        std::fs::write(
            dir.path().join("shop.lock"),
            serde_json::to_vec(&old).unwrap(),
        )
        .unwrap();

        let locks = LockManager::new(dir.path(), Duration::from_secs(60));
        let guard = locks.acquire("shop", "deploy v1", Duration::ZERO).await.unwrap();
        let current = locks.holder("shop").unwrap().unwrap();
        assert_eq!(current.holder, "deploy v1");
        assert_eq!(current.token, guard.token());
        drop(guard);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[tokio::test]
    async fn outlived_guard_leaves_the_reclaimed_lock_alone() {
        let dir = tempfile::tempdir().unwrap();
        let eager = LockManager::new(dir.path(), Duration::ZERO);

        let first = eager.acquire("shop", "deploy v1", Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let second = eager.acquire("shop", "deploy v2", Duration::ZERO).await.unwrap();
        assert_ne!(first.token(), second.token());

        drop(first);
        let current = eager.holder("shop").unwrap().unwrap();
        assert_eq!(current.holder, "deploy v2");
        assert_eq!(current.token, second.token());

        let patient = manager(dir.path());
        assert!(matches!(
            patient.acquire("shop", "deploy v3", Duration::ZERO).await,
            Err(LockError::Held { .. })
        ));

        second.release().unwrap();
        assert!(eager.holder("shop").unwrap().is_none());
    }

    #[test]
    fn lock_files_without_token_still_parse() {
        let info: LockInfo = serde_json::from_str(
            r#"{"app":"shop","holder":"deploy v0","pid":7,"acquired_at":10}"#,
        )
        .unwrap();
        assert_eq!(info.token, "");
    }

    #[tokio::test]
    async fn force_release_removes_foreign_lock() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());

        let guard = locks.acquire("shop", "deploy", Duration::ZERO).await.unwrap();
        assert!(locks.force_release("shop").unwrap());
        assert!(!locks.force_release("shop").unwrap());
        // The original guard's drop tolerates the missing file.
        drop(guard);
    }
}
