//! Exclusive gates over the shared "last request" timestamp.

use std::fs;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{TtsError, TtsResult};

const LOCK_FILE: &str = "rate_limit.lock";
const STATE_FILE: &str = "last_request.json";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);

/// Named, exclusive lock over a shared request timestamp.
///
/// Holding the returned guard excludes every other holder of the same gate,
/// whether in this process or another.
#[async_trait]
pub trait ClockGate: Send + Sync {
    /// Wait until the gate is free and take it.
    ///
    /// Dropping the returned future before it resolves must not leave the
    /// gate held.
    async fn acquire(&self) -> TtsResult<Box<dyn GateGuard>>;
}

/// Exclusive access to the shared timestamp; released on drop.
pub trait GateGuard: Send {
    /// Start time of the most recent request, in epoch milliseconds.
    fn last_request_ms(&self) -> TtsResult<Option<u64>>;

    /// Record that a request started at `at_ms`.
    fn record_request(&mut self, at_ms: u64) -> TtsResult<()>;
}

/// Default directory for the shared lock and timestamp files.
pub fn default_state_dir() -> TtsResult<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("recap").join("tts"))
        .ok_or(TtsError::NoDataDir)
}

// ============================================================================
// In-process gate
// ============================================================================

/// Gate shared by clones within one process.
#[derive(Debug, Clone, Default)]
pub struct MemoryClockGate {
    state: Arc<Mutex<Option<u64>>>,
}

impl MemoryClockGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate whose last request started at `at_ms`.
    pub fn with_last_request(at_ms: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(Some(at_ms))),
        }
    }

    /// Current timestamp (waits for any holder to release).
    pub async fn last_request_ms(&self) -> Option<u64> {
        *self.state.lock().await
    }
}

struct MemoryGuard {
    state: OwnedMutexGuard<Option<u64>>,
}

#[async_trait]
impl ClockGate for MemoryClockGate {
    async fn acquire(&self) -> TtsResult<Box<dyn GateGuard>> {
        let state = Arc::clone(&self.state).lock_owned().await;
        Ok(Box::new(MemoryGuard { state }))
    }
}

impl GateGuard for MemoryGuard {
    fn last_request_ms(&self) -> TtsResult<Option<u64>> {
        Ok(*self.state)
    }

    fn record_request(&mut self, at_ms: u64) -> TtsResult<()> {
        *self.state = Some(at_ms);
        Ok(())
    }
}

// ============================================================================
// Cross-process gate
// ============================================================================

/// Gate shared by every process pointing at the same directory.
///
/// The lock is a file created with `create_new` holding a token unique to
/// its holder; whoever creates it holds the gate until the guard removes
/// it. A lock file older than `stale_after` is treated as abandoned by a
/// crashed holder and broken. A holder only records a request or removes
/// the lock while the file still carries its token. The timestamp lives in
/// a small JSON file next to it.
#[derive(Debug, Clone)]
pub struct FileClockGate {
    lock_path: PathBuf,
    state_path: PathBuf,
    poll_interval: Duration,
    stale_after: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct SharedState {
    last_request_ms: u64,
}

impl FileClockGate {
    /// Gate whose files live in `dir` (created on first use).
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            lock_path: dir.join(LOCK_FILE),
            state_path: dir.join(STATE_FILE),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Gate in [`default_state_dir`].
    pub fn in_default_dir() -> TtsResult<Self> {
        default_state_dir().map(Self::new)
    }

    /// How often a waiter re-checks the lock.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Age after which a lock file is considered abandoned.
    ///
    /// Must exceed the longest time a holder keeps the gate (the request
    /// interval).
    #[must_use]
    pub const fn with_stale_after(mut self, age: Duration) -> Self {
        self.stale_after = age;
        self
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    fn unavailable(&self, err: &std::io::Error) -> TtsError {
        TtsError::GateUnavailable {
            path: self.lock_path.clone(),
            reason: err.to_string(),
        }
    }

    /// Create the lock file and write `token` into it.
    fn try_create_lock(&self, token: &str) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)?;
        if let Err(e) = file.write_all(token.as_bytes()) {
            drop(file);
            let _ = fs::remove_file(&self.lock_path);
            return Err(e);
        }
        Ok(())
    }

    /// Token of the current lock if it is older than `stale_after`.
    ///
    /// Contents are read before the timestamp: a lock replaced in between
    /// looks fresh, so the token can never belong to a newer holder.
    fn stale_lock_token(&self) -> Option<String> {
        let token = fs::read_to_string(&self.lock_path).ok()?;
        let age = fs::metadata(&self.lock_path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())?;
        (age > self.stale_after).then_some(token)
    }

    /// Remove the abandoned lock carrying `stale`.
    ///
    /// The lock is first renamed aside, which only one breaker can do. If
    /// the file moved aside is not the one judged stale, another holder
    /// took the gate in between and its lock is linked back into place.
    fn break_stale_lock(&self, stale: &str) -> std::io::Result<()> {
        let aside = self
            .lock_path
            .with_extension(format!("lock.{}", lock_token()));
        match fs::rename(&self.lock_path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        }

        let moved = fs::read_to_string(&aside).unwrap_or_default();
        if moved == stale {
            warn!(path = %self.lock_path.display(), "Broke stale rate-limit lock");
        } else if let Err(e) = fs::hard_link(&aside, &self.lock_path) {
            warn!(path = %self.lock_path.display(), error = %e, "Could not restore live rate-limit lock");
        }
        match fs::remove_file(&aside) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Identifies one lock holder: owner pid plus a random nonce.
fn lock_token() -> String {
    format!("{}-{:016x}", std::process::id(), rand::random::<u64>())
}

/// Whether the lock at `path` still carries `token`.
fn holds_lock(path: &Path, token: &str) -> bool {
    fs::read_to_string(path).is_ok_and(|current| current == token)
}

#[async_trait]
impl ClockGate for FileClockGate {
    async fn acquire(&self) -> TtsResult<Box<dyn GateGuard>> {
        if let Some(dir) = self.lock_path.parent() {
            fs::create_dir_all(dir).map_err(|e| self.unavailable(&e))?;
        }

        let token = lock_token();
        loop {
            match self.try_create_lock(&token) {
                Ok(()) => {
                    return Ok(Box::new(FileGuard {
                        lock_path: self.lock_path.clone(),
                        state_path: self.state_path.clone(),
                        token,
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(stale) = self.stale_lock_token() {
                        self.break_stale_lock(&stale)
                            .map_err(|e| self.unavailable(&e))?;
                        continue;
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => return Err(self.unavailable(&e)),
            }
        }
    }
}

struct FileGuard {
    lock_path: PathBuf,
    state_path: PathBuf,
    token: String,
}

impl GateGuard for FileGuard {
    fn last_request_ms(&self) -> TtsResult<Option<u64>> {
        let raw = match fs::read_to_string(&self.state_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<SharedState>(&raw) {
            Ok(state) => Ok(Some(state.last_request_ms)),
            Err(e) => {
                warn!(path = %self.state_path.display(), error = %e, "Ignoring corrupt rate-limit state");
                Ok(None)
            }
        }
    }

    fn record_request(&mut self, at_ms: u64) -> TtsResult<()> {
        if !holds_lock(&self.lock_path, &self.token) {
            return Err(TtsError::GateUnavailable {
                path: self.lock_path.clone(),
                reason: "lock was broken by another process".to_string(),
            });
        }
        let tmp = self
            .state_path
            .with_extension(format!("json.{}.tmp", self.token));
        fs::write(&tmp, serde_json::to_vec(&SharedState { last_request_ms: at_ms })?)?;
        fs::rename(&tmp, &self.state_path)?;
        Ok(())
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        if !holds_lock(&self.lock_path, &self.token) {
            warn!(path = %self.lock_path.display(), "Rate-limit lock was taken over; leaving it");
            return;
        }
        match fs::remove_file(&self.lock_path) {
            Ok(()) => debug!(path = %self.lock_path.display(), "Released rate-limit lock"),
            Err(e) => warn!(path = %self.lock_path.display(), error = %e, "Failed to remove rate-limit lock"),
        }
    }
}
