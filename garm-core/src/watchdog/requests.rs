//! Executor -> Watchdog request channel
//!
//! A single JSON array on disk. The producer appends under a lock file and
//! rewrites through a temp file and atomic rename, so a crash leaves either
//! the old file or the new file, never a partial write. The consumer drains
//! the whole array under the same lock and truncates to `[]`. Delivery is
//! at-least-once; the state store's `order_id` uniqueness makes `add_order`
//! idempotent.

use super::state::WatchedOrder;
use crate::core::QueueError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A lock held for longer than this is assumed to belong to a crashed
/// process and is broken.
const STALE_LOCK_AGE: Duration = Duration::from_secs(60);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const LOCK_WAIT: Duration = Duration::from_secs(10);

/// What the producer wants the watchdog to do
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum RequestPayload {
    /// Take ownership of a freshly placed entry order
    AddOrder(Box<WatchedOrder>),
    /// Stop tracking an order; live exit legs are cancelled first
    RemoveOrder { order_id: String },
    /// Market-close the position behind an order, then stop tracking it
    ManualClose { order_id: String },
}

/// One queued request as it appears on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    #[serde(flatten)]
    pub payload: RequestPayload,
    pub timestamp: DateTime<Utc>,
}

impl QueuedRequest {
    pub fn new(payload: RequestPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Result of draining the queue: parsed requests in order, plus raw items
/// that failed to parse (logged, surfaced, and removed so a poison message
/// never halts the drain).
#[derive(Debug, Default)]
pub struct Drained {
    pub requests: Vec<QueuedRequest>,
    pub poison: Vec<serde_json::Value>,
}

/// Guard for the sibling `.lock` file; removes it on drop.
struct QueueLock {
    path: PathBuf,
}

impl QueueLock {
    fn acquire(queue_path: &Path) -> Result<Self, QueueError> {
        let path = lock_path(queue_path);
        let start = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path) {
                        warn!("breaking stale queue lock at {}", path.display());
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if start.elapsed() >= LOCK_WAIT {
                        return Err(QueueError::LockTimeout {
                            path: path.display().to_string(),
                            waited: start.elapsed(),
                        });
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for QueueLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_path(queue_path: &Path) -> PathBuf {
    let mut name = queue_path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    queue_path.with_file_name(name)
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| {
            modified
                .elapsed()
                .map(|age| age > STALE_LOCK_AGE)
                .unwrap_or(false)
        })
        .unwrap_or(false)
}

/// The durable one-way queue between the two processes.
pub struct RequestQueue {
    path: PathBuf,
}

impl RequestQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_raw(&self) -> Result<Vec<serde_json::Value>, QueueError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_atomic(&self, items: &[serde_json::Value]) -> Result<(), QueueError> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(items)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Producer side: append one request. Read-modify-write happens under
    /// the lock; the rewrite is atomic.
    pub fn enqueue(&self, payload: RequestPayload) -> Result<(), QueueError> {
        let _lock = QueueLock::acquire(&self.path)?;
        let mut items = self.read_raw()?;
        items.push(serde_json::to_value(QueuedRequest::new(payload))?);
        self.write_atomic(&items)?;
        debug!(queued = items.len(), "request enqueued");
        Ok(())
    }

    /// Consumer side: take every pending request and truncate the queue to
    /// `[]`. Unparseable items are returned separately and removed with
    /// the rest; a poison message must never wedge the channel.
    pub fn drain(&self) -> Result<Drained, QueueError> {
        let _lock = QueueLock::acquire(&self.path)?;
        let items = self.read_raw()?;
        if items.is_empty() {
            // first drain also materializes the empty-array file
            if !self.path.exists() {
                self.write_atomic(&[])?;
            }
            return Ok(Drained::default());
        }

        let mut drained = Drained::default();
        for item in items {
            match serde_json::from_value::<QueuedRequest>(item.clone()) {
                Ok(request) => drained.requests.push(request),
                Err(e) => {
                    warn!("dropping unparseable queue item ({e}): {item}");
                    drained.poison.push(item);
                }
            }
        }
        self.write_atomic(&[])?;
        Ok(drained)
    }
}
