//! The transfer session store (C4): per-file state, progress, rate, and
//! listeners, plus session-level aggregation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::time::now_timestamp;

/// Default minimum interval between aggregate listener notifications.
pub const DEFAULT_AGGREGATE_THROTTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

/// Per-file transfer status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferStatus {
    pub file_path: PathBuf,
    pub file_name: String,
    pub state: FileState,
    pub bytes_total: u64,
    pub bytes_completed: u64,
    pub transfer_rate: f64,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub error: Option<String>,
    pub retry_count: u32,

    #[serde(skip)]
    last_sample_at: Option<Instant>,
    #[serde(skip)]
    last_sample_bytes: u64,
}

impl TransferStatus {
    fn new(file_path: PathBuf, file_name: String, bytes_total: u64) -> Self {
        Self {
            file_path,
            file_name,
            state: FileState::Pending,
            bytes_total,
            bytes_completed: 0,
            transfer_rate: 0.0,
            start_time: None,
            end_time: None,
            error: None,
            retry_count: 0,
            last_sample_at: None,
            last_sample_bytes: 0,
        }
    }
}

/// Session-level aggregates, derived from per-file statuses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionTransferStatus {
    pub total_files: u64,
    pub completed_files: u64,
    pub failed_files: u64,
    pub total_bytes: u64,
    pub bytes_completed: u64,
    pub overall_progress: f64,
    pub current_file: Option<TransferStatus>,
}

/// Events emitted to registered listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    FileChanged(TransferStatus),
    AggregateChanged(SessionTransferStatus),
}

struct Inner {
    statuses: HashMap<PathBuf, TransferStatus>,
    order: Vec<PathBuf>,
    next_pending_cursor: usize,
    completed_files: u64,
    failed_files: u64,
    listeners: Vec<mpsc::UnboundedSender<TransferEvent>>,
    last_aggregate_notify: Option<Instant>,
    aggregate_throttle: Duration,
}

/// Owns all per-file statuses for one session's lifetime; serializes all
/// mutations behind an internal mutex and fans transitions out to
/// registered listeners.
#[derive(Clone)]
pub struct TransferStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for TransferStore {
    fn default() -> Self {
        Self::new(DEFAULT_AGGREGATE_THROTTLE)
    }
}

impl TransferStore {
    pub fn new(aggregate_throttle: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                statuses: HashMap::new(),
                order: Vec::new(),
                next_pending_cursor: 0,
                completed_files: 0,
                failed_files: 0,
                listeners: Vec::new(),
                last_aggregate_notify: None,
                aggregate_throttle,
            })),
        }
    }

    /// Registers a new listener; returns the receiving half of its
    /// channel. Listener sends never block the caller; a receiver that's
    /// been dropped is pruned the next time an event is broadcast.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransferEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().listeners.push(tx);
        rx
    }

    /// Registers `path` as pending; fails if it is already known.
    pub fn add_file(&self, path: PathBuf, file_name: String, bytes_total: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.statuses.contains_key(&path) {
            return Err(Error::Internal(format!(
                "{} is already registered",
                path.display()
            )));
        }
        inner.order.push(path.clone());
        let status = TransferStatus::new(path.clone(), file_name, bytes_total);
        inner.statuses.insert(path, status);
        Ok(())
    }

    /// Returns the next file still in `Pending` state, in registration
    /// order, without transitioning it. Returns `None` once every
    /// registered file has left `Pending`.
    pub fn next_pending(&self) -> Option<TransferStatus> {
        let mut inner = self.inner.lock();
        while inner.next_pending_cursor < inner.order.len() {
            let path = inner.order[inner.next_pending_cursor].clone();
            let is_pending = inner
                .statuses
                .get(&path)
                .map(|s| s.state == FileState::Pending)
                .unwrap_or(false);
            if is_pending {
                return inner.statuses.get(&path).cloned();
            }
            inner.next_pending_cursor += 1;
        }
        None
    }

    /// `pending -> active`.
    pub fn start(&self, path: &Path) -> Result<()> {
        let (event, aggregate) = {
            let mut inner = self.inner.lock();
            let status = get_mut(&mut inner.statuses, path)?;
            if status.state != FileState::Pending {
                return Err(Error::Internal(format!(
                    "cannot start {}: not pending (state = {:?})",
                    path.display(),
                    status.state
                )));
            }
            status.state = FileState::Active;
            status.start_time = Some(now_timestamp());
            status.last_sample_at = Some(Instant::now());
            status.last_sample_bytes = 0;
            let event = TransferEvent::FileChanged(status.clone());
            let aggregate = snapshot_aggregate(&inner);
            (event, aggregate)
        };
        self.emit_file_event(event);
        self.maybe_emit_aggregate(aggregate);
        Ok(())
    }

    /// Only legal while `active`; `bytes_completed` must be monotone
    /// non-decreasing and at most the file's total size.
    pub fn update_progress(&self, path: &Path, bytes_completed: u64) -> Result<()> {
        let (event, aggregate) = {
            let mut inner = self.inner.lock();
            let status = get_mut(&mut inner.statuses, path)?;
            if status.state != FileState::Active {
                return Err(Error::Internal(format!(
                    "cannot update progress for {}: not active",
                    path.display()
                )));
            }
            if bytes_completed < status.bytes_completed {
                return Err(Error::Internal(
                    "bytes_completed must not decrease".into(),
                ));
            }
            if bytes_completed > status.bytes_total {
                return Err(Error::Internal(
                    "bytes_completed must not exceed the file size".into(),
                ));
            }

            let now = Instant::now();
            if let Some(last_at) = status.last_sample_at {
                let elapsed = now.duration_since(last_at).as_secs_f64();
                if elapsed > 0.0 {
                    let delta = bytes_completed.saturating_sub(status.last_sample_bytes) as f64;
                    let instantaneous = delta / elapsed;
                    // Exponential moving average, alpha = 0.25.
                    status.transfer_rate = if status.transfer_rate == 0.0 {
                        instantaneous
                    } else {
                        status.transfer_rate * 0.75 + instantaneous * 0.25
                    };
                }
            }
            status.bytes_completed = bytes_completed;
            status.last_sample_at = Some(now);
            status.last_sample_bytes = bytes_completed;

            let event = TransferEvent::FileChanged(status.clone());
            let aggregate = snapshot_aggregate(&inner);
            (event, aggregate)
        };
        self.emit_file_event(event);
        self.maybe_emit_aggregate(aggregate);
        Ok(())
    }

    /// `active -> completed`.
    pub fn complete(&self, path: &Path) -> Result<()> {
        let (event, aggregate) = {
            let mut inner = self.inner.lock();
            let status = get_mut(&mut inner.statuses, path)?;
            if status.state != FileState::Active {
                return Err(Error::Internal(format!(
                    "cannot complete {}: not active",
                    path.display()
                )));
            }
            status.state = FileState::Completed;
            status.end_time = Some(now_timestamp());
            inner.completed_files += 1;
            let status_clone = inner.statuses.get(path).unwrap().clone();
            let event = TransferEvent::FileChanged(status_clone);
            let aggregate = snapshot_aggregate(&inner);
            (event, aggregate)
        };
        self.emit_file_event(event);
        self.maybe_emit_aggregate(aggregate);
        Ok(())
    }

    /// `active|pending -> failed`.
    pub fn fail(&self, path: &Path, err: &Error) -> Result<()> {
        let (event, aggregate) = {
            let mut inner = self.inner.lock();
            let status = get_mut(&mut inner.statuses, path)?;
            if !matches!(status.state, FileState::Pending | FileState::Active) {
                return Err(Error::Internal(format!(
                    "cannot fail {}: state = {:?}",
                    path.display(),
                    status.state
                )));
            }
            status.state = FileState::Failed;
            status.end_time = Some(now_timestamp());
            status.error = Some(err.to_string());
            inner.failed_files += 1;
            let status_clone = inner.statuses.get(path).unwrap().clone();
            let event = TransferEvent::FileChanged(status_clone);
            let aggregate = snapshot_aggregate(&inner);
            (event, aggregate)
        };
        self.emit_file_event(event);
        self.maybe_emit_aggregate(aggregate);
        Ok(())
    }

    /// `active -> cancelled`.
    pub fn cancel(&self, path: &Path) -> Result<()> {
        let (event, aggregate) = {
            let mut inner = self.inner.lock();
            let status = get_mut(&mut inner.statuses, path)?;
            if status.state != FileState::Active {
                return Err(Error::Internal(format!(
                    "cannot cancel {}: not active",
                    path.display()
                )));
            }
            status.state = FileState::Cancelled;
            status.end_time = Some(now_timestamp());
            let status_clone = inner.statuses.get(path).unwrap().clone();
            let event = TransferEvent::FileChanged(status_clone);
            let aggregate = snapshot_aggregate(&inner);
            (event, aggregate)
        };
        self.emit_file_event(event);
        self.maybe_emit_aggregate(aggregate);
        Ok(())
    }

    pub fn status(&self, path: &Path) -> Option<TransferStatus> {
        self.inner.lock().statuses.get(path).cloned()
    }

    pub fn aggregate(&self) -> SessionTransferStatus {
        snapshot_aggregate(&self.inner.lock())
    }

    fn emit_file_event(&self, event: TransferEvent) {
        let mut inner = self.inner.lock();
        inner.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn maybe_emit_aggregate(&self, aggregate: SessionTransferStatus) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let should_emit = match inner.last_aggregate_notify {
            None => true,
            Some(last) => now.duration_since(last) >= inner.aggregate_throttle,
        };
        if !should_emit {
            return;
        }
        inner.last_aggregate_notify = Some(now);
        let event = TransferEvent::AggregateChanged(aggregate);
        inner.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn get_mut<'a>(
    statuses: &'a mut HashMap<PathBuf, TransferStatus>,
    path: &Path,
) -> Result<&'a mut TransferStatus> {
    statuses
        .get_mut(path)
        .ok_or_else(|| Error::Internal(format!("{} is not registered", path.display())))
}

fn snapshot_aggregate(inner: &Inner) -> SessionTransferStatus {
    let total_files = inner.order.len() as u64;
    let total_bytes: u64 = inner.statuses.values().map(|s| s.bytes_total).sum();
    let bytes_completed: u64 = inner.statuses.values().map(|s| s.bytes_completed).sum();
    let current_file = inner
        .statuses
        .values()
        .find(|s| s.state == FileState::Active)
        .cloned();
    let overall_progress = if total_bytes == 0 {
        if total_files == 0 {
            0.0
        } else {
            inner.completed_files as f64 / total_files as f64
        }
    } else {
        bytes_completed as f64 / total_bytes as f64
    };

    SessionTransferStatus {
        total_files,
        completed_files: inner.completed_files,
        failed_files: inner.failed_files,
        total_bytes,
        bytes_completed,
        overall_progress,
        current_file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::thread::sleep;

    fn path(name: &str) -> PathBuf {
        PathBuf::from(name)
    }

    #[test]
    fn full_lifecycle_transitions_and_counters() {
        let store = TransferStore::default();
        store.add_file(path("a"), "a".into(), 100).unwrap();
        store.start(&path("a")).unwrap();
        store.update_progress(&path("a"), 50).unwrap();
        store.update_progress(&path("a"), 100).unwrap();
        store.complete(&path("a")).unwrap();

        let status = store.status(&path("a")).unwrap();
        assert_eq!(status.state, FileState::Completed);
        assert_eq!(status.bytes_completed, 100);

        let aggregate = store.aggregate();
        assert_eq!(aggregate.completed_files, 1);
        assert_eq!(aggregate.failed_files, 0);
    }

    #[test]
    fn duplicate_add_file_fails() {
        let store = TransferStore::default();
        store.add_file(path("a"), "a".into(), 10).unwrap();
        assert!(store.add_file(path("a"), "a".into(), 10).is_err());
    }

    #[test]
    fn next_pending_advances_in_registration_order() {
        let store = TransferStore::default();
        store.add_file(path("a"), "a".into(), 1).unwrap();
        store.add_file(path("b"), "b".into(), 1).unwrap();

        let first = store.next_pending().unwrap();
        assert_eq!(first.file_path, path("a"));
        store.start(&path("a")).unwrap();
        store.update_progress(&path("a"), 1).unwrap();
        store.complete(&path("a")).unwrap();

        let second = store.next_pending().unwrap();
        assert_eq!(second.file_path, path("b"));
        store.start(&path("b")).unwrap();
        store.update_progress(&path("b"), 1).unwrap();
        store.complete(&path("b")).unwrap();

        assert!(store.next_pending().is_none());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let store = TransferStore::default();
        store.add_file(path("a"), "a".into(), 10).unwrap();
        // Can't complete before starting.
        assert!(store.complete(&path("a")).is_err());
        // Can't update progress before starting.
        assert!(store.update_progress(&path("a"), 1).is_err());

        store.start(&path("a")).unwrap();
        // Can't start twice.
        assert!(store.start(&path("a")).is_err());
    }

    #[test]
    fn bytes_completed_must_not_decrease_or_exceed_total() {
        let store = TransferStore::default();
        store.add_file(path("a"), "a".into(), 10).unwrap();
        store.start(&path("a")).unwrap();
        store.update_progress(&path("a"), 5).unwrap();
        assert!(store.update_progress(&path("a"), 4).is_err());
        assert!(store.update_progress(&path("a"), 11).is_err());
    }

    #[test]
    fn one_failure_does_not_block_other_files() {
        let store = TransferStore::default();
        store.add_file(path("a"), "a".into(), 10).unwrap();
        store.add_file(path("b"), "b".into(), 10).unwrap();

        store.start(&path("a")).unwrap();
        store
            .fail(&path("a"), &Error::TransportFailure("boom".into()))
            .unwrap();

        let next = store.next_pending().unwrap();
        assert_eq!(next.file_path, path("b"));

        let aggregate = store.aggregate();
        assert_eq!(aggregate.failed_files, 1);
        assert_eq!(aggregate.completed_files, 0);
    }

    #[test]
    fn listener_receives_file_and_aggregate_events() {
        let store = TransferStore::default();
        let mut rx = store.subscribe();
        store.add_file(path("a"), "a".into(), 10).unwrap();
        store.start(&path("a")).unwrap();

        let first = rx.try_recv().unwrap();
        assert!(matches!(first, TransferEvent::FileChanged(_)));
        let second = rx.try_recv().unwrap();
        assert!(matches!(second, TransferEvent::AggregateChanged(_)));
    }

    #[test]
    fn aggregate_notifications_are_throttled() {
        let store = TransferStore::new(Duration::from_millis(200));
        let mut rx = store.subscribe();
        store.add_file(path("a"), "a".into(), 100).unwrap();
        store.start(&path("a")).unwrap();
        // Drain the file-changed + first aggregate event from `start`.
        let _ = rx.try_recv();
        let _ = rx.try_recv();

        store.update_progress(&path("a"), 10).unwrap();
        store.update_progress(&path("a"), 20).unwrap();
        store.update_progress(&path("a"), 30).unwrap();

        // Each update_progress also emits a FileChanged; count only
        // AggregateChanged events observed immediately after the burst.
        let mut aggregate_count = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TransferEvent::AggregateChanged(_)) {
                aggregate_count += 1;
            }
        }
        assert_eq!(aggregate_count, 0, "throttle window has not elapsed yet");

        sleep(Duration::from_millis(250));
        store.update_progress(&path("a"), 40).unwrap();
        let mut saw_aggregate = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TransferEvent::AggregateChanged(_)) {
                saw_aggregate = true;
            }
        }
        assert!(saw_aggregate, "expected an aggregate event after the throttle window");
    }
}
