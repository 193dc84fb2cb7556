//! Method identifiers and the shared activity buffer
//!
//! One [`Activity`] is created per sampling tick per tracked thread that was
//! executing a known method. Activities are appended by the sampling thread
//! and read (or drained) by the reporting thread.

use crate::data_point::DataPoint;
use chrono::{DateTime, Local};
use crossbeam::channel::{self, Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identifier of the method a thread was executing
///
/// `Excluded` means no identifier survived package filtering. Consumers have
/// to handle it explicitly; it is never stored in an aggregation map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodIdentifier {
    Present(Arc<str>),
    Excluded,
}

impl MethodIdentifier {
    pub fn present(name: impl Into<Arc<str>>) -> Self {
        MethodIdentifier::Present(name.into())
    }

    /// Qualified name, if any
    pub fn name(&self) -> Option<&str> {
        match self {
            MethodIdentifier::Present(name) => Some(name.as_ref()),
            MethodIdentifier::Excluded => None,
        }
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self, MethodIdentifier::Excluded)
    }
}

impl fmt::Display for MethodIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodIdentifier::Present(name) => f.write_str(name.as_ref()),
            MethodIdentifier::Excluded => f.write_str("<excluded>"),
        }
    }
}

/// Energy attributed to one thread's active method during one tick
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    /// Name of the tracked thread
    pub thread: Arc<str>,
    /// Fully qualified identifier of the executing method
    pub raw: MethodIdentifier,
    /// Identifier collapsed by the package filter
    pub filtered: MethodIdentifier,
    /// Energy delta of the tick, in Joules
    pub energy: DataPoint,
    /// When the power sample behind this activity was taken
    pub timestamp: DateTime<Local>,
}

impl Activity {
    /// Identifier for the raw (`false`) or filtered (`true`) view
    pub fn identifier(&self, filtered: bool) -> &MethodIdentifier {
        if filtered {
            &self.filtered
        } else {
            &self.raw
        }
    }
}

/// Append-only activity buffer shared between sampling and reporting
///
/// `snapshot()` is non-destructive; `drain()` is the only operation that
/// removes records. Records are never dropped: once `flush_threshold`
/// undrained activities have accumulated, a flush request is raised on
/// [`ActivityLog::flush_requests`] so the reporting side drains early.
#[derive(Debug)]
pub struct ActivityLog {
    records: Mutex<Vec<Activity>>,
    flush_threshold: usize,
    flush_tx: Sender<()>,
    flush_rx: Receiver<()>,
    total_pushed: AtomicU64,
    total_drained: AtomicU64,
    flush_requests: AtomicU64,
}

impl ActivityLog {
    /// Create a log that requests a flush at `flush_threshold` undrained activities
    ///
    /// # Panics
    ///
    /// Panics if flush_threshold is 0.
    pub fn new(flush_threshold: usize) -> Self {
        assert!(flush_threshold > 0, "Activity log flush threshold must be > 0");
        let (flush_tx, flush_rx) = channel::bounded(1);
        Self {
            records: Mutex::new(Vec::new()),
            flush_threshold,
            flush_tx,
            flush_rx,
            total_pushed: AtomicU64::new(0),
            total_drained: AtomicU64::new(0),
            flush_requests: AtomicU64::new(0),
        }
    }

    fn records(&self) -> MutexGuard<'_, Vec<Activity>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an activity
    pub fn push(&self, activity: Activity) {
        self.total_pushed.fetch_add(1, Ordering::Relaxed);

        let len = {
            let mut records = self.records();
            records.push(activity);
            records.len()
        };

        // At most one request is pending; a full channel means one is already queued
        if len >= self.flush_threshold && self.flush_tx.try_send(()).is_ok() {
            self.flush_requests.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(len, threshold = self.flush_threshold, "Activity log flush requested");
        }
    }

    /// Receiver woken when the log reaches its flush threshold
    pub fn flush_requests(&self) -> Receiver<()> {
        self.flush_rx.clone()
    }

    /// Copy of all undrained activities, in insertion order
    pub fn snapshot(&self) -> Vec<Activity> {
        self.records().clone()
    }

    /// Remove and return all undrained activities, in insertion order
    pub fn drain(&self) -> Vec<Activity> {
        let drained = std::mem::take(&mut *self.records());
        self.total_drained
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        drained
    }

    /// Put drained activities back in front of anything pushed since
    pub fn requeue(&self, mut drained: Vec<Activity>) {
        if drained.is_empty() {
            return;
        }
        let count = drained.len() as u64;
        {
            let mut records = self.records();
            drained.append(&mut records);
            *records = drained;
        }
        self.total_drained.fetch_sub(count, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> LogStats {
        LogStats {
            total_pushed: self.total_pushed.load(Ordering::Relaxed),
            total_drained: self.total_drained.load(Ordering::Relaxed),
            flush_requests: self.flush_requests.load(Ordering::Relaxed),
            current_size: self.len(),
            flush_threshold: self.flush_threshold,
        }
    }
}

/// Activity log statistics
#[derive(Debug, Clone, Copy)]
pub struct LogStats {
    pub total_pushed: u64,
    pub total_drained: u64,
    pub flush_requests: u64,
    pub current_size: usize,
    pub flush_threshold: usize,
}
