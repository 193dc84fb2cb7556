//! Activity sources: which method each tracked thread is executing
//!
//! [`MethodTracker`] is the in-process [`ActivitySource`]. Instrumentation
//! registers each method once (this is where the package filter is applied)
//! and attaches each monitored thread once. After that, method entry and exit
//! on the monitored threads are a single atomic store into the thread's slot:
//! the sampling thread reads the slots without taking any lock a monitored
//! thread could be waiting on while it executes methods.
//!
//! Each slot packs the raw and the filtered method into one 64-bit word, so a
//! snapshot never pairs the raw method of one call with the filtered method
//! of another.
//!
//! ```
//! use wattrace::tracker::{ActivitySource, MethodTracker, PackageFilter};
//!
//! let tracker = MethodTracker::new(PackageFilter::new(["com.example"]));
//! let handler = tracker.register("com.example.Server.handle");
//! let parse = tracker.register("org.json.Parser.parse");
//!
//! let worker = tracker.attach("worker-1");
//! let _outer = worker.enter(handler);
//! let _inner = worker.enter(parse);
//!
//! let snapshot = tracker.snapshot();
//! assert_eq!(snapshot[0].raw.name(), Some("org.json.Parser.parse"));
//! assert_eq!(snapshot[0].filtered.name(), Some("com.example.Server.handle"));
//! ```

use crate::activity::MethodIdentifier;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

const FILTERED_MASK: u64 = 0xFFFF_FFFF;

/// Methods executing on one tracked thread at snapshot time
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadActivity {
    pub thread: Arc<str>,
    pub raw: MethodIdentifier,
    pub filtered: MethodIdentifier,
}

/// Source of "which method is active right now" snapshots
pub trait ActivitySource: Send + Sync {
    /// One entry per tracked thread
    fn snapshot(&self) -> Vec<ThreadActivity>;
}

impl<A: ActivitySource + ?Sized> ActivitySource for Arc<A> {
    fn snapshot(&self) -> Vec<ThreadActivity> {
        (**self).snapshot()
    }
}

/// Package prefixes whose methods are reported individually in the filtered view
///
/// An empty filter matches nothing: every filtered identifier is `Excluded`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageFilter {
    prefixes: Vec<String>,
}

impl PackageFilter {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, qualified_name: &str) -> bool {
        self.prefixes.iter().any(|p| qualified_name.starts_with(p.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

impl From<&BTreeSet<String>> for PackageFilter {
    fn from(set: &BTreeSet<String>) -> Self {
        Self::new(set.iter().cloned())
    }
}

/// Registered method, cheap to copy into instrumentation code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodHandle {
    slot: u32,
    in_filter: bool,
}

impl MethodHandle {
    /// Whether the method passes the package filter
    pub fn in_filter(&self) -> bool {
        self.in_filter
    }
}

#[derive(Debug, Default)]
struct MethodTable {
    names: Vec<Arc<str>>,
    by_name: HashMap<Arc<str>, MethodHandle>,
}

#[derive(Debug)]
struct ThreadSlot {
    name: Arc<str>,
    /// raw slot << 32 | filtered slot; slot 0 means none
    word: AtomicU64,
    attached: AtomicBool,
}

/// In-process activity source fed by method entry/exit instrumentation
#[derive(Debug, Default)]
pub struct MethodTracker {
    filter: PackageFilter,
    methods: RwLock<MethodTable>,
    threads: RwLock<Vec<Arc<ThreadSlot>>>,
}

impl MethodTracker {
    pub fn new(filter: PackageFilter) -> Self {
        Self {
            filter,
            methods: RwLock::new(MethodTable::default()),
            threads: RwLock::new(Vec::new()),
        }
    }

    pub fn filter(&self) -> &PackageFilter {
        &self.filter
    }

    /// Register a method by its fully qualified name (idempotent)
    pub fn register(&self, qualified_name: &str) -> MethodHandle {
        if let Some(handle) = self
            .methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_name
            .get(qualified_name)
        {
            return *handle;
        }

        let mut table = self.methods.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = table.by_name.get(qualified_name) {
            return *handle;
        }

        let Ok(slot) = u32::try_from(table.names.len() + 1) else {
            tracing::error!(method = qualified_name, "Method table full, method not tracked");
            return MethodHandle {
                slot: 0,
                in_filter: false,
            };
        };
        let name: Arc<str> = Arc::from(qualified_name);
        let handle = MethodHandle {
            slot,
            in_filter: self.filter.matches(qualified_name),
        };
        table.names.push(Arc::clone(&name));
        table.by_name.insert(name, handle);
        tracing::trace!(method = qualified_name, in_filter = handle.in_filter, "Registered method");
        handle
    }

    /// Start tracking a thread
    ///
    /// The returned handle is meant to stay on that thread; dropping it stops
    /// tracking.
    pub fn attach(&self, thread_name: &str) -> TrackedThread {
        let slot = Arc::new(ThreadSlot {
            name: Arc::from(thread_name),
            word: AtomicU64::new(0),
            attached: AtomicBool::new(true),
        });

        let mut threads = self.threads.write().unwrap_or_else(PoisonError::into_inner);
        threads.retain(|t| t.attached.load(Ordering::Acquire));
        threads.push(Arc::clone(&slot));
        tracing::debug!(thread = thread_name, tracked = threads.len(), "Attached thread");

        TrackedThread { slot }
    }

    /// Number of currently attached threads
    pub fn tracked_threads(&self) -> usize {
        self.threads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| t.attached.load(Ordering::Acquire))
            .count()
    }

    fn resolve(names: &[Arc<str>], slot: u64) -> MethodIdentifier {
        match slot {
            0 => MethodIdentifier::Excluded,
            n => names
                .get((n - 1) as usize)
                .map(|name| MethodIdentifier::Present(Arc::clone(name)))
                .unwrap_or(MethodIdentifier::Excluded),
        }
    }
}

impl ActivitySource for MethodTracker {
    fn snapshot(&self) -> Vec<ThreadActivity> {
        let threads = self.threads.read().unwrap_or_else(PoisonError::into_inner);
        let methods = self.methods.read().unwrap_or_else(PoisonError::into_inner);

        threads
            .iter()
            .filter(|t| t.attached.load(Ordering::Acquire))
            .map(|t| {
                let word = t.word.load(Ordering::Acquire);
                ThreadActivity {
                    thread: Arc::clone(&t.name),
                    raw: Self::resolve(&methods.names, word >> 32),
                    filtered: Self::resolve(&methods.names, word & FILTERED_MASK),
                }
            })
            .collect()
    }
}

/// A thread attached to a [`MethodTracker`]
#[derive(Debug)]
pub struct TrackedThread {
    slot: Arc<ThreadSlot>,
}

impl TrackedThread {
    /// Mark `method` as executing until the returned guard is dropped
    ///
    /// Entering a method outside the package filter keeps the caller's
    /// filtered method, so the filtered view shows the nearest filtered frame.
    pub fn enter(&self, method: MethodHandle) -> ActiveMethod<'_> {
        let previous = self.slot.word.load(Ordering::Relaxed);
        let filtered = if method.in_filter {
            u64::from(method.slot)
        } else {
            previous & FILTERED_MASK
        };
        self.slot
            .word
            .store((u64::from(method.slot) << 32) | filtered, Ordering::Release);
        ActiveMethod {
            slot: &self.slot,
            previous,
        }
    }

    pub fn name(&self) -> &str {
        &self.slot.name
    }
}

impl Drop for TrackedThread {
    fn drop(&mut self) {
        self.slot.attached.store(false, Ordering::Release);
    }
}

/// Guard restoring the caller's method on drop
#[derive(Debug)]
#[must_use = "the method is only active while the guard is alive"]
pub struct ActiveMethod<'a> {
    slot: &'a ThreadSlot,
    previous: u64,
}

impl Drop for ActiveMethod<'_> {
    fn drop(&mut self) {
        self.slot.word.store(self.previous, Ordering::Release);
    }
}
