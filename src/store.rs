//! Aggregation of energy deltas into per-method totals
//!
//! Two maps are kept, keyed by the raw and by the filtered method identifier.
//! A grand total is maintained next to them with an atomic read-modify-write,
//! so it can be read at any time without touching the maps.
//!
//! Every recorded activity adds its energy to the total exactly once, through
//! its raw identifier: at quiescence `total_energy() == sum(snapshot(false))`.

use crate::activity::{Activity, MethodIdentifier};
use crate::data_point::{DataPoint, JOULE};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Method identifier → cumulative energy
pub type AggregationMap = HashMap<String, DataPoint>;

/// Name of the total energy data point
pub const TOTAL_ENERGY: &str = "Total";

/// Concurrency-safe per-method energy store of one monitored process
#[derive(Debug)]
pub struct EnergyStore {
    pid: u32,
    raw: RwLock<AggregationMap>,
    filtered: RwLock<AggregationMap>,
    /// f64 bits of the total in Joules
    total_bits: AtomicU64,
    created: DateTime<Local>,
}

impl EnergyStore {
    /// Empty store for process `pid`
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            raw: RwLock::new(HashMap::new()),
            filtered: RwLock::new(HashMap::new()),
            total_bits: AtomicU64::new(0f64.to_bits()),
            created: Local::now(),
        }
    }

    /// Store for the current process
    pub fn for_current_process() -> Self {
        Self::new(std::process::id())
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Merge one activity into both views and the total
    ///
    /// Negative or non-finite deltas are ignored.
    pub fn record(&self, activity: &Activity) {
        let delta = &activity.energy;
        if !delta.value().is_finite() || delta.value() < 0.0 {
            tracing::warn!(value = delta.value(), "Ignoring invalid energy delta");
            return;
        }

        if Self::merge_into(&self.raw, &activity.raw, delta) {
            self.add_total(delta.value());
        }
        Self::merge_into(&self.filtered, &activity.filtered, delta);
    }

    fn merge_into(map: &RwLock<AggregationMap>, key: &MethodIdentifier, delta: &DataPoint) -> bool {
        let Some(name) = key.name() else {
            return false;
        };

        let mut map = map.write().unwrap_or_else(PoisonError::into_inner);
        match map.get_mut(name) {
            Some(current) => *current = current.merge(delta),
            None => {
                map.insert(name.to_string(), delta.renamed(name));
            }
        }
        true
    }

    fn add_total(&self, joules: f64) {
        // Closure always returns Some, so fetch_update cannot fail
        let _ = self
            .total_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + joules).to_bits())
            });
    }

    /// Copy of the filtered (`true`) or raw (`false`) aggregation map
    pub fn snapshot(&self, filtered: bool) -> AggregationMap {
        let map = if filtered { &self.filtered } else { &self.raw };
        map.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// All attributed energy, in Joules
    pub fn total_energy(&self) -> DataPoint {
        let joules = f64::from_bits(self.total_bits.load(Ordering::Acquire));
        DataPoint::new(TOTAL_ENERGY, joules, JOULE, self.created)
    }
}
