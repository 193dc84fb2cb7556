use crate::activity::{Activity, ActivityLog};
use crate::calibration::IdleBaseline;
use crate::data_point::DataPoint;
use crate::error::SampleUnavailable;
use crate::power::PowerSource;
use crate::store::EnergyStore;
use crate::tracker::ActivitySource;
use std::sync::Arc;
use std::time::Duration;

/// Name of the per-tick energy delta before it is keyed by method
pub const ENERGY_DELTA: &str = "Energy";

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Power was read and attributed to `activities` threads
    Attributed {
        delta_watts: f64,
        joules: f64,
        activities: usize,
    },
    /// No power reading this tick; nothing was recorded
    Skipped(SampleUnavailable),
}

/// Counters over the ticks an engine has run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickStats {
    pub ticks: u64,
    pub skipped: u64,
    pub activities: u64,
    /// Energy attributed per thread, summed over all activities
    pub attributed_joules: f64,
}

impl TickStats {
    /// Share of ticks without a power reading
    pub fn skip_rate(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.skipped as f64 / self.ticks as f64
        }
    }
}

/// Activities measured by one tick, not yet recorded
#[derive(Debug)]
pub struct Measurement {
    pub delta_watts: f64,
    pub joules: f64,
    pub activities: Vec<Activity>,
}

/// Correlates power readings with active methods, one tick at a time
///
/// Every tracked thread with a present raw identifier receives the whole
/// tick's energy; energy is not split across threads. Activities are kept in
/// the log only when one is given (per-sample output).
pub struct AttributionEngine {
    power: Arc<dyn PowerSource>,
    activity: Arc<dyn ActivitySource>,
    baseline: IdleBaseline,
    log: Option<Arc<ActivityLog>>,
    store: Arc<EnergyStore>,
    stats: TickStats,
}

impl AttributionEngine {
    pub fn new(
        power: Arc<dyn PowerSource>,
        activity: Arc<dyn ActivitySource>,
        baseline: IdleBaseline,
        log: Option<Arc<ActivityLog>>,
        store: Arc<EnergyStore>,
    ) -> Self {
        Self {
            power,
            activity,
            baseline,
            log,
            store,
            stats: TickStats::default(),
        }
    }

    pub fn baseline(&self) -> IdleBaseline {
        self.baseline
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    /// Measure and record one tick covering `elapsed`
    pub fn tick(&mut self, elapsed: Duration) -> TickOutcome {
        match self.measure(elapsed) {
            Ok(measurement) => self.commit(measurement),
            Err(e) => self.skip(e),
        }
    }

    /// Read power and the active methods without recording anything
    pub fn measure(&self, elapsed: Duration) -> Result<Measurement, SampleUnavailable> {
        let sample = self.power.pull()?;
        let delta_watts = self.baseline.delta(sample.watts);
        let joules = delta_watts * elapsed.as_secs_f64();

        let activities: Vec<Activity> = self
            .activity
            .snapshot()
            .into_iter()
            .filter(|thread| !thread.raw.is_excluded())
            .map(|thread| Activity {
                thread: thread.thread,
                raw: thread.raw,
                filtered: thread.filtered,
                energy: DataPoint::joules(ENERGY_DELTA, joules, sample.timestamp),
                timestamp: sample.timestamp,
            })
            .collect();

        tracing::trace!(
            raw_watts = sample.watts,
            delta_watts,
            joules,
            threads = activities.len(),
            "Tick measured"
        );

        Ok(Measurement {
            delta_watts,
            joules,
            activities,
        })
    }

    /// Record a measurement into the store and, if kept, the activity log
    pub fn commit(&mut self, measurement: Measurement) -> TickOutcome {
        let count = measurement.activities.len();
        for activity in measurement.activities {
            self.store.record(&activity);
            if let Some(log) = &self.log {
                log.push(activity);
            }
        }

        self.stats.ticks += 1;
        self.stats.activities += count as u64;
        self.stats.attributed_joules += measurement.joules * count as f64;

        TickOutcome::Attributed {
            delta_watts: measurement.delta_watts,
            joules: measurement.joules,
            activities: count,
        }
    }

    /// Count a tick whose power read failed
    pub fn skip(&mut self, reason: SampleUnavailable) -> TickOutcome {
        tracing::warn!("Skipping tick: {}", reason);
        self.stats.ticks += 1;
        self.stats.skipped += 1;
        TickOutcome::Skipped(reason)
    }
}
