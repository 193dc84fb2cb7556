//! Idle-power calibration
//!
//! Before attribution starts, `init_cycles` readings are taken at
//! `sampling_interval_for_init_ms` spacing. The leading share configured by
//! `discard_percentage` is dropped as warm-up noise and the rest is averaged
//! into the [`IdleBaseline`] that every later tick subtracts.

use crate::config::MonitorConfig;
use crate::error::{ConfigurationError, Result, SampleUnavailable};
use crate::power::PowerSource;
use std::thread;
use std::time::Duration;

/// Average power draw of the system at rest
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleBaseline {
    pub power_in_watts: f64,
}

impl IdleBaseline {
    pub fn new(power_in_watts: f64) -> Self {
        Self { power_in_watts }
    }

    /// Power above the baseline, floored at zero
    pub fn delta(&self, raw_watts: f64) -> f64 {
        (raw_watts - self.power_in_watts).max(0.0)
    }
}

/// Number of leading samples dropped: `round(cycles * percentage / 100)`
pub fn discard_count(cycles: u32, discard_percentage: f64) -> usize {
    let count = (f64::from(cycles) * discard_percentage / 100.0).round();
    if count <= 0.0 {
        0
    } else {
        (count as usize).min(cycles as usize)
    }
}

#[derive(Debug, Clone)]
pub struct Calibrator {
    cycles: u32,
    interval: Duration,
    discard_percentage: f64,
    calm_down: Duration,
}

impl Calibrator {
    /// Create a calibrator
    ///
    /// # Panics
    ///
    /// Panics if `cycles` is 0.
    pub fn new(cycles: u32, interval: Duration, discard_percentage: f64, calm_down: Duration) -> Self {
        assert!(cycles > 0, "Calibration needs at least one cycle");
        Self {
            cycles,
            interval,
            discard_percentage,
            calm_down,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.init_cycles,
            config.sampling_interval_for_init(),
            config.discard_percentage,
            config.calm_down_interval(),
        )
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Measure the idle baseline of `source`
    ///
    /// Failed reads are logged and leave no sample behind; they are not
    /// retried. Fails if every read failed or nothing survives the discard.
    pub fn calibrate<S: PowerSource + ?Sized>(&self, source: &S) -> Result<IdleBaseline> {
        tracing::info!(
            cycles = self.cycles,
            interval_ms = self.interval.as_millis() as u64,
            "Calibrating idle power of {}",
            source.describe()
        );

        let mut samples = Vec::with_capacity(self.cycles as usize);
        let mut last_error: Option<SampleUnavailable> = None;

        for cycle in 0..self.cycles {
            if cycle > 0 {
                thread::sleep(self.interval);
            }
            match source.pull() {
                Ok(sample) => {
                    tracing::debug!(cycle, watts = sample.watts, "Calibration sample");
                    samples.push(sample.watts);
                }
                Err(e) => {
                    tracing::warn!(cycle, "Calibration sample unavailable: {}", e);
                    last_error = Some(e);
                }
            }
        }

        let baseline = self.baseline_from(&samples, last_error)?;
        tracing::info!("Idle power is {:.3} W", baseline.power_in_watts);

        if !self.calm_down.is_zero() {
            tracing::debug!("Calming down for {:?}", self.calm_down);
            thread::sleep(self.calm_down);
        }
        Ok(baseline)
    }

    /// Average of `samples` after dropping the warm-up share
    fn baseline_from(
        &self,
        samples: &[f64],
        last_error: Option<SampleUnavailable>,
    ) -> Result<IdleBaseline> {
        if samples.is_empty() {
            if let Some(last) = last_error {
                return Err(ConfigurationError::SourceUnreachable {
                    attempts: self.cycles,
                    last,
                });
            }
        }

        let discarded = discard_count(self.cycles, self.discard_percentage).min(samples.len());
        let usable = &samples[discarded..];
        if usable.is_empty() {
            return Err(ConfigurationError::NoUsableSamples {
                cycles: self.cycles,
                usable: samples.len(),
                discarded,
            });
        }

        let mean = usable.iter().sum::<f64>() / usable.len() as f64;
        Ok(IdleBaseline::new(mean))
    }
}
