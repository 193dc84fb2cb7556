//! Monitoring session of the current process
//!
//! An [`Agent`] wires the pieces together: power source from the
//! configuration, idle baseline (calibrated or configured), the sampling
//! [`Monitor`], intermediate result writes and the final report.
//!
//! ```no_run
//! use wattrace::agent::Agent;
//! use wattrace::config::MonitorConfig;
//!
//! let config = MonitorConfig::load(None)?;
//! let agent = Agent::start(&config)?;
//! let tracker = agent.tracker();
//! let work = tracker.register("com.example.Job.run");
//!
//! let thread = tracker.attach("main");
//! {
//!     let _active = thread.enter(work);
//!     // ... measured work ...
//! }
//!
//! let report = agent.shutdown();
//! println!("{:.2} J", report.total.value());
//! # Ok::<(), wattrace::error::ConfigurationError>(())
//! ```

use crate::activity::ActivityLog;
use crate::attribution::{BaselinePlan, Monitor, MonitorParts, StopReport};
use crate::calibration::{Calibrator, IdleBaseline};
use crate::config::MonitorConfig;
use crate::data_point::DataPoint;
use crate::error::{ConfigurationError, Result};
use crate::power::{self, PowerSource, TimeoutSource};
use crate::report::{ReportScheduler, ResultsWriter};
use crate::store::EnergyStore;
use crate::tracker::{MethodTracker, PackageFilter};
use std::sync::Arc;
use std::time::Duration;

/// Final state of a monitoring session
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownReport {
    pub pid: u32,
    pub baseline: IdleBaseline,
    /// Energy attributed over the whole session, in Joules
    pub total: DataPoint,
    pub methods: usize,
    pub filtered_methods: usize,
    pub stop: StopReport,
    /// Final result files were written
    pub results_written: bool,
}

pub struct Agent {
    store: Arc<EnergyStore>,
    /// Kept only when per-sample results are written
    log: Option<Arc<ActivityLog>>,
    tracker: Arc<MethodTracker>,
    writer: ResultsWriter,
    drain_timeout: Duration,
    monitor: Option<Monitor>,
    scheduler: Option<ReportScheduler>,
}

impl Agent {
    /// Start monitoring with the power source named in `config`
    pub fn start(config: &MonitorConfig) -> Result<Self> {
        let source = power::from_config(config)?;
        let description = source.describe();
        let bounded = TimeoutSource::new(source, config.sample_timeout()).map_err(|e| {
            ConfigurationError::Source(format!("cannot start power worker: {}", e))
        })?;
        tracing::info!("Measuring power with {}", description);

        let tracker = Arc::new(MethodTracker::new(PackageFilter::from(
            &config.agent.package_filter,
        )));
        Self::start_with(config, Arc::new(bounded), tracker)
    }

    /// Start monitoring with an explicit power source and tracker
    pub fn start_with(
        config: &MonitorConfig,
        power: Arc<dyn PowerSource>,
        tracker: Arc<MethodTracker>,
    ) -> Result<Self> {
        let store = Arc::new(EnergyStore::for_current_process());
        let log = config
            .agent
            .per_sample_csv
            .then(|| Arc::new(ActivityLog::new(config.agent.activity_flush_threshold)));
        let writer = ResultsWriter::from_config(&config.agent, store.pid());

        tracing::info!(
            pid = store.pid(),
            interval_ms = config.sampling_interval_ms,
            "Starting energy monitoring"
        );
        if tracker.filter().is_empty() {
            tracing::warn!("Package filter is empty, filtered results will be empty");
        }

        let plan = match config.configured_idle_power() {
            Some(watts) => BaselinePlan::Fixed(IdleBaseline::new(watts)),
            None => BaselinePlan::Calibrate(Calibrator::from_config(config)),
        };
        let parts = MonitorParts {
            power,
            activity: Arc::clone(&tracker) as _,
            log: log.clone(),
            store: Arc::clone(&store),
        };
        let monitor = Monitor::start(plan, config.sampling_interval(), parts)?;

        let interval = match config.agent.write_csv_interval_s {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let scheduler = if interval.is_some() || log.is_some() {
            let started = ReportScheduler::start(
                interval,
                writer.clone(),
                Arc::clone(&store),
                log.clone(),
            );
            match started {
                Ok(scheduler) => Some(scheduler),
                Err(e) => {
                    tracing::warn!("Intermediate results disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            store,
            log,
            tracker,
            writer,
            drain_timeout: config.drain_timeout(),
            monitor: Some(monitor),
            scheduler,
        })
    }

    /// Tracker to instrument the monitored code with
    pub fn tracker(&self) -> Arc<MethodTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn store(&self) -> &EnergyStore {
        &self.store
    }

    pub fn writer(&self) -> &ResultsWriter {
        &self.writer
    }

    pub fn baseline(&self) -> Option<IdleBaseline> {
        self.monitor.as_ref().map(Monitor::baseline)
    }

    /// Stop sampling, write the final results and log the summary
    pub fn shutdown(mut self) -> ShutdownReport {
        match self.finish() {
            Some(report) => report,
            None => {
                let stopped = StopReport {
                    stats: None,
                    drained: true,
                };
                self.report(IdleBaseline::new(0.0), stopped, false)
            }
        }
    }

    fn finish(&mut self) -> Option<ShutdownReport> {
        let monitor = self.monitor.take()?;
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
        }

        let baseline = monitor.baseline();
        let stop = monitor.stop(self.drain_timeout);

        let results_written = match self.writer.write(&self.store, self.log.as_deref()) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Writing results failed: {}", e);
                false
            }
        };
        self.writer.log_summary(&self.store);

        Some(self.report(baseline, stop, results_written))
    }

    fn report(&self, baseline: IdleBaseline, stop: StopReport, results_written: bool) -> ShutdownReport {
        ShutdownReport {
            pid: self.store.pid(),
            baseline,
            total: self.store.total_energy(),
            methods: self.store.snapshot(false).len(),
            filtered_methods: self.store.snapshot(true).len(),
            stop,
            results_written,
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CsvSensorConfig, MeasurementMethod};
    use crate::error::SampleUnavailable;
    use crate::power::PowerSample;
    use std::thread;
    use tempfile::TempDir;

    struct Constant(f64);

    impl PowerSource for Constant {
        fn pull(&self) -> std::result::Result<PowerSample, SampleUnavailable> {
            Ok(PowerSample::now(self.0))
        }
    }

    fn config(dir: &TempDir) -> MonitorConfig {
        let mut config = MonitorConfig {
            sampling_interval_ms: 10,
            sampling_interval_for_init_ms: 1,
            init_cycles: 2,
            calm_down_interval_ms: 0,
            discard_percentage: 0.0,
            ..MonitorConfig::default()
        };
        config.measurement.method = Some(MeasurementMethod::Csv);
        config.measurement.csv = Some(CsvSensorConfig {
            input_file: Some(dir.path().join("sensor.csv")),
            idle_power_watts: Some(10.0),
            ..CsvSensorConfig::default()
        });
        config.agent.output_dir = dir.path().to_path_buf();
        config.agent.package_filter.insert("app".to_string());
        config
    }

    #[test]
    fn test_session_writes_results_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let tracker = Arc::new(MethodTracker::new(PackageFilter::from(
            &config.agent.package_filter,
        )));
        let agent = Agent::start_with(&config, Arc::new(Constant(60.0)), tracker).unwrap();
        assert_eq!(agent.baseline(), Some(IdleBaseline::new(10.0)));

        let tracker = agent.tracker();
        let run = tracker.register("app.Main.run");
        let parse = tracker.register("lib.Json.parse");
        let main = tracker.attach("main");
        {
            let _run = main.enter(run);
            let _parse = main.enter(parse);
            thread::sleep(Duration::from_millis(80));
        }

        let per_method = agent.writer().per_method_path().to_path_buf();
        let filtered = agent.writer().per_method_filtered_path().to_path_buf();
        let report = agent.shutdown();

        assert!(report.stop.drained);
        assert!(report.results_written);
        assert!(report.total.value() > 0.0);
        assert_eq!(report.pid, std::process::id());
        assert_eq!(report.methods, 1);
        assert_eq!(report.filtered_methods, 1);

        let raw = std::fs::read_to_string(per_method).unwrap();
        assert!(raw.starts_with("lib.Json.parse,"), "{}", raw);
        let filtered = std::fs::read_to_string(filtered).unwrap();
        assert!(filtered.starts_with("app.Main.run,"), "{}", filtered);
    }

    #[test]
    fn test_per_sample_rows_survive_flush_threshold() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.agent.per_sample_csv = true;
        config.agent.activity_flush_threshold = 2;

        let tracker = Arc::new(MethodTracker::default());
        let agent = Agent::start_with(&config, Arc::new(Constant(60.0)), tracker).unwrap();
        let tracker = agent.tracker();
        let run = tracker.register("app.Main.run");
        let main = tracker.attach("main");
        {
            let _run = main.enter(run);
            thread::sleep(Duration::from_millis(120));
        }

        let per_sample = agent.writer().per_sample_path().unwrap().to_path_buf();
        let report = agent.shutdown();
        let ticks = report.stop.stats.unwrap().activities as usize;
        assert!(ticks > 2, "ticks = {}", ticks);

        // Every attributed activity has exactly one row
        let rows = std::fs::read_to_string(per_sample).unwrap();
        assert_eq!(rows.lines().count(), ticks);
    }

    #[test]
    fn test_calibration_runs_without_configured_idle_power() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        if let Some(csv) = config.measurement.csv.as_mut() {
            csv.idle_power_watts = None;
        }
        let agent = Agent::start_with(
            &config,
            Arc::new(Constant(25.0)),
            Arc::new(MethodTracker::default()),
        )
        .unwrap();
        assert_eq!(agent.baseline(), Some(IdleBaseline::new(25.0)));
        let report = agent.shutdown();
        assert_eq!(report.total.value(), 0.0);
    }

    #[test]
    fn test_start_from_config_with_missing_sensor_file_fails_calibration() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        if let Some(csv) = config.measurement.csv.as_mut() {
            csv.idle_power_watts = None;
        }
        assert!(matches!(
            Agent::start(&config),
            Err(ConfigurationError::SourceUnreachable { .. })
        ));
    }
}
