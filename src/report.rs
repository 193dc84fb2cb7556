//! Result files and the end-of-run summary
//!
//! Per-method energy is written as headerless `name,value,unit` rows, one
//! file for the raw and one for the filtered view, sorted by energy
//! descending. The optional per-sample file gets one
//! `time,thread,method,filtered_method,value,unit` row per activity,
//! appended as the activity log is drained.
//!
//! All file names carry the monitored process id.

use crate::activity::{Activity, ActivityLog};
use crate::config::AgentConfig;
use crate::data_point::{joules_to_kilowatt_hours, joules_to_watt_hours, DataPoint};
use crate::error::WriteFailure;
use crate::store::{AggregationMap, EnergyStore};
use crossbeam::channel::{self, Sender};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const FILE_PREFIX: &str = "wattrace_";
const SEPARATOR: &str =
    "-----------------------------------------------------------------------------------------";

/// Files written by one [`ResultsWriter::write`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSummary {
    pub methods: usize,
    pub filtered_methods: usize,
    pub samples: usize,
}

#[derive(Debug, Clone)]
pub struct ResultsWriter {
    per_method: PathBuf,
    per_method_filtered: PathBuf,
    per_sample: Option<PathBuf>,
}

impl ResultsWriter {
    pub fn new(output_dir: impl AsRef<Path>, pid: u32, per_sample: bool) -> Self {
        let dir = output_dir.as_ref();
        let file = |suffix: &str| dir.join(format!("{}{}_{}", FILE_PREFIX, pid, suffix));
        Self {
            per_method: file("energy_per_method.csv"),
            per_method_filtered: file("energy_per_method_filtered.csv"),
            per_sample: per_sample.then(|| file("energy_per_sample.csv")),
        }
    }

    pub fn from_config(config: &AgentConfig, pid: u32) -> Self {
        Self::new(&config.output_dir, pid, config.per_sample_csv)
    }

    pub fn per_method_path(&self) -> &Path {
        &self.per_method
    }

    pub fn per_method_filtered_path(&self) -> &Path {
        &self.per_method_filtered
    }

    pub fn per_sample_path(&self) -> Option<&Path> {
        self.per_sample.as_deref()
    }

    /// Rewrite both per-method files and append the drained activities
    ///
    /// The log is only drained when a per-sample file is configured. If the
    /// append fails the activities are requeued for the next write.
    pub fn write(
        &self,
        store: &EnergyStore,
        log: Option<&ActivityLog>,
    ) -> Result<WriteSummary, WriteFailure> {
        let raw = store.snapshot(false);
        let filtered = store.snapshot(true);
        write_per_method(&self.per_method, &raw)?;
        write_per_method(&self.per_method_filtered, &filtered)?;

        let samples = match (&self.per_sample, log) {
            (Some(path), Some(log)) => {
                let drained = log.drain();
                match append_samples(path, &drained) {
                    Ok(samples) => samples,
                    Err(e) => {
                        log.requeue(drained);
                        return Err(e);
                    }
                }
            }
            _ => 0,
        };

        tracing::debug!(
            methods = raw.len(),
            filtered = filtered.len(),
            samples,
            "Results written"
        );
        Ok(WriteSummary {
            methods: raw.len(),
            filtered_methods: filtered.len(),
            samples,
        })
    }

    /// Log total energy and where the results went
    pub fn log_summary(&self, store: &EnergyStore) {
        let joules = store.total_energy().value();
        tracing::info!("{}", SEPARATOR);
        tracing::info!(
            "Monitoring of application with PID {} finished",
            store.pid()
        );
        tracing::info!(
            "Application consumed {:.2} joule - {:.3} wh - {:.6} kwh total",
            joules,
            joules_to_watt_hours(joules),
            joules_to_kilowatt_hours(joules)
        );
        tracing::info!(
            "Energy consumption per method and filtered methods written to '{}' / '{}'",
            self.per_method.display(),
            self.per_method_filtered.display()
        );
        tracing::info!("{}", SEPARATOR);
    }
}

/// Per-method rows, most energy first
pub fn sorted_rows(map: &AggregationMap) -> Vec<&DataPoint> {
    let mut rows: Vec<&DataPoint> = map.values().collect();
    rows.sort_by(|a, b| {
        b.value()
            .total_cmp(&a.value())
            .then_with(|| a.name().cmp(b.name()))
    });
    rows
}

fn io_failure(path: &Path) -> impl FnOnce(std::io::Error) -> WriteFailure + '_ {
    move |source| WriteFailure::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn csv_failure(path: &Path) -> impl FnOnce(csv::Error) -> WriteFailure + '_ {
    move |e| WriteFailure::Io {
        path: path.to_path_buf(),
        source: e.into(),
    }
}

fn create_parent(path: &Path) -> Result<(), WriteFailure> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).map_err(io_failure(dir))
        }
        _ => Ok(()),
    }
}

fn write_per_method(path: &Path, map: &AggregationMap) -> Result<(), WriteFailure> {
    create_parent(path)?;
    let file = File::create(path).map_err(io_failure(path))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    for point in sorted_rows(map) {
        writer
            .write_record([point.name(), format_value(point.value()).as_str(), point.unit()])
            .map_err(csv_failure(path))?;
    }
    writer.flush().map_err(io_failure(path))
}

fn append_samples(path: &Path, activities: &[Activity]) -> Result<usize, WriteFailure> {
    if activities.is_empty() {
        return Ok(0);
    }
    create_parent(path)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_failure(path))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    for activity in activities {
        let time = activity.timestamp.to_rfc3339();
        let raw = activity.raw.to_string();
        let filtered = activity.filtered.to_string();
        let value = format_value(activity.energy.value());
        writer
            .write_record([
                time.as_str(),
                activity.thread.as_ref(),
                raw.as_str(),
                filtered.as_str(),
                value.as_str(),
                activity.energy.unit(),
            ])
            .map_err(csv_failure(path))?;
    }
    writer.flush().map_err(io_failure(path))?;
    Ok(activities.len())
}

fn format_value(value: f64) -> String {
    format!("{:.6}", value)
}

/// Result writes on a reporting thread
///
/// Writes happen every `interval` and whenever the activity log asks for a
/// flush. Write failures are logged and the schedule continues.
pub struct ReportScheduler {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ReportScheduler {
    /// Write every `interval` (if any) and on each flush request of `log`
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn start(
        interval: Option<Duration>,
        writer: ResultsWriter,
        store: Arc<EnergyStore>,
        log: Option<Arc<ActivityLog>>,
    ) -> std::io::Result<Self> {
        if let Some(interval) = interval {
            assert!(!interval.is_zero(), "Report interval must be > 0");
        }
        let (stop, stop_rx) = channel::bounded::<()>(1);
        let ticks = interval.map_or_else(channel::never, channel::tick);
        let flushes = log
            .as_ref()
            .map_or_else(channel::never, |log| log.flush_requests());

        let handle = thread::Builder::new()
            .name("wattrace-report".to_string())
            .spawn(move || {
                let write = |reason: &str| {
                    if let Err(e) = writer.write(&store, log.as_deref()) {
                        tracing::warn!("Intermediate result write ({}) failed: {}", reason, e);
                    }
                };
                loop {
                    let stopped = channel::select! {
                        recv(ticks) -> _ => {
                            write("scheduled");
                            false
                        }
                        recv(flushes) -> _ => {
                            write("log threshold");
                            false
                        }
                        recv(stop_rx) -> _ => true,
                    };
                    if stopped {
                        break;
                    }
                }
            })?;

        match interval {
            Some(interval) => tracing::debug!("Writing intermediate results every {:?}", interval),
            None => tracing::debug!("Writing intermediate results on activity log flush requests"),
        }
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stop the schedule, waiting for a write in progress
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the thread
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReportScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
