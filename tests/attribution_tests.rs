//! Integration tests for the attribution pipeline
//!
//! Power source → engine → store → result files, driven through the public
//! API only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use wattrace::activity::ActivityLog;
use wattrace::attribution::{AttributionEngine, BaselinePlan, Monitor, MonitorParts, TickOutcome};
use wattrace::calibration::IdleBaseline;
use wattrace::data_point::{joules_to_kilowatt_hours, joules_to_watt_hours};
use wattrace::error::SampleUnavailable;
use wattrace::power::{PowerSample, PowerSource};
use wattrace::report::ResultsWriter;
use wattrace::store::EnergyStore;
use wattrace::tracker::{MethodTracker, PackageFilter};

/// Power source whose reading can be changed while sampling
struct Dial(AtomicU64);

impl Dial {
    fn new(watts: f64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(watts.to_bits())))
    }

    fn set(&self, watts: f64) {
        self.0.store(watts.to_bits(), Ordering::SeqCst);
    }
}

impl PowerSource for Dial {
    fn pull(&self) -> Result<PowerSample, SampleUnavailable> {
        Ok(PowerSample::now(f64::from_bits(self.0.load(Ordering::SeqCst))))
    }
}

fn engine(
    power: Arc<dyn PowerSource>,
    tracker: &Arc<MethodTracker>,
    baseline: f64,
) -> (AttributionEngine, Arc<EnergyStore>, Arc<ActivityLog>) {
    let store = Arc::new(EnergyStore::new(1234));
    let log = Arc::new(ActivityLog::new(1024));
    let engine = AttributionEngine::new(
        power,
        Arc::clone(tracker) as _,
        IdleBaseline::new(baseline),
        Some(Arc::clone(&log)),
        Arc::clone(&store),
    );
    (engine, store, log)
}

#[test]
fn test_end_to_end_constant_power() {
    let tracker = Arc::new(MethodTracker::new(PackageFilter::new(["app"])));
    let m = tracker.register("app.Worker.M");
    let (mut engine, store, _log) = engine(Dial::new(100.0), &tracker, 0.0);

    let thread = tracker.attach("main");
    let _active = thread.enter(m);
    for _ in 0..3 {
        engine.tick(Duration::from_millis(300));
    }

    let raw = store.snapshot(false);
    assert!((raw["app.Worker.M"].value() - 90.0).abs() < 1e-9);
    let filtered = store.snapshot(true);
    assert!((filtered["app.Worker.M"].value() - 90.0).abs() < 1e-9);
}

#[test]
fn test_power_changes_follow_the_active_method() {
    let tracker = Arc::new(MethodTracker::new(PackageFilter::new(["app"])));
    let load = tracker.register("app.Loader.load");
    let render = tracker.register("app.View.render");
    let dial = Dial::new(30.0);
    let (mut engine, store, _log) = engine(Arc::clone(&dial) as _, &tracker, 10.0);

    let thread = tracker.attach("main");
    {
        let _load = thread.enter(load);
        engine.tick(Duration::from_secs(1));
    }
    dial.set(60.0);
    {
        let _render = thread.enter(render);
        engine.tick(Duration::from_secs(1));
    }

    let raw = store.snapshot(false);
    assert_eq!(raw["app.Loader.load"].value(), 20.0);
    assert_eq!(raw["app.View.render"].value(), 50.0);
    assert_eq!(store.total_energy().value(), 70.0);
}

#[test]
fn test_idle_thread_records_nothing() {
    let tracker = Arc::new(MethodTracker::new(PackageFilter::new(["app"])));
    let (mut engine, store, log) = engine(Dial::new(100.0), &tracker, 0.0);
    let _thread = tracker.attach("main");

    let outcome = engine.tick(Duration::from_secs(1));
    assert!(matches!(outcome, TickOutcome::Attributed { activities: 0, .. }));
    assert!(store.snapshot(false).is_empty());
    assert!(log.is_empty());
}

#[test]
fn test_unit_conversion_of_total() {
    let tracker = Arc::new(MethodTracker::default());
    let m = tracker.register("M");
    let (mut engine, store, _log) = engine(Dial::new(3600.0), &tracker, 0.0);

    let thread = tracker.attach("main");
    let _active = thread.enter(m);
    engine.tick(Duration::from_secs(1));

    let joules = store.total_energy().value();
    assert!((joules_to_watt_hours(joules) - 1.0).abs() < 1e-6);
    assert!((joules_to_kilowatt_hours(joules) - 0.001).abs() < 1e-6);
}

#[test]
fn test_monitor_with_results_files() {
    let dir = TempDir::new().unwrap();
    let tracker = Arc::new(MethodTracker::new(PackageFilter::new(["app"])));
    let run = tracker.register("app.Main.run");
    let store = Arc::new(EnergyStore::new(77));
    let log = Arc::new(ActivityLog::new(1024));

    let monitor = Monitor::start(
        BaselinePlan::Fixed(IdleBaseline::new(5.0)),
        Duration::from_millis(15),
        MonitorParts {
            power: Dial::new(25.0),
            activity: Arc::clone(&tracker) as _,
            log: Some(Arc::clone(&log)),
            store: Arc::clone(&store),
        },
    )
    .unwrap();

    let worker_tracker = Arc::clone(&tracker);
    let worker = thread::spawn(move || {
        let thread = worker_tracker.attach("worker");
        let _run = thread.enter(run);
        thread::sleep(Duration::from_millis(120));
    });
    worker.join().unwrap();

    let report = monitor.stop(Duration::from_secs(2));
    assert!(report.drained);

    let writer = ResultsWriter::new(dir.path(), store.pid(), true);
    writer.write(&store, Some(&log)).unwrap();

    let per_method = std::fs::read_to_string(writer.per_method_path()).unwrap();
    assert!(per_method.starts_with("app.Main.run,"), "{}", per_method);
    assert!(per_method.trim_end().ends_with(",J"));

    let samples = std::fs::read_to_string(writer.per_sample_path().unwrap()).unwrap();
    assert!(samples.lines().count() >= 1);
    assert!(samples.lines().all(|l| l.contains(",worker,app.Main.run,app.Main.run,")));
    assert!(writer
        .per_method_path()
        .to_string_lossy()
        .ends_with("wattrace_77_energy_per_method.csv"));
}
