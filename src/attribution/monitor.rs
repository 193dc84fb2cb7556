use super::engine::{AttributionEngine, TickStats};
use super::ticker::{Canceller, Tick, Ticker};
use crate::activity::ActivityLog;
use crate::calibration::{Calibrator, IdleBaseline};
use crate::error::{ConfigurationError, Result};
use crate::power::PowerSource;
use crate::store::EnergyStore;
use crate::tracker::ActivitySource;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lifecycle of the sampling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Calibrating = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EngineState::Calibrating,
            1 => EngineState::Running,
            2 => EngineState::Draining,
            _ => EngineState::Stopped,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Calibrating => "calibrating",
            EngineState::Running => "running",
            EngineState::Draining => "draining",
            EngineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// State word plus the gate that orders commits against a forced stop
#[derive(Debug, Default)]
struct SharedState {
    state: AtomicU8,
    commit_gate: Mutex<()>,
}

impl SharedState {
    fn get(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: EngineState) {
        let previous = EngineState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            tracing::info!("Monitor {} -> {}", previous, state);
        }
    }

    /// Move to `next` unless already `Stopped`
    fn advance(&self, next: EngineState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != EngineState::Stopped as u8).then_some(next as u8)
            })
            .map(|previous| {
                tracing::info!("Monitor {} -> {}", EngineState::from_u8(previous), next);
            })
            .is_ok()
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        self.commit_gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `commit` unless stopped; a concurrent `halt` waits for it
    fn commit_unless_stopped(&self, commit: impl FnOnce()) -> bool {
        let _gate = self.gate();
        if self.get() == EngineState::Stopped {
            return false;
        }
        commit();
        true
    }

    /// Force `Stopped`; no commit lands after this returns
    fn halt(&self) {
        let _gate = self.gate();
        self.set(EngineState::Stopped);
    }
}

/// How the idle baseline is obtained
#[derive(Debug, Clone)]
pub enum BaselinePlan {
    /// Measure it on the sampling thread before the first tick
    Calibrate(Calibrator),
    /// Configured idle power; calibration is skipped
    Fixed(IdleBaseline),
}

/// Everything the sampling thread reads from and writes to
#[derive(Clone)]
pub struct MonitorParts {
    pub power: Arc<dyn PowerSource>,
    pub activity: Arc<dyn ActivitySource>,
    /// Activity log for per-sample output; `None` keeps no activities
    pub log: Option<Arc<ActivityLog>>,
    pub store: Arc<EnergyStore>,
}

/// Outcome of [`Monitor::stop`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopReport {
    /// Tick counters; `None` when the drain timed out
    pub stats: Option<TickStats>,
    /// The in-flight tick finished within the drain timeout
    pub drained: bool,
}

/// Dedicated sampling thread: calibration, then the periodic tick loop
///
/// `start` returns once calibration is over. `stop` lets an in-flight tick
/// finish, waiting at most the drain timeout; a tick that completes after
/// the timeout is discarded instead of recorded.
pub struct Monitor {
    state: Arc<SharedState>,
    baseline: IdleBaseline,
    canceller: Canceller,
    finished: Receiver<TickStats>,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Spawn the sampling thread and wait for calibration
    ///
    /// # Errors
    ///
    /// Returns the calibration failure; the thread has stopped by then.
    pub fn start(plan: BaselinePlan, interval: Duration, parts: MonitorParts) -> Result<Self> {
        let state = Arc::new(SharedState::default());
        let (ticker, canceller) = Ticker::new(interval);
        let (calibrated_tx, calibrated_rx) = channel::bounded::<Result<IdleBaseline>>(1);
        let (finished_tx, finished) = channel::bounded::<TickStats>(1);

        let thread_state = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name("wattrace-sampler".to_string())
            .spawn(move || {
                let baseline = match plan {
                    BaselinePlan::Fixed(baseline) => {
                        tracing::info!(
                            "Using configured idle power of {:.3} W",
                            baseline.power_in_watts
                        );
                        baseline
                    }
                    BaselinePlan::Calibrate(calibrator) => {
                        match calibrator.calibrate(parts.power.as_ref()) {
                            Ok(baseline) => baseline,
                            Err(e) => {
                                thread_state.set(EngineState::Stopped);
                                let _ = calibrated_tx.send(Err(e));
                                return;
                            }
                        }
                    }
                };

                let engine = AttributionEngine::new(
                    parts.power,
                    parts.activity,
                    baseline,
                    parts.log,
                    parts.store,
                );
                if !thread_state.advance(EngineState::Running) {
                    return;
                }
                let _ = calibrated_tx.send(Ok(baseline));

                let stats = run_loop(engine, ticker, &thread_state);
                thread_state.set(EngineState::Stopped);
                let _ = finished_tx.send(stats);
            })
            .map_err(|e| ConfigurationError::Source(format!("cannot spawn sampling thread: {}", e)))?;

        let calibrated = calibrated_rx.recv().unwrap_or_else(|_| {
            Err(ConfigurationError::Source(
                "sampling thread exited during calibration".to_string(),
            ))
        });

        match calibrated {
            Ok(baseline) => Ok(Self {
                state,
                baseline,
                canceller,
                finished,
                handle: Some(handle),
            }),
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    pub fn baseline(&self) -> IdleBaseline {
        self.baseline
    }

    /// Drain and stop the sampling thread
    pub fn stop(mut self, drain_timeout: Duration) -> StopReport {
        self.shutdown(drain_timeout)
    }

    fn shutdown(&mut self, drain_timeout: Duration) -> StopReport {
        let Some(handle) = self.handle.take() else {
            return StopReport {
                stats: None,
                drained: true,
            };
        };

        self.state.advance(EngineState::Draining);
        self.canceller.cancel();

        match self.finished.recv_timeout(drain_timeout) {
            Ok(stats) => {
                let _ = handle.join();
                StopReport {
                    stats: Some(stats),
                    drained: true,
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "In-flight tick did not finish within {:?}, abandoning it",
                    drain_timeout
                );
                self.state.halt();
                StopReport {
                    stats: None,
                    drained: false,
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                self.state.set(EngineState::Stopped);
                StopReport {
                    stats: None,
                    drained: true,
                }
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.state.halt();
            self.canceller.cancel();
        }
    }
}

fn run_loop(mut engine: AttributionEngine, mut ticker: Ticker, state: &SharedState) -> TickStats {
    ticker.start();
    loop {
        let elapsed = match ticker.next() {
            Tick::Elapsed(elapsed) => elapsed,
            Tick::Cancelled => break,
        };

        match engine.measure(elapsed) {
            Ok(measurement) => {
                // Stop gave up waiting for this tick
                if !state.commit_unless_stopped(|| {
                    engine.commit(measurement);
                }) {
                    tracing::debug!("Discarding tick measured after stop");
                    break;
                }
            }
            Err(e) => {
                engine.skip(e);
            }
        }
    }

    let stats = engine.stats();
    tracing::debug!(
        ticks = stats.ticks,
        skipped = stats.skipped,
        activities = stats.activities,
        "Sampling loop finished"
    );
    stats
}
