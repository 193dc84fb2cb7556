use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

/// What [`Ticker::next`] woke up for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Scheduled time since the previous tick
    Elapsed(Duration),
    Cancelled,
}

/// Fixed-period ticker with explicit cancellation
///
/// Ticks missed while the caller was busy are coalesced into the next one:
/// the reported elapsed time always runs from the previous delivered tick.
pub struct Ticker {
    interval: Duration,
    cancel: Receiver<()>,
    ticks: Option<Receiver<Instant>>,
    last: Instant,
    cancelled: bool,
}

/// Cancels a [`Ticker`]; dropping every handle cancels as well
#[derive(Debug, Clone)]
pub struct Canceller {
    tx: Sender<()>,
}

impl Canceller {
    pub fn cancel(&self) {
        // A full channel already holds a cancellation
        let _ = self.tx.try_send(());
    }
}

impl Ticker {
    /// Create a stopped ticker and its cancel handle
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn new(interval: Duration) -> (Self, Canceller) {
        assert!(!interval.is_zero(), "Tick interval must be > 0");
        let (tx, cancel) = channel::bounded(1);
        let ticker = Self {
            interval,
            cancel,
            ticks: None,
            last: Instant::now(),
            cancelled: false,
        };
        (ticker, Canceller { tx })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking; the first tick is one interval from now
    pub fn start(&mut self) {
        self.last = Instant::now();
        self.ticks = Some(channel::tick(self.interval));
    }

    pub fn is_started(&self) -> bool {
        self.ticks.is_some()
    }

    /// True once cancelled; latches
    pub fn is_cancelled(&mut self) -> bool {
        if !self.cancelled {
            self.cancelled = matches!(
                self.cancel.try_recv(),
                Ok(()) | Err(TryRecvError::Disconnected)
            );
        }
        self.cancelled
    }

    /// Block until the next tick or cancellation
    pub fn next(&mut self) -> Tick {
        // Cancellation wins over a tick that is due at the same time
        if self.is_cancelled() {
            return Tick::Cancelled;
        }
        if self.ticks.is_none() {
            self.start();
        }
        let Some(ticks) = self.ticks.as_ref() else {
            return Tick::Cancelled;
        };

        let tick = channel::select! {
            recv(ticks) -> at => match at {
                Ok(at) => {
                    let elapsed = at.saturating_duration_since(self.last);
                    self.last = at;
                    Tick::Elapsed(elapsed)
                }
                Err(_) => Tick::Cancelled,
            },
            recv(self.cancel) -> _ => Tick::Cancelled,
        };
        if tick == Tick::Cancelled {
            self.cancelled = true;
        }
        tick
    }
}
