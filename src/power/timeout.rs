//! Bounded power reads
//!
//! The wrapped source runs on its own worker thread. `pull()` hands it a
//! request and waits at most `timeout` for the answer, so one slow or hung
//! reading delays the sampling schedule by at most one timeout. Replies that
//! arrive after their caller gave up are discarded by sequence number.

use super::{PowerSample, PowerSource};
use crate::error::SampleUnavailable;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type Reply = (u64, Result<PowerSample, SampleUnavailable>);

pub struct TimeoutSource {
    requests: Sender<u64>,
    replies: Receiver<Reply>,
    in_flight: Arc<AtomicBool>,
    next_seq: AtomicU64,
    timeout: Duration,
    description: String,
}

impl TimeoutSource {
    /// Move `source` onto a worker thread and bound every read by `timeout`
    pub fn new<S>(source: S, timeout: Duration) -> std::io::Result<Self>
    where
        S: PowerSource + 'static,
    {
        let description = source.describe();
        let (requests, request_rx) = channel::bounded::<u64>(1);
        let (reply_tx, replies) = channel::unbounded::<Reply>();
        let in_flight = Arc::new(AtomicBool::new(false));

        let worker_in_flight = Arc::clone(&in_flight);
        thread::Builder::new()
            .name("wattrace-power".to_string())
            .spawn(move || {
                for seq in request_rx {
                    let reading = source.pull();
                    worker_in_flight.store(false, Ordering::Release);
                    if reply_tx.send((seq, reading)).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            requests,
            replies,
            in_flight,
            next_seq: AtomicU64::new(0),
            timeout,
            description,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl PowerSource for TimeoutSource {
    fn pull(&self) -> Result<PowerSample, SampleUnavailable> {
        // One outstanding read at a time; no queueing behind a slow one
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SampleUnavailable::Busy);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        match self.requests.try_send(seq) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.in_flight.store(false, Ordering::Release);
                return Err(SampleUnavailable::Busy);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.in_flight.store(false, Ordering::Release);
                return Err(SampleUnavailable::Disconnected);
            }
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok((reply_seq, reading)) if reply_seq == seq => return reading,
                Ok((stale, _)) => {
                    tracing::trace!(stale, current = seq, "Discarding late power reading");
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(SampleUnavailable::Timeout(self.timeout))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SampleUnavailable::Disconnected)
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!("{} (timeout {:?})", self.description, self.timeout)
    }
}
