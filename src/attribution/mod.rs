//! Attribution of power to the methods executing when it was drawn
//!
//! Each tick reads one power sample, subtracts the idle baseline, turns the
//! remaining Watts into Joules over the elapsed interval and charges them to
//! the active method of every tracked thread.
//!
//! ```text
//! Calibrating ──ok──► Running ──stop──► Draining ──tick done──► Stopped
//!      └──────────────error────────────────────────────────────────┘
//! ```
//!
//! [`AttributionEngine`] does one tick at a time and is driven by the
//! [`Monitor`], which owns the single sampling thread and its [`Ticker`].

mod engine;
mod monitor;
mod ticker;

pub use engine::{AttributionEngine, Measurement, TickOutcome, TickStats, ENERGY_DELTA};
pub use monitor::{BaselinePlan, EngineState, Monitor, MonitorParts, StopReport};
pub use ticker::{Canceller, Tick, Ticker};
