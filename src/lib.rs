//! Wattrace - per-method energy attribution
//!
//! This library attributes externally measured power draw to the methods
//! executing while it was drawn. A dedicated sampling thread calibrates an
//! idle baseline, then periodically correlates power readings with the
//! active method of every tracked thread and aggregates the resulting
//! energy per method.

pub mod activity;
pub mod agent;
pub mod attribution;
pub mod calibration;
pub mod cli;
pub mod config;
pub mod data_point;
pub mod error;
pub mod power;
pub mod report;
pub mod store;
pub mod tracker;
