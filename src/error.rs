//! Error taxonomy for monitoring
//!
//! - [`ConfigurationError`]: fatal, aborts startup before sampling begins
//! - [`SampleUnavailable`]: transient, one tick is skipped and the loop continues
//! - [`WriteFailure`]: reporting only, never touches the accounting state
//!
//! An excluded method identifier is not an error and has no variant here.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal errors raised while setting up monitoring
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("No configuration available (tried '{tried}' and the default '{default}')")]
    NotFound { tried: String, default: String },

    #[error("Cannot read configuration '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Power source could not be created: {0}")]
    Source(String),

    #[error("Power source unreachable during calibration ({attempts} attempts, last error: {last})")]
    SourceUnreachable {
        attempts: u32,
        last: SampleUnavailable,
    },

    #[error("No usable calibration samples: {usable} read over {cycles} cycles, {discarded} discarded")]
    NoUsableSamples {
        cycles: u32,
        usable: usize,
        discarded: usize,
    },
}

/// A single power read that did not produce a value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleUnavailable {
    #[error("power read timed out after {0:?}")]
    Timeout(Duration),

    #[error("previous power read still in flight")]
    Busy,

    #[error("power source worker is gone")]
    Disconnected,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("cannot parse power value: {0}")]
    Parse(String),

    #[error("sensor not found: {0}")]
    MissingSensor(String),
}

/// Result file could not be written
#[derive(Error, Debug)]
pub enum WriteFailure {
    #[error("Cannot write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;
