//! Power sample sources
//!
//! A [`PowerSource`] yields one raw power reading on demand. Sources may block
//! on I/O; wrap them in a [`TimeoutSource`] to bound how long the sampling
//! thread waits for a reading.

mod csv_sensor;
mod ohm;
mod timeout;

pub use csv_sensor::CsvSensorSource;
pub use ohm::{parse_power_value, OhmSource};
pub use timeout::TimeoutSource;

use crate::config::{MeasurementMethod, MonitorConfig};
use crate::data_point::WATT;
use crate::error::{ConfigurationError, SampleUnavailable};
use chrono::{DateTime, Local};
use std::sync::Arc;

/// One raw power reading, in Watts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerSample {
    pub watts: f64,
    pub timestamp: DateTime<Local>,
}

impl PowerSample {
    pub fn new(watts: f64, timestamp: DateTime<Local>) -> Self {
        Self { watts, timestamp }
    }

    /// Reading taken now
    pub fn now(watts: f64) -> Self {
        Self::new(watts, Local::now())
    }

    pub fn unit(&self) -> &'static str {
        WATT
    }
}

/// Source of raw power readings
pub trait PowerSource: Send + Sync {
    /// Take one reading
    fn pull(&self) -> Result<PowerSample, SampleUnavailable>;

    /// Short description for logs
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

impl<S: PowerSource + ?Sized> PowerSource for Arc<S> {
    fn pull(&self) -> Result<PowerSample, SampleUnavailable> {
        (**self).pull()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<S: PowerSource + ?Sized> PowerSource for Box<S> {
    fn pull(&self) -> Result<PowerSample, SampleUnavailable> {
        (**self).pull()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Build the source selected by `config.measurement.method`
pub fn from_config(config: &MonitorConfig) -> Result<Box<dyn PowerSource>, ConfigurationError> {
    match config.measurement.method {
        Some(MeasurementMethod::Ohm) => {
            let ohm = config
                .measurement
                .ohm
                .as_ref()
                .ok_or_else(|| ConfigurationError::Invalid("measurement.ohm section is missing".into()))?;
            Ok(Box::new(OhmSource::from_config(ohm, config.sample_timeout())?))
        }
        Some(MeasurementMethod::Csv) => {
            let csv = config
                .measurement
                .csv
                .as_ref()
                .ok_or_else(|| ConfigurationError::Invalid("measurement.csv section is missing".into()))?;
            Ok(Box::new(CsvSensorSource::from_config(csv)?))
        }
        None => Err(ConfigurationError::Invalid(
            "measurement.method is missing".to_string(),
        )),
    }
}
