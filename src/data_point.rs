//! Measurement values and unit conversions
//!
//! A [`DataPoint`] is the atomic unit both of measurement (one tick's energy
//! delta) and of aggregation (a method's cumulative energy).

use chrono::{DateTime, Local};

/// Unit used for all energy values
pub const JOULE: &str = "J";

/// Unit used for all power values
pub const WATT: &str = "W";

const JOULES_PER_WATT_HOUR: f64 = 3600.0;
const WATT_HOURS_PER_KILOWATT_HOUR: f64 = 1000.0;

/// Immutable (name, value, unit, time) measurement
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    name: String,
    value: f64,
    unit: String,
    time: DateTime<Local>,
}

impl DataPoint {
    pub fn new(
        name: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        time: DateTime<Local>,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
            time,
        }
    }

    /// Energy value in Joules
    pub fn joules(name: impl Into<String>, value: f64, time: DateTime<Local>) -> Self {
        Self::new(name, value, JOULE, time)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn time(&self) -> DateTime<Local> {
        self.time
    }

    /// Same measurement under another name (used when a delta becomes a map entry)
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Add `delta` to this accumulator
    ///
    /// Name, unit and time stay those of `self`.
    pub fn merge(&self, delta: &DataPoint) -> DataPoint {
        DataPoint {
            name: self.name.clone(),
            value: self.value + delta.value,
            unit: self.unit.clone(),
            time: self.time,
        }
    }
}

/// Convert Joules to watt-hours
pub fn joules_to_watt_hours(joules: f64) -> f64 {
    joules / JOULES_PER_WATT_HOUR
}

/// Convert watt-hours to kilowatt-hours
pub fn watt_hours_to_kilowatt_hours(watt_hours: f64) -> f64 {
    watt_hours / WATT_HOURS_PER_KILOWATT_HOUR
}

/// Convert Joules to kilowatt-hours
pub fn joules_to_kilowatt_hours(joules: f64) -> f64 {
    watt_hours_to_kilowatt_hours(joules_to_watt_hours(joules))
}
