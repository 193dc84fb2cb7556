//! Monitoring configuration
//!
//! The configuration is read once at startup from a TOML file and passed by
//! reference to everything that needs it. Resolution order:
//!
//! 1. the file given on the command line / to [`MonitorConfig::load`]
//! 2. `wattrace.toml` in the working directory
//!
//! ```toml
//! sampling_interval_ms = 300
//! init_cycles = 10
//!
//! [measurement]
//! method = "ohm"
//!
//! [measurement.ohm]
//! url = "http://localhost:8085"
//! paths = [{ path = ["MYPC", "Intel Core i7-8850H", "Powers", "CPU Package"] }]
//!
//! [agent]
//! package_filter = ["com.example"]
//! ```

use crate::error::{ConfigurationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the working directory when no usable file is given
pub const DEFAULT_CONFIG: &str = "wattrace.toml";

/// Suffix of the hardware-monitor JSON endpoint
const OHM_DATA_SUFFIX: &str = "/data.json";

/// Default sensor export column
pub const DEFAULT_CSV_COLUMN: &str = "CPU Package Power [W]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Period of the attribution loop
    pub sampling_interval_ms: u64,
    /// Spacing of calibration samples
    pub sampling_interval_for_init_ms: u64,
    /// Number of calibration samples
    pub init_cycles: u32,
    /// Pause between calibration and the first tick
    pub calm_down_interval_ms: u64,
    /// Share of leading calibration samples discarded as warm-up noise
    pub discard_percentage: f64,
    /// Upper bound of a single power read (defaults to the sampling interval)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_timeout_ms: Option<u64>,
    /// Upper bound of the wait for an in-flight tick on shutdown
    pub drain_timeout_ms: u64,
    pub measurement: MeasurementConfig,
    pub agent: AgentConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 300,
            sampling_interval_for_init_ms: 1000,
            init_cycles: 10,
            calm_down_interval_ms: 1000,
            discard_percentage: 15.0,
            sample_timeout_ms: None,
            drain_timeout_ms: 2000,
            measurement: MeasurementConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementMethod {
    /// Poll an Open/Libre Hardware Monitor web endpoint
    Ohm,
    /// Tail a sensor export CSV file
    Csv,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<MeasurementMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ohm: Option<OhmConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv: Option<CsvSensorConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OhmConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Sensor paths; their readings are summed
    pub paths: Vec<PathElement>,
}

/// Path of one sensor in the hardware-monitor tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathElement {
    pub path: Vec<String>,
    /// Known idle draw of this sensor; skips calibration when set for every path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_power_watts: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvSensorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_file: Option<PathBuf>,
    /// Header name of the power column
    pub column: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_power_watts: Option<f64>,
}

impl Default for CsvSensorConfig {
    fn default() -> Self {
        Self {
            input_file: None,
            column: DEFAULT_CSV_COLUMN.to_string(),
            idle_power_watts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Package prefixes reported individually in the filtered view
    pub package_filter: BTreeSet<String>,
    /// Period of intermediate CSV writes (0 = only at shutdown)
    pub write_csv_interval_s: u64,
    /// Also write the chronological per-sample CSV
    pub per_sample_csv: bool,
    pub output_dir: PathBuf,
    /// Undrained per-sample activities that trigger an early CSV write
    pub activity_flush_threshold: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            package_filter: BTreeSet::new(),
            write_csv_interval_s: 0,
            per_sample_csv: false,
            output_dir: PathBuf::from("."),
            activity_flush_threshold: 10_000,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from `source`, falling back to [`DEFAULT_CONFIG`]
    pub fn load(source: Option<&Path>) -> Result<Self> {
        if let Some(path) = source {
            if path.is_file() {
                tracing::info!("Reading configuration from given source '{}'", path.display());
                return Self::from_file(path);
            }
            tracing::warn!(
                "'{}' is no regular file, falling back to '{}'",
                path.display(),
                DEFAULT_CONFIG
            );
        }

        let default = Path::new(DEFAULT_CONFIG);
        if default.is_file() {
            tracing::info!("Reading configuration from default '{}'", DEFAULT_CONFIG);
            return Self::from_file(default);
        }

        Err(ConfigurationError::NotFound {
            tried: source
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<none>".to_string()),
            default: DEFAULT_CONFIG.to_string(),
        })
    }

    /// Read, normalize and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse, normalize and validate TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: MonitorConfig = toml::from_str(contents)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Complete derived values (hardware-monitor endpoint suffix)
    pub fn normalize(&mut self) {
        if let Some(url) = self
            .measurement
            .ohm
            .as_mut()
            .and_then(|ohm| ohm.url.as_mut())
        {
            let trimmed = url.trim_end_matches('/');
            if !trimmed.ends_with(OHM_DATA_SUFFIX) {
                *url = format!("{}{}", trimmed, OHM_DATA_SUFFIX);
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ConfigurationError::Invalid(msg));

        if self.sampling_interval_ms == 0 {
            return invalid("sampling_interval_ms must be > 0".to_string());
        }
        if self.init_cycles == 0 {
            return invalid("init_cycles must be > 0".to_string());
        }
        if !(0.0..=100.0).contains(&self.discard_percentage) {
            return invalid(format!(
                "discard_percentage must be in [0, 100], got {}",
                self.discard_percentage
            ));
        }
        if self.sample_timeout_ms == Some(0) {
            return invalid("sample_timeout_ms must be > 0".to_string());
        }
        if self.agent.activity_flush_threshold == 0 {
            return invalid("agent.activity_flush_threshold must be > 0".to_string());
        }

        match self.measurement.method {
            None => invalid("measurement.method is missing (expected \"ohm\" or \"csv\")".to_string()),
            Some(MeasurementMethod::Ohm) => {
                let Some(ohm) = &self.measurement.ohm else {
                    return invalid("measurement.ohm section is missing".to_string());
                };
                if ohm.url.as_deref().map_or(true, str::is_empty) {
                    return invalid("measurement.ohm.url is missing".to_string());
                }
                if ohm.paths.is_empty() {
                    return invalid("measurement.ohm.paths is empty".to_string());
                }
                if ohm.paths.iter().any(|p| p.path.is_empty()) {
                    return invalid("measurement.ohm.paths contains an empty path".to_string());
                }
                Ok(())
            }
            Some(MeasurementMethod::Csv) => {
                let Some(csv) = &self.measurement.csv else {
                    return invalid("measurement.csv section is missing".to_string());
                };
                if csv.input_file.is_none() {
                    return invalid("measurement.csv.input_file is missing".to_string());
                }
                if csv.column.is_empty() {
                    return invalid("measurement.csv.column is empty".to_string());
                }
                Ok(())
            }
        }
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    pub fn sampling_interval_for_init(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_for_init_ms)
    }

    pub fn calm_down_interval(&self) -> Duration {
        Duration::from_millis(self.calm_down_interval_ms)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms.unwrap_or(self.sampling_interval_ms))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Idle draw configured for the measured path, if it makes calibration unnecessary
    pub fn configured_idle_power(&self) -> Option<f64> {
        match self.measurement.method? {
            MeasurementMethod::Ohm => {
                let paths = &self.measurement.ohm.as_ref()?.paths;
                if paths.is_empty() {
                    return None;
                }
                paths.iter().map(|p| p.idle_power_watts).sum()
            }
            MeasurementMethod::Csv => self.measurement.csv.as_ref()?.idle_power_watts,
        }
    }
}
