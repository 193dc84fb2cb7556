//! Hardware-monitor endpoint source
//!
//! Polls the `data.json` endpoint served by Open Hardware Monitor and
//! Libre Hardware Monitor. The document is a tree of sensor nodes:
//!
//! ```json
//! { "Text": "Sensor", "Children": [
//!     { "Text": "MYPC", "Children": [
//!         { "Text": "Intel Core i7", "Children": [
//!             { "Text": "Powers", "Children": [
//!                 { "Text": "CPU Package", "Value": "15,3 W", "Children": [] }
//! ] } ] } ] } ] }
//! ```
//!
//! A configured path names the `Text` of each node below the root.

use super::{PowerSample, PowerSource};
use crate::config::OhmConfig;
use crate::error::{ConfigurationError, SampleUnavailable};
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;

pub struct OhmSource {
    client: Client,
    url: String,
    paths: Vec<Vec<String>>,
}

impl OhmSource {
    pub fn new(
        url: impl Into<String>,
        paths: Vec<Vec<String>>,
        timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigurationError::Source(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            paths,
        })
    }

    pub fn from_config(config: &OhmConfig, timeout: Duration) -> Result<Self, ConfigurationError> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| ConfigurationError::Invalid("measurement.ohm.url is missing".into()))?;
        let paths = config.paths.iter().map(|p| p.path.clone()).collect();
        Self::new(url, paths, timeout)
    }

    fn fetch(&self) -> Result<Value, SampleUnavailable> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| SampleUnavailable::Http(e.to_string()))?;
        response
            .json::<Value>()
            .map_err(|e| SampleUnavailable::Parse(e.to_string()))
    }
}

impl PowerSource for OhmSource {
    fn pull(&self) -> Result<PowerSample, SampleUnavailable> {
        let document = self.fetch()?;
        let watts = total_power(&document, &self.paths)?;
        Ok(PowerSample::now(watts))
    }

    fn describe(&self) -> String {
        format!("hardware monitor at {}", self.url)
    }
}

/// Sum of the power values found at `paths` in a `data.json` document
pub fn total_power(document: &Value, paths: &[Vec<String>]) -> Result<f64, SampleUnavailable> {
    paths.iter().try_fold(0.0, |sum, path| -> Result<f64, SampleUnavailable> {
        let node = find_sensor(document, path)
            .ok_or_else(|| SampleUnavailable::MissingSensor(path.join(" > ")))?;
        let raw = node
            .get("Value")
            .and_then(Value::as_str)
            .ok_or_else(|| SampleUnavailable::MissingSensor(format!("{} has no value", path.join(" > "))))?;
        Ok(sum + parse_power_value(raw)?)
    })
}

fn find_sensor<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, text| {
        node.get("Children")?
            .as_array()?
            .iter()
            .find(|child| child.get("Text").and_then(Value::as_str) == Some(text.as_str()))
    })
}

/// Parse a sensor value such as `"15,3 W"`, `"15.3"` or `"0 W"`
pub fn parse_power_value(raw: &str) -> Result<f64, SampleUnavailable> {
    let numeric: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    numeric
        .parse::<f64>()
        .map_err(|_| SampleUnavailable::Parse(format!("'{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "Text": "Sensor",
            "Children": [{
                "Text": "MYPC",
                "Children": [{
                    "Text": "Intel Core i7-8850H",
                    "Children": [{
                        "Text": "Powers",
                        "Children": [
                            { "Text": "CPU Package", "Value": "15,3 W", "Children": [] },
                            { "Text": "CPU Cores", "Value": "11.0 W", "Children": [] }
                        ]
                    }]
                }, {
                    "Text": "NVIDIA GeForce",
                    "Children": [{
                        "Text": "Powers",
                        "Children": [{ "Text": "GPU Power", "Value": "4.7 W", "Children": [] }]
                    }]
                }]
            }]
        })
    }

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_power_value_formats() {
        assert_eq!(parse_power_value("15,3 W").unwrap(), 15.3);
        assert_eq!(parse_power_value("15.3").unwrap(), 15.3);
        assert_eq!(parse_power_value(" 0 W ").unwrap(), 0.0);
        assert!(parse_power_value("n/a").is_err());
        assert!(parse_power_value("").is_err());
    }

    #[test]
    fn test_single_path_lookup() {
        let paths = vec![path(&["MYPC", "Intel Core i7-8850H", "Powers", "CPU Package"])];
        let watts = total_power(&document(), &paths).unwrap();
        assert!((watts - 15.3).abs() < 1e-9);
    }

    #[test]
    fn test_multiple_paths_are_summed() {
        let paths = vec![
            path(&["MYPC", "Intel Core i7-8850H", "Powers", "CPU Package"]),
            path(&["MYPC", "NVIDIA GeForce", "Powers", "GPU Power"]),
        ];
        let watts = total_power(&document(), &paths).unwrap();
        assert!((watts - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_sensor() {
        let paths = vec![path(&["MYPC", "AMD Ryzen", "Powers", "Package"])];
        assert!(matches!(
            total_power(&document(), &paths),
            Err(SampleUnavailable::MissingSensor(_))
        ));
    }

    #[test]
    fn test_node_without_value() {
        let paths = vec![path(&["MYPC", "Intel Core i7-8850H", "Powers"])];
        assert!(matches!(
            total_power(&document(), &paths),
            Err(SampleUnavailable::MissingSensor(_))
        ));
    }

    #[test]
    fn test_unreachable_endpoint_is_http_error() {
        let source = OhmSource::new(
            "http://127.0.0.1:1/data.json",
            vec![path(&["x"])],
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(matches!(source.pull(), Err(SampleUnavailable::Http(_))));
    }
}
