//! Sensor export CSV source
//!
//! Reads the newest reading from a CSV file a hardware sensor tool (HWiNFO and
//! similar) appends to periodically. The file is ISO-8859-1 encoded; the power
//! column is located by its header name once and reused afterwards. Only the
//! tail of the file is read on each pull.

use super::{parse_power_value, PowerSample, PowerSource};
use crate::config::CsvSensorConfig;
use crate::error::{ConfigurationError, SampleUnavailable};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Bytes read from the end of the file to find the last complete row
const TAIL_WINDOW: u64 = 64 * 1024;

pub struct CsvSensorSource {
    path: PathBuf,
    column: String,
    /// (column index, header field count), mapped on first successful read
    mapping: Mutex<Option<(usize, usize)>>,
}

impl CsvSensorSource {
    pub fn new(path: impl Into<PathBuf>, column: impl Into<String>) -> Self {
        let path = path.into();
        if !path.is_file() {
            tracing::warn!("No sensor CSV file found at '{}' (yet)", path.display());
        }
        Self {
            path,
            column: column.into(),
            mapping: Mutex::new(None),
        }
    }

    pub fn from_config(config: &CsvSensorConfig) -> Result<Self, ConfigurationError> {
        let path = config
            .input_file
            .clone()
            .ok_or_else(|| ConfigurationError::Invalid("measurement.csv.input_file is missing".into()))?;
        Ok(Self::new(path, config.column.clone()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<File, SampleUnavailable> {
        File::open(&self.path)
            .map_err(|e| SampleUnavailable::Io(format!("{}: {}", self.path.display(), e)))
    }

    fn column_mapping(&self, file: &mut File) -> Result<(usize, usize), SampleUnavailable> {
        let mut mapping = self.mapping.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(known) = *mapping {
            return Ok(known);
        }

        let mut header = Vec::new();
        BufReader::new(&mut *file)
            .read_until(b'\n', &mut header)
            .map_err(|e| SampleUnavailable::Io(e.to_string()))?;
        let fields = parse_row(&decode_latin1(&header))
            .ok_or_else(|| SampleUnavailable::Parse("sensor CSV has no header".to_string()))?;

        let index = fields
            .iter()
            .position(|f| f.trim() == self.column)
            .ok_or_else(|| SampleUnavailable::MissingSensor(format!("column '{}'", self.column)))?;

        tracing::debug!(column = %self.column, index, "Mapped sensor CSV column");
        *mapping = Some((index, fields.len()));
        Ok((index, fields.len()))
    }

    fn read_tail(&self, file: &mut File) -> Result<String, SampleUnavailable> {
        let io = |e: std::io::Error| SampleUnavailable::Io(e.to_string());
        let len = file.metadata().map_err(io)?.len();
        let start = len.saturating_sub(TAIL_WINDOW);
        file.seek(SeekFrom::Start(start)).map_err(io)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(io)?;
        let mut text = decode_latin1(&bytes);

        // Window starts mid-row: drop the partial first line
        if start > 0 {
            if let Some(newline) = text.find('\n') {
                text.replace_range(..=newline, "");
            }
        }
        // Row still being written: keep only newline-terminated lines
        match text.rfind('\n') {
            Some(newline) => text.truncate(newline + 1),
            None => text.clear(),
        }
        Ok(text)
    }
}

impl PowerSource for CsvSensorSource {
    fn pull(&self) -> Result<PowerSample, SampleUnavailable> {
        let mut file = self.open()?;
        let (index, width) = self.column_mapping(&mut file)?;
        let tail = self.read_tail(&mut file)?;

        tail.lines()
            .rev()
            .filter_map(parse_row)
            .filter(|fields| fields.len() >= width)
            .find_map(|fields| parse_power_value(&fields[index]).ok())
            .map(PowerSample::now)
            .ok_or_else(|| {
                SampleUnavailable::Parse(format!("no complete row in '{}'", self.path.display()))
            })
    }

    fn describe(&self) -> String {
        format!("sensor CSV '{}' [{}]", self.path.display(), self.column)
    }
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn parse_row(line: &str) -> Option<Vec<String>> {
    if line.trim().is_empty() {
        return None;
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let record = reader.records().next()?.ok()?;
    Some(record.iter().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str =
        "Date,Time,\"CPU Package Power [W]\",\"Total System Power [W]\"\n";

    fn sensor_file(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(HEADER.as_bytes()).unwrap();
        for row in rows {
            file.write_all(row.as_bytes()).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_reads_last_complete_row() {
        let file = sensor_file(&[
            "1.1.2024,10:00:00.000,12.5,40.0\n",
            "1.1.2024,10:00:01.000,13.5,41.0\n",
        ]);
        let source = CsvSensorSource::new(file.path(), "CPU Package Power [W]");
        assert_eq!(source.pull().unwrap().watts, 13.5);
    }

    #[test]
    fn test_other_column_by_header_name() {
        let file = sensor_file(&["1.1.2024,10:00:00.000,12.5,40.0\n"]);
        let source = CsvSensorSource::new(file.path(), "Total System Power [W]");
        assert_eq!(source.pull().unwrap().watts, 40.0);
    }

    #[test]
    fn test_partial_last_row_is_ignored() {
        let file = sensor_file(&[
            "1.1.2024,10:00:00.000,12.5,40.0\n",
            "1.1.2024,10:00:01.000,99",
        ]);
        let source = CsvSensorSource::new(file.path(), "Total System Power [W]");
        assert_eq!(source.pull().unwrap().watts, 40.0);
    }

    #[test]
    fn test_torn_last_field_is_ignored() {
        let file = sensor_file(&[
            "1.1.2024,10:00:00.000,12.5,40.5\n",
            "1.1.2024,10:00:01.000,13.5,4",
        ]);
        let source = CsvSensorSource::new(file.path(), "Total System Power [W]");
        assert_eq!(source.pull().unwrap().watts, 40.5);

        let cpu = CsvSensorSource::new(file.path(), "CPU Package Power [W]");
        assert_eq!(cpu.pull().unwrap().watts, 12.5);
    }

    #[test]
    fn test_single_unterminated_row_has_no_reading() {
        let file = sensor_file(&["1.1.2024,10:00:00.000,12.5,40.0"]);
        let source = CsvSensorSource::new(file.path(), "CPU Package Power [W]");
        assert!(matches!(source.pull(), Err(SampleUnavailable::Parse(_))));
    }

    #[test]
    fn test_repeated_header_trailer_is_skipped() {
        let file = sensor_file(&["1.1.2024,10:00:00.000,12.5,40.0\n", HEADER]);
        let source = CsvSensorSource::new(file.path(), "CPU Package Power [W]");
        assert_eq!(source.pull().unwrap().watts, 12.5);
    }

    #[test]
    fn test_picks_up_appended_rows() {
        let mut file = sensor_file(&["1.1.2024,10:00:00.000,12.5,40.0\n"]);
        let source = CsvSensorSource::new(file.path(), "CPU Package Power [W]");
        assert_eq!(source.pull().unwrap().watts, 12.5);

        file.write_all(b"1.1.2024,10:00:01.000,20.0,48.0\n").unwrap();
        file.flush().unwrap();
        assert_eq!(source.pull().unwrap().watts, 20.0);
    }

    #[test]
    fn test_latin1_header() {
        let mut file = NamedTempFile::new().unwrap();
        // "Temperatur [\u{b0}C]" encoded as ISO-8859-1
        file.write_all(b"Date,Temperatur [\xb0C],\"CPU Package Power [W]\"\n")
            .unwrap();
        file.write_all(b"1.1.2024,55,17.25\n").unwrap();
        file.flush().unwrap();

        let source = CsvSensorSource::new(file.path(), "CPU Package Power [W]");
        assert_eq!(source.pull().unwrap().watts, 17.25);
    }

    #[test]
    fn test_unknown_column() {
        let file = sensor_file(&["1.1.2024,10:00:00.000,12.5,40.0\n"]);
        let source = CsvSensorSource::new(file.path(), "GPU Power [W]");
        assert!(matches!(
            source.pull(),
            Err(SampleUnavailable::MissingSensor(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let source = CsvSensorSource::new("/nonexistent/hwinfo.csv", "CPU Package Power [W]");
        assert!(matches!(source.pull(), Err(SampleUnavailable::Io(_))));
    }

    #[test]
    fn test_header_only_has_no_row() {
        let file = sensor_file(&[]);
        let source = CsvSensorSource::new(file.path(), "CPU Package Power [W]");
        assert!(matches!(source.pull(), Err(SampleUnavailable::Parse(_))));
    }
}
