//! CSV data logging
//!
//! Append-only history of readings for backup and offline analysis. The
//! file is created with a header when absent and rotated by size; a
//! logging failure is reported to the caller but must never abort a poll
//! cycle (the monitor logs and carries on).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::DataLoggingConfig;
use crate::error::{GmcSrvError, Result};
use crate::reading::{round1, round3, Reading};

/// One CSV row; field order defines the column order
#[derive(Debug, Serialize)]
struct CsvRecord {
    timestamp: i64,
    datetime: String,
    cpm: u16,
    #[serde(rename = "uSv_h")]
    usv_h: f64,
    battery_voltage: f64,
    battery_percent: u8,
}

impl From<&Reading> for CsvRecord {
    fn from(reading: &Reading) -> Self {
        Self {
            timestamp: reading.sampled_at.timestamp(),
            datetime: reading
                .sampled_at
                .with_timezone(&Local)
                .to_rfc3339(),
            cpm: reading.cpm,
            usv_h: round3(reading.dose_rate),
            battery_voltage: round1(reading.battery_voltage),
            battery_percent: reading.battery_percent,
        }
    }
}

/// Append-only CSV logger with size-based rotation
pub struct DataLogger {
    path: PathBuf,
    max_file_size: u64,
}

impl DataLogger {
    pub fn new(config: &DataLoggingConfig) -> Result<Self> {
        let logger = Self {
            path: PathBuf::from(&config.csv_file),
            max_file_size: config.max_file_size_mb * 1024 * 1024,
        };
        logger.ensure_file()?;
        Ok(logger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one reading, rotating first when the file has outgrown its cap
    pub fn append(&self, reading: &Reading) -> Result<()> {
        if let Ok(metadata) = std::fs::metadata(&self.path) {
            if metadata.len() > self.max_file_size {
                self.rotate()?;
            }
        }

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| GmcSrvError::DataLogError(format!("Failed to open CSV file: {e}")))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.serialize(CsvRecord::from(reading))?;
        writer
            .flush()
            .map_err(|e| GmcSrvError::DataLogError(format!("Failed to flush CSV file: {e}")))?;
        Ok(())
    }

    /// Create the file with its header row when it does not exist
    fn ensure_file(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        let file = File::create(&self.path)
            .map_err(|e| GmcSrvError::DataLogError(format!("Failed to create CSV file: {e}")))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record([
            "timestamp",
            "datetime",
            "cpm",
            "uSv_h",
            "battery_voltage",
            "battery_percent",
        ])?;
        writer
            .flush()
            .map_err(|e| GmcSrvError::DataLogError(format!("Failed to flush CSV file: {e}")))?;
        Ok(())
    }

    /// Rename the current file aside and start a fresh one
    fn rotate(&self) -> Result<()> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let archived = self.path.with_file_name(format!(
            "{}.{stamp}",
            self.path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("gmc_data.csv")
        ));

        match std::fs::rename(&self.path, &archived) {
            Ok(()) => info!("Log file rotated to {}", archived.display()),
            Err(e) => warn!("Failed to rotate log file: {e}"),
        }
        self.ensure_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::BatteryCalibration;

    const CAL: BatteryCalibration = BatteryCalibration {
        empty_voltage: 6.0,
        full_voltage: 8.4,
    };

    fn logger_in(dir: &Path, max_mb: u64) -> DataLogger {
        DataLogger::new(&DataLoggingConfig {
            enabled: true,
            csv_file: dir.join("gmc_data.csv").to_string_lossy().into_owned(),
            max_file_size_mb: max_mb,
        })
        .unwrap()
    }

    #[test]
    fn test_creates_file_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger_in(dir.path(), 100);

        let contents = std::fs::read_to_string(logger.path()).unwrap();
        assert_eq!(
            contents.lines().next().unwrap(),
            "timestamp,datetime,cpm,uSv_h,battery_voltage,battery_percent"
        );
    }

    #[test]
    fn test_append_adds_rows_without_duplicate_header() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger_in(dir.path(), 100);

        let reading = Reading::new(120, 7.0, &CAL, 0.0057);
        logger.append(&reading).unwrap();
        logger.append(&reading).unwrap();

        let contents = std::fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("120"));
        assert!(lines[1].contains("0.684"));
        assert!(lines[1].contains(",42"));
    }

    #[test]
    fn test_rotation_archives_and_recreates() {
        let dir = tempfile::tempdir().unwrap();
        // 0 MB cap: any non-empty file rotates on the next append
        let logger = logger_in(dir.path(), 0);

        let reading = Reading::new(50, 7.5, &CAL, 0.0057);
        logger.append(&reading).unwrap();
        logger.append(&reading).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(entries.len() >= 2, "expected archive plus active file, got {entries:?}");
        assert!(entries.iter().any(|n| n == "gmc_data.csv"));
        assert!(entries.iter().any(|n| n.starts_with("gmc_data.csv.")));

        // Active file starts fresh with a header again
        let contents = std::fs::read_to_string(logger.path()).unwrap();
        assert!(contents.starts_with("timestamp,"));
    }
}
