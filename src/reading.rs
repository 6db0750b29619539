//! Sensor reading model and derived values

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

/// One completed poll of the device. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    /// Raw radiation pulse rate, counts per minute
    pub cpm: u16,
    /// Derived exposure rate in µSv/h
    pub dose_rate: f64,
    /// Battery voltage in volts
    pub battery_voltage: f64,
    /// Battery level, 0-100
    pub battery_percent: u8,
    /// When the sample was taken
    pub sampled_at: DateTime<Utc>,
}

impl Reading {
    pub fn new(cpm: u16, battery_voltage: f64, calibration: &BatteryCalibration, factor: f64) -> Self {
        Self {
            cpm,
            dose_rate: f64::from(cpm) * factor,
            battery_voltage,
            battery_percent: calibration.percent(battery_voltage),
            sampled_at: Utc::now(),
        }
    }

    /// JSON state payload published to the message bus
    pub fn state_payload(&self) -> StatePayload {
        StatePayload {
            cpm: self.cpm,
            usv_h: round3(self.dose_rate),
            battery_voltage: round1(self.battery_voltage),
            battery_percent: self.battery_percent,
            connection_status: "Connected",
            timestamp: self.sampled_at.timestamp(),
            last_updated: self
                .sampled_at
                .with_timezone(&Local)
                .to_rfc3339(),
        }
    }
}

/// Wire format of the retained MQTT state message
#[derive(Debug, Clone, Serialize)]
pub struct StatePayload {
    pub cpm: u16,
    #[serde(rename = "uSv_h")]
    pub usv_h: f64,
    pub battery_voltage: f64,
    pub battery_percent: u8,
    pub connection_status: &'static str,
    pub timestamp: i64,
    pub last_updated: String,
}

/// Voltage-to-percent calibration points
#[derive(Debug, Clone, Copy)]
pub struct BatteryCalibration {
    pub empty_voltage: f64,
    pub full_voltage: f64,
}

impl BatteryCalibration {
    /// Clamped linear interpolation between the empty and full points
    pub fn percent(&self, voltage: f64) -> u8 {
        if voltage >= self.full_voltage {
            return 100;
        }
        if voltage <= self.empty_voltage {
            return 0;
        }
        let fraction = (voltage - self.empty_voltage) / (self.full_voltage - self.empty_voltage);
        (fraction * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
