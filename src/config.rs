//! Application configuration
//!
//! Configuration is assembled with Figment: built-in defaults, merged with a
//! JSON config file, merged with `GMCSRV_`-prefixed environment variables.
//! Every section carries serde defaults so a partial config file is enough.

use std::path::Path;

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Device transport and protocol configuration
    #[serde(default)]
    pub device: DeviceConfig,

    /// MQTT broker configuration
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Polling cadence and battery calibration
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// CSV data logging configuration
    #[serde(default)]
    pub data_logging: DataLoggingConfig,

    /// Alert thresholds and debounce durations
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Home Assistant discovery metadata
    #[serde(default)]
    pub homeassistant: HomeAssistantConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            mqtt: MqttConfig::default(),
            monitoring: MonitoringConfig::default(),
            logging: LoggingConfig::default(),
            data_logging: DataLoggingConfig::default(),
            alerts: AlertConfig::default(),
            homeassistant: HomeAssistantConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration: defaults <- JSON file <- environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Json::file(path.as_ref()))
            .merge(Env::prefixed("GMCSRV_").split("__"));

        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Basic sanity checks that cannot be expressed through serde defaults
    pub fn validate(&self) -> Result<()> {
        use crate::error::GmcSrvError;

        if self.device.port.is_empty() {
            return Err(GmcSrvError::ConfigError(
                "Device port cannot be empty".to_string(),
            ));
        }
        if self.monitoring.update_interval_seconds == 0 {
            return Err(GmcSrvError::ConfigError(
                "Update interval must be greater than zero".to_string(),
            ));
        }
        if self.monitoring.battery_full_voltage <= self.monitoring.battery_empty_voltage {
            return Err(GmcSrvError::ConfigError(
                "Battery full voltage must be above empty voltage".to_string(),
            ));
        }
        if self.device.cpm_to_usvh_factor <= 0.0 {
            return Err(GmcSrvError::ConfigError(
                "CPM conversion factor must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Device transport and protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    #[serde(default = "default_port")]
    pub port: String,

    /// Baud rate (GMC-300E Plus V4.xx firmware runs at 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Read timeout per command, in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Sync device clock from host clock on connect
    #[serde(default = "default_true")]
    pub sync_datetime_on_start: bool,

    /// Periodically compare device clock against host clock
    #[serde(default = "default_true")]
    pub check_time_drift: bool,

    /// Drift above this triggers a warning (and a resync when auto-sync is on)
    #[serde(default = "default_max_drift")]
    pub max_time_drift_seconds: i64,

    /// Device-specific CPM to µSv/h conversion factor
    #[serde(default = "default_conversion_factor")]
    pub cpm_to_usvh_factor: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            timeout_seconds: default_timeout_seconds(),
            sync_datetime_on_start: true,
            check_time_drift: true,
            max_time_drift_seconds: default_max_drift(),
            cpm_to_usvh_factor: default_conversion_factor(),
        }
    }
}

/// MQTT broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker hostname or IP
    #[serde(default = "default_broker")]
    pub broker: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Optional username
    pub username: Option<String>,

    /// Optional password
    pub password: Option<String>,

    /// Client identifier
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Topic prefix for state publications
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Home Assistant discovery prefix
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// Availability (online/offline) topic, also used for the last will
    #[serde(default = "default_availability_topic")]
    pub availability_topic: String,

    /// QoS for publications (0, 1 or 2)
    #[serde(default)]
    pub qos: u8,

    /// Enable TLS
    #[serde(default)]
    pub use_ssl: bool,

    /// Skip certificate and hostname verification (testing brokers only)
    #[serde(default)]
    pub insecure: bool,

    /// CA certificate path (TLS)
    pub ca_cert: Option<String>,

    /// Client certificate path (mutual TLS)
    pub cert_file: Option<String>,

    /// Client key path (mutual TLS)
    pub key_file: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            client_id: default_client_id(),
            topic_prefix: default_topic_prefix(),
            discovery_prefix: default_discovery_prefix(),
            availability_topic: default_availability_topic(),
            qos: 0,
            use_ssl: false,
            insecure: false,
            ca_cert: None,
            cert_file: None,
            key_file: None,
        }
    }
}

impl MqttConfig {
    /// Topic carrying the retained state payload
    pub fn state_topic(&self) -> String {
        format!("{}/state", self.topic_prefix)
    }
}

/// Polling cadence and battery calibration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Seconds between poll cycles
    #[serde(default = "default_update_interval")]
    pub update_interval_seconds: u64,

    /// Voltage below which the battery is considered low
    #[serde(default = "default_low_battery")]
    pub low_battery_threshold_volts: f64,

    /// Voltage below which the battery is considered critical
    #[serde(default = "default_critical_battery")]
    pub critical_battery_threshold_volts: f64,

    /// Calibration point mapped to 100%
    #[serde(default = "default_battery_full")]
    pub battery_full_voltage: f64,

    /// Calibration point mapped to 0%
    #[serde(default = "default_battery_empty")]
    pub battery_empty_voltage: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            update_interval_seconds: default_update_interval(),
            low_battery_threshold_volts: default_low_battery(),
            critical_battery_threshold_volts: default_critical_battery(),
            battery_full_voltage: default_battery_full(),
            battery_empty_voltage: default_battery_empty(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional directory for daily-rolling log files; console output when absent
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

/// CSV data logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLoggingConfig {
    /// Whether CSV logging is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// CSV file path
    #[serde(default = "default_csv_file")]
    pub csv_file: String,

    /// Rotate the file once it grows beyond this size
    #[serde(default = "default_max_file_size")]
    pub max_file_size_mb: u64,
}

impl Default for DataLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            csv_file: default_csv_file(),
            max_file_size_mb: default_max_file_size(),
        }
    }
}

/// Alert thresholds and debounce durations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// High-radiation threshold in µSv/h; None disables the rule
    #[serde(default = "default_high_radiation_threshold")]
    pub high_radiation_threshold_usvh: Option<f64>,

    /// Minutes the high-radiation condition must hold before firing
    #[serde(default = "default_high_radiation_duration")]
    pub high_radiation_duration_minutes: u64,

    /// Whether battery alerts are evaluated at all
    #[serde(default = "default_true")]
    pub enable_battery_alerts: bool,

    /// Low-battery threshold in volts
    #[serde(default = "default_low_battery")]
    pub low_battery_threshold_volts: f64,

    /// Critical-battery threshold in volts
    #[serde(default = "default_critical_battery")]
    pub critical_battery_threshold_volts: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            high_radiation_threshold_usvh: default_high_radiation_threshold(),
            high_radiation_duration_minutes: default_high_radiation_duration(),
            enable_battery_alerts: true,
            low_battery_threshold_volts: default_low_battery(),
            critical_battery_threshold_volts: default_critical_battery(),
        }
    }
}

/// Home Assistant discovery metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeAssistantConfig {
    #[serde(default = "default_device_name")]
    pub device_name: String,

    #[serde(default = "default_device_model")]
    pub device_model: String,

    #[serde(default = "default_device_manufacturer")]
    pub device_manufacturer: String,

    #[serde(default = "default_device_identifier")]
    pub device_identifier: String,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            device_model: default_device_model(),
            device_manufacturer: default_device_manufacturer(),
            device_identifier: default_device_identifier(),
        }
    }
}

// Default value functions
fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_timeout_seconds() -> u64 {
    3
}

fn default_max_drift() -> i64 {
    300
}

fn default_conversion_factor() -> f64 {
    0.0057
}

fn default_broker() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "gmcsrv".to_string()
}

fn default_topic_prefix() -> String {
    "homeassistant/sensor/gmc300e".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_availability_topic() -> String {
    "homeassistant/sensor/gmc300e/availability".to_string()
}

fn default_update_interval() -> u64 {
    60
}

fn default_low_battery() -> f64 {
    6.0
}

fn default_critical_battery() -> f64 {
    5.5
}

fn default_battery_full() -> f64 {
    8.4
}

fn default_battery_empty() -> f64 {
    6.0
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_csv_file() -> String {
    "gmc_data.csv".to_string()
}

fn default_max_file_size() -> u64 {
    100
}

fn default_high_radiation_threshold() -> Option<f64> {
    Some(0.5)
}

fn default_high_radiation_duration() -> u64 {
    2
}

fn default_device_name() -> String {
    "GMC-300E Plus".to_string()
}

fn default_device_model() -> String {
    "GMC-300E+".to_string()
}

fn default_device_manufacturer() -> String {
    "GQ Electronics".to_string()
}

fn default_device_identifier() -> String {
    "gmc300e_plus".to_string()
}

fn default_true() -> bool {
    true
}
