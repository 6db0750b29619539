//! GMC Monitoring Service (`gmcsrv`)
//!
//! Polls a GQ GMC-300E Plus Geiger counter over its serial command/response
//! protocol, derives dose-rate and battery readings, evaluates debounced
//! alerts, appends history to CSV and publishes state plus Home Assistant
//! discovery metadata over MQTT.

pub mod alerts;
pub mod config;
pub mod datalog;
pub mod device;
pub mod discovery;
pub mod error;
pub mod monitor;
pub mod mqtt;
pub mod reading;

pub use config::AppConfig;
pub use error::{GmcSrvError, Result};
pub use monitor::Monitor;
pub use reading::Reading;
