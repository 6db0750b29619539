//! Monitoring loop
//!
//! Owns the device session lifecycle: connect, poll on a fixed cadence,
//! tear down and reconnect on any cycle failure, and shut down cleanly on
//! cancellation. The MQTT broker connection is established once at startup;
//! only the device session is re-established during reconnects.
//!
//! Fatal versus retried: failure to reach the broker or the very first
//! device connection attempt aborts startup. Every failure after that is
//! retried indefinitely.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alerts::{AlertEvaluator, AlertSeverity};
use crate::config::AppConfig;
use crate::datalog::DataLogger;
use crate::device::{GmcClient, SerialTransportConfig, TimeSync};
use crate::discovery;
use crate::error::Result;
use crate::mqtt::MqttPublisher;
use crate::reading::{BatteryCalibration, Reading};

/// Delay before re-establishing a device session after a cycle failure
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Longer backoff after a failed reconnect attempt
const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

pub struct Monitor {
    config: AppConfig,
    publisher: MqttPublisher,
    data_logger: Option<DataLogger>,
    alerts: AlertEvaluator,
    time_sync: TimeSync,
    calibration: BatteryCalibration,
    device: Option<GmcClient>,
}

impl Monitor {
    pub fn new(config: AppConfig) -> Result<Self> {
        let publisher = MqttPublisher::new(config.mqtt.clone());
        let alerts = AlertEvaluator::new(config.alerts.clone());
        let time_sync = TimeSync::new(
            config.device.sync_datetime_on_start,
            config.device.max_time_drift_seconds,
        );
        let calibration = BatteryCalibration {
            empty_voltage: config.monitoring.battery_empty_voltage,
            full_voltage: config.monitoring.battery_full_voltage,
        };
        let data_logger = if config.data_logging.enabled {
            Some(DataLogger::new(&config.data_logging)?)
        } else {
            None
        };

        Ok(Self {
            config,
            publisher,
            data_logger,
            alerts,
            time_sync,
            calibration,
            device: None,
        })
    }

    /// Run until the token is cancelled.
    ///
    /// Cancellation is observed at loop-iteration boundaries only; an
    /// in-flight command exchange always completes or times out first.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        // Broker first: the last will must be armed before any device work
        self.publisher.connect().await?;

        // The very first device connection failure is fatal
        self.connect_device().await?;

        let interval = Duration::from_secs(self.config.monitoring.update_interval_seconds);
        info!(
            "Monitoring started, polling every {}s",
            interval.as_secs()
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.poll_cycle().await {
                Ok(()) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                Err(e) => {
                    error!("Reading failed: {e}");
                    self.reconnect_device(&shutdown).await;
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Device startup sequence: open session, identify, sync clock, check
    /// battery, announce availability and discovery metadata.
    async fn connect_device(&mut self) -> Result<()> {
        let transport_config = SerialTransportConfig {
            port: self.config.device.port.clone(),
            baud_rate: self.config.device.baud_rate,
            read_timeout: Duration::from_secs(self.config.device.timeout_seconds),
            ..Default::default()
        };

        let mut client = GmcClient::connect(transport_config).await?;

        let version = client.get_version().await?;
        info!("Connected to: {version}");

        if self.config.device.sync_datetime_on_start {
            // Sync failures are logged but do not block startup
            if let Err(e) = self.time_sync.sync_now(&mut client).await {
                warn!("Time sync failed: {e}");
            }
        }

        let voltage = client.get_battery_voltage().await?;
        info!("Battery voltage: {voltage:.1}V");
        if voltage < self.config.monitoring.critical_battery_threshold_volts {
            error!("Critical battery level!");
        } else if voltage < self.config.monitoring.low_battery_threshold_volts {
            warn!("Low battery detected!");
        }

        self.device = Some(client);

        self.publisher.publish_availability(true).await?;
        discovery::publish_discovery(&self.publisher, &self.config.homeassistant, &self.config.mqtt)
            .await?;
        Ok(())
    }

    /// One poll cycle: read, derive, log, publish, evaluate alerts
    async fn poll_cycle(&mut self) -> Result<()> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| crate::error::GmcSrvError::TransportError(
                "No device session".to_string(),
            ))?;

        let cpm = device.get_cpm().await?;
        let voltage = device.get_battery_voltage().await?;

        if self.config.device.check_time_drift {
            self.time_sync.check_drift(device).await;
        }

        let reading = Reading::new(
            cpm,
            voltage,
            &self.calibration,
            self.config.device.cpm_to_usvh_factor,
        );

        if let Some(logger) = &self.data_logger {
            if let Err(e) = logger.append(&reading) {
                error!("Failed to log data: {e}");
            }
        }

        for event in self.alerts.evaluate(&reading, Utc::now()) {
            match event.severity {
                AlertSeverity::Warning => warn!("{}", event.message),
                AlertSeverity::Critical => error!("{}", event.message),
            }
        }

        self.publisher.publish_state(&reading).await?;

        info!(
            "Published: {} CPM ({:.3} µSv/h), Battery: {:.1}V ({}%)",
            reading.cpm, reading.dose_rate, reading.battery_voltage, reading.battery_percent
        );
        Ok(())
    }

    /// Tear down the session and retry the device startup sequence until it
    /// succeeds or shutdown is requested. The broker connection is left
    /// untouched.
    async fn reconnect_device(&mut self, shutdown: &CancellationToken) {
        info!("Attempting to reconnect...");
        if let Err(e) = self.publisher.publish_availability(false).await {
            warn!("Failed to publish offline availability: {e}");
        }

        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.disconnect().await {
                warn!("Error closing device session: {e}");
            }
        }

        let mut delay = RECONNECT_DELAY;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.connect_device().await {
                Ok(()) => return,
                Err(e) => {
                    error!("Device connection failed: {e}");
                    delay = RECONNECT_BACKOFF;
                }
            }
        }
    }

    /// Cooperative shutdown: mark offline, release the device and broker
    async fn stop(&mut self) {
        info!("Shutdown requested");
        if let Err(e) = self.publisher.publish_availability(false).await {
            warn!("Failed to publish offline availability: {e}");
        }
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.disconnect().await {
                warn!("Error closing device session: {e}");
            }
        }
        if let Err(e) = self.publisher.disconnect().await {
            warn!("Error disconnecting from MQTT broker: {e}");
        }
        info!("Monitor stopped");
    }
}
