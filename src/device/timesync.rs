//! Device clock synchronization
//!
//! The device keeps its own wall clock for on-unit history. This module
//! aligns it with the host clock and watches for drift during polling.
//! Drift checks are advisory: a failed check never aborts a poll cycle.

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info, warn};

use super::protocol::GmcClient;
use crate::error::Result;

/// Drift-check policy
#[derive(Debug, Clone)]
pub struct TimeSync {
    /// Resync automatically when drift exceeds the limit
    pub auto_sync: bool,
    /// Maximum tolerated drift in seconds
    pub max_drift_seconds: i64,
}

impl TimeSync {
    pub fn new(auto_sync: bool, max_drift_seconds: i64) -> Self {
        Self {
            auto_sync,
            max_drift_seconds,
        }
    }

    /// Set the device clock from the host clock
    pub async fn sync_now(&self, client: &mut GmcClient) -> Result<()> {
        let now = Local::now().naive_local();
        client.set_datetime(&now).await?;
        info!("Device time synchronized to {}", now.format("%Y-%m-%d %H:%M:%S"));
        Ok(())
    }

    /// Compare device and host clocks, warning and optionally resyncing when
    /// the drift exceeds the configured limit.
    ///
    /// Failures are swallowed after logging; a flaky clock read must not
    /// bring down the poll cycle.
    pub async fn check_drift(&self, client: &mut GmcClient) {
        match self.measure_drift(client).await {
            Ok(Some(drift)) => {
                if drift > self.max_drift_seconds {
                    warn!("Device time drift: {drift} seconds");
                    if self.auto_sync {
                        match self.sync_now(client).await {
                            Ok(()) => info!("Device time re-synchronized"),
                            Err(e) => warn!("Time resync failed: {e}"),
                        }
                    }
                }
            }
            Ok(None) => debug!("Device reported an invalid calendar date, skipping drift check"),
            Err(e) => debug!("Time check failed: {e}"),
        }
    }

    /// Absolute difference between host and device clocks, in seconds
    async fn measure_drift(&self, client: &mut GmcClient) -> Result<Option<i64>> {
        let device_time = client.get_datetime().await?;
        let Some(device_naive) = device_time.to_naive() else {
            return Ok(None);
        };
        Ok(Some(drift_seconds(Local::now().naive_local(), device_naive)))
    }
}

fn drift_seconds(host: NaiveDateTime, device: NaiveDateTime) -> i64 {
    (host - device).num_seconds().abs()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_drift_is_absolute() {
        assert_eq!(drift_seconds(at(12, 0, 0), at(12, 0, 0)), 0);
        assert_eq!(drift_seconds(at(12, 5, 0), at(12, 0, 0)), 300);
        assert_eq!(drift_seconds(at(12, 0, 0), at(12, 5, 0)), 300);
    }
}
