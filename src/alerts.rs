//! Debounced alert evaluation
//!
//! A pure, single-threaded state machine over the stream of readings. Rules
//! are evaluated in a fixed order per reading: high radiation, critical
//! battery, low battery. Sustained rules pass through Pending (condition
//! observed, onset recorded) before firing, and an already-fired rule is
//! gated by a re-notify interval. When a condition goes false the entire
//! per-rule record is dropped, including the re-notify memory, so a
//! flapping condition can re-fire sooner than the interval would otherwise
//! allow. That matches the observed behavior of the device monitor this
//! service replaces and is kept deliberately.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::config::AlertConfig;
use crate::reading::Reading;

/// Minimum time between repeated firings of the same active alert
pub const RENOTIFY_INTERVAL_SECS: i64 = 3600;

/// Fixed sustain duration for the low-battery rule
pub const LOW_BATTERY_SUSTAIN_SECS: i64 = 300;

/// Alert rule identifier, used as the state-table key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    HighRadiation,
    LowBattery,
    CriticalBattery,
}

/// Alert severity, mapped onto log levels by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// One alert firing
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub reading: Reading,
}

/// Per-rule debounce record; an absent entry means the rule is inactive
#[derive(Debug, Clone, Copy)]
struct AlertState {
    onset: DateTime<Utc>,
    last_fired: Option<DateTime<Utc>>,
}

/// Stateful evaluator owning the alert state table
#[derive(Debug)]
pub struct AlertEvaluator {
    config: AlertConfig,
    states: HashMap<AlertKind, AlertState>,
}

impl AlertEvaluator {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    /// Evaluate one reading; `now` is explicit so debounce timing is
    /// deterministic under test.
    pub fn evaluate(&mut self, reading: &Reading, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let mut events = Vec::new();

        self.check_high_radiation(reading, now, &mut events);
        if self.config.enable_battery_alerts {
            self.check_battery(reading, now, &mut events);
        }

        events
    }

    fn check_high_radiation(
        &mut self,
        reading: &Reading,
        now: DateTime<Utc>,
        events: &mut Vec<AlertEvent>,
    ) {
        let Some(threshold) = self.config.high_radiation_threshold_usvh else {
            return;
        };

        if reading.dose_rate > threshold {
            let sustain =
                Duration::seconds(self.config.high_radiation_duration_minutes as i64 * 60);
            if self.should_fire(AlertKind::HighRadiation, sustain, now) {
                events.push(AlertEvent {
                    kind: AlertKind::HighRadiation,
                    severity: AlertSeverity::Warning,
                    message: format!(
                        "High radiation detected: {:.3} µSv/h (threshold: {threshold})",
                        reading.dose_rate
                    ),
                    reading: reading.clone(),
                });
            }
        } else {
            self.states.remove(&AlertKind::HighRadiation);
        }
    }

    fn check_battery(
        &mut self,
        reading: &Reading,
        now: DateTime<Utc>,
        events: &mut Vec<AlertEvent>,
    ) {
        let voltage = reading.battery_voltage;

        // Critical battery fires unconditionally on every observation and
        // takes precedence over the low-battery rule.
        if voltage < self.config.critical_battery_threshold_volts {
            events.push(AlertEvent {
                kind: AlertKind::CriticalBattery,
                severity: AlertSeverity::Critical,
                message: format!("Critical battery level: {voltage:.1}V"),
                reading: reading.clone(),
            });
            return;
        }

        if voltage < self.config.low_battery_threshold_volts {
            let sustain = Duration::seconds(LOW_BATTERY_SUSTAIN_SECS);
            if self.should_fire(AlertKind::LowBattery, sustain, now) {
                events.push(AlertEvent {
                    kind: AlertKind::LowBattery,
                    severity: AlertSeverity::Warning,
                    message: format!("Low battery: {voltage:.1}V"),
                    reading: reading.clone(),
                });
            }
        } else {
            self.states.remove(&AlertKind::LowBattery);
        }
    }

    /// Sustain/re-notify gate for debounced rules.
    ///
    /// Inactive -> Pending on the first true observation; Pending -> Fired
    /// once the condition has held for the sustain duration and the
    /// re-notify interval since the previous firing has elapsed.
    fn should_fire(&mut self, kind: AlertKind, sustain: Duration, now: DateTime<Utc>) -> bool {
        let state = self.states.entry(kind).or_insert(AlertState {
            onset: now,
            last_fired: None,
        });

        if now - state.onset < sustain {
            return false;
        }

        let renotify_open = match state.last_fired {
            None => true,
            Some(last) => now - last > Duration::seconds(RENOTIFY_INTERVAL_SECS),
        };

        if renotify_open {
            state.last_fired = Some(now);
        }
        renotify_open
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::reading::BatteryCalibration;

    const CAL: BatteryCalibration = BatteryCalibration {
        empty_voltage: 6.0,
        full_voltage: 8.4,
    };

    fn config() -> AlertConfig {
        AlertConfig {
            high_radiation_threshold_usvh: Some(0.5),
            high_radiation_duration_minutes: 2,
            enable_battery_alerts: true,
            low_battery_threshold_volts: 6.0,
            critical_battery_threshold_volts: 5.5,
        }
    }

    fn reading(cpm: u16, voltage: f64) -> Reading {
        Reading::new(cpm, voltage, &CAL, 0.0057)
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    /// 120 CPM at the default factor is 0.684 µSv/h, above the 0.5 threshold
    fn hot() -> Reading {
        reading(120, 7.5)
    }

    fn quiet() -> Reading {
        reading(20, 7.5)
    }

    #[test]
    fn test_high_radiation_sustain_window() {
        let mut eval = AlertEvaluator::new(config());

        // Condition observed, onset recorded, nothing fires yet
        assert!(eval.evaluate(&hot(), t(0)).is_empty());
        // One second short of the 120 s sustain
        assert!(eval.evaluate(&hot(), t(119)).is_empty());
        // Sustain reached: fires exactly once
        let events = eval.evaluate(&hot(), t(120));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::HighRadiation);
        assert_eq!(events[0].severity, AlertSeverity::Warning);
        // Still true, but inside the re-notify interval
        assert!(eval.evaluate(&hot(), t(180)).is_empty());
    }

    #[test]
    fn test_high_radiation_renotify_after_interval() {
        let mut eval = AlertEvaluator::new(config());
        eval.evaluate(&hot(), t(0));
        assert_eq!(eval.evaluate(&hot(), t(120)).len(), 1);
        // Exactly at the interval the gate is still closed (strictly greater)
        assert!(eval.evaluate(&hot(), t(120 + 3600)).is_empty());
        assert_eq!(eval.evaluate(&hot(), t(121 + 3600)).len(), 1);
    }

    #[test]
    fn test_flapping_rearms_immediately() {
        let mut eval = AlertEvaluator::new(config());
        eval.evaluate(&hot(), t(0));
        assert_eq!(eval.evaluate(&hot(), t(120)).len(), 1);

        // Condition drops: onset and re-notify memory are both discarded
        assert!(eval.evaluate(&quiet(), t(130)).is_empty());

        // Condition returns and sustains: re-fires well inside what the
        // re-notify interval would otherwise allow
        assert!(eval.evaluate(&hot(), t(140)).is_empty());
        assert_eq!(eval.evaluate(&hot(), t(140 + 120)).len(), 1);
    }

    #[test]
    fn test_critical_battery_fires_every_call() {
        let mut eval = AlertEvaluator::new(config());
        for i in 0..3 {
            let events = eval.evaluate(&reading(20, 5.2), t(i * 60));
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].kind, AlertKind::CriticalBattery);
            assert_eq!(events[0].severity, AlertSeverity::Critical);
        }
    }

    #[test]
    fn test_low_battery_suppressed_while_critical() {
        let mut eval = AlertEvaluator::new(config());
        let events = eval.evaluate(&reading(20, 5.2), t(0));
        assert_eq!(events.len(), 1);
        assert!(events.iter().all(|e| e.kind != AlertKind::LowBattery));
    }

    #[test]
    fn test_low_battery_sustain_and_fire() {
        let mut eval = AlertEvaluator::new(config());
        // 5.8 V sits between critical (5.5) and low (6.0)
        assert!(eval.evaluate(&reading(20, 5.8), t(0)).is_empty());
        assert!(eval.evaluate(&reading(20, 5.8), t(299)).is_empty());
        let events = eval.evaluate(&reading(20, 5.8), t(300));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::LowBattery);
    }

    #[test]
    fn test_low_battery_resets_on_recovery() {
        let mut eval = AlertEvaluator::new(config());
        eval.evaluate(&reading(20, 5.8), t(0));
        // Recovers above the low threshold, state cleared
        assert!(eval.evaluate(&reading(20, 7.0), t(100)).is_empty());
        // Must sustain the full window again
        assert!(eval.evaluate(&reading(20, 5.8), t(200)).is_empty());
        assert!(eval.evaluate(&reading(20, 5.8), t(499)).is_empty());
        assert_eq!(eval.evaluate(&reading(20, 5.8), t(500)).len(), 1);
    }

    #[test]
    fn test_battery_alerts_can_be_disabled() {
        let mut cfg = config();
        cfg.enable_battery_alerts = false;
        let mut eval = AlertEvaluator::new(cfg);
        assert!(eval.evaluate(&reading(20, 5.0), t(0)).is_empty());
    }

    #[test]
    fn test_high_radiation_rule_optional() {
        let mut cfg = config();
        cfg.high_radiation_threshold_usvh = None;
        let mut eval = AlertEvaluator::new(cfg);
        assert!(eval.evaluate(&reading(10_000, 7.5), t(0)).is_empty());
        assert!(eval.evaluate(&reading(10_000, 7.5), t(10_000)).is_empty());
    }

    #[test]
    fn test_rule_order_high_radiation_before_battery() {
        let mut eval = AlertEvaluator::new(config());
        // Hot reading with critical battery; radiation already sustained
        eval.evaluate(&reading(120, 5.2), t(0));
        let events = eval.evaluate(&reading(120, 5.2), t(120));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, AlertKind::HighRadiation);
        assert_eq!(events[1].kind, AlertKind::CriticalBattery);
    }
}
