pub mod vedirect;
pub mod detect;
pub mod reader;
pub mod doctor;

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// VE.Direct text protocol runs at a fixed rate.
pub const VEDIRECT_BAUD: u32 = 19200;

#[derive(Debug, Error)]
pub enum SolarError {
    #[error("charge controller link unavailable on '{device}': {reason}")]
    LinkUnavailable { device: String, reason: String },

    #[error("no complete VE.Direct block within {waited:?}")]
    IncompleteFrame { waited: Duration },

    #[error("serial read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SolarConfig {
    pub enable: bool,

    /// Probe candidate ports for a VE.Direct stream instead of trusting `serial_dev`.
    pub autodetect: bool,

    /// Fixed port. With autodetect on it is probed first.
    pub serial_dev: Option<String>,
    pub baud: u32,

    /// Autodetect candidates. Defaults to /dev/ttyUSB*, /dev/ttyACM*, /dev/serial/by-id/*.
    pub candidate_devs: Option<Vec<String>>,

    /// Upper bound for assembling one block (the controller emits one per second).
    pub read_timeout_ms: u64,

    /// Delay before reopening a lost or missing link.
    pub retry_backoff_ms: u64,

    /// Lines inspected per candidate during autodetect.
    pub probe_lines: usize,
}

impl Default for SolarConfig {
    fn default() -> Self {
        Self {
            enable: true,
            autodetect: true,
            serial_dev: None,
            baud: VEDIRECT_BAUD,
            candidate_devs: None,
            read_timeout_ms: 5000,
            retry_backoff_ms: 5000,
            probe_lines: 10,
        }
    }
}

impl SolarConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Voltage window used to estimate state of charge.
/// Defaults cover a generic 12V pack; tune per chemistry.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BatteryBounds {
    pub empty_v: f64,
    pub full_v: f64,
}

impl Default for BatteryBounds {
    fn default() -> Self {
        Self { empty_v: 10.0, full_v: 14.0 }
    }
}

impl BatteryBounds {
    pub fn percent(&self, volts: f64) -> u8 {
        let span = self.full_v - self.empty_v;
        if span <= 0.0 || !volts.is_finite() {
            return 0;
        }
        ((volts - self.empty_v) / span * 100.0).clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_linear_and_clamped() {
        let b = BatteryBounds::default();
        assert_eq!(b.percent(12.0), 50);
        assert_eq!(b.percent(12.5), 62);
        assert_eq!(b.percent(9.2), 0);
        assert_eq!(b.percent(14.6), 100);
    }

    #[test]
    fn inverted_bounds_report_empty() {
        let b = BatteryBounds { empty_v: 14.0, full_v: 10.0 };
        assert_eq!(b.percent(12.0), 0);
    }
}
