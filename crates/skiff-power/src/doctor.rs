use anyhow::Result;

use crate::{BatteryBounds, SolarConfig};

pub fn check_solar(cfg: &SolarConfig) -> Result<()> {
    if !cfg.enable {
        return Ok(());
    }
    anyhow::ensure!(cfg.baud > 0, "solar.baud invalid");
    anyhow::ensure!(cfg.read_timeout_ms >= 1500, "solar.read_timeout_ms should cover at least one block (>= 1500)");
    anyhow::ensure!(cfg.retry_backoff_ms >= 100, "solar.retry_backoff_ms too small");
    if !cfg.autodetect {
        anyhow::ensure!(cfg.serial_dev.as_ref().map(|s| !s.is_empty()).unwrap_or(false), "solar.serial_dev missing");
    }
    Ok(())
}

pub fn check_battery(bounds: &BatteryBounds) -> Result<()> {
    anyhow::ensure!(bounds.full_v > bounds.empty_v, "battery.full_v must exceed battery.empty_v");
    anyhow::ensure!(bounds.empty_v > 0.0 && bounds.full_v < 100.0, "battery bounds out of range");
    Ok(())
}
