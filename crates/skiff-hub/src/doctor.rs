use std::collections::HashSet;
use std::net::SocketAddr;

use anyhow::{Context, Result};

use crate::{ControlConfig, GpsConfig, PollerConfig, ServerConfig, StoreConfig};

pub fn check_server(cfg: &ServerConfig) -> Result<()> {
    cfg.bind.parse::<SocketAddr>().with_context(|| format!("server.bind '{}' is not host:port", cfg.bind))?;
    anyhow::ensure!(cfg.max_clients > 0, "server.max_clients must be > 0");
    anyhow::ensure!(cfg.client_queue >= 16, "server.client_queue too small to hold one telemetry batch (>= 16)");
    anyhow::ensure!(cfg.reap_ms >= 100, "server.reap_ms too small");
    Ok(())
}

pub fn check_control(cfg: &ControlConfig) -> Result<()> {
    anyhow::ensure!(!cfg.relays.is_empty(), "control.relays empty");
    anyhow::ensure!(cfg.motor_left_pin != cfg.motor_right_pin, "control: both motors on pin {}", cfg.motor_left_pin);
    anyhow::ensure!(cfg.default_speed <= 100, "control.default_speed must be 0..=100");
    anyhow::ensure!(!cfg.shutdown_cmd.is_empty(), "control.shutdown_cmd empty");
    anyhow::ensure!(!cfg.reboot_cmd.is_empty(), "control.reboot_cmd empty");

    let mut numbers = HashSet::new();
    let mut pins = HashSet::from([cfg.motor_left_pin, cfg.motor_right_pin]);
    for r in &cfg.relays {
        anyhow::ensure!(numbers.insert(r.number), "relay {} listed twice", r.number);
        anyhow::ensure!(pins.insert(r.pin), "relay {} reuses pin {}", r.number, r.pin);
    }
    Ok(())
}

pub fn check_poller(cfg: &PollerConfig) -> Result<()> {
    anyhow::ensure!(cfg.period_ms >= 500, "poller.period_ms too small");
    anyhow::ensure!(cfg.workers > 0, "poller.workers must be > 0");
    anyhow::ensure!(cfg.probe_timeout_ms > 0 && cfg.probe_timeout_ms < cfg.period_ms, "poller.probe_timeout_ms must be below period_ms");
    anyhow::ensure!(cfg.stale_after_ms >= cfg.period_ms, "poller.stale_after_ms shorter than one period");
    if cfg.bandwidth_url.is_some() {
        anyhow::ensure!(cfg.bandwidth_timeout_ms < cfg.bandwidth_period_ms, "poller.bandwidth_timeout_ms must be below bandwidth_period_ms");
    }
    anyhow::ensure!(cfg.weight.scale != 0.0, "poller.weight.scale must be non-zero");
    Ok(())
}

pub fn check_gps(cfg: &GpsConfig) -> Result<()> {
    anyhow::ensure!(cfg.autosave_min_s > 0, "gps.autosave_min_s must be > 0");
    anyhow::ensure!(cfg.autosave_default_s >= cfg.autosave_min_s, "gps.autosave_default_s below autosave_min_s");
    anyhow::ensure!(cfg.autosave_check_ms >= 100, "gps.autosave_check_ms too small");
    anyhow::ensure!(cfg.baud > 0, "gps.baud must be > 0");
    anyhow::ensure!(cfg.retry_ms >= 100, "gps.retry_ms too small");
    Ok(())
}

pub fn check_store(cfg: &StoreConfig) -> Result<()> {
    anyhow::ensure!(!cfg.path.as_os_str().is_empty(), "store.path empty");
    if let Some(dir) = cfg.path.parent().filter(|d| !d.as_os_str().is_empty()) {
        anyhow::ensure!(dir.is_dir(), "store directory {} does not exist", dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::RelayPin;

    #[test]
    fn defaults_pass() {
        check_server(&ServerConfig::default()).unwrap();
        check_control(&ControlConfig::default()).unwrap();
        check_poller(&PollerConfig::default()).unwrap();
        check_gps(&GpsConfig::default()).unwrap();
        check_store(&StoreConfig::default()).unwrap();
    }

    #[test]
    fn relay_on_motor_pin_is_rejected() {
        let mut cfg = ControlConfig::default();
        cfg.relays.push(RelayPin { number: 10, pin: 18 });
        let err = check_control(&cfg).unwrap_err();
        assert!(err.to_string().contains("reuses pin 18"), "{}", err);
    }

    #[test]
    fn empty_power_command_is_rejected() {
        let cfg = ControlConfig { shutdown_cmd: Vec::new(), ..Default::default() };
        assert!(check_control(&cfg).unwrap_err().to_string().contains("shutdown_cmd"));
    }

    #[test]
    fn bad_bind_is_rejected() {
        let cfg = ServerConfig { bind: "localhost".into(), ..Default::default() };
        assert!(check_server(&cfg).is_err());
    }
}
