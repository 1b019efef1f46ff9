use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::detect::{default_candidate_devs, detect_controller, open_link};
use crate::vedirect::{FrameDecoder, TelemetrySnapshot};
use crate::{BatteryBounds, SolarConfig, SolarError};

// Per-read serial timeout; keeps the decoder deadline and cancellation responsive.
const POLL_READ: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Default)]
pub struct SolarStatus {
    pub connected: bool,
    pub port: Option<String>,
    pub last_error: Option<String>,
    pub snapshot: Option<Arc<TelemetrySnapshot>>,
    pub updated_at: Option<Instant>,
}

impl SolarStatus {
    pub fn age(&self) -> Option<Duration> {
        self.updated_at.map(|t| t.elapsed())
    }

    /// The published snapshot, unless the link is down or it is older than `stale_after`.
    pub fn fresh_snapshot(&self, stale_after: Duration) -> Option<Arc<TelemetrySnapshot>> {
        if !self.connected {
            return None;
        }
        match self.age() {
            Some(age) if age <= stale_after => self.snapshot.clone(),
            _ => None,
        }
    }
}

/// Latest charge controller status. Written by the reader thread only.
#[derive(Debug, Clone, Default)]
pub struct SharedSolar(Arc<Mutex<SolarStatus>>);

impl SharedSolar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> SolarStatus {
        self.0.lock().clone()
    }

    pub fn publish_snapshot(&self, port: &str, snapshot: TelemetrySnapshot) {
        let mut st = self.0.lock();
        st.connected = true;
        st.port = Some(port.to_string());
        st.last_error = None;
        st.snapshot = Some(Arc::new(snapshot));
        st.updated_at = Some(Instant::now());
    }

    /// Marks the link disconnected. The last snapshot is kept for diagnostics only.
    pub fn publish_error(&self, port: Option<&str>, err: &SolarError) {
        let mut st = self.0.lock();
        st.connected = false;
        if let Some(p) = port {
            st.port = Some(p.to_string());
        }
        st.last_error = Some(err.to_string());
        st.updated_at = Some(Instant::now());
    }
}

pub fn resolve_port(cfg: &SolarConfig) -> Result<String, SolarError> {
    if !cfg.autodetect {
        return cfg.serial_dev.clone().filter(|d| !d.is_empty()).ok_or_else(|| SolarError::LinkUnavailable {
            device: "<unset>".into(),
            reason: "solar.serial_dev missing (autodetect=false)".into(),
        });
    }

    let mut devs = cfg.candidate_devs.clone().unwrap_or_else(default_candidate_devs);
    if let Some(dev) = cfg.serial_dev.as_ref() {
        devs.retain(|d| d != dev);
        devs.insert(0, dev.clone());
    }
    detect_controller(devs, cfg.baud, cfg.probe_lines, Duration::from_secs(2))
        .chosen
        .ok_or_else(|| SolarError::LinkUnavailable {
            device: "autodetect".into(),
            reason: "no VE.Direct stream on candidate ports".into(),
        })
}

/// Owns the serial link for the life of the process and keeps `shared` current.
/// Serial reads block for long stretches, so this runs on a dedicated blocking thread.
pub fn spawn_reader(cfg: SolarConfig, bounds: BatteryBounds, shared: SharedSolar, token: CancellationToken) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut decoder = FrameDecoder::new(bounds);

        while !token.is_cancelled() {
            let dev = match resolve_port(&cfg) {
                Ok(dev) => dev,
                Err(e) => {
                    warn!("solar: {}", e);
                    shared.publish_error(None, &e);
                    sleep_unless_cancelled(&token, cfg.retry_backoff());
                    continue;
                }
            };

            let mut port = match open_link(&dev, cfg.baud, POLL_READ) {
                Ok(p) => p,
                Err(e) => {
                    warn!("solar: {}", e);
                    shared.publish_error(Some(&dev), &e);
                    sleep_unless_cancelled(&token, cfg.retry_backoff());
                    continue;
                }
            };
            info!("solar: reading VE.Direct on {} @ {}", dev, cfg.baud);
            decoder.reset();

            while !token.is_cancelled() {
                match decoder.read_frame(&mut port, cfg.read_timeout()) {
                    Ok(snap) => {
                        debug!(
                            "solar: panel {:.1}V {:.2}A ({}W), battery {:.2}V {:.2}A ({}%), state {:?}",
                            snap.panel_voltage, snap.panel_current, snap.panel_power,
                            snap.battery_voltage, snap.battery_current, snap.battery_percent, snap.charge_state
                        );
                        shared.publish_snapshot(&dev, snap);
                    }
                    Err(e @ SolarError::IncompleteFrame { .. }) => {
                        warn!("solar: {} on {}", e, dev);
                        shared.publish_error(Some(&dev), &e);
                    }
                    Err(e) => {
                        warn!("solar: link {} lost: {}", dev, e);
                        shared.publish_error(Some(&dev), &e);
                        break;
                    }
                }
            }

            sleep_unless_cancelled(&token, cfg.retry_backoff());
        }
        info!("solar: reader stopped");
    })
}

fn sleep_unless_cancelled(token: &CancellationToken, total: Duration) {
    let step = Duration::from_millis(100);
    let start = Instant::now();
    while !token.is_cancelled() && start.elapsed() < total {
        std::thread::sleep(step.min(total.saturating_sub(start.elapsed())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vedirect::Frame;

    fn snapshot(mv: &str) -> TelemetrySnapshot {
        let mut f = Frame::default();
        f.insert("V", mv);
        TelemetrySnapshot::from_frame(f, &BatteryBounds::default(), None).unwrap()
    }

    #[test]
    fn fresh_snapshot_tracks_link_state() {
        let shared = SharedSolar::new();
        assert!(shared.latest().fresh_snapshot(Duration::from_secs(10)).is_none());

        shared.publish_snapshot("/dev/ttyUSB0", snapshot("12800"));
        let st = shared.latest();
        assert!(st.connected);
        assert_eq!(st.fresh_snapshot(Duration::from_secs(10)).unwrap().battery_millivolts(), 12800);

        shared.publish_error(Some("/dev/ttyUSB0"), &SolarError::IncompleteFrame { waited: Duration::from_secs(5) });
        let st = shared.latest();
        assert!(!st.connected);
        assert!(st.snapshot.is_some());
        assert!(st.fresh_snapshot(Duration::from_secs(10)).is_none());
        assert!(st.last_error.unwrap().contains("no complete"));
    }

    #[test]
    fn stale_snapshot_is_withheld() {
        let shared = SharedSolar::new();
        shared.publish_snapshot("/dev/ttyUSB0", snapshot("12000"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(shared.latest().fresh_snapshot(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn fixed_port_requires_device() {
        let cfg = SolarConfig { autodetect: false, serial_dev: None, ..SolarConfig::default() };
        assert!(matches!(resolve_port(&cfg), Err(SolarError::LinkUnavailable { .. })));

        let cfg = SolarConfig { autodetect: false, serial_dev: Some("/dev/ttyUSB3".into()), ..SolarConfig::default() };
        assert_eq!(resolve_port(&cfg).unwrap(), "/dev/ttyUSB3");
    }
}
