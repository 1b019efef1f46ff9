use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use skiff_power::reader::{SharedSolar, SolarStatus};
use skiff_power::vedirect::TelemetrySnapshot;
use skiff_proto::payload::*;
use skiff_proto::ServerMessage;

use crate::collab::GpsFeed;
use crate::metrics::{self, CpuStats, WeightConfig};
use crate::workers::Workers;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub period_ms: u64,
    pub initial_delay_ms: u64,

    /// Per-probe bound. A probe that misses it reports its zero state.
    pub probe_timeout_ms: u64,
    pub workers: usize,

    /// Solar/battery fields read as disconnected past this age.
    pub stale_after_ms: u64,

    pub disk_path: PathBuf,
    pub wireless_iface: Option<String>,

    /// Downlink probe target. None disables the bandwidth loop.
    pub bandwidth_url: Option<String>,
    pub bandwidth_period_ms: u64,
    pub bandwidth_timeout_ms: u64,

    pub weight: WeightConfig,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            period_ms: 5000,
            initial_delay_ms: 3000,
            probe_timeout_ms: 2000,
            workers: 4,
            stale_after_ms: 15_000,
            disk_path: PathBuf::from("/"),
            wireless_iface: None,
            bandwidth_url: None,
            bandwidth_period_ms: 30_000,
            bandwidth_timeout_ms: 20_000,
            weight: WeightConfig::default(),
        }
    }
}

impl PollerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn bandwidth_period(&self) -> Duration {
        Duration::from_millis(self.bandwidth_period_ms)
    }

    pub fn bandwidth_timeout(&self) -> Duration {
        Duration::from_millis(self.bandwidth_timeout_ms)
    }
}

/// One merged poll. Every field is always present; failed sources carry their zero state.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub memory: MemoryInfo,
    pub temperature: TemperatureInfo,
    pub cpu: CpuInfo,
    pub storage: StorageInfo,
    pub disk_usage: DiskUsageInfo,
    pub battery: BatteryInfo,
    pub weight: WeightInfo,
    pub solar: SolarInfo,
    pub wifi: WifiInfo,
    pub supply: SupplyInfo,
    pub gps: GpsInfo,
}

impl TelemetrySample {
    /// Push order matches what the UI expects per cycle.
    pub fn messages(&self) -> Vec<ServerMessage> {
        vec![
            ServerMessage::Ram { data: self.memory.clone() },
            ServerMessage::Temperature { data: self.temperature.clone() },
            ServerMessage::Cpu { data: self.cpu.clone() },
            ServerMessage::Storage { data: self.storage.clone() },
            ServerMessage::DiskUsage { data: self.disk_usage.clone() },
            ServerMessage::Battery { data: self.battery.clone() },
            ServerMessage::Weight { data: self.weight.clone() },
            ServerMessage::Solar { data: Box::new(self.solar.clone()) },
            ServerMessage::Wifi { data: self.wifi.clone() },
            ServerMessage::Supply { data: self.supply.clone() },
            ServerMessage::Gps { data: self.gps.clone() },
        ]
    }
}

pub fn solar_info(s: &TelemetrySnapshot) -> SolarInfo {
    SolarInfo {
        panel_voltage: s.panel_voltage,
        panel_current: (s.panel_current * 100.0).round() / 100.0,
        panel_power: s.panel_power,
        battery_voltage: s.battery_voltage,
        battery_current: s.battery_current,
        battery_percent: s.battery_percent,
        state: s.charge_state.as_str().to_string(),
        error_code: s.error_code,
        yield_today: s.yield_today,
        yield_total: s.yield_total,
        max_power_today: s.max_power_today,
        yield_yesterday: s.yield_yesterday,
        max_power_yesterday: s.max_power_yesterday,
        charging: s.charging,
        frame_interval_s: s.frame_interval_s.map(|v| (v * 1000.0).round() / 1000.0),
        connected: true,
        error: None,
        raw: s.frame.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    }
}

pub fn battery_info(s: &TelemetrySnapshot) -> BatteryInfo {
    BatteryInfo {
        percent: s.battery_percent,
        voltage: s.battery_voltage,
        current: s.battery_current,
        state: s.charge_state.as_str().to_string(),
        connected: true,
        error: None,
    }
}

/// Solar and battery views of the reader status. Both go disconnected together.
pub fn solar_view(status: &SolarStatus, stale_after: Duration) -> (SolarInfo, BatteryInfo) {
    if let Some(snap) = status.fresh_snapshot(stale_after) {
        return (solar_info(&snap), battery_info(&snap));
    }
    let reason = match (&status.last_error, status.age()) {
        (Some(e), _) => e.clone(),
        (None, Some(age)) if status.connected => format!("stale data ({}s old)", age.as_secs()),
        _ => "no data from charge controller".to_string(),
    };
    (SolarInfo::disconnected(reason.clone()), BatteryInfo::disconnected(reason))
}

fn unix_now() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}

fn degrade<T>(what: &str, r: Result<T>) -> Option<T> {
    match r {
        Ok(v) => Some(v),
        Err(e) => {
            debug!("telemetry: {} unavailable: {:#}", what, e);
            None
        }
    }
}

pub struct TelemetryPoller {
    cfg: PollerConfig,
    workers: Workers,
    solar: SharedSolar,
    gps: Arc<dyn GpsFeed>,
    prev_cpu: Mutex<Option<CpuStats>>,
    bandwidth_kbps: Mutex<Option<f64>>,
}

impl TelemetryPoller {
    pub fn new(cfg: PollerConfig, workers: Workers, solar: SharedSolar, gps: Arc<dyn GpsFeed>) -> Self {
        Self { cfg, workers, solar, gps, prev_cpu: Mutex::new(None), bandwidth_kbps: Mutex::new(None) }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.cfg
    }

    /// Periodic poll. Advances the CPU baseline, so only the push loop calls it.
    pub async fn sample(&self) -> TelemetrySample {
        self.collect(true).await
    }

    /// On-demand read for welcome and `obtener_datos`. CPU usage is measured
    /// against the last periodic poll and the baseline is left alone.
    pub async fn peek(&self) -> TelemetrySample {
        self.collect(false).await
    }

    /// Runs every probe concurrently on the worker pool and merges the results.
    async fn collect(&self, advance_cpu: bool) -> TelemetrySample {
        let w = &self.workers;
        let disk = self.cfg.disk_path.clone();
        let iface = self.cfg.wireless_iface.clone();
        let weight_cfg = self.cfg.weight.clone();

        let (memory, temperature, cpu, fs, wifi, supply, weight) = tokio::join!(
            w.run("memory", metrics::read_memory),
            w.run("temperature", metrics::read_temperature),
            w.run("cpu", metrics::read_cpu_stats),
            w.run("storage", move || metrics::read_fs_usage(&disk)),
            w.run("wifi", move || metrics::read_wifi(iface.as_deref())),
            w.run("supply", metrics::read_supply),
            w.run("weight", move || metrics::read_weight(&weight_cfg)),
        );

        let cpu = match degrade("cpu", cpu) {
            Some(now) => {
                let mut prev = self.prev_cpu.lock();
                let info = metrics::cpu_info(&now, prev.as_ref());
                if advance_cpu {
                    *prev = Some(now);
                }
                info
            }
            None => CpuInfo::default(),
        };
        let fs = degrade("storage", fs);
        let (solar, battery) = solar_view(&self.solar.latest(), self.cfg.stale_after());

        TelemetrySample {
            memory: degrade("memory", memory).unwrap_or_default(),
            temperature: degrade("temperature", temperature).unwrap_or_default(),
            cpu,
            storage: fs.map(|f| f.storage()).unwrap_or_default(),
            disk_usage: fs.map(|f| f.disk_usage(unix_now())).unwrap_or(DiskUsageInfo { percent: 0.0, timestamp: unix_now() }),
            battery,
            weight: degrade("weight", weight).unwrap_or_else(|| self.cfg.weight.empty_reading()),
            solar,
            wifi: degrade("wifi", wifi).unwrap_or_default(),
            supply: degrade("supply", supply).unwrap_or_default(),
            gps: GpsInfo::from(self.gps.latest()),
        }
    }

    /// Downlink probe. Keeps the previous estimate when it fails.
    pub async fn measure_bandwidth(&self) -> Option<f64> {
        let url = self.cfg.bandwidth_url.clone()?;
        let limit = self.cfg.bandwidth_timeout();
        let res = self
            .workers
            .run_for("bandwidth", limit + Duration::from_secs(1), move || metrics::probe_bandwidth(&url, limit))
            .await;
        match res {
            Ok(kbps) => {
                info!("downlink ~{:.0} kbit/s", kbps);
                *self.bandwidth_kbps.lock() = Some(kbps);
                Some(kbps)
            }
            Err(e) => {
                warn!("bandwidth probe failed: {:#}", e);
                None
            }
        }
    }

    pub fn bandwidth_kbps(&self) -> Option<f64> {
        *self.bandwidth_kbps.lock()
    }

    pub fn bandwidth_mbps(&self) -> Option<f64> {
        self.bandwidth_kbps().map(|k| k / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_power::vedirect::{Frame, FrameDecoder};
    use skiff_power::{BatteryBounds, SolarError};

    struct NoFix;

    impl GpsFeed for NoFix {
        fn latest(&self) -> Option<GpsFix> {
            None
        }
    }

    fn snapshot() -> TelemetrySnapshot {
        let mut f = Frame::default();
        for (k, v) in [("CS", "3"), ("V", "12500"), ("I", "1000"), ("VPV", "18000"), ("PPV", "40")] {
            f.insert(k, v);
        }
        TelemetrySnapshot::from_frame(f, &BatteryBounds::default(), None).unwrap()
    }

    #[test]
    fn fresh_snapshot_feeds_both_views() {
        let shared = SharedSolar::new();
        shared.publish_snapshot("/dev/ttyUSB0", snapshot());
        let (solar, battery) = solar_view(&shared.latest(), Duration::from_secs(15));
        assert!(solar.connected);
        assert_eq!(solar.state, "bulk");
        assert_eq!(solar.panel_power, 40);
        assert_eq!(solar.panel_current, 2.22);
        assert_eq!(solar.raw.get("CS").map(String::as_str), Some("3"));
        assert!(battery.connected);
        assert_eq!(battery.voltage, 12.5);
        assert_eq!(battery.percent, 62);
    }

    #[test]
    fn block_without_voltage_reads_disconnected() {
        let shared = SharedSolar::new();
        shared.publish_snapshot("/dev/ttyUSB0", snapshot());

        let mut link: &[u8] = b"Checksum\tx\nI\t100\nPPV\t3\nChecksum\ty\n";
        let err = FrameDecoder::new(BatteryBounds::default()).read_frame(&mut link, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, SolarError::IncompleteFrame { .. }));
        shared.publish_error(Some("/dev/ttyUSB0"), &err);

        let (solar, battery) = solar_view(&shared.latest(), Duration::from_secs(15));
        assert!(!solar.connected);
        assert!(!battery.connected);
        assert_eq!(battery.state, "desconectado");
        assert!(battery.error.unwrap().contains("no complete"));
    }

    #[test]
    fn stale_or_missing_snapshot_reads_disconnected() {
        let (solar, _) = solar_view(&SolarStatus::default(), Duration::from_secs(15));
        assert_eq!(solar.error.as_deref(), Some("no data from charge controller"));

        let shared = SharedSolar::new();
        shared.publish_snapshot("/dev/ttyUSB0", snapshot());
        std::thread::sleep(Duration::from_millis(5));
        let (solar, battery) = solar_view(&shared.latest(), Duration::from_millis(1));
        assert!(!solar.connected);
        assert!(battery.error.unwrap().starts_with("stale data"));
    }

    #[test]
    fn sample_messages_in_push_order() {
        let sample = TelemetrySample {
            memory: MemoryInfo::default(),
            temperature: TemperatureInfo::default(),
            cpu: CpuInfo::default(),
            storage: StorageInfo::default(),
            disk_usage: DiskUsageInfo::default(),
            battery: BatteryInfo::disconnected("x"),
            weight: WeightConfig::default().empty_reading(),
            solar: SolarInfo::disconnected("x"),
            wifi: WifiInfo::default(),
            supply: SupplyInfo::default(),
            gps: GpsInfo::default(),
        };
        let tipos: Vec<String> = sample
            .messages()
            .iter()
            .map(|m| serde_json::to_value(m).unwrap()["tipo"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            tipos,
            ["ram", "temperatura", "cpu", "almacenamiento", "disco_uso", "bateria", "peso", "solar", "wifi", "voltaje", "gps"]
        );
    }

    #[tokio::test]
    async fn failing_sources_degrade_per_field() {
        let cfg = PollerConfig { disk_path: PathBuf::from("/definitely/not/here"), ..Default::default() };
        let workers = Workers::new(cfg.workers, cfg.probe_timeout());
        let poller = TelemetryPoller::new(cfg, workers, SharedSolar::new(), Arc::new(NoFix));

        let sample = poller.sample().await;
        assert_eq!(sample.storage, StorageInfo::default());
        assert_eq!(sample.disk_usage.percent, 0.0);
        assert!(!sample.battery.connected);
        assert!(!sample.solar.connected);
        assert!(!sample.gps.valid);
        assert_eq!(sample.weight.kg, 0.0);
        assert!(poller.measure_bandwidth().await.is_none());
        assert!(poller.bandwidth_mbps().is_none());
    }

    #[tokio::test]
    async fn on_demand_reads_keep_cpu_baseline() {
        let cfg = PollerConfig::default();
        let workers = Workers::new(cfg.workers, cfg.probe_timeout());
        let poller = TelemetryPoller::new(cfg, workers, SharedSolar::new(), Arc::new(NoFix));

        let baseline = CpuStats::parse("cpu  100 0 50 850 0 0 0 0 0 0\n").unwrap();
        *poller.prev_cpu.lock() = Some(baseline);
        for _ in 0..3 {
            poller.peek().await;
        }
        assert_eq!(*poller.prev_cpu.lock(), Some(baseline));

        if metrics::read_cpu_stats().is_ok() {
            poller.sample().await;
            assert_ne!(*poller.prev_cpu.lock(), Some(baseline));
        }
    }
}
