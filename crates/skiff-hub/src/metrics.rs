//! Host metric probes. All of these block (file reads, statvfs, subprocesses)
//! and are meant to run on the worker pool.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use skiff_proto::payload::{CpuInfo, DiskUsageInfo, MemoryInfo, StorageInfo, SupplyInfo, TemperatureInfo, WeightInfo, WifiInfo};

const THERMAL_PATHS: &[&str] = &["/sys/class/thermal/thermal_zone0/temp", "/sys/class/hwmon/hwmon0/temp1_input"];

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Link quality in /proc/net/wireless is out of 70 on most drivers.
const WIRELESS_QUALITY_MAX: f64 = 70.0;

pub fn parse_meminfo(text: &str) -> Option<MemoryInfo> {
    let field = |name: &str| -> Option<u64> {
        text.lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse().ok())
    };
    let total_kb = field("MemTotal:")?;
    let available_kb = field("MemAvailable:")?;
    if total_kb == 0 {
        return None;
    }
    let total_mb = total_kb / 1024;
    let available_mb = available_kb / 1024;
    let used_mb = total_mb.saturating_sub(available_mb);
    let percent = (total_kb.saturating_sub(available_kb) * 100 / total_kb) as u8;
    Some(MemoryInfo { total_mb, used_mb, available_mb, percent })
}

pub fn read_memory() -> Result<MemoryInfo> {
    let text = std::fs::read_to_string("/proc/meminfo").context("read /proc/meminfo")?;
    parse_meminfo(&text).context("MemTotal/MemAvailable missing from /proc/meminfo")
}

/// Aggregate counters from the `cpu ` line of /proc/stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuStats {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
}

impl CpuStats {
    pub fn parse(text: &str) -> Option<CpuStats> {
        let line = text.lines().find(|l| l.starts_with("cpu "))?;
        let v: Vec<u64> = line.split_whitespace().skip(1).take(7).filter_map(|s| s.parse().ok()).collect();
        if v.len() < 7 {
            return None;
        }
        Some(CpuStats { user: v[0], nice: v[1], system: v[2], idle: v[3], iowait: v[4], irq: v[5], softirq: v[6] })
    }

    fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.iowait + self.irq + self.softirq
    }

    fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }

    /// Busy share between two samples. Without a previous sample, the share since boot.
    pub fn usage_since(&self, prev: Option<&CpuStats>) -> u8 {
        let (total, idle) = match prev {
            Some(p) => (self.total().saturating_sub(p.total()), self.idle_total().saturating_sub(p.idle_total())),
            None => (self.total(), self.idle_total()),
        };
        if total == 0 {
            return 0;
        }
        ((total - idle.min(total)) * 100 / total) as u8
    }
}

pub fn read_cpu_stats() -> Result<CpuStats> {
    let text = std::fs::read_to_string("/proc/stat").context("read /proc/stat")?;
    CpuStats::parse(&text).context("no cpu line in /proc/stat")
}

pub fn cpu_info(now: &CpuStats, prev: Option<&CpuStats>) -> CpuInfo {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    CpuInfo { percent: now.usage_since(prev), cores }
}

pub fn parse_millidegrees(text: &str) -> Option<f64> {
    let milli: i64 = text.trim().parse().ok()?;
    Some((milli as f64 / 100.0).round() / 10.0)
}

pub fn read_temperature() -> Result<TemperatureInfo> {
    for path in THERMAL_PATHS {
        if let Some(c) = std::fs::read_to_string(path).ok().as_deref().and_then(parse_millidegrees) {
            return Ok(TemperatureInfo { celsius: c, ..Default::default() });
        }
    }
    anyhow::bail!("no thermal sensor found")
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FsUsage {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

impl FsUsage {
    pub fn storage(&self) -> StorageInfo {
        let gb = |b: u64| (b as f64 / GIB * 100.0).round() / 100.0;
        let percent = if self.total > 0 { (self.used * 100 / self.total) as u8 } else { 0 };
        StorageInfo { total_gb: gb(self.total), used_gb: gb(self.used), available_gb: gb(self.available), percent }
    }

    pub fn disk_usage(&self, timestamp: f64) -> DiskUsageInfo {
        let percent = if self.total > 0 { (self.used as f64 / self.total as f64 * 1000.0).round() / 10.0 } else { 0.0 };
        DiskUsageInfo { percent, timestamp }
    }
}

pub fn read_fs_usage(path: &Path) -> Result<FsUsage> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).context("path contains NUL")?;
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).with_context(|| format!("statvfs {}", path.display()));
    }
    let frsize = st.f_frsize as u64;
    let blocks = st.f_blocks as u64;
    Ok(FsUsage {
        total: blocks * frsize,
        used: blocks.saturating_sub(st.f_bfree as u64) * frsize,
        available: st.f_bavail as u64 * frsize,
    })
}

/// `(iface, quality %, level dBm)` from /proc/net/wireless. First wireless
/// interface when `iface` is None.
pub fn parse_wireless(text: &str, iface: Option<&str>) -> Option<(String, u8, i32)> {
    text.lines().skip(2).find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        let name = name.trim();
        if iface.is_some_and(|want| want != name) {
            return None;
        }
        let mut cols = rest.split_whitespace().skip(1);
        let link: f64 = cols.next()?.trim_end_matches('.').parse().ok()?;
        let level: f64 = cols.next()?.trim_end_matches('.').parse().ok()?;
        let quality = (link * 100.0 / WIRELESS_QUALITY_MAX).clamp(0.0, 100.0) as u8;
        Some((name.to_string(), quality, level as i32))
    })
}

pub fn read_wifi(iface: Option<&str>) -> Result<WifiInfo> {
    let text = std::fs::read_to_string("/proc/net/wireless").context("read /proc/net/wireless")?;
    let (name, quality, rssi) = parse_wireless(&text, iface).context("no associated wireless interface")?;
    let ssid = Command::new("iwgetid")
        .args(["-r", &name])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default();
    Ok(WifiInfo { ssid, rssi_dbm: Some(rssi), quality: Some(quality) })
}

// get_throttled bit 0: under-voltage now; bit 16: under-voltage since boot.
const UNDERVOLT_NOW: u32 = 1;
const UNDERVOLT_OCCURRED: u32 = 1 << 16;

/// `throttled=0x50005` → flag word. Volts drop to 4.5 only while under-voltage
/// is current. Anything unreadable is "error".
pub fn parse_throttled(out: &str) -> SupplyInfo {
    let out = out.trim();
    let raw = out.split_once('=').map(|(_, v)| v).unwrap_or(out).trim();
    let digits = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")).unwrap_or(raw);
    let Ok(flags) = u32::from_str_radix(digits, 16) else {
        return SupplyInfo::default();
    };
    let now = flags & UNDERVOLT_NOW != 0;
    let alert = now || flags & UNDERVOLT_OCCURRED != 0;
    SupplyInfo { volts: if now { 4.5 } else { 5.0 }, alert, raw: raw.to_string() }
}

pub fn read_supply() -> Result<SupplyInfo> {
    let out = Command::new("vcgencmd").arg("get_throttled").output().context("run vcgencmd")?;
    anyhow::ensure!(out.status.success(), "vcgencmd exited with {}", out.status);
    Ok(parse_throttled(&String::from_utf8_lossy(&out.stdout)))
}

/// Load cell behind an IIO ADC (e.g. hx711): kg = (raw - offset) * scale.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    /// e.g. /sys/bus/iio/devices/iio:device0/in_voltage0_raw. None = no sensor.
    pub raw_path: Option<PathBuf>,
    pub scale: f64,
    pub offset: f64,
    pub threshold_kg: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self { raw_path: None, scale: 1.0, offset: 0.0, threshold_kg: 5.0 }
    }
}

impl WeightConfig {
    pub fn empty_reading(&self) -> WeightInfo {
        WeightInfo { kg: 0.0, threshold_kg: self.threshold_kg, alert: false }
    }

    pub fn reading(&self, raw: f64) -> WeightInfo {
        let kg = (((raw - self.offset) * self.scale).max(0.0) * 100.0).round() / 100.0;
        WeightInfo { kg, threshold_kg: self.threshold_kg, alert: kg >= self.threshold_kg }
    }
}

pub fn read_weight(cfg: &WeightConfig) -> Result<WeightInfo> {
    let path = cfg.raw_path.as_deref().context("no weight sensor configured")?;
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let raw: f64 = text.trim().parse().with_context(|| format!("parse weight sample {:?}", text.trim()))?;
    Ok(cfg.reading(raw))
}

/// curl `%{speed_download}` is bytes/s.
pub fn parse_speed_download(out: &str) -> Option<f64> {
    let bps: f64 = out.trim().replace(',', ".").parse().ok()?;
    (bps.is_finite() && bps > 0.0).then(|| bps * 8.0 / 1000.0)
}

/// Downlink estimate in kbit/s from one timed download.
pub fn probe_bandwidth(url: &str, max_time: Duration) -> Result<f64> {
    let out = Command::new("curl")
        .args(["-o", "/dev/null", "-s", "--max-time", &max_time.as_secs().max(1).to_string(), "-w", "%{speed_download}", url])
        .output()
        .context("run curl")?;
    let text = String::from_utf8_lossy(&out.stdout);
    debug!("bandwidth probe {} -> {:?} ({})", url, text.trim(), out.status);
    parse_speed_download(&text).with_context(|| format!("no download speed from {} ({})", url, out.status))
}
