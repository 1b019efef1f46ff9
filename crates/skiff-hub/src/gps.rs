use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skiff_proto::payload::GpsFix;

use crate::collab::GpsFeed;

const KNOTS_TO_KMH: f64 = 1.852;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    /// How often the autosave loop re-reads `guardar_recorrido` while disabled.
    pub autosave_check_ms: u64,

    /// Autosave period when the UI config has no `frecuencia_guardado`.
    pub autosave_default_s: u64,

    /// Lower bound for the UI-provided period.
    pub autosave_min_s: u64,

    /// NMEA receiver. Takes precedence over `nmea_file`.
    pub serial_dev: Option<String>,
    pub baud: u32,

    /// Recorded NMEA replayed in a loop, for bench runs without a receiver.
    pub nmea_file: Option<PathBuf>,

    /// Wait before reopening a dropped source.
    pub retry_ms: u64,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            autosave_check_ms: 5000,
            autosave_default_s: 30,
            autosave_min_s: 5,
            serial_dev: None,
            baud: 9600,
            nmea_file: None,
            retry_ms: 5000,
        }
    }
}

impl GpsConfig {
    pub fn autosave_period(&self, requested_s: Option<u64>) -> Duration {
        Duration::from_secs(requested_s.unwrap_or(self.autosave_default_s).max(self.autosave_min_s))
    }

    pub fn autosave_check(&self) -> Duration {
        Duration::from_millis(self.autosave_check_ms)
    }

    pub fn retry(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }

    fn source(&self) -> Option<GpsSource> {
        if let Some(dev) = self.serial_dev.as_ref().filter(|d| !d.is_empty()) {
            return Some(GpsSource::Serial { dev: dev.clone(), baud: self.baud });
        }
        self.nmea_file.clone().map(GpsSource::File)
    }
}

/// Latest fix as published by whatever reads the receiver.
#[derive(Debug, Clone, Default)]
pub struct SharedGps(Arc<Mutex<Option<GpsFix>>>);

impl SharedGps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, fix: GpsFix) {
        *self.0.lock() = Some(fix);
    }

    pub fn clear(&self) {
        *self.0.lock() = None;
    }
}

impl GpsFeed for SharedGps {
    fn latest(&self) -> Option<GpsFix> {
        (*self.0.lock()).filter(|f| f.valid)
    }
}

/// `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere to signed degrees.
fn parse_deg_min(v: &str, hemi: &str) -> Option<f64> {
    let dot = v.find('.').unwrap_or(v.len());
    if dot < 3 {
        return None;
    }
    let deg: f64 = v[..dot - 2].parse().ok()?;
    let min: f64 = v[dot - 2..].parse().ok()?;
    let out = deg + min / 60.0;
    match hemi {
        "N" | "E" => Some(out),
        "S" | "W" => Some(-out),
        _ => None,
    }
}

/// Sentence body without `$`, after checking `*hh` when one is present.
fn sentence_body(line: &str) -> Option<&str> {
    let line = line.trim().strip_prefix('$')?;
    match line.split_once('*') {
        Some((body, sum)) => {
            let want = u8::from_str_radix(sum.trim(), 16).ok()?;
            let got = body.bytes().fold(0u8, |acc, b| acc ^ b);
            (want == got).then_some(body)
        }
        None => Some(line),
    }
}

/// Folds GGA and RMC sentences into fixes. RMC only contributes ground speed;
/// each GGA yields a fix carrying the latest speed seen.
#[derive(Debug, Default)]
pub struct NmeaParser {
    speed_kmh: Option<f64>,
}

impl NmeaParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str, now: f64) -> Option<GpsFix> {
        let body = sentence_body(line)?;
        let f: Vec<&str> = body.split(',').collect();
        let kind = f.first()?.get(2..)?;
        match kind {
            "RMC" if f.len() > 7 => {
                if let Ok(knots) = f[7].parse::<f64>() {
                    self.speed_kmh = Some(knots * KNOTS_TO_KMH);
                }
                None
            }
            "GGA" if f.len() > 9 => {
                let lat = parse_deg_min(f[2], f[3])?;
                let lon = parse_deg_min(f[4], f[5])?;
                let quality: u8 = f[6].parse().unwrap_or(0);
                Some(GpsFix {
                    lat,
                    lon,
                    alt: Some(f[9].parse().unwrap_or(0.0)),
                    speed: self.speed_kmh,
                    satellites: Some(f[7].parse().unwrap_or(0)),
                    valid: quality > 0,
                    timestamp: now,
                })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum GpsSource {
    Serial { dev: String, baud: u32 },
    File(PathBuf),
}

impl GpsSource {
    async fn open(&self) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        match self {
            GpsSource::Serial { dev, baud } => {
                let port = tokio_serial::new(dev, *baud).open_native_async().with_context(|| format!("open serial {}", dev))?;
                Ok(Box::new(port))
            }
            GpsSource::File(path) => {
                let f = tokio::fs::File::open(path).await.with_context(|| format!("open nmea file {}", path.display()))?;
                Ok(Box::new(f))
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            GpsSource::Serial { dev, baud } => format!("{} @ {}", dev, baud),
            GpsSource::File(path) => path.display().to_string(),
        }
    }
}

fn unix_now() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}

/// Reads lines until the source ends or fails, publishing every GGA fix.
async fn pump<R: AsyncRead + Unpin>(reader: R, parser: &mut NmeaParser, shared: &SharedGps, token: &CancellationToken) -> Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(128);
    loop {
        buf.clear();
        let n = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            r = reader.read_until(b'\n', &mut buf) => r.context("read nmea")?,
        };
        if n == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some(fix) = parser.feed(&line, unix_now()) {
            debug!("gps: fix {:.6},{:.6} valid={}", fix.lat, fix.lon, fix.valid);
            shared.publish(fix);
        }
    }
}

/// Keeps `shared` fed from the configured receiver. `None` when no source is configured.
pub fn spawn_gps_reader(cfg: GpsConfig, shared: SharedGps, token: CancellationToken) -> Option<JoinHandle<()>> {
    let source = cfg.source()?;
    Some(tokio::spawn(async move {
        let mut parser = NmeaParser::new();
        while !token.is_cancelled() {
            match source.open().await {
                Ok(link) => {
                    info!("gps: reading NMEA from {}", source.describe());
                    match pump(link, &mut parser, &shared, &token).await {
                        Ok(()) => debug!("gps: {} reached end", source.describe()),
                        Err(e) => warn!("gps: {} dropped: {:#}", source.describe(), e),
                    }
                    if matches!(source, GpsSource::Serial { .. }) {
                        shared.clear();
                    }
                }
                Err(e) => warn!("gps: {:#}", e),
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(cfg.retry()) => {}
            }
        }
        info!("gps: reader stopped");
    }))
}
