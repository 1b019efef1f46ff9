use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};

use tokio_serial::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, warn};

use crate::SolarError;

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub dev: String,
    pub matched: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct DetectResult {
    pub chosen: Option<String>,
    pub probes: Vec<ProbeResult>,
}

/// USB-serial adapters first, then stable by-id links.
pub fn default_candidate_devs() -> Vec<String> {
    let mut devs = list_dir("/dev", |name| name.starts_with("ttyUSB") || name.starts_with("ttyACM"));
    devs.extend(list_dir("/dev/serial/by-id", |_| true));
    devs
}

fn list_dir(dir: &str, keep: impl Fn(&str) -> bool) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else { return Vec::new(); };
    let mut out: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| keep(name))
        .map(|name| format!("{}/{}", dir, name))
        .collect();
    out.sort();
    out
}

/// 8N1, no flow control. `read_timeout` bounds each individual read call.
pub fn open_link(dev: &str, baud: u32, read_timeout: Duration) -> Result<Box<dyn SerialPort>, SolarError> {
    tokio_serial::new(dev, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(read_timeout)
        .open()
        .map_err(|e| SolarError::LinkUnavailable { device: dev.to_string(), reason: e.to_string() })
}

pub fn looks_like_vedirect(line: &str) -> bool {
    line.starts_with("V\t") || line.starts_with("I\t") || line.starts_with("VPV\t")
}

pub fn detect_controller(candidate_devs: Vec<String>, baud: u32, probe_lines: usize, timeout: Duration) -> DetectResult {
    let mut probes = Vec::new();

    for dev in candidate_devs {
        let start = Instant::now();
        let (matched, note) = match probe(&dev, baud, probe_lines, timeout) {
            Ok(true) => (true, "vedirect".to_string()),
            Ok(false) => (false, "no vedirect lines".to_string()),
            Err(e) => {
                debug!("solar detect: probe failed dev={} err={}", dev, e);
                (false, format!("open/read failed: {}", e))
            }
        };

        probes.push(ProbeResult { dev: dev.clone(), matched, elapsed_ms: start.elapsed().as_millis() as u64, note });

        if matched {
            info!("solar detect: VE.Direct stream on {}", dev);
            return DetectResult { chosen: Some(dev), probes };
        }
    }

    warn!("solar detect: no charge controller found on {} candidates", probes.len());
    DetectResult { chosen: None, probes }
}

fn probe(dev: &str, baud: u32, probe_lines: usize, timeout: Duration) -> Result<bool, SolarError> {
    let port = open_link(dev, baud, timeout)?;
    let mut reader = BufReader::new(port);
    let mut raw = Vec::new();
    let start = Instant::now();

    for _ in 0..probe_lines {
        if start.elapsed() >= timeout {
            break;
        }
        raw.clear();
        match reader.read_until(b'\n', &mut raw) {
            Ok(0) => break,
            Ok(_) => {
                if looks_like_vedirect(String::from_utf8_lossy(&raw).trim()) {
                    return Ok(true);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(false)
}
