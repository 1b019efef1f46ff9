//! VE.Direct text protocol decoder.
//!
//! The controller streams `key<TAB>value` lines and closes each block with a
//! `Checksum` line. Blocks are assembled into a [`Frame`] and converted into an
//! immutable [`TelemetrySnapshot`] once closed.

use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::trace;

use crate::{BatteryBounds, SolarError};

pub const TERMINATOR: &str = "Checksum";
pub const MANDATORY_KEY: &str = "V";

// Garbage without newlines is dropped past this size.
const MAX_PENDING: usize = 4096;
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// Raw key/value pairs of one protocol block, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    fields: Vec<(String, String)>,
}

impl Frame {
    pub fn insert(&mut self, key: &str, value: &str) {
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.fields.push((key.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn int(&self, key: &str) -> i64 {
        self.get(key).and_then(|v| v.trim().parse().ok()).unwrap_or(0)
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeState {
    Off,
    Fault,
    Bulk,
    Absorption,
    Float,
    Equalize,
    External,
    Unknown,
}

impl ChargeState {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "0" => ChargeState::Off,
            "2" => ChargeState::Fault,
            "3" => ChargeState::Bulk,
            "4" => ChargeState::Absorption,
            "5" => ChargeState::Float,
            "7" => ChargeState::Equalize,
            "252" => ChargeState::External,
            _ => ChargeState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeState::Off => "off",
            ChargeState::Fault => "fault",
            ChargeState::Bulk => "bulk",
            ChargeState::Absorption => "absorption",
            ChargeState::Float => "float",
            ChargeState::Equalize => "equalize",
            ChargeState::External => "external",
            ChargeState::Unknown => "unknown",
        }
    }
}

/// Engineering-unit view of one closed frame.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TelemetrySnapshot {
    pub panel_voltage: f64,
    pub panel_current: f64,
    pub panel_power: i64,
    pub battery_voltage: f64,
    pub battery_current: f64,
    pub battery_percent: u8,
    pub charge_state: ChargeState,
    pub error_code: i64,
    /// H20
    pub yield_today: i64,
    /// H19, in kWh
    pub yield_total: f64,
    /// H22
    pub yield_yesterday: i64,
    pub max_power_today: i64,
    pub max_power_yesterday: i64,
    pub charging: bool,
    pub frame_interval_s: Option<f64>,
    pub frame: Frame,
}

impl TelemetrySnapshot {
    /// Returns `None` unless the frame carries a numeric battery voltage.
    pub fn from_frame(frame: Frame, bounds: &BatteryBounds, interval: Option<Duration>) -> Option<Self> {
        let battery_mv: i64 = frame.get(MANDATORY_KEY)?.trim().parse().ok()?;
        let battery_voltage = battery_mv as f64 / 1000.0;
        let panel_voltage = frame.int("VPV") as f64 / 1000.0;
        let panel_power = frame.int("PPV");
        let panel_current = if panel_voltage > 0.0 { panel_power as f64 / panel_voltage } else { 0.0 };

        Some(Self {
            panel_voltage,
            panel_current,
            panel_power,
            battery_voltage,
            battery_current: frame.int("I") as f64 / 1000.0,
            battery_percent: bounds.percent(battery_voltage),
            charge_state: frame.get("CS").map(ChargeState::from_code).unwrap_or(ChargeState::Unknown),
            error_code: frame.int("ERR"),
            yield_today: frame.int("H20"),
            yield_total: frame.int("H19") as f64 / 10.0,
            yield_yesterday: frame.int("H22"),
            max_power_today: frame.int("H21"),
            max_power_yesterday: frame.int("H23"),
            charging: panel_power > 0,
            frame_interval_s: interval.map(|d| d.as_secs_f64()),
            frame,
        })
    }

    pub fn battery_millivolts(&self) -> i64 {
        (self.battery_voltage * 1000.0).round() as i64
    }
}

enum Line {
    Terminator,
    Field(String, String),
    Ignored,
}

fn classify(raw: &[u8]) -> Line {
    let t = TERMINATOR.as_bytes();
    // The checksum byte is arbitrary, so match on the raw prefix only.
    if raw.starts_with(t) && (raw.len() == t.len() || raw[t.len()] == b'\t') {
        return Line::Terminator;
    }
    let Ok(text) = std::str::from_utf8(raw) else { return Line::Ignored; };
    let parts: Vec<&str> = text.split('\t').collect();
    match parts.as_slice() {
        [k, v] if !k.is_empty() => Line::Field(k.to_string(), v.to_string()),
        _ => Line::Ignored,
    }
}

/// Stateful line assembler over a byte link. Keeps partial lines across calls.
pub struct FrameDecoder {
    bounds: BatteryBounds,
    pending: BytesMut,
}

impl FrameDecoder {
    pub fn new(bounds: BatteryBounds) -> Self {
        Self { bounds, pending: BytesMut::with_capacity(512) }
    }

    /// Drops any partial line. Call after the link is reopened.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Reads until a valid block closes after the first terminator, or `timeout` elapses.
    ///
    /// The first terminator only synchronises (its block is usually partial) and starts
    /// the inter-frame clock; the block closed by the next terminator is returned. If the
    /// deadline passes after a valid first block, that block is returned without interval.
    pub fn read_frame<R: Read + ?Sized>(&mut self, link: &mut R, timeout: Duration) -> Result<TelemetrySnapshot, SolarError> {
        let deadline = Instant::now() + timeout;
        let mut current = Frame::default();
        let mut last_close: Option<Instant> = None;
        let mut first_valid: Option<Frame> = None;
        let mut chunk = [0u8; 256];

        loop {
            while let Some(raw) = self.next_line() {
                match classify(&raw) {
                    Line::Field(k, v) => current.insert(&k, &v),
                    Line::Ignored => {}
                    Line::Terminator => {
                        let closed = std::mem::take(&mut current);
                        let now = Instant::now();
                        match last_close.replace(now) {
                            None => {
                                trace!("vedirect: sync block with {} fields", closed.len());
                                if closed.contains(MANDATORY_KEY) {
                                    first_valid = Some(closed);
                                }
                            }
                            Some(prev) => {
                                if let Some(snap) = TelemetrySnapshot::from_frame(closed, &self.bounds, Some(now - prev)) {
                                    return Ok(snap);
                                }
                            }
                        }
                    }
                }
            }

            if Instant::now() >= deadline {
                break;
            }

            match link.read(&mut chunk) {
                Ok(0) => std::thread::sleep(IDLE_WAIT),
                Ok(n) => self.push(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
                Err(e) => return Err(SolarError::Io(e)),
            }
        }

        first_valid
            .and_then(|f| TelemetrySnapshot::from_frame(f, &self.bounds, None))
            .ok_or(SolarError::IncompleteFrame { waited: timeout })
    }

    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        if self.pending.len() > MAX_PENDING && !self.pending.contains(&b'\n') {
            self.pending.clear();
        }
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.pending.iter().position(|b| *b == b'\n')?;
        let line = self.pending.split_to(pos + 1);
        let mut end = line.len() - 1;
        if end > 0 && line[end - 1] == b'\r' {
            end -= 1;
        }
        Some(line[..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn block(fields: &[(&str, &str)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (k, v) in fields {
            out.extend_from_slice(format!("\r\n{}\t{}", k, v).as_bytes());
        }
        out.extend_from_slice(b"\r\nChecksum\t\x8f");
        out
    }

    fn bulk_block() -> Vec<u8> {
        block(&[
            ("PID", "0xA053"),
            ("V", "12500"),
            ("I", "1000"),
            ("VPV", "18000"),
            ("PPV", "40"),
            ("CS", "3"),
            ("ERR", "0"),
            ("H19", "1234"),
            ("H20", "12"),
            ("H21", "55"),
        ])
    }

    fn decode(bytes: Vec<u8>, timeout_ms: u64) -> Result<TelemetrySnapshot, SolarError> {
        let mut dec = FrameDecoder::new(BatteryBounds::default());
        dec.read_frame(&mut Cursor::new(bytes), Duration::from_millis(timeout_ms))
    }

    #[test]
    fn bulk_charge_block_decodes() {
        let mut stream = b"0\r\nPPV\t3".to_vec(); // tail of a block already in flight
        stream.extend(bulk_block());
        stream.extend(bulk_block());
        stream.extend_from_slice(b"\r\n");

        let snap = decode(stream, 1000).unwrap();
        assert!((snap.battery_voltage - 12.5).abs() < 1e-9);
        assert!((snap.battery_current - 1.0).abs() < 1e-9);
        assert!((snap.panel_voltage - 18.0).abs() < 1e-9);
        assert_eq!(snap.panel_power, 40);
        assert_eq!(snap.charge_state, ChargeState::Bulk);
        assert!(snap.charging);
        assert_eq!(snap.battery_percent, 62);
        assert!((snap.yield_total - 123.4).abs() < 1e-9);
        assert_eq!(snap.max_power_today, 55);
        assert!(snap.frame_interval_s.is_some());
        assert_eq!(snap.frame.get("PID"), Some("0xA053"));
    }

    #[test]
    fn block_without_voltage_times_out() {
        let no_v = block(&[("I", "1000"), ("VPV", "18000"), ("PPV", "40")]);
        let mut stream = no_v.clone();
        stream.extend(no_v.clone());
        stream.extend(no_v);
        stream.extend_from_slice(b"\r\n");

        match decode(stream, 100) {
            Err(SolarError::IncompleteFrame { .. }) => {}
            other => panic!("expected IncompleteFrame, got {:?}", other),
        }
    }

    #[test]
    fn lone_valid_block_returned_at_deadline() {
        let mut stream = bulk_block();
        stream.extend_from_slice(b"\r\n");
        // leading "\r\n" of block() puts V inside the first closed block
        let snap = decode(stream, 50).unwrap();
        assert_eq!(snap.battery_millivolts(), 12500);
        assert!(snap.frame_interval_s.is_none());
    }

    #[test]
    fn reset_discards_bytes_from_previous_link() {
        let mut dec = FrameDecoder::new(BatteryBounds::default());
        let mut dead = Cursor::new(b"\r\nXSTALE\t1".to_vec());
        assert!(dec.read_frame(&mut dead, Duration::from_millis(20)).is_err());

        dec.reset();
        let mut fresh = block(&[("V", "12500")]);
        fresh.extend_from_slice(b"\r\n");
        let snap = dec.read_frame(&mut Cursor::new(fresh), Duration::from_millis(50)).unwrap();
        assert_eq!(snap.battery_millivolts(), 12500);
        assert!(snap.frame.get("XSTALE").is_none());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let mut stream = bulk_block();
        stream.extend_from_slice(b"\r\nV\t13000\r\nbogus line\r\nA\tB\tC\r\n\xff\xfe\tjunk\r\nCS\t5");
        stream.extend_from_slice(b"\r\nChecksum\t\x01\r\n");

        let snap = decode(stream, 1000).unwrap();
        assert_eq!(snap.battery_millivolts(), 13000);
        assert_eq!(snap.charge_state, ChargeState::Float);
        assert_eq!(snap.frame.len(), 2);
    }

    #[test]
    fn millivolts_round_trip() {
        for mv in [0i64, 1, 999, 10_500, 12_345, 13_999, 28_801, 65_535] {
            let mut stream = block(&[("V", &mv.to_string())]);
            stream.extend(block(&[("V", &mv.to_string())]));
            stream.extend_from_slice(b"\r\n");
            let snap = decode(stream, 500).unwrap();
            assert_eq!(snap.battery_millivolts(), mv);
        }
    }

    #[test]
    fn unmapped_charge_state_is_unknown() {
        assert_eq!(ChargeState::from_code("9"), ChargeState::Unknown);
        assert_eq!(ChargeState::from_code("252"), ChargeState::External);
        assert_eq!(ChargeState::from_code(" 4 "), ChargeState::Absorption);
    }

    #[test]
    fn repeated_key_overwrites_in_place() {
        let mut f = Frame::default();
        f.insert("V", "1");
        f.insert("I", "2");
        f.insert("V", "3");
        let pairs: Vec<_> = f.iter().collect();
        assert_eq!(pairs, vec![("V", "3"), ("I", "2")]);
    }
}
