//! Seams to the parts of the boat this crate only drives: persistence, GPIO, GPS.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value};

use skiff_proto::payload::{GpsFix, TrackSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

pub trait OutputPins: Send + Sync {
    fn set_output(&self, pin: u8, level: Level) -> Result<()>;

    /// PWM duty cycle, 0..=100.
    fn set_duty(&self, pin: u8, percent: u8) -> Result<()>;
}

/// Flat key/value persistence. Values are JSON so the UI config round-trips untouched.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Append-only GPS track storage.
pub trait TrackLog: Send + Sync {
    fn start_track(&self, name: &str) -> Result<u64>;

    /// `false` when the track does not exist or is already closed.
    fn finish_track(&self, id: u64) -> Result<bool>;

    /// Returns the number of points now in the track.
    fn append(&self, id: u64, fix: &GpsFix) -> Result<usize>;

    fn tracks(&self) -> Result<Vec<TrackSummary>>;
}

pub trait GpsFeed: Send + Sync {
    fn latest(&self) -> Option<GpsFix>;
}

/// Everything the controller drives but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub pins: Arc<dyn OutputPins>,
    pub store: Arc<dyn KvStore>,
    pub tracks: Arc<dyn TrackLog>,
    pub gps: Arc<dyn GpsFeed>,
}

pub(crate) fn as_object(v: Option<Value>) -> Map<String, Value> {
    match v {
        Some(Value::Object(m)) => m,
        _ => Map::new(),
    }
}
