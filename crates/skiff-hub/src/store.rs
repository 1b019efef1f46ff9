use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use skiff_proto::payload::{GpsFix, TrackSummary};

use crate::collab::{KvStore, TrackLog};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("skiff-state.json") }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    kv: Map<String, Value>,
    #[serde(default)]
    tracks: Vec<Track>,
    #[serde(default)]
    next_track_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Track {
    id: u64,
    name: String,
    started_at: String,
    finished_at: Option<String>,
    points: Vec<TrackPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrackPoint {
    lat: f64,
    lon: f64,
    alt: f64,
    speed: f64,
    satellites: u32,
    at: String,
}

/// Single JSON document, rewritten atomically (tmp + rename) on every change.
/// Calls block on file I/O; async callers go through the worker pool.
pub struct JsonStore {
    path: PathBuf,
    state: Mutex<StoreFile>,
}

impl JsonStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let raw = std::fs::read(&path).with_context(|| format!("read store {}", path.display()))?;
            serde_json::from_slice(&raw).with_context(|| format!("parse store {}", path.display()))?
        } else {
            StoreFile::default()
        };
        Ok(Self { path, state: Mutex::new(state) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, st: &StoreFile) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(st)?).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| format!("replace {}", self.path.display()))?;
        debug!("store: saved {}", self.path.display());
        Ok(())
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

impl KvStore for JsonStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.state.lock().kv.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut st = self.state.lock();
        st.kv.insert(key.to_string(), value);
        self.persist(&st)
    }
}

impl TrackLog for JsonStore {
    fn start_track(&self, name: &str) -> Result<u64> {
        let mut st = self.state.lock();
        st.next_track_id += 1;
        let id = st.next_track_id;
        st.tracks.push(Track { id, name: name.to_string(), started_at: now_rfc3339(), finished_at: None, points: Vec::new() });
        self.persist(&st)?;
        Ok(id)
    }

    fn finish_track(&self, id: u64) -> Result<bool> {
        let mut st = self.state.lock();
        let Some(track) = st.tracks.iter_mut().find(|t| t.id == id && t.finished_at.is_none()) else {
            return Ok(false);
        };
        track.finished_at = Some(now_rfc3339());
        self.persist(&st)?;
        Ok(true)
    }

    fn append(&self, id: u64, fix: &GpsFix) -> Result<usize> {
        let mut st = self.state.lock();
        let track = st.tracks.iter_mut().find(|t| t.id == id).with_context(|| format!("track {} not found", id))?;
        anyhow::ensure!(track.finished_at.is_none(), "track {} already finished", id);
        track.points.push(TrackPoint {
            lat: fix.lat,
            lon: fix.lon,
            alt: fix.alt.unwrap_or(0.0),
            speed: fix.speed.unwrap_or(0.0),
            satellites: fix.satellites.unwrap_or(0),
            at: now_rfc3339(),
        });
        let n = track.points.len();
        self.persist(&st)?;
        Ok(n)
    }

    fn tracks(&self) -> Result<Vec<TrackSummary>> {
        Ok(self
            .state
            .lock()
            .tracks
            .iter()
            .rev()
            .map(|t| TrackSummary {
                id: t.id,
                name: t.name.clone(),
                started_at: t.started_at.clone(),
                finished_at: t.finished_at.clone(),
                points: t.points.len(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix() -> GpsFix {
        GpsFix { lat: -33.0, lon: -71.6, alt: Some(3.0), speed: None, satellites: Some(7), valid: true, timestamp: 0.0 }
    }

    #[test]
    fn kv_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/skiff.json");

        let store = JsonStore::open(&path).unwrap();
        assert_eq!(store.get("velocidad_actual").unwrap(), None);
        store.set("velocidad_actual", Value::from(70)).unwrap();
        drop(store);

        let store = JsonStore::open(&path).unwrap();
        assert_eq!(store.get("velocidad_actual").unwrap(), Some(Value::from(70)));
    }

    #[test]
    fn tracks_append_until_finished() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path().join("s.json")).unwrap();

        let id = store.start_track("laguna").unwrap();
        assert_eq!(store.append(id, &fix()).unwrap(), 1);
        assert_eq!(store.append(id, &fix()).unwrap(), 2);
        assert!(store.finish_track(id).unwrap());
        assert!(!store.finish_track(id).unwrap());
        assert!(store.append(id, &fix()).is_err());
        assert!(store.append(99, &fix()).is_err());

        let tracks = store.tracks().unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].points, 2);
        assert!(tracks[0].finished_at.is_some());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, b"{oops").unwrap();
        assert!(JsonStore::open(&path).is_err());
    }
}
