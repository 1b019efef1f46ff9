pub mod error;
pub mod profile;
pub mod candidates;
pub mod supervisor;
pub mod doctor;
pub mod discovery;

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

pub use error::StreamError;
pub use profile::{AutoThresholds, Profile, ProfileTable, ResolutionInputs, ResolutionMode, Tier};
pub use candidates::{build_candidates, CameraConfig, CandidateList};
pub use discovery::{discover, DiscoveredCamera};
pub use supervisor::{Started, StreamState, StreamStatus, StreamSupervisor};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Transcoder executable. Resolved through PATH unless absolute.
    pub transcoder: String,

    /// Per-camera output lands in `<hls_root>/<camera_id>/<camera_id>.m3u8`.
    pub hls_root: PathBuf,

    /// "tcp" survives lossy wifi links better than "udp".
    pub rtsp_transport: String,

    /// Tier used in manual mode, and in auto mode until a bandwidth estimate exists.
    pub resolution: Tier,
    pub mode: ResolutionMode,

    pub validate_ms: u64,
    pub poll_ms: u64,
    pub stop_grace_ms: u64,

    pub hls_time: u32,
    pub hls_list_size: u32,

    pub profiles: ProfileTable,
    pub auto: AutoThresholds,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            transcoder: "ffmpeg".into(),
            hls_root: PathBuf::from("hls"),
            rtsp_transport: "tcp".into(),
            resolution: Tier::Medium,
            mode: ResolutionMode::Manual,
            validate_ms: 3000,
            poll_ms: 200,
            stop_grace_ms: 2000,
            hls_time: 1,
            hls_list_size: 6,
            profiles: ProfileTable::default(),
            auto: AutoThresholds::default(),
        }
    }
}

impl VideoConfig {
    pub fn validate_window(&self) -> Duration {
        Duration::from_millis(self.validate_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn output_dir(&self, camera_id: &str) -> PathBuf {
        self.hls_root.join(camera_id)
    }

    pub fn playlist_path(&self, camera_id: &str) -> PathBuf {
        self.output_dir(camera_id).join(format!("{}.m3u8", camera_id))
    }
}
