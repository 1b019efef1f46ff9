use std::collections::HashSet;

use anyhow::Result;

use crate::{build_candidates, CameraConfig, VideoConfig};

pub fn check_video(cfg: &VideoConfig) -> Result<()> {
    anyhow::ensure!(!cfg.transcoder.trim().is_empty(), "video.transcoder empty");
    anyhow::ensure!(!cfg.hls_root.as_os_str().is_empty(), "video.hls_root empty");
    anyhow::ensure!(cfg.poll_ms > 0 && cfg.poll_ms <= cfg.validate_ms, "video.poll_ms must be in 1..=validate_ms");
    anyhow::ensure!(cfg.hls_time > 0 && cfg.hls_list_size > 0, "video.hls_time/hls_list_size must be > 0");

    for (tier, p) in cfg.profiles.iter() {
        anyhow::ensure!(p.width > 0 && p.height > 0, "video.profiles.{}: zero scale", tier);
        anyhow::ensure!(p.maxrate_kbps >= p.bitrate_kbps, "video.profiles.{}: maxrate below bitrate", tier);
    }

    let a = &cfg.auto;
    anyhow::ensure!(
        0.0 < a.low_below_mbps && a.low_below_mbps < a.medium_below_mbps && a.medium_below_mbps < a.high_below_mbps,
        "video.auto thresholds must be positive and increasing"
    );
    Ok(())
}

/// Returns warnings for cameras that are enabled but have nothing to connect to.
pub fn check_cameras(cams: &[CameraConfig]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut warnings = Vec::new();
    for cam in cams {
        anyhow::ensure!(
            !cam.id.is_empty() && cam.id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
            "camera id '{}' must be non-empty [A-Za-z0-9_-]",
            cam.id
        );
        anyhow::ensure!(seen.insert(cam.id.as_str()), "duplicate camera id '{}'", cam.id);
        if cam.enabled && build_candidates(cam).is_empty() {
            warnings.push(format!("camera {} enabled but has no usable url/host", cam.id));
        }
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass() {
        check_video(&VideoConfig::default()).unwrap();
    }

    #[test]
    fn camera_ids_must_be_unique_and_path_safe() {
        let cam = |id: &str| CameraConfig { id: id.into(), host: Some("h".into()), ..CameraConfig::default() };
        assert!(check_cameras(&[cam("cam1"), cam("cam1")]).is_err());
        assert!(check_cameras(&[cam("../etc")]).is_err());

        let warnings = check_cameras(&[cam("cam1"), CameraConfig { id: "cam2".into(), ..CameraConfig::default() }]).unwrap();
        assert_eq!(warnings.len(), 1);
    }
}
