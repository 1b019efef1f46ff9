use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[serde(alias = "360p")]
    Low,
    #[serde(alias = "480p")]
    Medium,
    #[serde(alias = "720p")]
    High,
    #[serde(alias = "1080p")]
    Ultra,
}

impl Tier {
    /// Accepts tier names and the vertical-resolution labels the UI sends.
    pub fn parse(s: &str) -> Option<Tier> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "360p" => Some(Tier::Low),
            "medium" | "480p" => Some(Tier::Medium),
            "high" | "720p" => Some(Tier::High),
            "ultra" | "1080p" => Some(Tier::Ultra),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Low => write!(f, "low"),
            Tier::Medium => write!(f, "medium"),
            Tier::High => write!(f, "high"),
            Tier::Ultra => write!(f, "ultra"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub maxrate_kbps: u32,
}

impl Profile {
    const fn new(width: u32, height: u32, bitrate_kbps: u32, maxrate_kbps: u32) -> Self {
        Self { width, height, bitrate_kbps, maxrate_kbps }
    }

    /// ffmpeg `scale` filter argument.
    pub fn scale_filter(&self) -> String {
        format!("scale={}:{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProfileTable {
    pub low: Profile,
    pub medium: Profile,
    pub high: Profile,
    pub ultra: Profile,
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self {
            low: Profile::new(640, 360, 500, 800),
            medium: Profile::new(854, 480, 1000, 1500),
            high: Profile::new(1280, 720, 2500, 3500),
            ultra: Profile::new(1920, 1080, 4500, 6000),
        }
    }
}

impl ProfileTable {
    pub fn get(&self, tier: Tier) -> &Profile {
        match tier {
            Tier::Low => &self.low,
            Tier::Medium => &self.medium,
            Tier::High => &self.high,
            Tier::Ultra => &self.ultra,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tier, &Profile)> {
        [Tier::Low, Tier::Medium, Tier::High, Tier::Ultra].into_iter().map(move |t| (t, self.get(t)))
    }
}

/// Upper bounds (exclusive, Mbps) for picking a tier from measured bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct AutoThresholds {
    pub low_below_mbps: f64,
    pub medium_below_mbps: f64,
    pub high_below_mbps: f64,
}

impl Default for AutoThresholds {
    fn default() -> Self {
        Self { low_below_mbps: 2.0, medium_below_mbps: 5.0, high_below_mbps: 10.0 }
    }
}

impl AutoThresholds {
    pub fn tier_for(&self, mbps: f64) -> Tier {
        if mbps < self.low_below_mbps {
            Tier::Low
        } else if mbps < self.medium_below_mbps {
            Tier::Medium
        } else if mbps < self.high_below_mbps {
            Tier::High
        } else {
            Tier::Ultra
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    #[default]
    Manual,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionInputs {
    pub mode: ResolutionMode,
    pub tier: Tier,
    pub bandwidth_mbps: Option<f64>,
}

impl ResolutionInputs {
    pub fn manual(tier: Tier) -> Self {
        Self { mode: ResolutionMode::Manual, tier, bandwidth_mbps: None }
    }

    /// Auto mode without a usable estimate keeps the configured tier.
    pub fn pick(&self, thresholds: &AutoThresholds) -> Tier {
        match (self.mode, self.bandwidth_mbps) {
            (ResolutionMode::Auto, Some(mbps)) if mbps.is_finite() && mbps >= 0.0 => thresholds.tier_for(mbps),
            _ => self.tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_maps_to_tier() {
        let t = AutoThresholds::default();
        assert_eq!(t.tier_for(1.5), Tier::Low);
        assert_eq!(t.tier_for(4.0), Tier::Medium);
        assert_eq!(t.tier_for(8.0), Tier::High);
        assert_eq!(t.tier_for(20.0), Tier::Ultra);
        assert_eq!(t.tier_for(5.0), Tier::High);
    }

    #[test]
    fn auto_without_estimate_keeps_configured_tier() {
        let t = AutoThresholds::default();
        let mut inputs = ResolutionInputs { mode: ResolutionMode::Auto, tier: Tier::High, bandwidth_mbps: None };
        assert_eq!(inputs.pick(&t), Tier::High);

        inputs.bandwidth_mbps = Some(f64::NAN);
        assert_eq!(inputs.pick(&t), Tier::High);

        inputs.bandwidth_mbps = Some(1.0);
        assert_eq!(inputs.pick(&t), Tier::Low);

        assert_eq!(ResolutionInputs::manual(Tier::Ultra).pick(&t), Tier::Ultra);
    }

    #[test]
    fn ui_labels_parse() {
        assert_eq!(Tier::parse("480p"), Some(Tier::Medium));
        assert_eq!(Tier::parse("ULTRA"), Some(Tier::Ultra));
        assert_eq!(Tier::parse("4k"), None);
    }

    #[test]
    fn partial_profile_table_keeps_defaults() {
        let table: ProfileTable =
            serde_json::from_str(r#"{"low":{"width":320,"height":240,"bitrate_kbps":300,"maxrate_kbps":400}}"#).unwrap();
        assert_eq!(table.low.scale_filter(), "scale=320:240");
        assert_eq!(table.medium, ProfileTable::default().medium);
    }
}
