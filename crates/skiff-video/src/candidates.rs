use serde::Deserialize;

/// Port most RTSP cameras answer on when nothing else works.
pub const RTSP_DEFAULT_PORT: u16 = 554;
pub const ONVIF_DEFAULT_PORT: u16 = 8899;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Stream id, also the HLS directory/playlist name ("cam1", "cam2").
    pub id: String,
    pub enabled: bool,
    pub auto_start: bool,

    /// Full connection URL. Tried first when well formed.
    pub url: Option<String>,

    /// ONVIF-style host settings used to derive URLs.
    pub host: Option<String>,
    pub rtsp_port: Option<u16>,
    pub onvif_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub profile_path: Option<String>,
    pub scheme: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            enabled: true,
            auto_start: false,
            url: None,
            host: None,
            rtsp_port: None,
            onvif_port: ONVIF_DEFAULT_PORT,
            username: None,
            password: None,
            profile_path: None,
            scheme: "rtsp".into(),
        }
    }
}

/// Connection URLs for one camera, highest priority first. Empty means disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateList(Vec<String>);

impl CandidateList {
    /// Keeps well-formed URLs only, first occurrence wins.
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Self::default();
        for url in urls {
            let url = url.into();
            if is_well_formed(&url) {
                out.push_unique(url);
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(|s| s.as_str())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    fn push_unique(&mut self, url: String) {
        if !self.0.contains(&url) {
            self.0.push(url);
        }
    }
}

pub fn build_candidates(cam: &CameraConfig) -> CandidateList {
    let mut out = CandidateList::default();
    if !cam.enabled {
        return out;
    }

    if let Some(url) = non_empty(&cam.url) {
        if is_well_formed(url) {
            out.push_unique(url.to_string());
        }
    }

    if let Some(host) = non_empty(&cam.host) {
        let scheme = if cam.scheme.trim().is_empty() { "rtsp" } else { cam.scheme.trim() };
        let creds = match (non_empty(&cam.username), non_empty(&cam.password)) {
            (Some(u), Some(p)) => format!("{}:{}@", u, p),
            (Some(u), None) => format!("{}@", u),
            _ => String::new(),
        };
        let path = non_empty(&cam.profile_path).unwrap_or("").trim_start_matches('/');

        let mut ports: Vec<u16> = Vec::with_capacity(3);
        for port in [cam.rtsp_port.unwrap_or(RTSP_DEFAULT_PORT), cam.onvif_port, RTSP_DEFAULT_PORT] {
            if port != 0 && !ports.contains(&port) {
                ports.push(port);
            }
        }

        for port in ports {
            out.push_unique(format!("{}://{}{}:{}/{}", scheme, creds, host, port, path));
        }
    }

    out
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// `scheme://` followed by a non-empty authority.
pub fn is_well_formed(url: &str) -> bool {
    let Some((scheme, rest)) = url.split_once("://") else { return false; };
    let scheme_ok = scheme.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false)
        && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    let authority = rest.split('/').next().unwrap_or("");
    let host = authority.rsplit('@').next().unwrap_or("");
    scheme_ok && !host.is_empty() && !host.starts_with(':') && !url.chars().any(char::is_whitespace)
}
