use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryInfo {
    #[serde(rename = "total")]
    pub total_mb: u64,
    #[serde(rename = "used")]
    pub used_mb: u64,
    #[serde(rename = "available")]
    pub available_mb: u64,
    pub percent: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureInfo {
    #[serde(rename = "temperatura")]
    pub celsius: f64,
    #[serde(rename = "unidad")]
    pub unit: &'static str,
}

impl Default for TemperatureInfo {
    fn default() -> Self {
        Self { celsius: 0.0, unit: "C" }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuInfo {
    #[serde(rename = "porcentaje")]
    pub percent: u8,
    pub cores: usize,
}

impl Default for CpuInfo {
    fn default() -> Self {
        Self { percent: 0, cores: 1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageInfo {
    pub total_gb: f64,
    #[serde(rename = "usado_gb")]
    pub used_gb: f64,
    #[serde(rename = "disponible_gb")]
    pub available_gb: f64,
    #[serde(rename = "porcentaje")]
    pub percent: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskUsageInfo {
    #[serde(rename = "uso_porcentaje")]
    pub percent: f64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryInfo {
    #[serde(rename = "porcentaje")]
    pub percent: u8,
    #[serde(rename = "voltaje")]
    pub voltage: f64,
    #[serde(rename = "corriente")]
    pub current: f64,
    #[serde(rename = "estado")]
    pub state: String,
    #[serde(rename = "conectado")]
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatteryInfo {
    pub fn disconnected(error: impl Into<String>) -> Self {
        Self {
            percent: 0,
            voltage: 0.0,
            current: 0.0,
            state: "desconectado".into(),
            connected: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolarInfo {
    #[serde(rename = "panel_voltaje")]
    pub panel_voltage: f64,
    #[serde(rename = "panel_corriente")]
    pub panel_current: f64,
    #[serde(rename = "potencia")]
    pub panel_power: i64,
    #[serde(rename = "bateria_voltaje")]
    pub battery_voltage: f64,
    #[serde(rename = "bateria_corriente")]
    pub battery_current: f64,
    #[serde(rename = "porcentaje")]
    pub battery_percent: u8,
    #[serde(rename = "estado")]
    pub state: String,
    pub error_code: i64,
    pub yield_today: i64,
    pub yield_total: f64,
    pub max_power_today: i64,
    #[serde(rename = "yield_ayer")]
    pub yield_yesterday: i64,
    #[serde(rename = "max_power_ayer")]
    pub max_power_yesterday: i64,
    #[serde(rename = "cargando")]
    pub charging: bool,
    #[serde(rename = "intervalo_frame_s")]
    pub frame_interval_s: Option<f64>,
    #[serde(rename = "conectado")]
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "raw_data")]
    pub raw: BTreeMap<String, String>,
}

impl SolarInfo {
    pub fn disconnected(error: impl Into<String>) -> Self {
        Self {
            panel_voltage: 0.0,
            panel_current: 0.0,
            panel_power: 0,
            battery_voltage: 0.0,
            battery_current: 0.0,
            battery_percent: 0,
            state: "desconectado".into(),
            error_code: 0,
            yield_today: 0,
            yield_total: 0.0,
            max_power_today: 0,
            yield_yesterday: 0,
            max_power_yesterday: 0,
            charging: false,
            frame_interval_s: None,
            connected: false,
            error: Some(error.into()),
            raw: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightInfo {
    #[serde(rename = "peso_kg")]
    pub kg: f64,
    #[serde(rename = "umbral_kg")]
    pub threshold_kg: f64,
    #[serde(rename = "alerta")]
    pub alert: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WifiInfo {
    pub ssid: String,
    pub rssi_dbm: Option<i32>,
    #[serde(rename = "calidad")]
    pub quality: Option<u8>,
}

/// Board supply state derived from the firmware throttle flags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupplyInfo {
    #[serde(rename = "voltaje")]
    pub volts: f64,
    #[serde(rename = "alerta")]
    pub alert: bool,
    #[serde(rename = "estado_raw")]
    pub raw: String,
}

impl Default for SupplyInfo {
    fn default() -> Self {
        Self { volts: 0.0, alert: false, raw: "error".into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub alt: Option<f64>,
    pub speed: Option<f64>,
    pub satellites: Option<u32>,
    pub valid: bool,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpsInfo {
    #[serde(rename = "valido")]
    pub valid: bool,
    #[serde(rename = "latitud", skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(rename = "longitud", skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(rename = "altitud", skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
    #[serde(rename = "velocidad", skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(rename = "satelites", skip_serializing_if = "Option::is_none")]
    pub satellites: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl From<Option<GpsFix>> for GpsInfo {
    fn from(fix: Option<GpsFix>) -> Self {
        match fix {
            Some(f) if f.valid => GpsInfo {
                valid: true,
                lat: Some(f.lat),
                lon: Some(f.lon),
                alt: f.alt,
                speed: f.speed,
                satellites: f.satellites,
                timestamp: Some(f.timestamp),
            },
            _ => GpsInfo::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetworkSpeedInfo {
    /// Downlink estimate in kbit/s; 0 when unknown.
    #[serde(rename = "velocidad")]
    pub kbps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(rename = "latitud")]
    pub lat: f64,
    #[serde(rename = "longitud")]
    pub lon: f64,
    #[serde(rename = "nombre")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub id: u64,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "inicio")]
    pub started_at: String,
    #[serde(rename = "fin")]
    pub finished_at: Option<String>,
    #[serde(rename = "puntos")]
    pub points: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraStateInfo {
    #[serde(rename = "camara")]
    pub camera: String,
    #[serde(rename = "estado")]
    pub state: String,
    #[serde(rename = "candidato", skip_serializing_if = "Option::is_none")]
    pub candidate: Option<usize>,
    #[serde(rename = "resolucion", skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
