use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::payload::*;

/// Relay number → energised.
pub type RelayStates = BTreeMap<u8, bool>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tipo")]
pub enum ServerMessage {
    // periodic pushes
    #[serde(rename = "ram")]
    Ram { #[serde(rename = "datos")] data: MemoryInfo },
    #[serde(rename = "temperatura")]
    Temperature { #[serde(rename = "datos")] data: TemperatureInfo },
    #[serde(rename = "cpu")]
    Cpu { #[serde(rename = "datos")] data: CpuInfo },
    #[serde(rename = "almacenamiento")]
    Storage { #[serde(rename = "datos")] data: StorageInfo },
    #[serde(rename = "disco_uso")]
    DiskUsage { #[serde(rename = "datos")] data: DiskUsageInfo },
    #[serde(rename = "bateria")]
    Battery { #[serde(rename = "datos")] data: BatteryInfo },
    #[serde(rename = "solar")]
    Solar { #[serde(rename = "datos")] data: Box<SolarInfo> },
    #[serde(rename = "peso")]
    Weight { #[serde(rename = "datos")] data: WeightInfo },
    #[serde(rename = "wifi")]
    Wifi { #[serde(rename = "datos")] data: WifiInfo },
    #[serde(rename = "gps")]
    Gps { #[serde(rename = "datos")] data: GpsInfo },
    #[serde(rename = "voltaje")]
    Supply { #[serde(rename = "datos")] data: SupplyInfo },
    #[serde(rename = "velocidad_red")]
    NetworkSpeed { #[serde(rename = "datos")] data: NetworkSpeedInfo },
    #[serde(rename = "reles")]
    Relays { #[serde(rename = "reles")] relays: RelayStates },
    #[serde(rename = "velocidad")]
    Speed { #[serde(rename = "velocidad")] level: u8 },
    #[serde(rename = "camara_estado")]
    CameraStatus { #[serde(rename = "datos")] data: CameraStateInfo },

    // replies
    #[serde(rename = "respuesta_rele")]
    RelayReply {
        #[serde(rename = "numero")]
        number: i64,
        #[serde(rename = "estado")]
        state: &'static str,
        #[serde(rename = "exito")]
        ok: bool,
        error: Option<String>,
    },
    #[serde(rename = "respuesta_motor")]
    MotorReply {
        #[serde(rename = "direccion")]
        direction: String,
        #[serde(rename = "exito")]
        ok: bool,
        error: Option<String>,
    },
    #[serde(rename = "respuesta_velocidad")]
    SpeedReply {
        #[serde(rename = "velocidad")]
        level: u8,
        #[serde(rename = "exito")]
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "respuesta_gps")]
    GpsReply {
        #[serde(rename = "accion")]
        action: &'static str,
        #[serde(rename = "exito")]
        ok: bool,
        #[serde(rename = "mensaje")]
        message: String,
    },
    #[serde(rename = "destino_actual")]
    Destination {
        #[serde(rename = "exito")]
        ok: bool,
        #[serde(rename = "latitud", skip_serializing_if = "Option::is_none")]
        lat: Option<f64>,
        #[serde(rename = "longitud", skip_serializing_if = "Option::is_none")]
        lon: Option<f64>,
        #[serde(rename = "nombre", skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(rename = "mensaje", skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "camara")]
    Camera {
        #[serde(rename = "indice")]
        index: i64,
        #[serde(rename = "accion")]
        action: &'static str,
        #[serde(rename = "exito")]
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        rtsp: Option<String>,
        #[serde(rename = "mensaje", skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "config_actual")]
    Config { #[serde(rename = "datos")] data: Map<String, Value> },
    #[serde(rename = "config_guardada")]
    ConfigSaved {
        #[serde(rename = "exito")]
        ok: bool,
        #[serde(rename = "mensaje")]
        message: String,
    },
    #[serde(rename = "recorrido_iniciado")]
    TrackStarted {
        #[serde(rename = "recorrido_id")]
        id: u64,
        #[serde(rename = "nombre")]
        name: String,
    },
    #[serde(rename = "recorrido_finalizado")]
    TrackFinished {
        #[serde(rename = "exito")]
        ok: bool,
        #[serde(rename = "mensaje", skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "lista_recorridos")]
    TrackList { #[serde(rename = "recorridos")] tracks: Vec<TrackSummary> },
    #[serde(rename = "sistema")]
    System {
        #[serde(rename = "comando")]
        action: &'static str,
        #[serde(rename = "exito")]
        ok: bool,
        #[serde(rename = "mensaje")]
        message: String,
    },
    #[serde(rename = "conexion")]
    Welcome(Box<Welcome>),
    #[serde(rename = "error")]
    Error { #[serde(rename = "mensaje")] message: String },
}

/// First message on a fresh channel: everything the UI needs to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Welcome {
    #[serde(rename = "mensaje")]
    pub message: String,
    #[serde(rename = "reles")]
    pub relays: RelayStates,
    #[serde(rename = "nombres_reles")]
    pub relay_names: Value,
    #[serde(rename = "velocidad")]
    pub speed: u8,
    #[serde(rename = "destino")]
    pub destination: Option<Destination>,
    pub ram: MemoryInfo,
    #[serde(rename = "temperatura")]
    pub temperature: TemperatureInfo,
    #[serde(rename = "bateria")]
    pub battery: BatteryInfo,
    #[serde(rename = "peso")]
    pub weight: WeightInfo,
    pub solar: SolarInfo,
    pub gps: GpsInfo,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { message: message.into() }
    }

    /// Serialised once, shared by every channel it is sent to.
    pub fn encode(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}
