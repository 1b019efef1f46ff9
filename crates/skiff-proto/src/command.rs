use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::payload::Destination;

/// Inbound commands. Field names follow the wire; numbers may arrive as strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "tipo")]
pub enum ClientCommand {
    #[serde(rename = "rele")]
    Relay {
        #[serde(rename = "numero", default, deserialize_with = "lenient_i64")]
        number: i64,
        #[serde(rename = "estado", default, deserialize_with = "lenient_bool")]
        on: bool,
    },

    #[serde(rename = "motor")]
    Motor {
        #[serde(rename = "direccion", default = "default_direction")]
        direction: String,
    },

    #[serde(rename = "velocidad")]
    Speed {
        #[serde(rename = "nivel", default = "default_level", deserialize_with = "lenient_i64")]
        level: i64,
    },

    #[serde(rename = "camara")]
    Camera {
        #[serde(rename = "indice", default = "default_index", deserialize_with = "lenient_i64")]
        index: i64,
        #[serde(rename = "accion", default)]
        action: CameraAction,
    },

    #[serde(rename = "gps_guardar")]
    SavePosition,

    #[serde(rename = "gps_destino")]
    SetDestination {
        #[serde(rename = "latitud", default, deserialize_with = "lenient_f64")]
        lat: Option<f64>,
        #[serde(rename = "longitud", default, deserialize_with = "lenient_f64")]
        lon: Option<f64>,
        #[serde(rename = "nombre", default)]
        name: Option<String>,
    },

    #[serde(rename = "obtener_datos")]
    GetData,

    #[serde(rename = "obtener_config")]
    GetConfig,

    #[serde(rename = "guardar_config")]
    SaveConfig {
        #[serde(default)]
        config: Map<String, Value>,
    },

    #[serde(rename = "iniciar_recorrido")]
    StartTrack {
        #[serde(rename = "nombre", default)]
        name: Option<String>,
    },

    #[serde(rename = "finalizar_recorrido")]
    FinishTrack,

    #[serde(rename = "obtener_recorridos")]
    ListTracks,

    #[serde(rename = "sistema")]
    System {
        #[serde(rename = "comando")]
        action: SystemAction,
    },
}

const KNOWN: &[&str] = &[
    "rele",
    "motor",
    "velocidad",
    "camara",
    "gps_guardar",
    "gps_destino",
    "obtener_datos",
    "obtener_config",
    "guardar_config",
    "iniciar_recorrido",
    "finalizar_recorrido",
    "obtener_recorridos",
    "sistema",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum CameraAction {
    #[default]
    #[serde(rename = "iniciar")]
    Start,
    #[serde(rename = "detener")]
    Stop,
}

impl CameraAction {
    pub fn as_wire(&self) -> &'static str {
        match self {
            CameraAction::Start => "iniciar",
            CameraAction::Stop => "detener",
        }
    }
}

/// Host power actions. Anything else is a field error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SystemAction {
    #[serde(rename = "apagar")]
    Shutdown,
    #[serde(rename = "reiniciar")]
    Reboot,
}

impl SystemAction {
    pub fn as_wire(&self) -> &'static str {
        match self {
            SystemAction::Shutdown => "apagar",
            SystemAction::Reboot => "reiniciar",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Direction> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adelante" => Some(Direction::Forward),
            "atras" | "atrás" => Some(Direction::Backward),
            "izquierda" => Some(Direction::Left),
            "derecha" => Some(Direction::Right),
            "parar" => Some(Direction::Stop),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("JSON inválido")]
    InvalidJson,

    #[error("Comando \"{0}\" no reconocido")]
    Unknown(String),

    #[error("Parámetros inválidos para \"{tipo}\": {reason}")]
    BadFields { tipo: String, reason: String },
}

/// Unknown `tipo` and malformed fields are told apart so each gets its own reply.
pub fn parse_command(text: &str) -> Result<ClientCommand, CommandError> {
    let value: Value = serde_json::from_str(text).map_err(|_| CommandError::InvalidJson)?;
    let tipo = match value.get("tipo") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "None".to_string(),
    };
    if !value.is_object() {
        return Err(CommandError::InvalidJson);
    }
    if !KNOWN.contains(&tipo.as_str()) {
        return Err(CommandError::Unknown(tipo));
    }
    serde_json::from_value(value).map_err(|e| CommandError::BadFields { tipo, reason: e.to_string() })
}

impl ClientCommand {
    pub fn destination(&self) -> Option<Destination> {
        match self {
            ClientCommand::SetDestination { lat: Some(lat), lon: Some(lon), name } => {
                Some(Destination { lat: *lat, lon: *lon, name: name.clone() })
            }
            _ => None,
        }
    }
}

fn default_direction() -> String {
    "parar".into()
}

fn default_level() -> i64 {
    50
}

fn default_index() -> i64 {
    1
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| serde::de::Error::custom("integer out of range")),
        Value::String(s) => s.trim().parse().map_err(|_| serde::de::Error::custom(format!("'{}' is not an integer", s))),
        Value::Bool(b) => Ok(b as i64),
        other => Err(serde::de::Error::custom(format!("expected integer, got {}", other))),
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("'{}' is not a number", s))),
        other => Err(serde::de::Error::custom(format!("expected number, got {}", other))),
    }
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on" | "si" | "sí"),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_accepts_loose_types() {
        let cmd = parse_command(r#"{"tipo":"rele","numero":"3","estado":1}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Relay { number: 3, on: true });

        let cmd = parse_command(r#"{"tipo":"rele","numero":4}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Relay { number: 4, on: false });
    }

    #[test]
    fn defaults_fill_missing_fields() {
        assert_eq!(parse_command(r#"{"tipo":"velocidad"}"#).unwrap(), ClientCommand::Speed { level: 50 });
        assert_eq!(
            parse_command(r#"{"tipo":"camara"}"#).unwrap(),
            ClientCommand::Camera { index: 1, action: CameraAction::Start }
        );
        assert_eq!(parse_command(r#"{"tipo":"motor"}"#).unwrap(), ClientCommand::Motor { direction: "parar".into() });
    }

    #[test]
    fn unknown_and_invalid_are_distinct() {
        match parse_command(r#"{"tipo":"despegar"}"#) {
            Err(e @ CommandError::Unknown(_)) => assert_eq!(e.to_string(), "Comando \"despegar\" no reconocido"),
            other => panic!("{:?}", other),
        }
        assert!(matches!(parse_command("{not json"), Err(CommandError::InvalidJson)));
        assert!(matches!(parse_command("[1,2]"), Err(CommandError::InvalidJson)));
        assert!(matches!(parse_command(r#"{"numero":1}"#), Err(CommandError::Unknown(t)) if t == "None"));
        assert!(matches!(
            parse_command(r#"{"tipo":"camara","accion":"grabar"}"#),
            Err(CommandError::BadFields { .. })
        ));
    }

    #[test]
    fn destination_requires_both_coordinates() {
        let cmd = parse_command(r#"{"tipo":"gps_destino","latitud":"-33.45","longitud":-70.66,"nombre":"muelle"}"#).unwrap();
        let d = cmd.destination().unwrap();
        assert_eq!(d.lat, -33.45);
        assert_eq!(d.name.as_deref(), Some("muelle"));

        let cmd = parse_command(r#"{"tipo":"gps_destino","latitud":1.0}"#).unwrap();
        assert!(cmd.destination().is_none());
    }

    #[test]
    fn system_takes_a_known_action() {
        let cmd = parse_command(r#"{"tipo":"sistema","comando":"reiniciar"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::System { action: SystemAction::Reboot });
        assert_eq!(SystemAction::Shutdown.as_wire(), "apagar");
        assert!(matches!(
            parse_command(r#"{"tipo":"sistema","comando":"formatear"}"#),
            Err(CommandError::BadFields { .. })
        ));
        assert!(matches!(parse_command(r#"{"tipo":"sistema"}"#), Err(CommandError::BadFields { .. })));
    }

    #[test]
    fn directions_parse() {
        assert_eq!(Direction::parse("ATRAS"), Some(Direction::Backward));
        assert_eq!(Direction::parse("arriba"), None);
    }
}
