//! Client channel wire format: JSON objects discriminated by `tipo`.

pub mod command;
pub mod message;
pub mod payload;

pub use command::{parse_command, CameraAction, ClientCommand, CommandError, Direction, SystemAction};
pub use message::ServerMessage;
