//! Control plane glue: client registry, command handling, telemetry pushes,
//! and the adapters (store, pins, GPS) those run against.

pub mod collab;
pub mod store;
pub mod pins;
pub mod gps;
pub mod metrics;
pub mod workers;
pub mod poller;
pub mod hub;
pub mod control;
pub mod server;
pub mod doctor;

pub use collab::{Collaborators, GpsFeed, KvStore, Level, OutputPins, TrackLog};
pub use control::{ControlConfig, Controller, Reaction};
pub use gps::{spawn_gps_reader, GpsConfig, NmeaParser, SharedGps};
pub use hub::{BroadcastHub, ClientId};
pub use pins::SimulatedPins;
pub use poller::{PollerConfig, TelemetryPoller, TelemetrySample};
pub use server::{AppState, ServerConfig};
pub use store::{JsonStore, StoreConfig};
pub use workers::Workers;
