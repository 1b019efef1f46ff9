//! Client channel end to end: real listener, real WebSocket clients, simulated pins.
//!
//! Run: `cargo test -p skiff-hub --test ws_e2e`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use skiff_hub::control::ControlConfig;
use skiff_hub::pins::PinState;
use skiff_hub::server::{router, serve};
use skiff_hub::{
    AppState, BroadcastHub, Collaborators, Controller, GpsConfig, GpsFeed, JsonStore, Level, PollerConfig,
    SharedGps, SimulatedPins, TelemetryPoller, Workers,
};
use skiff_power::reader::SharedSolar;
use skiff_video::{CameraConfig, StreamSupervisor, VideoConfig};

type Ws = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct Server {
    addr: SocketAddr,
    pins: Arc<SimulatedPins>,
    token: CancellationToken,
    _dir: tempfile::TempDir,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn start_server(max_clients: usize) -> Server {
    let dir = tempfile::tempdir().unwrap();
    let pins = Arc::new(SimulatedPins::new());
    let store = Arc::new(JsonStore::open(dir.path().join("state.json")).unwrap());
    let gps: Arc<dyn GpsFeed> = Arc::new(SharedGps::new());
    let workers = Workers::new(2, Duration::from_secs(2));

    let video = VideoConfig {
        transcoder: "/nonexistent/skiff-ffmpeg".into(),
        hls_root: dir.path().join("hls"),
        ..Default::default()
    };
    let supervisor = Arc::new(StreamSupervisor::new(video));
    let poller_cfg = PollerConfig { probe_timeout_ms: 500, ..Default::default() };
    let poller = Arc::new(TelemetryPoller::new(poller_cfg, workers.clone(), SharedSolar::new(), gps.clone()));
    let collab = Collaborators { pins: pins.clone(), store: store.clone(), tracks: store, gps };
    let cameras = vec![CameraConfig { id: "cam1".into(), host: Some("10.0.0.5".into()), ..Default::default() }];
    let controller =
        Arc::new(Controller::new(ControlConfig::default(), collab, cameras, supervisor.clone(), poller.clone(), workers));

    let state = Arc::new(AppState {
        hub: Arc::new(BroadcastHub::new(max_clients)),
        controller,
        poller,
        supervisor,
        gps: GpsConfig::default(),
        client_queue: 64,
        reap_every: Duration::from_secs(1),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state, &dir.path().join("hls"), None);
    let token = CancellationToken::new();
    tokio::spawn(serve(listener, app, token.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    Server { addr, pins, token, _dir: dir }
}

async fn connect_ws(addr: SocketAddr) -> Ws {
    let url = format!("ws://{}/ws", addr);
    let (stream, _response) = tokio_tungstenite::connect_async(&url).await.expect("WebSocket connect failed");
    stream
}

async fn send_json(ws: &mut Ws, v: Value) {
    ws.send(tungstenite::Message::Text(v.to_string().into())).await.unwrap();
}

async fn send_raw(ws: &mut Ws, text: &str) {
    ws.send(tungstenite::Message::Text(text.to_string().into())).await.unwrap();
}

/// Next text frame as JSON, or `None` on close/timeout.
async fn next_json(ws: &mut Ws) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(tungstenite::Message::Text(text)))) => return serde_json::from_str(text.as_str()).ok(),
            Ok(Some(Ok(tungstenite::Message::Close(_)))) => return None,
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(_))) | Ok(None) | Err(_) => return None,
        }
    }
}

/// Skips frames until one with the given `tipo` arrives.
async fn expect_tipo(ws: &mut Ws, tipo: &str) -> Value {
    loop {
        let v = next_json(ws).await.unwrap_or_else(|| panic!("channel ended waiting for '{}'", tipo));
        if v["tipo"] == tipo {
            return v;
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn welcome_comes_first() {
    let server = start_server(4).await;
    let mut ws = connect_ws(server.addr).await;

    let hello = next_json(&mut ws).await.expect("no welcome");
    assert_eq!(hello["tipo"], "conexion");
    assert_eq!(hello["velocidad"], 50);
    assert_eq!(hello["reles"]["1"], false);
    assert!(hello["solar"].is_object());
    assert!(hello["gps"].is_object());
}

#[tokio::test(flavor = "multi_thread")]
async fn relay_reply_goes_to_sender_and_state_to_everyone() {
    let server = start_server(4).await;
    let mut a = connect_ws(server.addr).await;
    let mut b = connect_ws(server.addr).await;
    expect_tipo(&mut a, "conexion").await;
    expect_tipo(&mut b, "conexion").await;

    send_json(&mut a, json!({"tipo": "rele", "numero": 5, "estado": true})).await;

    let reply = next_json(&mut a).await.unwrap();
    assert_eq!(reply["tipo"], "respuesta_rele");
    assert_eq!(reply["numero"], 5);
    assert_eq!(reply["exito"], true);
    let relays = expect_tipo(&mut a, "reles").await;
    assert_eq!(relays["reles"]["5"], true);

    let seen_by_b = expect_tipo(&mut b, "reles").await;
    assert_eq!(seen_by_b["reles"]["5"], true);

    assert_eq!(server.pins.state(11), Some(PinState::Digital(Level::Low)));
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_input_gets_error_and_channel_stays_open() {
    let server = start_server(4).await;
    let mut ws = connect_ws(server.addr).await;
    expect_tipo(&mut ws, "conexion").await;

    send_raw(&mut ws, "{not json").await;
    let err = next_json(&mut ws).await.unwrap();
    assert_eq!(err, json!({"tipo": "error", "mensaje": "JSON inválido"}));

    send_json(&mut ws, json!({"tipo": "despegar"})).await;
    let err = next_json(&mut ws).await.unwrap();
    assert_eq!(err["mensaje"], "Comando \"despegar\" no reconocido");

    send_json(&mut ws, json!({"tipo": "velocidad", "nivel": 140})).await;
    let reply = expect_tipo(&mut ws, "respuesta_velocidad").await;
    assert_eq!(reply["velocidad"], 100);
    let pushed = expect_tipo(&mut ws, "velocidad").await;
    assert_eq!(pushed["velocidad"], 100);
}

#[tokio::test(flavor = "multi_thread")]
async fn connections_over_cap_are_refused() {
    let server = start_server(1).await;
    let mut first = connect_ws(server.addr).await;
    expect_tipo(&mut first, "conexion").await;

    let mut second = connect_ws(server.addr).await;
    let refused = next_json(&mut second).await.unwrap();
    assert_eq!(refused["tipo"], "error");
    assert_eq!(refused["mensaje"], "Máximo de conexiones alcanzado");
    assert!(next_json(&mut second).await.is_none());

    drop(first);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut third = connect_ws(server.addr).await;
    expect_tipo(&mut third, "conexion").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_camera_index_is_reported() {
    let server = start_server(2).await;
    let mut ws = connect_ws(server.addr).await;
    expect_tipo(&mut ws, "conexion").await;

    send_json(&mut ws, json!({"tipo": "camara", "indice": 7, "accion": "iniciar"})).await;
    let reply = expect_tipo(&mut ws, "camara").await;
    assert_eq!(reply["exito"], false);
    assert_eq!(reply["mensaje"], "Cámara 7 no configurada");
}
