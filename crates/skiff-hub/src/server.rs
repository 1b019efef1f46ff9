//! HTTP surface: `/ws` for clients, `/hls/*` for stream output, optional UI
//! directory as fallback. Also owns the periodic push loops.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use skiff_proto::payload::NetworkSpeedInfo;
use skiff_proto::{parse_command, ServerMessage};
use skiff_video::StreamSupervisor;

use crate::control::{camera_state_info, Controller};
use crate::gps::GpsConfig;
use crate::hub::{BroadcastHub, ClientId};
use crate::poller::TelemetryPoller;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,

    /// Web UI served for any path not matched by `/ws` or `/hls`.
    pub static_dir: Option<PathBuf>,

    pub max_clients: usize,

    /// Outbound messages buffered per client before it counts as stalled.
    pub client_queue: usize,

    /// How often exited transcoders are looked for.
    pub reap_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into(), static_dir: None, max_clients: 8, client_queue: 64, reap_ms: 1000 }
    }
}

pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub controller: Arc<Controller>,
    pub poller: Arc<TelemetryPoller>,
    pub supervisor: Arc<StreamSupervisor>,
    pub gps: GpsConfig,
    pub client_queue: usize,
    pub reap_every: Duration,
}

pub fn router(state: Arc<AppState>, hls_root: &Path, static_dir: Option<&Path>) -> Router {
    let mut app = Router::new()
        .route("/ws", get(ws_upgrade))
        .nest_service("/hls", ServeDir::new(hls_root))
        .with_state(state);

    if let Some(dir) = static_dir {
        if dir.exists() {
            info!("serving UI from {}", dir.display());
            app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
        } else {
            warn!("static_dir {} does not exist; UI not served", dir.display());
        }
    }
    app
}

/// Serves until `token` is cancelled.
pub async fn serve(listener: TcpListener, app: Router, token: CancellationToken) -> Result<()> {
    let addr = listener.local_addr().context("listener address")?;
    info!("listening on http://{}", addr);
    axum::serve(listener, app).with_graceful_shutdown(async move { token.cancelled().await }).await.context("http server")
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session(socket, state))
}

async fn session(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(state.client_queue);

    let Some(id) = state.hub.register(tx) else {
        warn!("client refused: {} connections open", state.hub.max_clients());
        if let Ok(text) = ServerMessage::error("Máximo de conexiones alcanzado").encode() {
            let _ = ws_tx.send(Message::Text(text.to_string().into())).await;
        }
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    };
    info!("client {} connected ({} open)", id, state.hub.len());

    // Written directly so it precedes anything the hub queued meanwhile.
    if let Ok(text) = state.controller.welcome().await.encode() {
        if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
            state.hub.unregister(id);
            return;
        }
    }

    loop {
        tokio::select! {
            out = rx.recv() => match out {
                Some(text) => {
                    if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                // The hub dropped this client.
                None => break,
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => dispatch(&state, id, text.as_str()).await,
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws_tx.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.hub.unregister(id);
    info!("client {} disconnected ({} open)", id, state.hub.len());
}

async fn dispatch(state: &AppState, id: ClientId, text: &str) {
    let cmd = match parse_command(text) {
        Ok(cmd) => cmd,
        Err(e) => {
            debug!("client {}: {}", id, e);
            state.hub.send_to(id, &ServerMessage::error(e.to_string()));
            return;
        }
    };
    debug!("client {}: {:?}", id, cmd);
    let reaction = state.controller.handle(cmd).await;
    for msg in &reaction.reply {
        state.hub.send_to(id, msg);
    }
    if !reaction.broadcast.is_empty() {
        state.hub.broadcast_batch(&reaction.broadcast).await;
    }
}

/// `false` when cancelled first.
async fn sleep_or_cancel(token: &CancellationToken, d: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(d) => true,
    }
}

pub fn spawn_background(state: Arc<AppState>, token: CancellationToken) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(telemetry_loop(state.clone(), token.clone())),
        tokio::spawn(bandwidth_loop(state.clone(), token.clone())),
        tokio::spawn(camera_status_loop(state.clone(), token.clone())),
        tokio::spawn(reap_loop(state.clone(), token.clone())),
        tokio::spawn(autosave_loop(state, token)),
    ]
}

async fn telemetry_loop(state: Arc<AppState>, token: CancellationToken) {
    let cfg = state.poller.config();
    if !sleep_or_cancel(&token, cfg.initial_delay()).await {
        return;
    }
    let mut tick = tokio::time::interval(cfg.period());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tick.tick() => {}
        }
        if state.hub.is_empty() {
            continue;
        }
        let sample = state.poller.sample().await;
        let delivered = state.hub.broadcast_batch(&sample.messages()).await;
        debug!("telemetry pushed to {} client(s)", delivered);
    }
}

async fn bandwidth_loop(state: Arc<AppState>, token: CancellationToken) {
    if state.poller.config().bandwidth_url.is_none() {
        debug!("no bandwidth_url; downlink probe disabled");
        return;
    }
    let period = state.poller.config().bandwidth_period();
    loop {
        let kbps = state.poller.measure_bandwidth().await;
        if !state.hub.is_empty() {
            let data = NetworkSpeedInfo { kbps: kbps.map(|k| k.round()).unwrap_or(0.0) };
            state.hub.broadcast(&ServerMessage::NetworkSpeed { data }).await;
        }
        if !sleep_or_cancel(&token, period).await {
            break;
        }
    }
}

async fn camera_status_loop(state: Arc<AppState>, token: CancellationToken) {
    let mut events = state.supervisor.subscribe();
    loop {
        let status = tokio::select! {
            _ = token.cancelled() => break,
            ev = events.recv() => match ev {
                Ok(status) => status,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("camera status lagged by {}", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        state.hub.broadcast(&ServerMessage::CameraStatus { data: camera_state_info(&status) }).await;
    }
}

async fn reap_loop(state: Arc<AppState>, token: CancellationToken) {
    let mut tick = tokio::time::interval(state.reap_every);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tick.tick() => {}
        }
        for id in state.supervisor.reap_exited().await {
            warn!("camera {} transcoder exited", id);
        }
    }
}

async fn autosave_loop(state: Arc<AppState>, token: CancellationToken) {
    loop {
        let (enabled, requested) = state.controller.autosave_settings().await;
        let wait = if enabled {
            let (ok, msg) = state.controller.autosave_tick().await;
            debug!("gps autosave: {} ({})", msg, ok);
            state.gps.autosave_period(requested)
        } else {
            state.gps.autosave_check()
        };
        if !sleep_or_cancel(&token, wait).await {
            break;
        }
    }
}
