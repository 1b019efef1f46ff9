use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use skiff_hub::collab::GpsFeed;
use skiff_hub::server::{self, AppState, ServerConfig};
use skiff_hub::{
    doctor as hub_doctor, spawn_gps_reader, BroadcastHub, Collaborators, ControlConfig, Controller, GpsConfig, JsonStore,
    PollerConfig, SharedGps, SimulatedPins, StoreConfig, TelemetryPoller, Workers,
};
use skiff_power::detect::{default_candidate_devs, detect_controller, open_link};
use skiff_power::reader::{resolve_port, spawn_reader, SharedSolar};
use skiff_power::vedirect::FrameDecoder;
use skiff_power::{doctor as power_doctor, BatteryBounds, SolarConfig};
use skiff_video::supervisor::redact;
use skiff_video::{build_candidates, discover, doctor as video_doctor, CameraConfig, StreamSupervisor, VideoConfig};

#[derive(Debug, Parser)]
#[command(name = "skiff", version, about = "skiff - aquatic drone control plane")]
struct Cli {
    #[arg(long, default_value = "skiff.toml")]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    Run,
    Solar { #[command(subcommand)] cmd: SolarCmd },
    Camera { #[command(subcommand)] cmd: CameraCmd },
}

#[derive(Debug, Subcommand)]
enum SolarCmd {
    /// Probe serial ports for a VE.Direct text stream.
    Detect,
    /// Decode one block from the charge controller and print it.
    Read,
}

#[derive(Debug, Subcommand)]
enum CameraCmd {
    /// Print the connection URLs that would be tried, in order (credentials masked).
    Candidates { index: usize },
    /// Multicast a WS-Discovery probe and list the ONVIF devices that answer.
    Discover {
        #[arg(long, default_value_t = 3)]
        wait_s: u64,
    },
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    server: ServerConfig,
    solar: SolarConfig,
    battery: BatteryBounds,
    video: VideoConfig,
    #[serde(rename = "camera")]
    cameras: Vec<CameraConfig>,
    poller: PollerConfig,
    control: ControlConfig,
    store: StoreConfig,
    gps: GpsConfig,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(cfg).await?,
        Command::Solar { cmd } => solar_cmd(&cfg, cmd)?,
        Command::Camera { cmd } => camera_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    hub_doctor::check_server(&cfg.server)?;
    hub_doctor::check_control(&cfg.control)?;
    hub_doctor::check_poller(&cfg.poller)?;
    hub_doctor::check_gps(&cfg.gps)?;
    hub_doctor::check_store(&cfg.store)?;

    power_doctor::check_solar(&cfg.solar)?;
    power_doctor::check_battery(&cfg.battery)?;

    video_doctor::check_video(&cfg.video)?;
    for w in video_doctor::check_cameras(&cfg.cameras)? {
        warn!("doctor: {}", w);
    }
    if cfg.cameras.is_empty() {
        warn!("doctor: no [[camera]] entries; video disabled");
    }

    info!("doctor: OK");
    Ok(())
}

fn solar_cmd(cfg: &Config, cmd: SolarCmd) -> Result<()> {
    match cmd {
        SolarCmd::Detect => {
            let devs = cfg.solar.candidate_devs.clone().unwrap_or_else(default_candidate_devs);
            let res = detect_controller(devs, cfg.solar.baud, cfg.solar.probe_lines, cfg.solar.read_timeout());
            match res.chosen {
                Some(dev) => println!("CHOSEN: {} @ {}", dev, cfg.solar.baud),
                None => println!("CHOSEN: none"),
            }
            for p in res.probes {
                println!("probe dev={} vedirect={} {}ms note={}", p.dev, p.matched, p.elapsed_ms, p.note);
            }
            Ok(())
        }
        SolarCmd::Read => {
            let dev = resolve_port(&cfg.solar)?;
            let mut link = open_link(&dev, cfg.solar.baud, Duration::from_millis(250))?;
            let mut decoder = FrameDecoder::new(cfg.battery);
            let snap = decoder.read_frame(&mut link, cfg.solar.read_timeout())?;
            println!("port={}", dev);
            println!("{}", serde_json::to_string_pretty(&snap)?);
            Ok(())
        }
    }
}

async fn camera_cmd(cfg: &Config, cmd: CameraCmd) -> Result<()> {
    match cmd {
        CameraCmd::Candidates { index } => {
            let cam = cfg
                .cameras
                .get(index.wrapping_sub(1))
                .with_context(|| format!("no camera {} (have {})", index, cfg.cameras.len()))?;
            let list = build_candidates(cam);
            if list.is_empty() {
                println!("{}: no usable url/host", cam.id);
            }
            for (i, url) in list.iter().enumerate() {
                println!("{} [{}] {}", cam.id, i + 1, redact(url));
            }
            Ok(())
        }
        CameraCmd::Discover { wait_s } => {
            let found = discover(Duration::from_secs(wait_s)).await?;
            if found.is_empty() {
                println!("no ONVIF devices answered within {}s", wait_s);
            }
            for cam in found {
                println!("host={} onvif_port={} xaddrs={}", cam.host, cam.port, cam.xaddrs);
            }
            Ok(())
        }
    }
}

async fn run(cfg: Config) -> Result<()> {
    info!("run: starting");
    let token = CancellationToken::new();

    let solar = SharedSolar::new();
    let solar_handle = if cfg.solar.enable {
        Some(spawn_reader(cfg.solar.clone(), cfg.battery, solar.clone(), token.clone()))
    } else {
        info!("solar: disabled");
        None
    };

    let store = Arc::new(JsonStore::open(&cfg.store.path)?);
    let shared_gps = SharedGps::new();
    let gps_handle = spawn_gps_reader(cfg.gps.clone(), shared_gps.clone(), token.clone());
    if gps_handle.is_none() {
        warn!("gps: no gps.serial_dev or gps.nmea_file; positions unavailable");
    }
    let gps: Arc<dyn GpsFeed> = Arc::new(shared_gps);
    let collab = Collaborators { pins: Arc::new(SimulatedPins::new()), store: store.clone(), tracks: store, gps: gps.clone() };

    let workers = Workers::new(cfg.poller.workers, cfg.poller.probe_timeout());
    let poller = Arc::new(TelemetryPoller::new(cfg.poller.clone(), workers.clone(), solar, gps));
    let supervisor = Arc::new(StreamSupervisor::new(cfg.video.clone()));
    let controller = Arc::new(Controller::new(
        cfg.control.clone(),
        collab,
        cfg.cameras.clone(),
        supervisor.clone(),
        poller.clone(),
        workers,
    ));

    if let Err(e) = controller.restore().await {
        warn!("restore of saved outputs failed: {:#}", e);
    }
    controller.autostart_cameras().await;

    let state = Arc::new(AppState {
        hub: Arc::new(BroadcastHub::new(cfg.server.max_clients)),
        controller,
        poller,
        supervisor: supervisor.clone(),
        gps: cfg.gps.clone(),
        client_queue: cfg.server.client_queue,
        reap_every: Duration::from_millis(cfg.server.reap_ms),
    });
    let background = server::spawn_background(state.clone(), token.clone());

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("bind {}", cfg.server.bind))?;
    let app = server::router(state, &cfg.video.hls_root, cfg.server.static_dir.as_deref());

    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("run: shutdown requested");
        }
        shutdown.cancel();
    });

    let served = server::serve(listener, app, token.clone()).await;
    token.cancel();

    let stopped = supervisor.stop_all().await;
    info!("run: stopped {} stream(s)", stopped);
    for h in background {
        let _ = h.await;
    }
    if let Some(h) = solar_handle {
        let _ = h.await;
    }
    if let Some(h) = gps_handle {
        let _ = h.await;
    }
    served
}
