use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camera_gateway::auth::AuthVerifier;
use camera_gateway::camera::{CameraRegistry, DeviceMonitor, V4l2DeviceSource};
use camera_gateway::catalog::FileCatalog;
use camera_gateway::clock::SystemClock;
use camera_gateway::config::{AuthAlgorithm, ConfigStore, LoggingConfig};
use camera_gateway::events::{EventBus, SystemEvent};
use camera_gateway::health::HealthState;
use camera_gateway::mediamtx::{MediaBackend, MediaMtxClient, PathReadinessWatcher};
use camera_gateway::recording::RecordingManager;
use camera_gateway::snapshot::SnapshotManager;
use camera_gateway::state::AppState;
use camera_gateway::storage::TokioFileStore;
use camera_gateway::utils::bind_tcp_listener;
use camera_gateway::web;

/// Log level for the application.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// camera-gateway command line arguments.
#[derive(Parser, Debug)]
#[command(name = "camera-gateway")]
#[command(version, about = "A control-plane gateway for multi-camera discovery, recording and snapshots", long_about = None)]
struct CliArgs {
    /// Path to the TOML configuration document.
    #[arg(short = 'c', long, value_name = "FILE", default_value = "/etc/camera-gateway/config.toml")]
    config: PathBuf,

    /// Listen address (overrides the config file).
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Listen port (overrides the config file).
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level (overrides the config file's `logging.level`).
    #[arg(short = 'l', long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,
}

/// Configuration could not be read or parsed.
const EXIT_CONFIG_ERROR: i32 = 1;
/// The configured listen address could not be bound.
const EXIT_BIND_FAILURE: i32 = 2;
/// A downstream dependency (MediaMTX, storage) is misconfigured beyond repair at startup.
const EXIT_DOWNSTREAM_CONFIG_ERROR: i32 = 3;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    std::process::exit(run(args).await);
}

async fn run(args: CliArgs) -> i32 {
    let config_store = match ConfigStore::load(&args.config).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("failed to load configuration from {}: {e}", args.config.display());
            return EXIT_CONFIG_ERROR;
        }
    };

    if args.address.is_some() || args.port.is_some() {
        let mut overridden = (*config_store.get()).clone();
        if let Some(address) = args.address {
            overridden.server.address = address;
        }
        if let Some(port) = args.port {
            overridden.server.port = port;
        }
        if let Err(e) = config_store.set(overridden).await {
            eprintln!("failed to apply command line overrides: {e}");
            return EXIT_CONFIG_ERROR;
        }
    }

    let config = config_store.get();
    init_logging(&config.logging, args.log_level);

    if !config.mediamtx.base_url.starts_with("http://") && !config.mediamtx.base_url.starts_with("https://") {
        tracing::error!(base_url = %config.mediamtx.base_url, "mediamtx.base_url must be an http(s) url");
        return EXIT_DOWNSTREAM_CONFIG_ERROR;
    }

    if let Err(e) = tokio::fs::create_dir_all(&config.storage.recordings_dir).await {
        tracing::error!(error = %e, dir = %config.storage.recordings_dir, "failed to create recordings directory");
        return EXIT_DOWNSTREAM_CONFIG_ERROR;
    }
    if let Err(e) = tokio::fs::create_dir_all(&config.storage.snapshots_dir).await {
        tracing::error!(error = %e, dir = %config.storage.snapshots_dir, "failed to create snapshots directory");
        return EXIT_DOWNSTREAM_CONFIG_ERROR;
    }

    let auth = match AuthVerifier::new(&config.auth) {
        Ok(auth) => Arc::new(auth),
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize auth verifier");
            return EXIT_CONFIG_ERROR;
        }
    };
    if config.auth.algorithm == AuthAlgorithm::Rs256 {
        if let Some(jwks_url) = &config.auth.jwks_url {
            auth.spawn_jwks_refresh(jwks_url.clone(), config.auth.jwks_refresh_secs);
        }
    }

    let events = EventBus::new(config.events.queue_size);
    let health = Arc::new(HealthState::default());

    let camera_registry = Arc::new(CameraRegistry::new(
        events.clone(),
        Duration::from_secs(config.camera.unready_error_grace_secs),
        Duration::from_secs(config.camera.flap_window_secs),
    ));

    let mediamtx_client: Arc<dyn MediaBackend> = Arc::new(MediaMtxClient::new(&config.mediamtx, health.clone()));

    let recording_manager = RecordingManager::new(
        mediamtx_client.clone(),
        camera_registry.clone(),
        events.clone(),
        PathBuf::from(&config.storage.recordings_dir),
        &config.recording,
        Arc::new(SystemClock),
        health.clone(),
    );

    let snapshot_manager = Arc::new(SnapshotManager::new(
        mediamtx_client.clone(),
        camera_registry.clone(),
        events.clone(),
        Arc::new(TokioFileStore),
        PathBuf::from(&config.storage.snapshots_dir),
        Arc::new(SystemClock),
    ));

    let catalog = Arc::new(FileCatalog::new(
        Arc::new(TokioFileStore),
        PathBuf::from(&config.storage.recordings_dir),
        PathBuf::from(&config.storage.snapshots_dir),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let data_dir = PathBuf::from(&config.storage.recordings_dir)
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/var/lib/camera-gateway"));

    let state = AppState::new(
        config_store,
        camera_registry.clone(),
        recording_manager.clone(),
        snapshot_manager,
        catalog,
        events.clone(),
        auth,
        health,
        mediamtx_client.clone(),
        shutdown_tx.clone(),
        data_dir,
    );

    let device_monitor = Arc::new(DeviceMonitor::new(
        Arc::new(V4l2DeviceSource),
        camera_registry.clone(),
        events.clone(),
        Duration::from_secs(config.camera.device_poll_interval_secs),
        Duration::from_millis(config.camera.debounce_window_ms),
        config.mediamtx.clone(),
    ));
    {
        let monitor = device_monitor.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { monitor.run(shutdown_rx).await });
    }

    // Keeps `path_ready` truthful for cameras that are streaming without an
    // active recording; the Recording Manager still sets it synchronously on
    // its own start/stop so status flips promptly during a recording session.
    let path_watcher = Arc::new(PathReadinessWatcher::new(
        mediamtx_client.clone(),
        camera_registry.clone(),
        recording_manager.clone(),
        Duration::from_secs(config.camera.device_poll_interval_secs),
    ));
    {
        let watcher = path_watcher.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { watcher.run(shutdown_rx).await });
    }

    let address: IpAddr = match config.server.address.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(address = %config.server.address, error = %e, "invalid server.address");
            return EXIT_CONFIG_ERROR;
        }
    };
    let bind_addr = SocketAddr::new(address, config.server.port);
    let ws_path = config.server.ws_path.clone();
    drop(config);

    let std_listener = match bind_tcp_listener(bind_addr) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %bind_addr, error = %e, "failed to bind listener");
            return EXIT_BIND_FAILURE;
        }
    };
    let listener = match tokio::net::TcpListener::from_std(std_listener) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "failed to adopt listener into the async runtime");
            return EXIT_BIND_FAILURE;
        }
    };

    let app = web::create_router(state.clone());
    tracing::info!(addr = %bind_addr, ws_path = %ws_path, "camera-gateway listening");

    events.publish(SystemEvent::SystemReadiness { ready: true });

    let shutdown_signal = {
        let shutdown_tx = shutdown_tx.clone();
        async move {
            tokio::signal::ctrl_c().await.expect("failed to install ctrl+c handler");
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    };

    let server = axum::serve(listener, app.into_make_service());
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server error");
            }
        }
        _ = shutdown_signal => {}
    }

    events.publish(SystemEvent::SystemReadiness { ready: false });
    recording_manager.shutdown_all().await;
    tracing::info!("camera-gateway shutdown complete");
    0
}

/// Initialize logging with tracing. The CLI `--log-level` flag, when given,
/// overrides `logging.level`; `RUST_LOG` takes priority over both.
fn init_logging(logging: &LoggingConfig, cli_level: Option<LogLevel>) {
    let level = cli_level.unwrap_or_else(|| match logging.level.as_str() {
        "error" => LogLevel::Error,
        "warn" => LogLevel::Warn,
        "debug" => LogLevel::Debug,
        "trace" => LogLevel::Trace,
        _ => LogLevel::Info,
    });

    let filter = match level {
        LogLevel::Error => "camera_gateway=error,tower_http=error",
        LogLevel::Warn => "camera_gateway=warn,tower_http=warn",
        LogLevel::Info => "camera_gateway=info,tower_http=info",
        LogLevel::Debug => "camera_gateway=debug,tower_http=debug",
        LogLevel::Trace => "camera_gateway=trace,tower_http=debug",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    if let Err(e) = result {
        eprintln!("failed to initialize tracing: {e}");
    }
}
