//! Radio Revive playback agent
//!
//! Wires the store, mixer, renderer launcher and playback controller
//! together, starts the long-lived tasks, and waits for a shutdown signal.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use revive_common::models::Device;
use revive_common::store::{CommandSource, ConfigSource, MemoryStore, ProgressSink, SqliteStore};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use revive_agent::audio::{AmixerBackend, AudioMixerControl, MixerRange};
use revive_agent::bootstrap::{AutoPlayBootstrapper, BootstrapSettings};
use revive_agent::config::{Config, ConfigOverrides, LoggingConfig, StoreBackend};
use revive_agent::heartbeat::HeartbeatPublisher;
use revive_agent::ingest::CommandIngestor;
use revive_agent::playback::{ControllerSettings, PlaybackController};
use revive_agent::player::{MpvLauncher, ProcessLauncher};
use revive_agent::update::UpdateRunner;
use revive_agent::watcher::ConfigWatcher;
use revive_agent::{build_router, AppState};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "revive-agent")]
#[command(about = "Playback agent for Radio Revive speakers")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, env = "REVIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Device id (defaults to a machine-id prefix)
    #[arg(long, env = "REVIVE_DEVICE_ID")]
    device_id: Option<String>,

    /// SQLite database path (overrides TOML)
    #[arg(long, env = "REVIVE_DATABASE")]
    database: Option<PathBuf>,

    /// Status API port (overrides TOML)
    #[arg(short, long, env = "REVIVE_PORT")]
    port: Option<u16>,
}

struct Stores {
    config: Arc<dyn ConfigSource>,
    commands: Arc<dyn CommandSource>,
    progress: Arc<dyn ProgressSink>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = ConfigOverrides {
        device_id: args.device_id,
        database_path: args.database,
        port: args.port,
    };
    let config = Config::load(args.config.as_deref(), overrides)
        .context("Failed to load configuration")?;

    init_tracing(&config.logging)?;

    info!(
        "Starting revive-agent v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config.source {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("No configuration file found, using built-in defaults"),
    }
    info!(device_id = %config.device_id, "Device identity resolved");

    let stores = open_stores(&config).await?;
    let device_id = config.device_id.clone();

    let mixer = Arc::new(AudioMixerControl::new(
        Arc::new(AmixerBackend::new(&config.mixer)),
        MixerRange::from(&config.mixer),
        device_id.clone(),
        stores.config.clone(),
    ));
    let launcher: Arc<dyn ProcessLauncher> = Arc::new(MpvLauncher::new(config.renderer.clone()));

    let (controller, playback) = PlaybackController::new(
        device_id.clone(),
        stores.config.clone(),
        mixer.clone(),
        launcher,
        ControllerSettings::from(&config.timing),
    );
    let controller_task = tokio::spawn(controller.run());

    let updates = Arc::new(UpdateRunner::new(
        device_id.clone(),
        stores.progress.clone(),
        config.updates.clone(),
    ));

    tokio::spawn(
        CommandIngestor::new(
            device_id.clone(),
            stores.commands.clone(),
            playback.clone(),
            mixer.clone(),
            updates,
        )
        .run(),
    );

    tokio::spawn(
        ConfigWatcher::new(
            device_id.clone(),
            stores.config.clone(),
            playback.clone(),
            mixer.clone(),
        )
        .run(),
    );

    tokio::spawn(
        HeartbeatPublisher::new(
            device_id.clone(),
            stores.config.clone(),
            playback.clone(),
            config.timing.heartbeat_interval(),
        )
        .run(),
    );

    let bootstrapper = AutoPlayBootstrapper::new(
        device_id.clone(),
        stores.config.clone(),
        mixer.clone(),
        playback.clone(),
        BootstrapSettings::from(&config.bootstrap),
    );
    tokio::spawn(async move {
        // Exhaustion is already logged; playback can still start from config or commands
        let _ = bootstrapper.run().await;
    });

    if config.api.enabled {
        let addr: SocketAddr = format!("{}:{}", config.api.bind, config.api.port)
            .parse()
            .with_context(|| format!("Invalid API bind address {}", config.api.bind))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind status API to {}", addr))?;
        info!("Status API listening on {}", addr);

        let app = build_router(AppState::new(device_id.clone(), playback.clone(), mixer.clone()));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Status API stopped");
            }
        });
    }

    shutdown_signal().await;

    if let Err(e) = playback.shutdown().await {
        warn!(error = %e, "Playback controller already stopped");
    }
    if let Err(e) = controller_task.await {
        warn!(error = %e, "Playback controller task failed");
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "revive_agent={level},revive_common={level},tower_http=info",
            level = logging.level
        ))
    });

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
    Ok(())
}

async fn open_stores(config: &Config) -> Result<Stores> {
    match config.store.backend {
        StoreBackend::Sqlite => {
            let path = &config.store.database_path;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create database directory {:?}", parent))?;
            }
            let store = Arc::new(
                SqliteStore::open(path, config.store.poll_interval())
                    .await
                    .with_context(|| format!("Failed to open database {:?}", path))?,
            );
            info!("Using SQLite store at {:?}", path);
            Ok(Stores {
                config: store.clone(),
                commands: store.clone(),
                progress: store,
            })
        }
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            store.put_device(Device::new(config.device_id.clone()));
            warn!("Using in-memory store; configuration will not persist");
            Ok(Stores {
                config: store.clone(),
                commands: store.clone(),
                progress: store,
            })
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
