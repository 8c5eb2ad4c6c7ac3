//! Jacques daemon entrypoint.
//!
//! A single-writer service that owns live session state. Hooks report events
//! over a Unix socket; viewers connect over WebSocket and receive an initial
//! snapshot followed by deltas. One engine task applies every change in order.

use std::env;
use std::path::Path;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod broadcast;
mod config;
mod engine;
mod error;
mod focus;
mod focus_probe;
mod gateway;
mod ingest;
mod pending;
mod registry;
mod settings;

use config::{DaemonConfig, ResolvedConfig};
use engine::{Engine, EngineHandle};
use error::DaemonError;

#[tokio::main]
async fn main() {
    init_logging();

    let config = match load_resolved_config() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon configuration");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(config).await {
        error!(error = %err, "Jacques daemon failed");
        std::process::exit(1);
    }
}

fn init_logging() {
    let debug_enabled = env::var("JACQUES_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_resolved_config() -> Result<ResolvedConfig, DaemonError> {
    let home = dirs::home_dir().ok_or(error::ConfigError::HomeNotFound)?;
    let config_path = config::default_config_path()?;
    let config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load daemon config; using defaults");
            DaemonConfig::default()
        }
    };
    Ok(config.resolve(&home, |key| env::var(key).ok()))
}

async fn run(config: ResolvedConfig) -> Result<(), DaemonError> {
    prepare_socket_dir(&config.socket_path)?;
    let listener = ingest::bind(&config.socket_path).map_err(|source| DaemonError::BindSocket {
        path: config.socket_path.clone(),
        source,
    })?;

    let addr = config.server.addr();
    let tcp = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| DaemonError::BindServer { addr, source })?;
    let local_addr = tcp.local_addr().unwrap_or(addr);

    let (engine, engine_task) = Engine::new(config.broadcast.client_queue_capacity)
        .spawn(config.broadcast.command_queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!(
        socket = %config.socket_path.display(),
        addr = %local_addr,
        "Jacques daemon started"
    );

    replay_pending(&config, &engine).await;

    let ingest_task = tokio::spawn(ingest::serve(
        listener,
        engine.clone(),
        config.ingest.clone(),
        shutdown_rx.clone(),
    ));

    if config.focus.enabled {
        let watcher = focus_probe::FocusWatcher::new(
            focus_probe::platform_probe(),
            config.focus.poll_interval(),
        );
        tokio::spawn(watcher.run(engine.clone(), shutdown_rx.clone()));
    } else {
        info!("Focus watcher disabled");
    }

    let app = gateway::router(gateway::GatewayState::new(
        engine.clone(),
        config.claude_settings_path.clone(),
    ));

    let mut server_shutdown = shutdown_rx.clone();
    let server = axum::serve(tcp, app).with_graceful_shutdown(async move {
        let _ = server_shutdown.wait_for(|stopped| *stopped).await;
    });

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let served = server.await.map_err(DaemonError::Serve);

    let _ = ingest_task.await;
    drop(engine);
    engine_task.abort();
    if let Err(err) = fs_err::remove_file(&config.socket_path) {
        warn!(error = %err, "Failed to remove daemon socket");
    }
    info!("Jacques daemon stopped");
    served
}

async fn replay_pending(config: &ResolvedConfig, engine: &EngineHandle) {
    let content = match pending::take_pending(&config.pending_events_path) {
        Ok(Some(content)) => content,
        Ok(None) => return,
        Err(err) => {
            warn!(error = %err, path = %config.pending_events_path.display(), "Failed to read spooled events");
            return;
        }
    };

    let max_age = chrono::Duration::seconds(config.replay.max_age_secs as i64);
    for envelope in pending::replayable(&content, chrono::Utc::now(), max_age) {
        if engine.ingest(envelope).await.is_err() {
            return;
        }
    }
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), DaemonError> {
    let Some(parent) = socket_path.parent() else {
        return Ok(());
    };
    fs_err::create_dir_all(parent).map_err(|source| DaemonError::SocketDir {
        path: parent.to_path_buf(),
        source,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
