//! Viscalink server: the camera-site peer.
//!
//! Listens for SRT clients, demultiplexes their VISCA traffic to the
//! configured cameras, relays camera replies, and translates NDI tally
//! state into per-camera VISCA commands.
//!
//! ```text
//!                 ┌── session task per SRT client ──► camera worker (cam 1) ── TCP ──► camera 1
//! SRT listener ───┤                                   camera worker (cam 2) ── TCP ──► camera 2
//!                 └── tally frames ──► tally table ──► ticker ──► camera workers
//! ```

mod camera;
mod session;
mod tally;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use viscalink_core::config::ServerConfig;
use viscalink_transport::{SrtAcceptor, TransportError};

use crate::tally::{TallyTable, TallyTicker};

#[derive(Parser)]
#[command(name = "viscalink-server", version, about = "VISCA/tally ↔ SRT gateway, camera-site peer")]
struct Cli {
    /// Path to the server configuration file
    #[arg(short, long, default_value = "/etc/visca_srt/server_config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    info!("Viscalink server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    log_config(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_listener(shutdown_tx.clone());

    // One worker task per camera; the handle map is the routing table and
    // never changes after startup. Worker tasks run detached and exit on
    // the shutdown signal.
    let mut cameras = HashMap::new();
    for camera_config in &config.cameras {
        let (handle, _worker) = camera::spawn(camera_config.clone(), shutdown_rx.clone());
        cameras.insert(handle.id, handle);
    }
    let cameras = Arc::new(cameras);

    let table = Arc::new(TallyTable::new());
    let ticker = TallyTicker::new(Arc::clone(&table), Arc::clone(&cameras));
    let ticker_task = tokio::spawn(ticker.run(
        config.ndi_settings.tally_update_interval(),
        shutdown_rx.clone(),
    ));

    // A listener that cannot bind is fatal.
    let mut acceptor = SrtAcceptor::bind(&config.bind_address, config.srt_port, &config.srt_settings)
        .await
        .context("binding SRT listener")?;
    info!("Viscalink server is running");

    let active_sessions = Arc::new(AtomicUsize::new(0));
    let mut listener_error = None;
    let mut shutdown = shutdown_rx.clone();
    loop {
        tokio::select! {
            accepted = acceptor.accept() => match accepted {
                Ok(endpoint) => {
                    if active_sessions.load(Ordering::Relaxed) >= config.srt_settings.max_clients {
                        warn!(peer = %endpoint.peer(), "rejecting SRT client: max_clients reached");
                        endpoint.close().await;
                        continue;
                    }
                    active_sessions.fetch_add(1, Ordering::Relaxed);
                    let cameras = Arc::clone(&cameras);
                    let table = Arc::clone(&table);
                    let shutdown = shutdown_rx.clone();
                    let active = Arc::clone(&active_sessions);
                    tokio::spawn(async move {
                        session::run(endpoint, cameras, table, shutdown).await;
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                Err(e @ TransportError::ListenFailed { .. }) => {
                    error!(error = %e, "SRT listener failed");
                    listener_error = Some(e);
                    break;
                }
                // A failed handshake only costs that client.
                Err(e) => warn!(error = %e, "SRT accept failed"),
            },
            _ = shutdown.wait_for(|stop| *stop) => break,
        }
    }

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    drop(acceptor);
    ticker_task.await.ok();
    info!("Viscalink server stopped");

    match listener_error {
        Some(e) => Err(e).context("SRT listener terminated unexpectedly"),
        None => Ok(()),
    }
}

fn log_config(config: &ServerConfig) {
    info!(
        bind = %config.bind_address,
        port = config.srt_port,
        latency_ms = config.srt_settings.latency_ms,
        max_clients = config.srt_settings.max_clients,
        tally_interval_ms = config.ndi_settings.tally_update_interval_ms,
        "configuration loaded"
    );
    for camera in &config.cameras {
        info!(
            id = camera.id,
            name = %camera.name,
            addr = %format!("{}:{}", camera.ip_address, camera.port),
            tally_source = camera
                .ndi_mapping
                .as_ref()
                .map(|m| m.source_name.as_str())
                .unwrap_or("-"),
            "camera configured"
        );
    }
}

fn spawn_signal_listener(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
        info!("shutdown signal received");
        let _ = shutdown.send(true);
    });
}
