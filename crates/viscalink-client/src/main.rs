//! Viscalink client: the control-site peer.
//!
//! Accepts VISCA bytes from one TCP connection per controller endpoint and
//! optional tally datagrams on a local UDP port, multiplexes everything onto
//! a single SRT channel, and writes the server's reply frames back to the
//! controller that asked.
//!
//! ```text
//! controller 1 ── TCP ──┐
//! controller 2 ── TCP ──┼── sequence-stamped frames ══ SRT ══► server
//! tally feed ─── UDP ───┘
//! ```

mod gateway;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use viscalink_core::config::ClientConfig;

#[derive(Parser)]
#[command(name = "viscalink-client", version, about = "VISCA/tally ↔ SRT gateway, control-site peer")]
struct Cli {
    /// Path to the client configuration file
    #[arg(short, long, default_value = "/etc/visca_srt/client_config.json")]
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
    info!("Viscalink client v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    log_config(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_listener(shutdown_tx);

    gateway::run(config, shutdown_rx).await;
    info!("Viscalink client stopped");
    Ok(())
}

fn log_config(config: &ClientConfig) {
    info!(
        server = %format!("{}:{}", config.srt_server.host, config.srt_server.port),
        latency_ms = config.srt_settings.latency_ms,
        tally_port = config.ndi_settings.tally_listen_port,
        "configuration loaded"
    );
    for endpoint in &config.endpoints {
        info!(
            camera_id = endpoint.camera_id,
            name = %endpoint.name,
            addr = %format!("{}:{}", endpoint.ip_address, endpoint.port),
            "controller endpoint configured"
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
