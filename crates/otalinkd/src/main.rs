//! otalinkd — firmware image receiver daemon.
//!
//! Listens for image pushes on a datagram socket, writes accepted images to
//! the slot directory, and exits with the configured restart code once a
//! verified image is committed so the supervisor can reboot into it.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use otalink_core::config::OtalinkConfig;
use otalink_services::{Receiver, SlotSink};

mod link;

use link::LinkExit;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = OtalinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = OtalinkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        OtalinkConfig::default()
    });

    // First positional argument overrides the bind address.
    let bind_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.network.bind_addr.clone());
    let bind_addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("invalid bind address: {bind_addr}"))?;

    let socket = UdpSocket::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %socket.local_addr()?, mtu = config.network.mtu, "otalinkd listening");

    let sink = SlotSink::new(
        config.storage.image_dir.clone(),
        config.storage.max_image_bytes,
    );
    tracing::info!(
        dir = %config.storage.image_dir.display(),
        capacity = config.storage.max_image_bytes,
        "image slots ready"
    );
    let mut receiver: Receiver<SocketAddr, SlotSink> = Receiver::new(sink);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Serve ────────────────────────────────────────────────────────────────

    let exit = link::serve(
        &socket,
        &mut receiver,
        config.network.mtu,
        shutdown_tx.subscribe(),
    )
    .await?;

    match exit {
        LinkExit::Shutdown => {
            tracing::info!(state = ?receiver.state(), "shutting down");
            Ok(())
        }
        LinkExit::Restart => {
            // Let the final Finish leave the radio before the device goes down.
            tokio::time::sleep(Duration::from_millis(config.activation.restart_delay_ms)).await;
            tracing::info!(
                exit_code = config.activation.restart_exit_code,
                "restarting into new image"
            );
            std::process::exit(config.activation.restart_exit_code);
        }
    }
}
