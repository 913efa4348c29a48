//! `push` — send an image to a receiver and wait for it to be committed.

use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::net::UdpSocket;

use otalink_core::config::OtalinkConfig;
use otalink_core::wire::{Packet, LINK_MTU};
use otalink_services::{Sender, SenderConfig, Step};

use super::image::Image;

/// Outcome of a completed push.
#[derive(Debug)]
pub struct PushReport {
    pub bytes: u32,
    pub chunks: u32,
    pub retransmissions: u64,
    pub elapsed: Duration,
}

/// Drive `sender` over `socket` (already connected to the receiver) until
/// the receiver commits the image or the transfer fails.
pub async fn drive(
    socket: &UdpSocket,
    sender: &mut Sender<'_>,
    ack_timeout: Duration,
) -> Result<PushReport> {
    let started = Instant::now();
    let mut buf = [0u8; LINK_MTU];

    let offer = sender.start();
    transmit(socket, &offer).await;
    let mut deadline = tokio::time::Instant::now() + ack_timeout;

    loop {
        let step = match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
            Err(_elapsed) => sender.on_timeout(),
            Ok(Err(e)) => {
                // ICMP unreachable and friends surface here on a connected
                // socket; treat them like a lost reply.
                tracing::debug!(error = %e, "recv failed");
                continue;
            }
            Ok(Ok(len)) => match Packet::decode(&buf[..len]) {
                Ok(packet) => sender.handle(&packet),
                Err(e) => {
                    tracing::trace!(error = %e, "undecodable reply, dropping");
                    continue;
                }
            },
        };

        match step {
            Step::Send(packet) => {
                transmit(socket, &packet).await;
                deadline = tokio::time::Instant::now() + ack_timeout;
            }
            Step::Wait => {}
            Step::Done => {
                return Ok(PushReport {
                    bytes: sender.offer().size,
                    chunks: sender.total_chunks(),
                    retransmissions: sender.retransmissions(),
                    elapsed: started.elapsed(),
                })
            }
            Step::Failed(e) => bail!(e),
        }
    }
}

async fn transmit(socket: &UdpSocket, packet: &Packet) {
    if let Err(e) = socket.send(&packet.encode()).await {
        tracing::warn!(kind = packet.name(), error = %e, "send failed");
    }
}

pub async fn cmd_push(
    config: &OtalinkConfig,
    peer: &str,
    path: &Path,
    version: Option<u32>,
) -> Result<()> {
    let peer: SocketAddr = peer
        .parse()
        .with_context(|| format!("invalid peer address: {peer}"))?;
    let image = Image::open(path)?;

    let sender_config = SenderConfig {
        chunk_size: config.transfer.effective_chunk_size(),
        max_retries: config.transfer.max_retries,
        version: version.unwrap_or(config.transfer.format_version),
    };
    let mut sender = Sender::new(&image, &sender_config)?;

    let local: SocketAddr = if peer.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = UdpSocket::bind(local).await.context("failed to bind socket")?;
    socket
        .connect(peer)
        .await
        .with_context(|| format!("failed to connect to {peer}"))?;

    println!(
        "Pushing {} ({} bytes, {} chunks) to {}",
        path.display(),
        image.len(),
        sender.total_chunks(),
        peer
    );

    let ack_timeout = Duration::from_millis(config.transfer.ack_timeout_ms);
    let report = drive(&socket, &mut sender, ack_timeout)
        .await
        .with_context(|| format!("push to {peer} failed"))?;

    println!("═══════════════════════════════════════");
    println!("  Image committed by {}", peer);
    println!("═══════════════════════════════════════");
    println!("  Bytes           : {}", report.bytes);
    println!("  Chunks          : {}", report.chunks);
    println!("  Retransmissions : {}", report.retransmissions);
    println!("  Elapsed         : {:.2}s", report.elapsed.as_secs_f64());

    Ok(())
}
