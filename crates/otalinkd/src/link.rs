//! Datagram link — feeds the receiver from a UDP socket and sends its replies.
//!
//! The socket stands in for the radio: no delivery, ordering or duplicate
//! guarantees, and the sender's socket address is its physical address.
//! Every reply is best-effort; a failed send is logged and the sender's
//! retransmission timer takes care of the rest.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use otalink_services::{Receiver, StorageSink};

/// Why the link loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkExit {
    Shutdown,
    /// An image was committed; the device must restart to boot it.
    Restart,
}

pub async fn serve<S: StorageSink>(
    socket: &UdpSocket,
    receiver: &mut Receiver<SocketAddr, S>,
    mtu: usize,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<LinkExit> {
    // One spare byte so an oversized datagram is visible as len > mtu.
    let mut buf = vec![0u8; mtu + 1];

    loop {
        let (len, peer) = tokio::select! {
            _ = shutdown.recv() => return Ok(LinkExit::Shutdown),
            r = socket.recv_from(&mut buf) => r.context("recv_from failed")?,
        };

        if len > mtu {
            tracing::trace!(%peer, len, mtu, "datagram exceeds link mtu, dropping");
            continue;
        }

        let Some(reply) = receiver.handle_datagram(&peer, &buf[..len]) else {
            continue;
        };

        let frame = reply.packet.encode();
        match socket.send_to(&frame, peer).await {
            Ok(_) => tracing::trace!(%peer, kind = reply.packet.name(), "reply sent"),
            Err(e) => tracing::warn!(%peer, kind = reply.packet.name(), error = %e, "reply send failed"),
        }

        if reply.restart {
            return Ok(LinkExit::Restart);
        }
    }
}
