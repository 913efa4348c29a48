//! Receiver side of the image transfer protocol.
//!
//! Turns a stream of possibly duplicated, corrupted or reordered datagrams
//! into a verified image in storage. Retransmission is entirely sender
//! driven: the receiver only ever answers, and its answer is always the
//! sequence number it wants next (selective-repeat-of-one).
//!
//! ```text
//!            Offer (begin ok)                Finish (digest ok, end ok)
//!   Idle ──────────────────────► Receiving ───► Verifying ───► Committed
//!     ▲  Offer (begin fails)       │   ▲  Offer (restart)   │
//!     └── Reject                   │   └────────────────────┤
//!                                  └─ write fails ─► Aborted ◄─ digest/end fails
//! ```
//!
//! One session exists at a time. A new Offer always supersedes it, even
//! mid-transfer and even from another peer; there is no teardown handshake.

use std::fmt;

use otalink_core::integrity::ImageHasher;
use otalink_core::wire::{Control, DataChunk, Offer, Packet};

use crate::storage::StorageSink;

/// Where the receiver is in the transfer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Receiving,
    /// Finish arrived; digest and commit in progress.
    Verifying,
    /// Image committed. The device restarts next.
    Committed,
    Aborted,
}

/// What to send back to the peer that delivered the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub packet: Packet,
    /// Restart the device once `packet` is on the air.
    pub restart: bool,
}

impl Reply {
    fn send(packet: Packet) -> Self {
        Self {
            packet,
            restart: false,
        }
    }

    fn ack(next_expected: u32) -> Self {
        Self::send(Packet::Ack { next_expected })
    }

    fn control(control: Control) -> Self {
        Self::send(Packet::Control(control))
    }
}

/// State of the one transfer in flight.
///
/// The digest runs for the whole life of a session, so "hashing" is simply
/// "a session exists".
struct Session<P> {
    peer: P,
    offer: Offer,
    expected_sequence: u32,
    hasher: ImageHasher,
}

/// Receiver state machine. Owns the storage sink and the active session.
pub struct Receiver<P, S> {
    sink: S,
    state: TransferState,
    session: Option<Session<P>>,
}

impl<P, S> Receiver<P, S>
where
    P: Clone + PartialEq + fmt::Display,
    S: StorageSink,
{
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            state: TransferState::Idle,
            session: None,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Next sequence number the active session accepts.
    pub fn expected_sequence(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.expected_sequence)
    }

    /// Whether the image digest is accumulating.
    pub fn is_hashing(&self) -> bool {
        self.session.is_some()
    }

    /// Peer that owns the active session.
    pub fn session_peer(&self) -> Option<&P> {
        self.session.as_ref().map(|s| &s.peer)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Decode and handle one raw datagram. Undecodable input is dropped
    /// without an answer: there is nothing meaningful to reply to.
    pub fn handle_datagram(&mut self, peer: &P, bytes: &[u8]) -> Option<Reply> {
        match Packet::decode(bytes) {
            Ok(packet) => self.handle(peer, packet),
            Err(e) => {
                tracing::trace!(%peer, len = bytes.len(), error = %e, "undecodable datagram, dropping");
                None
            }
        }
    }

    /// Handle one decoded packet.
    pub fn handle(&mut self, peer: &P, packet: Packet) -> Option<Reply> {
        match packet {
            Packet::Offer(offer) => Some(self.on_offer(peer, offer)),
            Packet::Data(chunk) => self.on_data(peer, &chunk),
            Packet::Control(Control::Finish) => self.on_finish(peer),
            Packet::Ack { .. }
            | Packet::Control(Control::Ready | Control::Reject | Control::Cancel) => {
                tracing::debug!(%peer, kind = packet.name(), "sender-side signal, ignoring");
                None
            }
        }
    }

    fn on_offer(&mut self, peer: &P, offer: Offer) -> Reply {
        let superseded = self.session.take();
        if let Some(old) = &superseded {
            tracing::info!(
                %peer,
                previous_peer = %old.peer,
                previous_sequence = old.expected_sequence,
                "new offer supersedes transfer in progress"
            );
        }

        match self.sink.begin(offer.size) {
            Ok(()) => {
                self.session = Some(Session {
                    peer: peer.clone(),
                    offer,
                    expected_sequence: 0,
                    hasher: ImageHasher::start(),
                });
                self.state = TransferState::Receiving;
                tracing::info!(
                    %peer,
                    size = offer.size,
                    version = offer.version,
                    digest = hex::encode(offer.digest),
                    "offer accepted"
                );
                // Finish doubles as "ready to receive" here; see Control::Finish.
                Reply::control(Control::Finish)
            }
            Err(e) => {
                tracing::warn!(%peer, size = offer.size, error = %e, "storage refused offer");
                if superseded.is_some() {
                    self.discard_staged();
                }
                self.state = TransferState::Idle;
                Reply::control(Control::Reject)
            }
        }
    }

    fn on_data(&mut self, peer: &P, chunk: &DataChunk) -> Option<Reply> {
        let Some(session) = self.session.as_mut().filter(|s| s.peer == *peer) else {
            tracing::debug!(%peer, seq = chunk.seq, "data outside an active transfer, ignoring");
            return None;
        };

        let expected = session.expected_sequence;
        if chunk.seq != expected || !chunk.crc_ok() {
            tracing::warn!(
                %peer,
                seq = chunk.seq,
                expected,
                crc_ok = chunk.crc_ok(),
                "chunk rejected, re-acking expected sequence"
            );
            return Some(Reply::ack(expected));
        }

        let len = chunk.payload.len();
        match self.sink.write(&chunk.payload) {
            Ok(n) if n == len => {
                session.hasher.update(&chunk.payload);
                session.expected_sequence = expected.wrapping_add(1);
                tracing::debug!(%peer, seq = chunk.seq, len, "chunk stored");
                Some(Reply::ack(session.expected_sequence))
            }
            Ok(n) => {
                tracing::warn!(%peer, seq = chunk.seq, len, written = n, "short write, cancelling transfer");
                Some(self.abort())
            }
            Err(e) => {
                tracing::warn!(%peer, seq = chunk.seq, error = %e, "write failed, cancelling transfer");
                Some(self.abort())
            }
        }
    }

    fn on_finish(&mut self, peer: &P) -> Option<Reply> {
        if let Some(session) = &self.session {
            if session.peer != *peer {
                tracing::debug!(%peer, owner = %session.peer, "finish from non-owning peer, ignoring");
                return None;
            }
        }

        // The sender lost our confirmation and asks again. The image is
        // already active; do not touch storage a second time.
        if self.session.is_none() && self.state == TransferState::Committed {
            tracing::debug!(%peer, "finish after commit, confirming again");
            return Some(Reply {
                packet: Packet::Control(Control::Finish),
                restart: true,
            });
        }

        if let Some(session) = self.session.take() {
            self.state = TransferState::Verifying;
            let bytes = session.hasher.bytes_hashed();
            let actual = session.hasher.finish();
            if actual != session.offer.digest {
                tracing::warn!(
                    %peer,
                    bytes,
                    expected = hex::encode(session.offer.digest),
                    actual = hex::encode(actual),
                    "image digest mismatch, cancelling transfer"
                );
                self.discard_staged();
                self.state = TransferState::Aborted;
                return Some(Reply::control(Control::Cancel));
            }
            tracing::info!(%peer, bytes, digest = hex::encode(actual), "image digest verified");
        }

        match self.sink.end(true) {
            Ok(()) => {
                self.state = TransferState::Committed;
                tracing::info!(%peer, "image committed, restart pending");
                // Same wire tag as the offer acceptance; here it means "applied".
                Some(Reply {
                    packet: Packet::Control(Control::Finish),
                    restart: true,
                })
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "commit failed, cancelling transfer");
                self.state = TransferState::Aborted;
                Some(Reply::control(Control::Cancel))
            }
        }
    }

    /// Tear down the active session after a storage failure.
    fn abort(&mut self) -> Reply {
        self.session = None;
        self.discard_staged();
        self.state = TransferState::Aborted;
        Reply::control(Control::Cancel)
    }

    /// Drop whatever is staged so a stray Finish cannot commit it.
    fn discard_staged(&mut self) {
        if let Err(e) = self.sink.end(false) {
            tracing::debug!(error = %e, "discarding staged image failed");
        }
    }
}
