//! Sender side of the image transfer protocol.
//!
//! Exactly one packet is outstanding at any time: the Offer, one Data
//! chunk, or the closing Finish. While sending, the receiver's Ack decides
//! which chunk goes next, even when that means going back. The outstanding
//! packet is retransmitted on timeout or on a repeated Ack of the current
//! sequence (the receiver's way of saying "that one did not make it").
//!
//! Like the receiver, this is sans-IO. The caller owns the socket and the
//! timer: transmit whatever `Step::Send` carries, feed replies into
//! [`Sender::handle`], and call [`Sender::on_timeout`] when the ack timer
//! fires.

use otalink_core::integrity::image_digest;
use otalink_core::wire::{Control, DataChunk, Offer, Packet, MAX_CHUNK_PAYLOAD};

/// Tunables for one push.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Payload bytes per chunk, 1..=200.
    pub chunk_size: usize,
    /// Consecutive retransmissions without progress before giving up.
    pub max_retries: u32,
    /// Format version announced in the Offer.
    pub version: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_CHUNK_PAYLOAD,
            max_retries: 8,
            version: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("receiver rejected the offer")]
    Rejected,

    #[error("receiver cancelled the transfer")]
    Cancelled,

    #[error("no progress after {0} retransmissions")]
    Timeout(u32),

    #[error("image of {0} bytes does not fit the offer size field")]
    ImageTooLarge(usize),

    #[error("chunk size {0} outside 1..={}", MAX_CHUNK_PAYLOAD)]
    BadChunkSize(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderState {
    /// Created, Offer not yet produced.
    Ready,
    Offering,
    /// Waiting for `Ack(seq + 1)`.
    Sending { seq: u32 },
    /// All chunks acknowledged; waiting for the receiver's verdict.
    Finishing,
    Done,
    Failed(TransferError),
}

/// What the caller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Transmit this packet and (re)arm the ack timer.
    Send(Packet),
    /// Nothing to send; keep the current timer running.
    Wait,
    /// Receiver verified and committed the image.
    Done,
    Failed(TransferError),
}

/// Pushes one image to one receiver.
pub struct Sender<'a> {
    image: &'a [u8],
    offer: Offer,
    chunk_size: usize,
    total_chunks: u32,
    max_retries: u32,
    state: SenderState,
    retries: u32,
    retransmissions: u64,
}

impl<'a> Sender<'a> {
    pub fn new(image: &'a [u8], config: &SenderConfig) -> Result<Self, TransferError> {
        if config.chunk_size == 0 || config.chunk_size > MAX_CHUNK_PAYLOAD {
            return Err(TransferError::BadChunkSize(config.chunk_size));
        }
        let size = u32::try_from(image.len()).map_err(|_| TransferError::ImageTooLarge(image.len()))?;
        let total_chunks = u32::try_from(image.len().div_ceil(config.chunk_size))
            .map_err(|_| TransferError::ImageTooLarge(image.len()))?;

        Ok(Self {
            image,
            offer: Offer {
                size,
                digest: image_digest(image),
                version: config.version,
            },
            chunk_size: config.chunk_size,
            total_chunks,
            max_retries: config.max_retries,
            state: SenderState::Ready,
            retries: 0,
            retransmissions: 0,
        })
    }

    pub fn offer(&self) -> &Offer {
        &self.offer
    }

    pub fn state(&self) -> &SenderState {
        &self.state
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Packets sent again because of a timeout or a repeated Ack.
    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    /// Produce the Offer that opens the transfer.
    pub fn start(&mut self) -> Packet {
        self.state = SenderState::Offering;
        self.retries = 0;
        Packet::Offer(self.offer)
    }

    /// Feed one packet received from the receiver.
    pub fn handle(&mut self, packet: &Packet) -> Step {
        match (&self.state, packet) {
            (SenderState::Ready | SenderState::Done | SenderState::Failed(_), _) => Step::Wait,

            (_, Packet::Control(Control::Cancel)) => self.fail(TransferError::Cancelled),

            // Finish right after an Offer is the receiver's "ready to receive".
            (SenderState::Offering, Packet::Control(Control::Finish)) => {
                tracing::debug!(chunks = self.total_chunks, "offer accepted");
                self.advance_to(0)
            }
            (SenderState::Offering, Packet::Control(Control::Reject)) => {
                self.fail(TransferError::Rejected)
            }

            // The receiver's ack is authoritative: whatever it asks for next
            // is what we send, including an earlier chunk after a late Offer
            // reset its session.
            (SenderState::Sending { seq }, Packet::Ack { next_expected }) => {
                let (seq, next) = (*seq, *next_expected);
                if next == seq {
                    tracing::warn!(seq, "receiver asked for chunk again");
                    self.retransmit()
                } else if next == seq.wrapping_add(1) {
                    self.advance_to(next)
                } else if next <= self.total_chunks {
                    tracing::warn!(seq, ack = next, "receiver is elsewhere, moving to its sequence");
                    if next < seq {
                        self.retransmissions += 1;
                    }
                    self.advance_to(next)
                } else {
                    tracing::debug!(seq, ack = next, "ack beyond image, ignoring");
                    Step::Wait
                }
            }

            // After our own Finish the same tag means "verified and committed".
            // A late duplicate of the offer acceptance would read the same way;
            // one packet in flight keeps that window small.
            (SenderState::Finishing, Packet::Control(Control::Finish)) => {
                tracing::info!(
                    bytes = self.offer.size,
                    retransmissions = self.retransmissions,
                    "receiver committed image"
                );
                self.state = SenderState::Done;
                Step::Done
            }

            (_, other) => {
                tracing::debug!(kind = other.name(), state = ?self.state, "unexpected reply, ignoring");
                Step::Wait
            }
        }
    }

    /// The ack timer expired without a useful reply.
    pub fn on_timeout(&mut self) -> Step {
        match self.state {
            SenderState::Offering | SenderState::Sending { .. } | SenderState::Finishing => {
                tracing::warn!(state = ?self.state, retries = self.retries + 1, "ack timeout");
                self.retransmit()
            }
            _ => Step::Wait,
        }
    }

    /// Packet currently awaiting an answer.
    pub fn outstanding(&self) -> Option<Packet> {
        match self.state {
            SenderState::Offering => Some(Packet::Offer(self.offer)),
            SenderState::Sending { seq } => self.chunk(seq).map(Packet::Data),
            SenderState::Finishing => Some(Packet::Control(Control::Finish)),
            _ => None,
        }
    }

    fn advance_to(&mut self, seq: u32) -> Step {
        self.retries = 0;
        self.state = if seq >= self.total_chunks {
            SenderState::Finishing
        } else {
            SenderState::Sending { seq }
        };
        self.send_outstanding()
    }

    fn retransmit(&mut self) -> Step {
        self.retries += 1;
        if self.retries > self.max_retries {
            return self.fail(TransferError::Timeout(self.max_retries));
        }
        self.retransmissions += 1;
        self.send_outstanding()
    }

    fn send_outstanding(&mut self) -> Step {
        match self.outstanding() {
            Some(packet) => Step::Send(packet),
            None if matches!(self.state, SenderState::Sending { .. }) => {
                self.fail(TransferError::BadChunkSize(self.chunk_size))
            }
            None => Step::Wait,
        }
    }

    fn fail(&mut self, error: TransferError) -> Step {
        tracing::warn!(error = %error, state = ?self.state, "transfer failed");
        self.state = SenderState::Failed(error.clone());
        Step::Failed(error)
    }

    /// Chunk `seq` of the image, or `None` if it cannot be carried by a
    /// Data packet.
    fn chunk(&self, seq: u32) -> Option<DataChunk> {
        let start = (seq as usize).checked_mul(self.chunk_size)?;
        let end = start.saturating_add(self.chunk_size).min(self.image.len());
        DataChunk::seal(seq, self.image.get(start..end)?).ok()
    }
}
