//! otalink wire format — the packets exchanged between image sender and receiver.
//!
//! These layouts ARE the protocol. Both ends of the radio link must agree on
//! every byte, so nothing in here may change without bumping the format
//! version carried in the Offer.
//!
//! ```text
//! Offer:   [1: tag=1][4: size][32: sha256][4: version]          = 41 bytes
//! Ack:     [1: tag=2][4: next_expected]                         = 5 bytes
//! Data:    [1: tag=3][4: seq][2: len][2: crc16][len: payload]   = 9 + len bytes, len <= 200
//! Control: [1: tag]  tag in {4=Ready, 5=Reject, 6=Finish, 7=Cancel}
//! ```
//!
//! All multi-byte integers are little-endian. The fixed headers are
//! `#[repr(C, packed)]` zerocopy structs built from explicit little-endian
//! integer types, so the layout does not depend on the host. There is no
//! unsafe code in this module.

use std::fmt;
use std::ops::Deref;

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::integrity::{crc16, ImageDigest};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Largest payload a single Data packet may carry.
pub const MAX_CHUNK_PAYLOAD: usize = 200;

/// Bytes preceding the payload in a Data packet.
pub const DATA_HEADER_LEN: usize = 9;

/// Encoded size of an Offer.
pub const OFFER_LEN: usize = 41;

/// Encoded size of an Ack.
pub const ACK_LEN: usize = 5;

/// Encoded size of a Control packet.
pub const CONTROL_LEN: usize = 1;

/// Largest encoded packet (a full Data packet).
pub const MAX_PACKET_LEN: usize = DATA_HEADER_LEN + MAX_CHUNK_PAYLOAD;

/// Link MTU of the radio transport. Every packet fits with room to spare.
pub const LINK_MTU: usize = 250;

// ── Discriminants ─────────────────────────────────────────────────────────────

/// First byte of every encoded packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Offer = 1,
    Ack = 2,
    Data = 3,
    Ready = 4,
    Reject = 5,
    Finish = 6,
    Cancel = 7,
}

impl TryFrom<u8> for Tag {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Tag::Offer),
            2 => Ok(Tag::Ack),
            3 => Ok(Tag::Data),
            4 => Ok(Tag::Ready),
            5 => Ok(Tag::Reject),
            6 => Ok(Tag::Finish),
            7 => Ok(Tag::Cancel),
            other => Err(DecodeError::UnknownDiscriminant(other)),
        }
    }
}

// ── Fixed headers ─────────────────────────────────────────────────────────────

/// Offer as it appears on the wire.
///
/// Wire size: 41 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct OfferFrame {
    pub tag: u8,
    /// Total image size in bytes.
    pub size: U32<LittleEndian>,
    /// SHA-256 of the complete image.
    pub digest: [u8; 32],
    /// Image format version. Informational; the receiver logs it.
    pub version: U32<LittleEndian>,
}

assert_eq_size!(OfferFrame, [u8; OFFER_LEN]);

/// Ack as it appears on the wire.
///
/// Wire size: 5 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct AckFrame {
    pub tag: u8,
    /// Sequence number the receiver wants next.
    pub next_expected: U32<LittleEndian>,
}

assert_eq_size!(AckFrame, [u8; ACK_LEN]);

/// Header that precedes every Data payload.
///
/// Wire size: 9 bytes. `len` payload bytes follow immediately.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct DataHeader {
    pub tag: u8,
    pub seq: U32<LittleEndian>,
    /// Payload length. Never above MAX_CHUNK_PAYLOAD.
    pub len: U16<LittleEndian>,
    /// CRC-16/CCITT-FALSE of the payload.
    pub crc16: U16<LittleEndian>,
}

assert_eq_size!(DataHeader, [u8; DATA_HEADER_LEN]);

// ── Packet values ─────────────────────────────────────────────────────────────

/// Transfer announcement sent by the image owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offer {
    pub size: u32,
    pub digest: ImageDigest,
    pub version: u32,
}

/// Payload-less control signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Ready,
    Reject,
    /// Overloaded on the wire. From the receiver it means "offer accepted,
    /// send data" right after an Offer, and "image verified and committed"
    /// after the sender's own Finish. Only the transfer state tells the two
    /// apart. Kept that way for compatibility with deployed senders.
    Finish,
    Cancel,
}

impl Control {
    pub fn tag(self) -> Tag {
        match self {
            Control::Ready => Tag::Ready,
            Control::Reject => Tag::Reject,
            Control::Finish => Tag::Finish,
            Control::Cancel => Tag::Cancel,
        }
    }
}

/// Inline chunk payload, at most MAX_CHUNK_PAYLOAD bytes.
///
/// Stored by value so a whole Packet lives on the stack; the length bound is
/// enforced at construction and cannot be violated afterwards.
#[derive(Clone, Copy)]
pub struct ChunkPayload {
    len: u8,
    buf: [u8; MAX_CHUNK_PAYLOAD],
}

impl ChunkPayload {
    /// Copy `bytes` into a payload. Fails with `PayloadTooLarge` above 200 bytes.
    pub fn new(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() > MAX_CHUNK_PAYLOAD {
            return Err(DecodeError::PayloadTooLarge(bytes.len()));
        }
        let mut buf = [0u8; MAX_CHUNK_PAYLOAD];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            len: bytes.len() as u8,
            buf,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }
}

impl Deref for ChunkPayload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for ChunkPayload {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ChunkPayload {}

impl fmt::Debug for ChunkPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkPayload")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// One sequenced chunk of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataChunk {
    pub seq: u32,
    /// Checksum as declared by the sender. Not necessarily correct.
    pub crc16: u16,
    pub payload: ChunkPayload,
}

impl DataChunk {
    /// Build a chunk carrying the correct CRC for `bytes`.
    pub fn seal(seq: u32, bytes: &[u8]) -> Result<Self, DecodeError> {
        let payload = ChunkPayload::new(bytes)?;
        Ok(Self {
            seq,
            crc16: crc16(bytes),
            payload,
        })
    }

    /// True when the declared checksum matches the payload.
    pub fn crc_ok(&self) -> bool {
        crc16(&self.payload) == self.crc16
    }
}

/// Every packet the protocol knows. Closed set; match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    Offer(Offer),
    Ack { next_expected: u32 },
    Data(DataChunk),
    Control(Control),
}

impl Packet {
    pub fn tag(&self) -> Tag {
        match self {
            Packet::Offer(_) => Tag::Offer,
            Packet::Ack { .. } => Tag::Ack,
            Packet::Data(_) => Tag::Data,
            Packet::Control(c) => c.tag(),
        }
    }

    /// Short lowercase name for log fields.
    pub fn name(&self) -> &'static str {
        match self.tag() {
            Tag::Offer => "offer",
            Tag::Ack => "ack",
            Tag::Data => "data",
            Tag::Ready => "ready",
            Tag::Reject => "reject",
            Tag::Finish => "finish",
            Tag::Cancel => "cancel",
        }
    }

    /// Encode into a stack buffer. Infallible: every Packet value is well-formed.
    pub fn encode(&self) -> Frame {
        let mut frame = Frame::empty();
        match self {
            Packet::Offer(offer) => {
                let wire = OfferFrame {
                    tag: Tag::Offer as u8,
                    size: U32::new(offer.size),
                    digest: offer.digest,
                    version: U32::new(offer.version),
                };
                frame.push(wire.as_bytes());
            }
            Packet::Ack { next_expected } => {
                let wire = AckFrame {
                    tag: Tag::Ack as u8,
                    next_expected: U32::new(*next_expected),
                };
                frame.push(wire.as_bytes());
            }
            Packet::Data(chunk) => {
                let wire = DataHeader {
                    tag: Tag::Data as u8,
                    seq: U32::new(chunk.seq),
                    len: U16::new(chunk.payload.len() as u16),
                    crc16: U16::new(chunk.crc16),
                };
                frame.push(wire.as_bytes());
                frame.push(&chunk.payload);
            }
            Packet::Control(control) => frame.push(&[control.tag() as u8]),
        }
        frame
    }

    /// Decode one datagram. Total over all inputs; fails closed.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let Some(&first) = bytes.first() else {
            return Err(DecodeError::TooShort {
                expected: CONTROL_LEN,
                actual: 0,
            });
        };

        match Tag::try_from(first)? {
            Tag::Offer => {
                check_exact(bytes, OFFER_LEN)?;
                let wire = OfferFrame::read_from(bytes).ok_or(DecodeError::LengthMismatch {
                    expected: OFFER_LEN,
                    actual: bytes.len(),
                })?;
                Ok(Packet::Offer(Offer {
                    size: wire.size.get(),
                    digest: wire.digest,
                    version: wire.version.get(),
                }))
            }
            Tag::Ack => {
                check_exact(bytes, ACK_LEN)?;
                let wire = AckFrame::read_from(bytes).ok_or(DecodeError::LengthMismatch {
                    expected: ACK_LEN,
                    actual: bytes.len(),
                })?;
                Ok(Packet::Ack {
                    next_expected: wire.next_expected.get(),
                })
            }
            Tag::Data => {
                if bytes.len() < DATA_HEADER_LEN {
                    return Err(DecodeError::TooShort {
                        expected: DATA_HEADER_LEN,
                        actual: bytes.len(),
                    });
                }
                let (head, body) = bytes.split_at(DATA_HEADER_LEN);
                let wire = DataHeader::read_from(head).ok_or(DecodeError::TooShort {
                    expected: DATA_HEADER_LEN,
                    actual: bytes.len(),
                })?;
                let declared = wire.len.get() as usize;
                if declared > MAX_CHUNK_PAYLOAD {
                    return Err(DecodeError::PayloadTooLarge(declared));
                }
                if body.len() != declared {
                    return Err(DecodeError::LengthMismatch {
                        expected: DATA_HEADER_LEN + declared,
                        actual: bytes.len(),
                    });
                }
                Ok(Packet::Data(DataChunk {
                    seq: wire.seq.get(),
                    crc16: wire.crc16.get(),
                    payload: ChunkPayload::new(body)?,
                }))
            }
            tag @ (Tag::Ready | Tag::Reject | Tag::Finish | Tag::Cancel) => {
                check_exact(bytes, CONTROL_LEN)?;
                let control = match tag {
                    Tag::Ready => Control::Ready,
                    Tag::Reject => Control::Reject,
                    Tag::Finish => Control::Finish,
                    _ => Control::Cancel,
                };
                Ok(Packet::Control(control))
            }
        }
    }
}

fn check_exact(bytes: &[u8], expected: usize) -> Result<(), DecodeError> {
    if bytes.len() < expected {
        Err(DecodeError::TooShort {
            expected,
            actual: bytes.len(),
        })
    } else if bytes.len() > expected {
        Err(DecodeError::LengthMismatch {
            expected,
            actual: bytes.len(),
        })
    } else {
        Ok(())
    }
}

// ── Encoded frame ─────────────────────────────────────────────────────────────

/// An encoded packet, held in a fixed buffer sized for the largest packet.
#[derive(Clone, Copy)]
pub struct Frame {
    buf: [u8; MAX_PACKET_LEN],
    len: usize,
}

impl Frame {
    fn empty() -> Self {
        Self {
            buf: [0u8; MAX_PACKET_LEN],
            len: 0,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        let end = self.len + bytes.len();
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Frame").field(&self.as_bytes()).finish()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Reasons a datagram is not a packet. The receiver drops these silently.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("datagram too short: need {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("unknown packet discriminant: 0x{0:02x}")]
    UnknownDiscriminant(u8),

    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("payload length {0} exceeds maximum {}", MAX_CHUNK_PAYLOAD)]
    PayloadTooLarge(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
