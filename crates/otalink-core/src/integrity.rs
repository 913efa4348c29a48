//! Integrity checks for image transfers.
//!
//! Two layers:
//!   1. CRC-16/CCITT-FALSE over each chunk payload — catches radio corruption
//!      so the receiver can ask for the chunk again.
//!   2. SHA-256 over the whole image — checked once before the image is
//!      committed. Must equal the digest announced in the Offer.
//!
//! The CRC parameters are a compatibility contract with deployed senders:
//! polynomial 0x1021, initial register 0xFFFF, MSB-first, no reflection,
//! no final XOR.

use sha2::{Digest as _, Sha256};

/// SHA-256 of a complete image.
pub type ImageDigest = [u8; 32];

// ── CRC-16 ────────────────────────────────────────────────────────────────────

const CRC16_POLY: u16 = 0x1021;
const CRC16_INIT: u16 = 0xffff;

const CRC16_TABLE: [u16; 256] = crc16_table();

const fn crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut reg = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            reg = if reg & 0x8000 != 0 {
                (reg << 1) ^ CRC16_POLY
            } else {
                reg << 1
            };
            bit += 1;
        }
        table[i] = reg;
        i += 1;
    }
    table
}

/// CRC-16/CCITT-FALSE of a chunk payload.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_INIT, |reg, &byte| {
        (reg << 8) ^ CRC16_TABLE[((reg >> 8) as u8 ^ byte) as usize]
    })
}

// ── SHA-256 ───────────────────────────────────────────────────────────────────

/// Hash a complete image in one call.
pub fn image_digest(data: &[u8]) -> ImageDigest {
    let mut hasher = ImageHasher::start();
    hasher.update(data);
    hasher.finish()
}

/// Incremental SHA-256 for images that arrive chunk by chunk.
///
/// `finish` consumes the hasher, so a transfer's digest can only be
/// finalized once.
///
/// # Example
/// ```
/// use otalink_core::integrity::{image_digest, ImageHasher};
/// let mut h = ImageHasher::start();
/// h.update(b"hello-");
/// h.update(b"123");
/// assert_eq!(h.finish(), image_digest(b"hello-123"));
/// ```
pub struct ImageHasher {
    inner: Sha256,
    bytes: u64,
}

impl ImageHasher {
    pub fn start() -> Self {
        Self {
            inner: Sha256::new(),
            bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes += data.len() as u64;
    }

    /// Bytes fed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    pub fn finish(self) -> ImageDigest {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.inner.finalize());
        out
    }
}
