//! otalink-core — wire format, integrity checks, and configuration.
//! All other otalink crates depend on this one.

pub mod config;
pub mod integrity;
pub mod wire;

pub use integrity::{crc16, image_digest, ImageDigest, ImageHasher};
pub use wire::{Control, DataChunk, DecodeError, Offer, Packet};
