//! `digest` — show what an Offer for an image would announce.

use std::path::Path;

use anyhow::Result;

use otalink_core::config::OtalinkConfig;
use otalink_core::integrity::image_digest;

use super::image::Image;

pub fn cmd_digest(config: &OtalinkConfig, path: &Path) -> Result<()> {
    let image = Image::open(path)?;
    let chunk_size = config.transfer.effective_chunk_size();

    println!("═══════════════════════════════════════");
    println!("  {}", path.display());
    println!("═══════════════════════════════════════");
    println!("  Size       : {} bytes", image.len());
    println!("  SHA-256    : {}", hex::encode(image_digest(&image)));
    println!("  Chunks     : {} x {} bytes", image.len().div_ceil(chunk_size), chunk_size);

    Ok(())
}
