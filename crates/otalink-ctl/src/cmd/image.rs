//! Firmware image loading.

use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use anyhow::{Context, Result};
use memmap2::Mmap;

/// Image bytes, memory-mapped from disk.
pub enum Image {
    Mapped(Mmap),
    /// Zero-length files cannot be mapped.
    Empty,
}

impl Image {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open image: {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("failed to stat image: {}", path.display()))?
            .len();
        if len == 0 {
            return Ok(Image::Empty);
        }

        // Safety: mapped read-only; the image must not be modified during a push.
        let mmap = unsafe {
            Mmap::map(&file).with_context(|| format!("failed to mmap image: {}", path.display()))?
        };
        Ok(Image::Mapped(mmap))
    }
}

impl Deref for Image {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Image::Mapped(mmap) => &mmap[..],
            Image::Empty => &[],
        }
    }
}
