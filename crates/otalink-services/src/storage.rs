//! Image storage — where received firmware lands.
//!
//! The receiver talks to storage through [`StorageSink`]: `begin` reserves a
//! slot for a declared size, `write` appends accepted chunks in order, and
//! `end` either commits the slot (it becomes the image booted next) or
//! throws it away.
//!
//! [`SlotSink`] is the file-backed implementation used by the daemon:
//!   {image_dir}/staging.bin  — the transfer in progress
//!   {image_dir}/active.bin   — the last committed image
//!
//! Commit is sync + rename, so `active.bin` is always either the previous
//! image or the complete new one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Destination for one image transfer at a time.
pub trait StorageSink {
    /// Prepare for exactly `total_size` bytes. Called again on every Offer;
    /// any previous staged data is discarded.
    fn begin(&mut self, total_size: u32) -> Result<(), SinkError>;

    /// Append `bytes`. Returns how many were stored; anything short of
    /// `bytes.len()` ends the transfer.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, SinkError>;

    /// Finish the staged image. With `commit`, make it the active image.
    fn end(&mut self, commit: bool) -> Result<(), SinkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("image of {requested} bytes exceeds slot capacity {capacity}")]
    TooLarge { requested: u64, capacity: u64 },

    #[error("no transfer in progress")]
    NotStarted,

    #[error("image incomplete: declared {declared} bytes, wrote {written}")]
    SizeMismatch { declared: u64, written: u64 },
}

fn io_err<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> SinkError + 'a {
    move |source| SinkError::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

// ── SlotSink ──────────────────────────────────────────────────────────────────

/// File-backed staging/active image slots.
pub struct SlotSink {
    dir: PathBuf,
    capacity: u64,
    staging: Option<Staging>,
}

struct Staging {
    file: File,
    declared: u64,
    written: u64,
}

impl SlotSink {
    /// Slots live in `dir`, created on first `begin`.
    pub fn new(dir: impl Into<PathBuf>, capacity: u64) -> Self {
        Self {
            dir: dir.into(),
            capacity,
            staging: None,
        }
    }

    pub fn staging_path(&self) -> PathBuf {
        self.dir.join("staging.bin")
    }

    pub fn active_path(&self) -> PathBuf {
        self.dir.join("active.bin")
    }

    /// Bytes staged so far, if a transfer is open.
    pub fn staged_bytes(&self) -> Option<u64> {
        self.staging.as_ref().map(|s| s.written)
    }

    fn discard_staging(&mut self) -> Result<(), SinkError> {
        self.staging = None;
        let path = self.staging_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err("remove", &path)(e)),
        }
    }
}

impl StorageSink for SlotSink {
    fn begin(&mut self, total_size: u32) -> Result<(), SinkError> {
        let requested = u64::from(total_size);
        if requested > self.capacity {
            return Err(SinkError::TooLarge {
                requested,
                capacity: self.capacity,
            });
        }

        fs::create_dir_all(&self.dir).map_err(io_err("create", &self.dir))?;

        // File::create truncates whatever a superseded transfer left behind.
        let path = self.staging_path();
        let file = File::create(&path).map_err(io_err("create", &path))?;
        self.staging = Some(Staging {
            file,
            declared: requested,
            written: 0,
        });

        tracing::debug!(path = %path.display(), size = total_size, "staging slot opened");
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, SinkError> {
        let path = self.staging_path();
        let staging = self.staging.as_mut().ok_or(SinkError::NotStarted)?;

        let room = staging.declared - staging.written;
        let n = bytes.len().min(room as usize);
        staging
            .file
            .write_all(&bytes[..n])
            .map_err(io_err("write", &path))?;
        staging.written += n as u64;

        if n < bytes.len() {
            tracing::warn!(
                declared = staging.declared,
                offered = bytes.len(),
                stored = n,
                "write past declared image size truncated"
            );
        }
        Ok(n)
    }

    fn end(&mut self, commit: bool) -> Result<(), SinkError> {
        let Some(staging) = self.staging.take() else {
            return Err(SinkError::NotStarted);
        };

        if !commit {
            drop(staging);
            tracing::debug!("staged image discarded");
            return self.discard_staging();
        }

        if staging.written != staging.declared {
            let err = SinkError::SizeMismatch {
                declared: staging.declared,
                written: staging.written,
            };
            drop(staging);
            self.discard_staging()?;
            return Err(err);
        }

        let staging_path = self.staging_path();
        let active_path = self.active_path();
        staging
            .file
            .sync_all()
            .map_err(io_err("sync", &staging_path))?;
        drop(staging);

        fs::rename(&staging_path, &active_path).map_err(io_err("rename", &staging_path))?;

        tracing::info!(path = %active_path.display(), "image committed to active slot");
        Ok(())
    }
}
