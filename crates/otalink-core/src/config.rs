//! Configuration system for otalink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $OTALINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/otalink/config.toml
//!   3. ~/.config/otalink/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::{LINK_MTU, MAX_CHUNK_PAYLOAD};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OtalinkConfig {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
    pub activation: ActivationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the receiver daemon binds its datagram socket to.
    pub bind_addr: String,
    /// Datagrams longer than this are dropped unread.
    pub mtu: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the staging and active image slots.
    pub image_dir: PathBuf,
    /// Offers announcing a larger image are rejected.
    pub max_image_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Payload bytes per Data packet (sender side). 1..=200.
    pub chunk_size: usize,
    /// How long the sender waits for a reply before retransmitting.
    pub ack_timeout_ms: u64,
    /// Consecutive retransmissions without progress before giving up.
    pub max_retries: u32,
    /// Format version announced in Offers.
    pub format_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    /// Pause between the final Finish and the restart.
    pub restart_delay_ms: u64,
    /// Exit code the daemon uses to ask its supervisor for a restart.
    pub restart_exit_code: i32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4210".to_string(),
            mtu: LINK_MTU,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            image_dir: data_dir().join("images"),
            max_image_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_CHUNK_PAYLOAD,
            ack_timeout_ms: 500,
            max_retries: 8,
            format_version: 1,
        }
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: 100,
            restart_exit_code: 0,
        }
    }
}

impl TransferConfig {
    /// Chunk size clamped to what a Data packet can carry.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_CHUNK_PAYLOAD)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("otalink")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("otalink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl OtalinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            OtalinkConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a specific file, without env overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("OTALINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&OtalinkConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply OTALINK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("OTALINK_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(v) = lookup("OTALINK_STORAGE__IMAGE_DIR") {
            self.storage.image_dir = PathBuf::from(v);
        }
        if let Some(Ok(ms)) = lookup("OTALINK_TRANSFER__ACK_TIMEOUT_MS").map(|v| v.parse::<u64>()) {
            self.transfer.ack_timeout_ms = ms;
        }
        if let Some(Ok(n)) = lookup("OTALINK_TRANSFER__MAX_RETRIES").map(|v| v.parse::<u32>()) {
            self.transfer.max_retries = n;
        }
        if let Some(Ok(n)) = lookup("OTALINK_TRANSFER__CHUNK_SIZE").map(|v| v.parse::<usize>()) {
            self.transfer.chunk_size = n;
        }
    }
}
