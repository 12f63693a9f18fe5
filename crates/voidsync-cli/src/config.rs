//! Configuration system for the VoidSync CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use voidsync_core::CompletionPolicy;

/// VoidSync configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Device and room settings
    #[serde(default)]
    pub device: DeviceConfig,
    /// Endpoint registration settings
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Transfer settings
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Where the device identity is persisted
    #[serde(default = "default_identity_path")]
    pub identity_file: PathBuf,
    /// Room joined when none is given on the command line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Registration attempts on identifier collisions
    #[serde(default = "default_register_attempts")]
    pub max_register_attempts: u32,
    /// Activity log lines kept
    #[serde(default = "default_activity_log_capacity")]
    pub activity_log_capacity: usize,
    /// Messages buffered per session before the handshake
    #[serde(default = "default_max_pending")]
    pub max_pending_messages: usize,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Sender pauses after every this many chunks
    #[serde(default = "default_pacing_interval")]
    pub pacing_interval: u64,
    /// Pause length in milliseconds
    #[serde(default = "default_pacing_delay_ms")]
    pub pacing_delay_ms: u64,
    /// Finished outgoing records kept this long (milliseconds)
    #[serde(default = "default_sender_retention_ms")]
    pub sender_retention_ms: u64,
    /// Finished incoming records kept this long (milliseconds)
    #[serde(default = "default_receiver_retention_ms")]
    pub receiver_retention_ms: u64,
    /// `strict` or `permissive`
    #[serde(default = "default_completion_policy")]
    pub completion_policy: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_identity_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("voidsync/identity.json")
}

fn default_register_attempts() -> u32 {
    5
}

fn default_activity_log_capacity() -> usize {
    20
}

fn default_max_pending() -> usize {
    256
}

fn default_chunk_size() -> usize {
    64 * 1024 // 64 KiB
}

fn default_pacing_interval() -> u64 {
    10
}

fn default_pacing_delay_ms() -> u64 {
    5
}

fn default_sender_retention_ms() -> u64 {
    5_000
}

fn default_receiver_retention_ms() -> u64 {
    8_000
}

fn default_completion_policy() -> String {
    "strict".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            identity_file: default_identity_path(),
            room: None,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_register_attempts: default_register_attempts(),
            activity_log_capacity: default_activity_log_capacity(),
            max_pending_messages: default_max_pending(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            pacing_interval: default_pacing_interval(),
            pacing_delay_ms: default_pacing_delay_ms(),
            sender_retention_ms: default_sender_retention_ms(),
            receiver_retention_ms: default_receiver_retention_ms(),
            completion_policy: default_completion_policy(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("voidsync/config.toml")
    }

    /// Load config from `path`, falling back to defaults when it does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse the completion policy
    ///
    /// # Errors
    ///
    /// Returns an error for anything but `strict` or `permissive`.
    pub fn completion_policy(&self) -> anyhow::Result<CompletionPolicy> {
        Ok(self.transfer.completion_policy.parse()?)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > 16 * 1024 * 1024 {
            anyhow::bail!("Chunk size must be between 1 and 16MB");
        }

        if let Some(room) = &self.device.room {
            if room.is_empty() || !room.chars().all(|c| c.is_ascii_alphanumeric()) {
                anyhow::bail!("Room '{}' must be non-empty and alphanumeric", room);
            }
        }

        self.completion_policy()?;
        self.to_node_config()?.validate()?;
        Ok(())
    }

    /// Build the library configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the completion policy is unknown.
    pub fn to_node_config(&self) -> anyhow::Result<voidsync_core::NodeConfig> {
        let mut node = voidsync_core::NodeConfig::default();

        node.connection.max_register_attempts = self.connection.max_register_attempts;
        node.connection.activity_log_capacity = self.connection.activity_log_capacity;
        node.session.max_pending_messages = self.connection.max_pending_messages;

        node.transfer.chunk_size = self.transfer.chunk_size;
        node.transfer.pacing_interval = self.transfer.pacing_interval;
        node.transfer.pacing_delay = Duration::from_millis(self.transfer.pacing_delay_ms);
        node.transfer.sender_retention = Duration::from_millis(self.transfer.sender_retention_ms);
        node.transfer.receiver_retention =
            Duration::from_millis(self.transfer.receiver_retention_ms);
        node.transfer.completion_policy = self.completion_policy()?;

        Ok(node)
    }
}
