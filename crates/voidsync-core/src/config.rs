//! Node configuration

use crate::error::{Error, Result};
use std::borrow::Cow;
use std::time::Duration;

/// Node configuration
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Endpoint registration and activity log configuration
    pub connection: ConnectionConfig,

    /// Per-peer session configuration
    pub session: SessionConfig,

    /// Transfer configuration
    pub transfer: TransferConfig,
}

impl NodeConfig {
    /// Check every section for values the node cannot run with
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        self.session.validate()?;
        self.transfer.validate()
    }
}

/// Endpoint registration and observability configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Registration attempts before giving up on identifier collisions
    pub max_register_attempts: u32,

    /// Activity log entries kept (newest first)
    pub activity_log_capacity: usize,

    /// Capacity of the observer event broadcast
    pub event_capacity: usize,

    /// Capacity of the command queue
    pub command_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_register_attempts: 5,
            activity_log_capacity: 20,
            event_capacity: 1024,
            command_capacity: 64,
        }
    }
}

impl ConnectionConfig {
    fn validate(&self) -> Result<()> {
        if self.max_register_attempts == 0 {
            return Err(invalid("connection.max_register_attempts must be at least 1"));
        }
        if self.activity_log_capacity == 0 {
            return Err(invalid("connection.activity_log_capacity must be at least 1"));
        }
        if self.event_capacity == 0 || self.command_capacity == 0 {
            return Err(invalid("connection channel capacities must be non-zero"));
        }
        Ok(())
    }
}

/// Per-peer session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Messages buffered before the remote identity arrives; overflow closes the session
    pub max_pending_messages: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_pending_messages: 256,
        }
    }
}

impl SessionConfig {
    fn validate(&self) -> Result<()> {
        if self.max_pending_messages == 0 {
            return Err(invalid("session.max_pending_messages must be at least 1"));
        }
        Ok(())
    }
}

/// What the receiver does when `file-complete` arrives with unfilled slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// Fail the transfer with `IncompleteTransfer`
    #[default]
    Strict,
    /// Concatenate the filled slots in order, skipping gaps
    Permissive,
}

impl std::str::FromStr for CompletionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "permissive" => Ok(Self::Permissive),
            other => Err(Error::InvalidConfig(Cow::Owned(format!(
                "unknown completion policy: {other}"
            )))),
        }
    }
}

impl std::fmt::Display for CompletionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Permissive => write!(f, "permissive"),
        }
    }
}

/// Transfer configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Chunk size in bytes
    pub chunk_size: usize,

    /// Sender yields after every chunk whose index is a multiple of this
    pub pacing_interval: u64,

    /// Length of each sender yield
    pub pacing_delay: Duration,

    /// How long a finished outgoing record stays visible
    pub sender_retention: Duration,

    /// How long a finished incoming record stays visible
    pub receiver_retention: Duration,

    /// Period of the expiry sweep
    pub sweep_interval: Duration,

    /// Largest `totalChunks` a receiver will allocate for
    pub max_total_chunks: u64,

    /// Reassembly behaviour when chunks are missing at completion
    pub completion_policy: CompletionPolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024, // 64 KiB
            pacing_interval: 10,
            pacing_delay: Duration::from_millis(5),
            sender_retention: Duration::from_secs(5),
            receiver_retention: Duration::from_secs(8),
            sweep_interval: Duration::from_millis(250),
            max_total_chunks: 262_144, // 16 GiB at the default chunk size
            completion_policy: CompletionPolicy::Strict,
        }
    }
}

impl TransferConfig {
    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(invalid("transfer.chunk_size must be non-zero"));
        }
        if self.pacing_interval == 0 {
            return Err(invalid("transfer.pacing_interval must be non-zero"));
        }
        if self.sweep_interval.is_zero() {
            return Err(invalid("transfer.sweep_interval must be non-zero"));
        }
        if self.max_total_chunks == 0 {
            return Err(invalid("transfer.max_total_chunks must be non-zero"));
        }
        Ok(())
    }
}

const fn invalid(context: &'static str) -> Error {
    Error::InvalidConfig(Cow::Borrowed(context))
}
