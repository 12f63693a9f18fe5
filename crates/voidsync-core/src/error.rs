//! Error types for the VoidSync core
//!
//! Errors are categorized to support retry logic and proper error handling.
//!
//! # Error Categories
//!
//! - **Transient**: Temporary failures that may succeed on retry (transport hiccups, closed channels)
//! - **Permanent**: Failures that will not succeed without intervention (failed registration, unknown peer)
//!
//! # Example
//!
//! ```no_run
//! use voidsync_core::Error;
//!
//! fn handle_error(err: Error) {
//!     if err.is_transient() {
//!         println!("Transient error, may retry: {}", err);
//!     } else {
//!         println!("Permanent error: {}", err);
//!     }
//! }
//! ```

use std::borrow::Cow;
use thiserror::Error;
use voidsync_transport::TransportError;

/// Errors that can occur in VoidSync operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // ============ Registration Errors ============
    /// Every attempt to claim an endpoint identifier collided with an existing one
    #[error("Endpoint identifier unavailable after {attempts} attempts (last tried {endpoint})")]
    EndpointUnavailable {
        /// Last identifier tried
        endpoint: String,
        /// Number of registration attempts made
        attempts: u32,
    },

    /// Registration failed for a reason other than a collision
    #[error("Registration failed: {0}")]
    Registration(Cow<'static, str>),

    /// Operation requires a registered endpoint
    #[error("Not ready: {0}")]
    NotReady(Cow<'static, str>),

    // ============ Transport Errors ============
    /// Transport operation failed
    #[error("Transport error: {0}")]
    Transport(Cow<'static, str>),

    /// Channel send/receive error
    #[error("Channel error: {0}")]
    Channel(Cow<'static, str>),

    // ============ Session Errors ============
    /// No established session exists for the peer
    #[error("Session not found for peer {0}")]
    SessionNotFound(String),

    /// Session-level protocol failure
    #[error("Session error: {0}")]
    Session(Cow<'static, str>),

    // ============ Transfer Errors ============
    /// Transfer not found
    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    /// A transfer with the same file id is already tracked
    #[error("Duplicate transfer: {0}")]
    DuplicateTransfer(String),

    /// Completion arrived while chunks were still missing
    #[error("Incomplete transfer {file_id}: {missing} of {total} chunks missing")]
    IncompleteTransfer {
        /// Transfer file id
        file_id: String,
        /// Number of chunks never received
        missing: u64,
        /// Declared chunk count
        total: u64,
    },

    // ============ Protocol Errors ============
    /// Message violated the peer protocol
    #[error("Invalid message: {0}")]
    InvalidMessage(Cow<'static, str>),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(Cow<'static, str>),

    // ============ Identity Errors ============
    /// Identity could not be loaded or persisted
    #[error("Identity error: {0}")]
    Identity(Cow<'static, str>),

    // ============ I/O Errors ============
    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(String),

    // ============ Configuration & State Errors ============
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Invalid state transition
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    /// The node task has stopped
    #[error("Node has shut down")]
    Shutdown,
}

impl Error {
    /// Returns true if this error is transient and may succeed on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Channel(_) | Error::NotReady(_)
        )
    }

    /// Returns true if this error is permanent and will not succeed on retry
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_)
                | Error::Registration(_)
                | Error::EndpointUnavailable { .. }
                | Error::SessionNotFound(_)
                | Error::TransferNotFound(_)
                | Error::DuplicateTransfer(_)
                | Error::IncompleteTransfer { .. }
                | Error::InvalidMessage(_)
                | Error::InvalidState(_)
                | Error::Shutdown
        )
    }

    /// Create a not-ready error with static context (zero allocation)
    #[must_use]
    pub const fn not_ready(context: &'static str) -> Self {
        Error::NotReady(Cow::Borrowed(context))
    }

    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        Error::InvalidState(Cow::Borrowed(context))
    }

    /// Create an invalid message error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_message(context: &'static str) -> Self {
        Error::InvalidMessage(Cow::Borrowed(context))
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::EndpointUnavailable(endpoint) => Error::EndpointUnavailable {
                endpoint,
                attempts: 1,
            },
            TransportError::RegistrationFailed(msg) => Error::Registration(Cow::Owned(msg)),
            TransportError::Closed => Error::Channel(Cow::Borrowed("channel is closed")),
            other => Error::Transport(Cow::Owned(other.to_string())),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(Cow::Owned(err.to_string()))
    }
}

/// Result type for VoidSync operations
pub type Result<T> = std::result::Result<T, Error>;
