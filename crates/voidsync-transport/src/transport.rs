//! Transport trait abstraction for endpoint registration and data channels.
//!
//! This module defines the `Transport` trait the VoidSync core consumes. A
//! transport registers the local endpoint identifier, dials remote identifiers,
//! and hands out [`Channel`]s whose events are delivered reliably and in order.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The identifier is already claimed by another endpoint
    #[error("Endpoint identifier unavailable: {0}")]
    EndpointUnavailable(String),

    /// Registration failed for a reason other than an identifier collision
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    /// No endpoint is registered under the dialed identifier
    #[error("Peer unavailable: {0}")]
    PeerUnavailable(String),

    /// Channel is closed
    #[error("Channel is closed")]
    Closed,

    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport-specific error
    #[error("Transport error: {0}")]
    Other(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Events observed on a single data channel, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel is ready for traffic
    Open,
    /// An opaque payload arrived
    Data(Vec<u8>),
    /// The channel closed (either side)
    Close,
    /// The channel reported an error; it is not closed by this event
    Error {
        /// Transport-specific error category
        kind: String,
        /// Human-readable description
        message: String,
    },
}

/// Sending half of a data channel.
///
/// Handles are shared between the session that owns the channel and any task
/// streaming a file over it.
#[async_trait]
pub trait ChannelHandle: Send + Sync + fmt::Debug {
    /// Queue a payload for reliable, ordered delivery to the remote side.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` once the channel has been closed.
    async fn send(&self, payload: Vec<u8>) -> TransportResult<()>;

    /// Close the channel. Both sides observe [`ChannelEvent::Close`].
    fn close(&self);

    /// Check whether the channel is still open.
    fn is_open(&self) -> bool;
}

/// A data channel to one remote endpoint.
pub struct Channel {
    /// Identifier of the remote endpoint
    pub remote: String,
    /// Sending half
    pub handle: Arc<dyn ChannelHandle>,
    /// Event stream for this channel
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("remote", &self.remote)
            .field("open", &self.handle.is_open())
            .finish()
    }
}

/// A successful endpoint registration.
#[derive(Debug)]
pub struct Registration {
    /// The identifier that was claimed
    pub endpoint: String,
    /// Channels opened by remote peers towards this endpoint
    pub incoming: mpsc::UnboundedReceiver<Channel>,
}

/// Async transport trait for peer-to-peer data channels.
///
/// # Examples
///
/// ```
/// use voidsync_transport::{ChannelEvent, MemoryNetwork, Transport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let network = MemoryNetwork::new();
/// let mut bob = network.register("bob").await?;
/// let _alice = network.register("alice").await?;
///
/// let mut channel = network.dial("alice", "bob").await?;
/// assert_eq!(channel.events.recv().await, Some(ChannelEvent::Open));
/// channel.handle.send(b"hello".to_vec()).await?;
///
/// let mut inbound = bob.incoming.recv().await.unwrap();
/// assert_eq!(inbound.events.recv().await, Some(ChannelEvent::Open));
/// assert_eq!(inbound.events.recv().await, Some(ChannelEvent::Data(b"hello".to_vec())));
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Claim `endpoint` as the local identifier.
    ///
    /// # Errors
    /// Returns `TransportError::EndpointUnavailable` if the identifier is
    /// already claimed, or another error if registration failed outright.
    async fn register(&self, endpoint: &str) -> TransportResult<Registration>;

    /// Open a channel from `local` to `remote`.
    ///
    /// # Errors
    /// Returns `TransportError::PeerUnavailable` if nothing is registered
    /// under `remote`.
    async fn dial(&self, local: &str, remote: &str) -> TransportResult<Channel>;

    /// Release a previously registered identifier.
    ///
    /// # Errors
    /// Returns `TransportError` if the release fails.
    async fn unregister(&self, endpoint: &str) -> TransportResult<()>;
}
