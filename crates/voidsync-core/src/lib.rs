//! # VoidSync Core
//!
//! Room-scoped peer-to-peer file transfer over ordered data channels.
//!
//! This crate provides:
//! - Device identity and endpoint naming
//! - The JSON peer message codec
//! - Per-peer sessions with an identity handshake
//! - The connection manager (registration, dialing, collision recovery)
//! - The chunked transfer engine (send, receive, reassembly, expiry)
//! - The node loop that ties them together behind a cloneable handle
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       NodeHandle / Node                          │
//! │   (commands in, NodeEvent broadcast out)                         │
//! ├────────────────────────────────┬────────────────────────────────┤
//! │       ConnectionManager        │         TransferEngine          │
//! │  (registry, sessions, handshake)│ (records, chunk buffers)       │
//! ├────────────────────────────────┴────────────────────────────────┤
//! │                    voidsync_transport::Transport                 │
//! │   (endpoint registration, ordered data channels)                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod activity;
pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod ids;
pub mod node;
pub mod protocol;
pub mod session;
pub mod transfer;

pub use activity::{ActivityEntry, ActivityLog};
pub use config::{CompletionPolicy, ConnectionConfig, NodeConfig, SessionConfig, TransferConfig};
pub use connection::{ConnectionManager, PeerInfo, SessionNotice};
pub use error::{Error, Result};
pub use identity::{DeviceIdentity, FileIdentityProvider, IdentityProvider, MemoryIdentityProvider};
pub use ids::{EndpointId, FileId, PeerId, generate_file_id, generate_room_id};
pub use node::{Node, NodeEvent, NodeHandle, NodeStatus, OutgoingFile};
pub use protocol::{FileChunk, FileMeta, PeerMessage};
pub use session::{PeerSession, SessionKey, SessionRole, SessionState};
pub use transfer::{
    ChunkBuffer, Chunker, DEFAULT_CHUNK_SIZE, Direction, ReceivedFile, TransferEngine,
    TransferRecord, TransferStatus, TransferUpdate,
};
