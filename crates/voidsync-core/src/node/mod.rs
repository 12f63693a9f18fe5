//! Node orchestration layer for VoidSync
//!
//! A node is one tokio task that owns the connection manager and the transfer
//! engine. Callers talk to it through a cloneable [`NodeHandle`]; observers
//! subscribe to a broadcast of [`NodeEvent`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  commands   ┌─────────────────────────────────────┐
//! │  NodeHandle  │────────────►│             node loop               │
//! └──────────────┘             │  ConnectionManager │ TransferEngine │
//!        ▲                     └─────────────────────────────────────┘
//!        │ NodeEvent                 ▲              ▲           ▲
//!        └── broadcast ──────────────┤   session    │  chunk    │ sweep
//!                                    │   pumps      │  senders  │ tick
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use voidsync_core::{DeviceIdentity, Node, NodeConfig, OutgoingFile};
//! use voidsync_transport::MemoryNetwork;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = Arc::new(MemoryNetwork::new());
//!     let node = Node::spawn(network, DeviceIdentity::generate(), "K7M2QX", NodeConfig::default())?;
//!
//!     node.initialize().await?;
//!     node.dial("voidsync-K7M2QX-x1y2z3w4-k9f2").await?;
//!     let peer = node.wait_for_peer("voidsync-K7M2QX-x1y2z3w4-k9f2").await?;
//!
//!     let file = OutgoingFile::from_path("report.pdf").await?;
//!     let file_id = node.send_file(&peer.peer_id, file).await?;
//!     node.wait_for_transfer(&file_id).await?;
//!
//!     node.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod actor;
mod event;
mod handle;

pub use actor::Node;
pub use event::NodeEvent;
pub use handle::{NodeHandle, NodeStatus, OutgoingFile};
