//! # VoidSync Transport
//!
//! Transport seam for the VoidSync peer-to-peer file exchange.
//!
//! The real transport (signaling, NAT traversal, reliable ordered delivery) lives
//! outside this workspace. This crate defines the contract the core consumes:
//! - Endpoint registration under a caller-chosen identifier
//! - Dialing a remote identifier to obtain a data channel
//! - Per-channel events: open, data, close, error
//!
//! It also ships [`memory::MemoryNetwork`], an in-process implementation with the
//! same delivery guarantees, used by tests and the CLI demo.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod transport;

pub use memory::{MemoryNetwork, RegistrationFault};
pub use transport::{
    Channel, ChannelEvent, ChannelHandle, Registration, Transport, TransportError,
    TransportResult,
};
