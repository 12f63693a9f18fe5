//! Events broadcast to node observers.

use crate::connection::PeerInfo;
use crate::ids::PeerId;
use crate::transfer::TransferUpdate;

/// Something observers may want to render or react to
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// Endpoint registered
    Ready {
        /// Registered endpoint id
        endpoint_id: String,
    },
    /// Registration failed; `message` is the user-visible error
    RegistrationFailed {
        /// User-visible error
        message: String,
    },
    /// Handshake with a peer completed
    PeerConnected(PeerInfo),
    /// A peer re-announced its identity
    PeerUpdated(PeerInfo),
    /// Last session to a peer closed
    PeerDisconnected {
        /// Peer that went away
        peer_id: PeerId,
    },
    /// Session-level error; the peer stays connected
    SessionError {
        /// Affected peer
        peer_id: PeerId,
        /// Description
        message: String,
    },
    /// Transfer lifecycle change
    Transfer(TransferUpdate),
    /// All sessions closed and the endpoint released
    TornDown,
}

impl NodeEvent {
    /// Transfer this event refers to, if any
    #[must_use]
    pub fn file_id(&self) -> Option<&str> {
        match self {
            Self::Transfer(update) => Some(update.file_id()),
            _ => None,
        }
    }
}
