//! Per-peer session: identity handshake and inbound dispatch.
//!
//! ```text
//! Pending ──identity──► Established ──close──► Closed
//!    │                                            ▲
//!    └───────────────close / overflow─────────────┘
//! ```
//!
//! Non-identity messages that arrive while `Pending` are buffered and handed
//! back, in arrival order, when the handshake completes.

use crate::error::{Error, Result};
use crate::identity::DeviceIdentity;
use crate::ids::PeerId;
use crate::protocol::PeerMessage;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::Instant;
use voidsync_transport::ChannelHandle;

/// Locally unique session key
pub type SessionKey = u64;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Channel exists, remote identity not yet seen
    Pending,
    /// Remote identity observed
    Established,
    /// Channel closed or torn down
    Closed,
}

/// Which side opened the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// We dialed
    Outbound,
    /// The remote dialed us
    Inbound,
}

/// Outcome of feeding one inbound message to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Handshake completed; carries messages buffered before it, in order
    Established(Vec<PeerMessage>),
    /// Repeated identity changed the display name or emoji
    IdentityUpdated,
    /// Held until the handshake completes
    Buffered,
    /// Message for the transfer engine
    Deliver(PeerMessage),
}

/// One logical channel to one remote endpoint
#[derive(Debug)]
pub struct PeerSession {
    key: SessionKey,
    peer_id: PeerId,
    role: SessionRole,
    state: SessionState,
    display_name: Option<String>,
    display_emoji: Option<String>,
    handle: Arc<dyn ChannelHandle>,
    pending: VecDeque<PeerMessage>,
    max_pending: usize,
    created_at: Instant,
    established_at: Option<Instant>,
}

impl PeerSession {
    /// Create a pending session over `handle`
    #[must_use]
    pub fn new(
        key: SessionKey,
        peer_id: PeerId,
        role: SessionRole,
        handle: Arc<dyn ChannelHandle>,
        max_pending: usize,
    ) -> Self {
        Self {
            key,
            peer_id,
            role,
            state: SessionState::Pending,
            display_name: None,
            display_emoji: None,
            handle,
            pending: VecDeque::new(),
            max_pending,
            created_at: Instant::now(),
            established_at: None,
        }
    }

    /// Session key
    #[must_use]
    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// Remote endpoint id
    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Which side dialed
    #[must_use]
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if the handshake has completed and the session is not closed
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// Remote display name, once known
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Remote display emoji, once known
    #[must_use]
    pub fn display_emoji(&self) -> Option<&str> {
        self.display_emoji.as_deref()
    }

    /// Channel sending half
    #[must_use]
    pub fn handle(&self) -> Arc<dyn ChannelHandle> {
        Arc::clone(&self.handle)
    }

    /// Messages waiting for the handshake
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Time since the session was created
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Time the handshake completed
    #[must_use]
    pub fn established_at(&self) -> Option<Instant> {
        self.established_at
    }

    /// Check if a state transition is valid
    #[must_use]
    pub fn can_transition(&self, to: SessionState) -> bool {
        matches!(
            (self.state, to),
            (SessionState::Pending, SessionState::Established | SessionState::Closed)
                | (SessionState::Established, SessionState::Closed)
        )
    }

    /// Transition to a new state
    ///
    /// # Errors
    /// Returns `Error::InvalidState` if the transition is not allowed from the
    /// current state.
    pub fn transition_to(&mut self, new_state: SessionState) -> Result<()> {
        if !self.can_transition(new_state) {
            return Err(Error::InvalidState(Cow::Owned(format!(
                "session {} cannot move from {:?} to {:?}",
                self.key, self.state, new_state
            ))));
        }

        let old_state = self.state;
        self.state = new_state;

        match new_state {
            SessionState::Established => self.established_at = Some(Instant::now()),
            SessionState::Closed => self.pending.clear(),
            SessionState::Pending => {}
        }

        tracing::debug!(
            "Session {} ({}) state transition: {:?} -> {:?}",
            self.key,
            self.peer_id,
            old_state,
            new_state
        );

        Ok(())
    }

    /// Announce the local identity. Called when the channel opens.
    ///
    /// # Errors
    /// Returns an error if the identity cannot be encoded or sent.
    pub async fn send_identity(&self, identity: &DeviceIdentity) -> Result<()> {
        self.send(&PeerMessage::Identity {
            name: identity.name.clone(),
            emoji: identity.emoji.clone(),
        })
        .await
    }

    /// Encode and send one message
    ///
    /// # Errors
    /// Returns `Error::Channel` if the channel is closed.
    pub async fn send(&self, message: &PeerMessage) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::Channel(Cow::Borrowed("session is closed")));
        }
        let payload = message.encode()?;
        self.handle.send(payload).await?;
        Ok(())
    }

    /// Feed one decoded inbound message through the handshake state machine
    ///
    /// # Errors
    /// Returns `Error::InvalidState` on a closed session, or `Error::Session`
    /// when the pre-handshake buffer overflows.
    pub fn on_message(&mut self, message: PeerMessage) -> Result<Inbound> {
        match (self.state, message) {
            (SessionState::Closed, _) => Err(Error::invalid_state("message on closed session")),
            (SessionState::Pending, PeerMessage::Identity { name, emoji }) => {
                self.display_name = Some(name);
                self.display_emoji = Some(emoji);
                self.transition_to(SessionState::Established)?;
                Ok(Inbound::Established(self.pending.drain(..).collect()))
            }
            (SessionState::Established, PeerMessage::Identity { name, emoji }) => {
                self.display_name = Some(name);
                self.display_emoji = Some(emoji);
                Ok(Inbound::IdentityUpdated)
            }
            (SessionState::Pending, message) => {
                if self.pending.len() >= self.max_pending {
                    return Err(Error::Session(Cow::Owned(format!(
                        "{} messages buffered before identity from {}",
                        self.pending.len(),
                        self.peer_id
                    ))));
                }
                tracing::debug!(
                    "Buffering {} from {} until identity arrives",
                    message.kind(),
                    self.peer_id
                );
                self.pending.push_back(message);
                Ok(Inbound::Buffered)
            }
            (SessionState::Established, message) => Ok(Inbound::Deliver(message)),
        }
    }

    /// Close the channel and mark the session closed
    pub fn close(&mut self) {
        self.handle.close();
        if self.state != SessionState::Closed {
            // Pending and Established both allow Closed.
            let _ = self.transition_to(SessionState::Closed);
        }
    }
}
