//! Connection manager: local endpoint, peer registry, session lifecycle.
//!
//! The manager owns every [`PeerSession`] and the registry of established
//! peers. It is driven by a single owner (the node loop), so none of its
//! tables are locked. Channel events are fed in through
//! [`ConnectionManager::handle_event`], which returns the notices the caller
//! must forward to the transfer engine and observers.

use crate::activity::ActivityLog;
use crate::config::{ConnectionConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::identity::DeviceIdentity;
use crate::ids::{EndpointId, PeerId};
use crate::protocol::PeerMessage;
use crate::session::{Inbound, PeerSession, SessionKey, SessionRole, SessionState};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use voidsync_transport::{
    Channel, ChannelEvent, ChannelHandle, Registration, Transport, TransportError,
};

/// Snapshot of an established peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Remote endpoint id
    pub peer_id: PeerId,
    /// Display name announced by the peer
    pub name: String,
    /// Display emoji announced by the peer
    pub emoji: String,
    /// Which side dialed
    pub role: SessionRole,
}

impl PeerInfo {
    fn from_session(session: &PeerSession) -> Self {
        Self {
            peer_id: session.peer_id().to_string(),
            name: session.display_name().unwrap_or_default().to_string(),
            emoji: session.display_emoji().unwrap_or_default().to_string(),
            role: session.role(),
        }
    }
}

/// Something the owner of the manager must act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// Handshake completed; the peer is now in the registry
    Established(PeerInfo),
    /// Peer re-announced its identity
    Updated(PeerInfo),
    /// Post-handshake message for the transfer engine
    Deliver {
        /// Sending peer
        peer_id: PeerId,
        /// Session the message arrived on
        key: SessionKey,
        /// Decoded message
        message: PeerMessage,
    },
    /// A session closed or was superseded; state it carried must be released
    SessionClosed {
        /// Closed session
        key: SessionKey,
        /// Remote peer of that session
        peer_id: PeerId,
    },
    /// Last session to the peer closed
    Disconnected {
        /// Peer that went away
        peer_id: PeerId,
    },
    /// Session-level error; the session stays in the registry
    Error {
        /// Affected peer
        peer_id: PeerId,
        /// Description
        message: String,
    },
}

/// Owns the local endpoint registration and all peer sessions
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    identity: DeviceIdentity,
    endpoint: EndpointId,
    config: ConnectionConfig,
    session_config: SessionConfig,
    ready: bool,
    last_error: Option<String>,
    sessions: HashMap<SessionKey, PeerSession>,
    registry: HashMap<PeerId, SessionKey>,
    next_key: SessionKey,
    log: ActivityLog,
}

impl ConnectionManager {
    /// Create a manager for `identity` in `room`
    ///
    /// # Arguments
    /// * `transport` - Transport used for registration and dialing
    /// * `identity` - Local device identity announced to every peer
    /// * `room` - Room token embedded in the endpoint id
    /// * `config` - Registration and activity log settings
    /// * `session_config` - Per-session settings
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        identity: DeviceIdentity,
        room: &str,
        config: ConnectionConfig,
        session_config: SessionConfig,
    ) -> Self {
        let endpoint = EndpointId::new(room, &identity.id);
        let log = ActivityLog::new(config.activity_log_capacity);
        Self {
            transport,
            identity,
            endpoint,
            config,
            session_config,
            ready: false,
            last_error: None,
            sessions: HashMap::new(),
            registry: HashMap::new(),
            next_key: 1,
            log,
        }
    }

    /// Register the local endpoint id with the transport.
    ///
    /// Identifier collisions regenerate the suffix and retry, up to
    /// `max_register_attempts` attempts. Any other failure is recorded as
    /// `last_error` and returned without retrying.
    ///
    /// # Returns
    /// The registration, whose `incoming` queue yields inbound channels.
    ///
    /// # Errors
    /// - `Error::EndpointUnavailable` when every attempt collided
    /// - `Error::Registration` for other transport failures
    /// - `Error::InvalidState` if already registered
    pub async fn initialize(&mut self) -> Result<Registration> {
        if self.ready {
            return Err(Error::invalid_state("endpoint already registered"));
        }

        let max_attempts = self.config.max_register_attempts;
        for attempt in 1..=max_attempts {
            let endpoint = self.endpoint.to_string();
            self.log.info(format!("INITIALIZING PEER: {endpoint}"));

            match self.transport.register(&endpoint).await {
                Ok(registration) => {
                    self.ready = true;
                    self.last_error = None;
                    self.log.info(format!("PEER READY: {endpoint}"));
                    return Ok(registration);
                }
                Err(TransportError::EndpointUnavailable(_)) => {
                    self.log.warn(format!(
                        "ID CONFLICT: {endpoint} ALREADY CLAIMED ({attempt}/{max_attempts})"
                    ));
                    if attempt < max_attempts {
                        self.endpoint.regenerate_suffix();
                    }
                }
                Err(e) => {
                    let message = format!("Connection error: {e}");
                    self.log.error(format!("PEER ERROR: {e}"));
                    self.last_error = Some(message.clone());
                    return Err(Error::Registration(Cow::Owned(message)));
                }
            }
        }

        let err = Error::EndpointUnavailable {
            endpoint: self.endpoint.to_string(),
            attempts: max_attempts,
        };
        self.log.error(format!("PEER ERROR: {err}"));
        self.last_error = Some(err.to_string());
        Err(err)
    }

    /// Open an outbound session to `target`.
    ///
    /// # Returns
    /// `None` if a live session to `target` already exists, otherwise the new
    /// session key and its event stream.
    ///
    /// # Errors
    /// - `Error::NotReady` before [`initialize`](Self::initialize) succeeds
    /// - `Error::InvalidState` when dialing our own endpoint
    /// - Transport errors from the dial itself
    pub async fn dial(
        &mut self,
        target: &str,
    ) -> Result<Option<(SessionKey, mpsc::UnboundedReceiver<ChannelEvent>)>> {
        if !self.ready {
            self.log.warn("CANNOT CONNECT: PEER NOT READY");
            return Err(Error::not_ready("local endpoint is not registered"));
        }

        let local = self.endpoint.to_string();
        if target == local {
            return Err(Error::invalid_state("cannot dial own endpoint"));
        }

        if self.has_live_session(target) {
            self.log.info(format!("ALREADY CONNECTED TO {target}"));
            return Ok(None);
        }

        self.log.info(format!("ATTEMPTING CONNECT TO {target}"));
        match self.transport.dial(&local, target).await {
            Ok(channel) => Ok(Some(self.attach(channel, SessionRole::Outbound))),
            Err(e) => {
                self.log.error(format!("CONN ERROR: {e}"));
                Err(e.into())
            }
        }
    }

    /// Adopt an inbound channel as a pending session
    pub fn accept(&mut self, channel: Channel) -> (SessionKey, mpsc::UnboundedReceiver<ChannelEvent>) {
        self.log
            .info(format!("INCOMING CONNECTION FROM {}", channel.remote));
        self.attach(channel, SessionRole::Inbound)
    }

    fn attach(
        &mut self,
        channel: Channel,
        role: SessionRole,
    ) -> (SessionKey, mpsc::UnboundedReceiver<ChannelEvent>) {
        let key = self.next_key;
        self.next_key += 1;

        let session = PeerSession::new(
            key,
            channel.remote,
            role,
            channel.handle,
            self.session_config.max_pending_messages,
        );
        self.sessions.insert(key, session);
        (key, channel.events)
    }

    /// Process one event from the channel behind session `key`
    pub async fn handle_event(&mut self, key: SessionKey, event: ChannelEvent) -> Vec<SessionNotice> {
        match event {
            ChannelEvent::Open => self.on_open(key).await,
            ChannelEvent::Data(bytes) => self.on_data(key, &bytes),
            ChannelEvent::Close => self.on_close(key),
            ChannelEvent::Error { kind, message } => self.on_error(key, &kind, &message),
        }
    }

    async fn on_open(&mut self, key: SessionKey) -> Vec<SessionNotice> {
        let Some(session) = self.sessions.get(&key) else {
            return Vec::new();
        };

        self.log
            .info(format!("CONNECTION OPENED: {}", session.peer_id()));

        match session.send_identity(&self.identity).await {
            Ok(()) => Vec::new(),
            Err(e) => {
                self.log.error(format!("CONN ERROR: {e}"));
                vec![SessionNotice::Error {
                    peer_id: session.peer_id().to_string(),
                    message: e.to_string(),
                }]
            }
        }
    }

    fn on_data(&mut self, key: SessionKey, bytes: &[u8]) -> Vec<SessionNotice> {
        let Some(session) = self.sessions.get_mut(&key) else {
            return Vec::new();
        };

        let message = match PeerMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    "Dropping undecodable payload ({} bytes) from {}: {}",
                    bytes.len(),
                    session.peer_id(),
                    e
                );
                return Vec::new();
            }
        };

        let peer_id = session.peer_id().to_string();
        match session.on_message(message) {
            Ok(Inbound::Established(flushed)) => {
                let info = PeerInfo::from_session(session);
                let role = session.role();
                self.on_established(key, role, info, flushed)
            }
            Ok(Inbound::IdentityUpdated) => {
                vec![SessionNotice::Updated(PeerInfo::from_session(session))]
            }
            Ok(Inbound::Buffered) => Vec::new(),
            Ok(Inbound::Deliver(message)) => vec![SessionNotice::Deliver {
                peer_id,
                key,
                message,
            }],
            Err(e) => {
                if matches!(e, Error::Session(_)) {
                    // Overflow: the Close event that follows removes the session.
                    session.close();
                }
                self.log.error(format!("SESSION ERROR: {peer_id}: {e}"));
                vec![SessionNotice::Error {
                    peer_id,
                    message: e.to_string(),
                }]
            }
        }
    }

    /// Register a freshly established session.
    ///
    /// At most one established session per peer is kept. When a second one
    /// completes its handshake, the loser is closed and dropped: sessions
    /// dialed by the same side resolve newest-wins, and crossed dials keep
    /// the one dialed by the lower endpoint id so both ends pick the same.
    fn on_established(
        &mut self,
        key: SessionKey,
        role: SessionRole,
        info: PeerInfo,
        flushed: Vec<PeerMessage>,
    ) -> Vec<SessionNotice> {
        let peer_id = info.peer_id.clone();
        let mut notices = Vec::with_capacity(flushed.len() + 2);

        let previous = self
            .registry
            .get(&peer_id)
            .copied()
            .filter(|old| *old != key)
            .and_then(|old| self.sessions.get(&old).map(|s| (old, s.role())));

        match previous {
            Some((old, old_role)) if !self.supersedes(role, old_role, &peer_id) => {
                self.log
                    .info(format!("DUPLICATE CONNECTION DROPPED: {peer_id}"));
                if let Some(mut session) = self.sessions.remove(&key) {
                    session.close();
                }
                tracing::debug!(
                    "Kept session {} over {} for {}, {} buffered messages dropped",
                    old,
                    key,
                    peer_id,
                    flushed.len()
                );
                return vec![SessionNotice::SessionClosed { key, peer_id }];
            }
            Some((old, _)) => {
                self.log
                    .info(format!("CONNECTION REPLACED: {peer_id}"));
                if let Some(mut session) = self.sessions.remove(&old) {
                    session.close();
                }
                self.registry.insert(peer_id.clone(), key);
                notices.push(SessionNotice::SessionClosed {
                    key: old,
                    peer_id: peer_id.clone(),
                });
                notices.push(SessionNotice::Updated(info));
            }
            None => {
                self.registry.insert(peer_id.clone(), key);
                self.log.info(format!(
                    "PEER IDENTIFIED: {} {} ({})",
                    info.emoji, info.name, peer_id
                ));
                notices.push(SessionNotice::Established(info));
            }
        }

        notices.extend(flushed.into_iter().map(|message| SessionNotice::Deliver {
            peer_id: peer_id.clone(),
            key,
            message,
        }));
        notices
    }

    fn supersedes(&self, new: SessionRole, old: SessionRole, peer_id: &str) -> bool {
        if new == old {
            return true;
        }
        let keep_outbound = self.endpoint.to_string().as_str() < peer_id;
        (new == SessionRole::Outbound) == keep_outbound
    }

    fn on_close(&mut self, key: SessionKey) -> Vec<SessionNotice> {
        let Some(mut session) = self.sessions.remove(&key) else {
            return Vec::new();
        };
        session.close();

        let peer_id = session.peer_id().to_string();
        self.log.info(format!("CONNECTION CLOSED: {peer_id}"));

        let mut notices = Vec::with_capacity(2);
        if self.registry.get(&peer_id) == Some(&key) {
            self.registry.remove(&peer_id);
            notices.push(SessionNotice::Disconnected {
                peer_id: peer_id.clone(),
            });
        }
        notices.push(SessionNotice::SessionClosed { key, peer_id });
        notices
    }

    fn on_error(&mut self, key: SessionKey, kind: &str, message: &str) -> Vec<SessionNotice> {
        let Some(session) = self.sessions.get(&key) else {
            return Vec::new();
        };
        let peer_id = session.peer_id().to_string();
        self.log.error(format!("CONN ERROR: {message}"));
        tracing::debug!("Channel error kind {} on session {}", kind, key);

        vec![SessionNotice::Error {
            peer_id,
            message: message.to_string(),
        }]
    }

    /// Close every session, clear the registry and release the endpoint.
    ///
    /// # Returns
    /// Peers that were established at teardown time.
    pub async fn teardown(&mut self) -> Vec<PeerId> {
        self.log.info("DESTROYING PEER INSTANCE");

        let peers: Vec<PeerId> = self.registry.drain().map(|(peer, _)| peer).collect();
        for (_, mut session) in self.sessions.drain() {
            session.close();
        }

        if self.ready {
            let endpoint = self.endpoint.to_string();
            if let Err(e) = self.transport.unregister(&endpoint).await {
                tracing::warn!("Failed to unregister {}: {}", endpoint, e);
            }
        }
        self.ready = false;
        peers
    }

    /// Sending half of the established session to `peer_id`
    ///
    /// # Errors
    /// Returns `Error::SessionNotFound` if the peer is not established.
    pub fn channel_for(&self, peer_id: &str) -> Result<Arc<dyn ChannelHandle>> {
        self.registry
            .get(peer_id)
            .and_then(|key| self.sessions.get(key))
            .filter(|session| session.state() == SessionState::Established)
            .map(PeerSession::handle)
            .ok_or_else(|| Error::SessionNotFound(peer_id.to_string()))
    }

    fn has_live_session(&self, peer_id: &str) -> bool {
        self.sessions
            .values()
            .any(|s| s.peer_id() == peer_id && s.state() != SessionState::Closed)
    }

    /// Established peers, sorted by id
    #[must_use]
    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .registry
            .values()
            .filter_map(|key| self.sessions.get(key))
            .map(PeerInfo::from_session)
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    /// Check if `peer_id` is established
    #[must_use]
    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.registry.contains_key(peer_id)
    }

    /// Display name and emoji of an established peer
    #[must_use]
    pub fn peer(&self, peer_id: &str) -> Option<PeerInfo> {
        self.registry
            .get(peer_id)
            .and_then(|key| self.sessions.get(key))
            .map(PeerInfo::from_session)
    }

    /// Number of live sessions, established or not
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Check if the endpoint is registered
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Current local endpoint id
    #[must_use]
    pub fn endpoint_id(&self) -> String {
        self.endpoint.to_string()
    }

    /// Last user-visible registration error
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Local identity
    #[must_use]
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Activity log lines, newest first
    #[must_use]
    pub fn logs(&self) -> Vec<String> {
        self.log.lines()
    }
}
