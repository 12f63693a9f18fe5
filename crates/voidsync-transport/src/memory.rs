//! In-process transport.
//!
//! `MemoryNetwork` keeps a registry of claimed endpoint identifiers and wires
//! dialed channels together with unbounded queues, so payloads arrive exactly
//! once and in send order. Clones share the same network.

use crate::transport::{
    Channel, ChannelEvent, ChannelHandle, Registration, Transport, TransportError,
    TransportResult,
};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A failure injected into the next call to [`Transport::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationFault {
    /// Report the requested identifier as already claimed
    Unavailable,
    /// Fail registration with the given message
    Failure(String),
}

/// In-process network shared by every endpoint registered on it.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    endpoints: DashMap<String, mpsc::UnboundedSender<Channel>>,
    faults: Mutex<VecDeque<RegistrationFault>>,
}

impl MemoryNetwork {
    /// Create an empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for an upcoming registration. Faults are consumed in order.
    pub fn inject_registration_fault(&self, fault: RegistrationFault) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.push_back(fault);
        }
    }

    /// Check whether `endpoint` is currently claimed
    #[must_use]
    pub fn is_registered(&self, endpoint: &str) -> bool {
        self.inner.endpoints.contains_key(endpoint)
    }

    /// Number of claimed endpoints
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.inner.endpoints.len()
    }

    fn next_fault(&self) -> Option<RegistrationFault> {
        self.inner
            .faults
            .lock()
            .ok()
            .and_then(|mut faults| faults.pop_front())
    }
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("endpoints", &self.inner.endpoints.len())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn register(&self, endpoint: &str) -> TransportResult<Registration> {
        match self.next_fault() {
            Some(RegistrationFault::Unavailable) => {
                return Err(TransportError::EndpointUnavailable(endpoint.to_string()));
            }
            Some(RegistrationFault::Failure(message)) => {
                return Err(TransportError::RegistrationFailed(message));
            }
            None => {}
        }

        let (tx, rx) = mpsc::unbounded_channel();
        match self.inner.endpoints.entry(endpoint.to_string()) {
            Entry::Occupied(_) => {
                Err(TransportError::EndpointUnavailable(endpoint.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
                tracing::debug!("Registered endpoint {}", endpoint);
                Ok(Registration {
                    endpoint: endpoint.to_string(),
                    incoming: rx,
                })
            }
        }
    }

    async fn dial(&self, local: &str, remote: &str) -> TransportResult<Channel> {
        let acceptor = self
            .inner
            .endpoints
            .get(remote)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::PeerUnavailable(remote.to_string()))?;

        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let local_handle = MemoryChannelHandle {
            own: local_tx.clone(),
            peer: remote_tx.clone(),
            open: Arc::clone(&open),
        };
        let remote_handle = MemoryChannelHandle {
            own: remote_tx.clone(),
            peer: local_tx.clone(),
            open,
        };

        // Both sides observe Open before any payload.
        let _ = local_tx.send(ChannelEvent::Open);
        let _ = remote_tx.send(ChannelEvent::Open);

        let inbound = Channel {
            remote: local.to_string(),
            handle: Arc::new(remote_handle),
            events: remote_rx,
        };
        acceptor
            .send(inbound)
            .map_err(|_| TransportError::PeerUnavailable(remote.to_string()))?;

        tracing::debug!("Opened channel {} -> {}", local, remote);

        Ok(Channel {
            remote: remote.to_string(),
            handle: Arc::new(local_handle),
            events: local_rx,
        })
    }

    async fn unregister(&self, endpoint: &str) -> TransportResult<()> {
        if self.inner.endpoints.remove(endpoint).is_some() {
            tracing::debug!("Unregistered endpoint {}", endpoint);
        }
        Ok(())
    }
}

/// One side of an in-process channel
#[derive(Debug)]
struct MemoryChannelHandle {
    own: mpsc::UnboundedSender<ChannelEvent>,
    peer: mpsc::UnboundedSender<ChannelEvent>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl ChannelHandle for MemoryChannelHandle {
    async fn send(&self, payload: Vec<u8>) -> TransportResult<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.peer
            .send(ChannelEvent::Data(payload))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.own.send(ChannelEvent::Close);
            let _ = self.peer.send(ChannelEvent::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
