//! The node loop: sole owner of the connection manager and transfer engine.

use super::event::NodeEvent;
use super::handle::{Command, NodeHandle, OutgoingFile};
use crate::config::NodeConfig;
use crate::connection::{ConnectionManager, SessionNotice};
use crate::error::{Error, Result};
use crate::identity::DeviceIdentity;
use crate::ids::FileId;
use crate::protocol::{FileChunk, FileMeta, PeerMessage};
use crate::session::SessionKey;
use crate::transfer::{Chunker, TransferEngine};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use voidsync_transport::{Channel, ChannelEvent, ChannelHandle, Registration, Transport};

/// Entry point for starting a node
pub struct Node;

impl Node {
    /// Validate `config` and start the node loop on the current runtime.
    ///
    /// # Arguments
    /// * `transport` - Transport used for registration and dialing
    /// * `identity` - Local device identity
    /// * `room` - Room token embedded in the endpoint id
    /// * `config` - Node configuration
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` if `config` fails validation.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        identity: DeviceIdentity,
        room: &str,
        config: NodeConfig,
    ) -> Result<NodeHandle> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(config.connection.command_capacity);
        let (event_tx, _) = broadcast::channel(config.connection.event_capacity);
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();

        let connections = ConnectionManager::new(
            transport,
            identity,
            room,
            config.connection.clone(),
            config.session.clone(),
        );
        let node_loop = NodeLoop {
            engine: TransferEngine::new(config.transfer.clone()),
            pacing: Pacing {
                interval: config.transfer.pacing_interval,
                delay: config.transfer.pacing_delay,
            },
            sweep_interval: config.transfer.sweep_interval,
            connections,
            events: event_tx.clone(),
            loop_tx,
            acceptor: None,
            senders: HashMap::new(),
        };

        tracing::info!("Node starting in room {}", room);
        tokio::spawn(node_loop.run(command_rx, loop_rx));
        Ok(NodeHandle::new(command_tx, event_tx))
    }
}

/// Work reported to the loop by its helper tasks
enum LoopEvent {
    Incoming(Channel),
    Session {
        key: SessionKey,
        event: ChannelEvent,
    },
    ChunkSent {
        file_id: FileId,
        index: u64,
    },
    SendFinished {
        file_id: FileId,
        result: Result<()>,
    },
}

#[derive(Debug, Clone, Copy)]
struct Pacing {
    interval: u64,
    delay: Duration,
}

struct NodeLoop {
    connections: ConnectionManager,
    engine: TransferEngine,
    pacing: Pacing,
    sweep_interval: Duration,
    events: broadcast::Sender<NodeEvent>,
    loop_tx: mpsc::UnboundedSender<LoopEvent>,
    acceptor: Option<JoinHandle<()>>,
    senders: HashMap<FileId, JoinHandle<()>>,
}

impl NodeLoop {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut loop_rx: mpsc::UnboundedReceiver<LoopEvent>,
    ) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.teardown().await;
                        break;
                    };
                    if !self.on_command(command).await {
                        break;
                    }
                }
                Some(event) = loop_rx.recv() => {
                    self.on_loop_event(event).await;
                }
                _ = sweep.tick() => {
                    for update in self.engine.sweep(Instant::now()) {
                        self.emit(NodeEvent::Transfer(update));
                    }
                }
            }
        }

        tracing::info!("Node stopped");
    }

    fn emit(&self, event: NodeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Commands
    // ═══════════════════════════════════════════════════════════════════════

    /// Returns `false` when the loop should stop
    async fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Initialize { reply } => {
                let _ = reply.send(self.initialize().await);
            }
            Command::Dial { target, reply } => {
                let _ = reply.send(self.dial(&target).await);
            }
            Command::SendFile {
                peer_id,
                file,
                reply,
            } => {
                let _ = reply.send(self.send_file(&peer_id, file));
            }
            Command::Dismiss { file_id, reply } => {
                let result = self.engine.dismiss(&file_id).map(|update| {
                    self.emit(NodeEvent::Transfer(update));
                });
                let _ = reply.send(result);
            }
            Command::Teardown { reply } => {
                self.teardown().await;
                let _ = reply.send(());
            }
            Command::Peers { reply } => {
                let _ = reply.send(self.connections.peers());
            }
            Command::Transfers { reply } => {
                let _ = reply.send(self.engine.records());
            }
            Command::Transfer { file_id, reply } => {
                let _ = reply.send(self.engine.record(&file_id).cloned());
            }
            Command::Logs { reply } => {
                let _ = reply.send(self.connections.logs());
            }
            Command::Status { reply } => {
                let _ = reply.send(super::handle::NodeStatus {
                    endpoint_id: self.connections.endpoint_id(),
                    ready: self.connections.is_ready(),
                    last_error: self.connections.last_error().map(str::to_string),
                    peer_count: self.connections.peers().len(),
                    active_transfers: self.engine.active_count(),
                });
            }
            Command::Shutdown { reply } => {
                self.teardown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn initialize(&mut self) -> Result<String> {
        match self.connections.initialize().await {
            Ok(registration) => {
                let endpoint_id = registration.endpoint.clone();
                self.acceptor = Some(self.spawn_acceptor(registration));
                self.emit(NodeEvent::Ready {
                    endpoint_id: endpoint_id.clone(),
                });
                Ok(endpoint_id)
            }
            Err(e @ Error::InvalidState(_)) => Err(e),
            Err(e) => {
                let message = self
                    .connections
                    .last_error()
                    .map_or_else(|| e.to_string(), str::to_string);
                self.emit(NodeEvent::RegistrationFailed { message });
                Err(e)
            }
        }
    }

    async fn dial(&mut self, target: &str) -> Result<bool> {
        match self.connections.dial(target).await? {
            Some((key, events)) => {
                self.spawn_pump(key, events);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn send_file(&mut self, peer_id: &str, file: OutgoingFile) -> Result<FileId> {
        let handle = self.connections.channel_for(peer_id)?;
        let (meta, started) = self.engine.begin_send(
            peer_id,
            self.connections.identity(),
            &file.name,
            &file.mime_type,
            file.data.len() as u64,
            Instant::now(),
        );
        let file_id = meta.file_id.clone();
        self.emit(NodeEvent::Transfer(started));

        let task = tokio::spawn(stream_file(
            handle,
            meta,
            file.data,
            self.engine.chunker(),
            self.pacing,
            self.loop_tx.clone(),
        ));
        self.senders.insert(file_id.clone(), task);
        Ok(file_id)
    }

    async fn teardown(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
        for (_, sender) in self.senders.drain() {
            sender.abort();
        }

        let now = Instant::now();
        for peer_id in self.connections.teardown().await {
            for update in self.engine.drop_peer(&peer_id, now) {
                self.emit(NodeEvent::Transfer(update));
            }
            self.emit(NodeEvent::PeerDisconnected { peer_id });
        }
        self.emit(NodeEvent::TornDown);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Helper tasks
    // ═══════════════════════════════════════════════════════════════════════

    fn spawn_acceptor(&self, mut registration: Registration) -> JoinHandle<()> {
        let loop_tx = self.loop_tx.clone();
        tokio::spawn(async move {
            while let Some(channel) = registration.incoming.recv().await {
                if loop_tx.send(LoopEvent::Incoming(channel)).is_err() {
                    break;
                }
            }
            tracing::debug!("Acceptor for {} finished", registration.endpoint);
        })
    }

    /// Forward one session's channel events into the loop until it closes
    fn spawn_pump(&self, key: SessionKey, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        let loop_tx = self.loop_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let closing = event == ChannelEvent::Close;
                if loop_tx.send(LoopEvent::Session { key, event }).is_err() || closing {
                    break;
                }
            }
        });
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Loop events
    // ═══════════════════════════════════════════════════════════════════════

    async fn on_loop_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Incoming(channel) => {
                let (key, events) = self.connections.accept(channel);
                self.spawn_pump(key, events);
            }
            LoopEvent::Session { key, event } => {
                for notice in self.connections.handle_event(key, event).await {
                    self.apply_notice(notice);
                }
            }
            LoopEvent::ChunkSent { file_id, index } => {
                if let Some(update) = self.engine.chunk_sent(&file_id, index) {
                    self.emit(NodeEvent::Transfer(update));
                }
            }
            LoopEvent::SendFinished { file_id, result } => {
                self.senders.remove(&file_id);
                let now = Instant::now();
                let update = match result {
                    Ok(()) => self.engine.finish_send(&file_id, now),
                    Err(e) => self.engine.fail(&file_id, &e.to_string(), now),
                };
                if let Some(update) = update {
                    self.emit(NodeEvent::Transfer(update));
                }
            }
        }
    }

    fn apply_notice(&mut self, notice: SessionNotice) {
        match notice {
            SessionNotice::Established(peer) => self.emit(NodeEvent::PeerConnected(peer)),
            SessionNotice::Updated(peer) => self.emit(NodeEvent::PeerUpdated(peer)),
            SessionNotice::Deliver {
                peer_id,
                key,
                message,
            } => {
                match self.engine.handle_message(&peer_id, key, message, Instant::now()) {
                    Ok(updates) => {
                        for update in updates {
                            self.emit(NodeEvent::Transfer(update));
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Rejected message from {}: {}", peer_id, e);
                        self.emit(NodeEvent::SessionError {
                            peer_id,
                            message: e.to_string(),
                        });
                    }
                }
            }
            SessionNotice::SessionClosed { key, peer_id } => {
                tracing::debug!("Session {} to {} closed", key, peer_id);
                for update in self.engine.drop_session(key, Instant::now()) {
                    self.emit(NodeEvent::Transfer(update));
                }
            }
            SessionNotice::Disconnected { peer_id } => {
                for update in self.engine.drop_peer(&peer_id, Instant::now()) {
                    self.emit(NodeEvent::Transfer(update));
                }
                self.emit(NodeEvent::PeerDisconnected { peer_id });
            }
            SessionNotice::Error { peer_id, message } => {
                self.emit(NodeEvent::SessionError { peer_id, message });
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Outgoing stream
// ═══════════════════════════════════════════════════════════════════════════

async fn stream_file(
    handle: Arc<dyn ChannelHandle>,
    meta: FileMeta,
    data: Vec<u8>,
    chunker: Chunker,
    pacing: Pacing,
    loop_tx: mpsc::UnboundedSender<LoopEvent>,
) {
    let file_id = meta.file_id.clone();
    let result = transmit(handle.as_ref(), meta, &data, chunker, pacing, &loop_tx).await;
    if let Err(e) = &result {
        tracing::warn!("Sending {} stopped: {}", file_id, e);
    }
    let _ = loop_tx.send(LoopEvent::SendFinished { file_id, result });
}

/// Send `file-meta`, every chunk in order, then `file-complete`
async fn transmit(
    handle: &dyn ChannelHandle,
    meta: FileMeta,
    data: &[u8],
    chunker: Chunker,
    pacing: Pacing,
    loop_tx: &mpsc::UnboundedSender<LoopEvent>,
) -> Result<()> {
    handle
        .send(PeerMessage::FileMeta(meta.clone()).encode()?)
        .await?;

    for (index, bytes) in chunker.chunks(data) {
        let chunk = PeerMessage::FileChunk(FileChunk {
            file_id: meta.file_id.clone(),
            file_name: meta.file_name.clone(),
            file_type: meta.file_type.clone(),
            file_size: meta.file_size,
            chunk_index: index,
            total_chunks: meta.total_chunks,
            data: bytes.to_vec(),
        });
        handle.send(chunk.encode()?).await?;
        let _ = loop_tx.send(LoopEvent::ChunkSent {
            file_id: meta.file_id.clone(),
            index,
        });

        if pacing.interval > 0 && index % pacing.interval == 0 {
            tokio::time::sleep(pacing.delay).await;
        }
    }

    let complete = PeerMessage::FileComplete {
        file_id: meta.file_id,
    };
    handle.send(complete.encode()?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::transfer::{Direction, TransferStatus, TransferUpdate};
    use voidsync_transport::MemoryNetwork;

    const ROOM: &str = "ROOM42";

    fn spawn_node(network: &MemoryNetwork, name: &str, config: NodeConfig) -> NodeHandle {
        let identity = DeviceIdentity::new(format!("{name:0<8}"), name, "🦊");
        Node::spawn(Arc::new(network.clone()), identity, ROOM, config).unwrap()
    }

    async fn connected_pair(config: NodeConfig) -> (NodeHandle, NodeHandle, String, String) {
        let network = MemoryNetwork::new();
        let alice = spawn_node(&network, "alice", config.clone());
        let bob = spawn_node(&network, "bob", config);
        let alice_id = alice.initialize().await.unwrap();
        let bob_id = bob.initialize().await.unwrap();

        assert!(alice.dial(&bob_id).await.unwrap());
        alice.wait_for_peer(&bob_id).await.unwrap();
        bob.wait_for_peer(&alice_id).await.unwrap();
        (alice, bob, alice_id, bob_id)
    }

    #[tokio::test]
    async fn test_send_file_between_nodes() {
        let (alice, bob, alice_id, bob_id) = connected_pair(NodeConfig::default()).await;
        let data: Vec<u8> = (0..150 * 1024).map(|i| (i % 251) as u8).collect();
        let mut bob_events = bob.subscribe();

        let file_id = alice
            .send_file(&bob_id, OutgoingFile::new("report.pdf", "application/pdf", data.clone()))
            .await
            .unwrap();

        let sent = alice.wait_for_transfer(&file_id).await.unwrap();
        assert_eq!(sent.status(), TransferStatus::Complete);
        assert_eq!(sent.total_chunks, 3);

        let received = bob.wait_for_transfer(&file_id).await.unwrap();
        assert_eq!(received.direction, Direction::Receiving);
        assert_eq!(received.peer_id, alice_id);
        let file = received.result().unwrap();
        assert_eq!(file.bytes(), &data[..]);
        assert_eq!(file.sender_name, "alice");

        let mut saw_received = false;
        while let Ok(event) = bob_events.try_recv() {
            if let NodeEvent::Transfer(TransferUpdate::Received(file)) = event {
                assert_eq!(file.file_name, "report.pdf");
                saw_received = true;
            }
        }
        assert!(saw_received);

        alice.shutdown().await.unwrap();
        bob.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_existing_peer_is_noop() {
        let (alice, _bob, _, bob_id) = connected_pair(NodeConfig::default()).await;

        assert!(!alice.dial(&bob_id).await.unwrap());
        assert_eq!(alice.peers().await.unwrap().len(), 1);
        assert!(alice.logs().await.unwrap()[0].contains("ALREADY CONNECTED TO"));
    }

    #[tokio::test]
    async fn test_dial_before_initialize() {
        let network = MemoryNetwork::new();
        let node = spawn_node(&network, "alice", NodeConfig::default());

        let err = node.dial("voidsync-ROOM42-bob00000-abcd").await.unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
        assert!(!node.is_ready().await.unwrap());
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer() {
        let network = MemoryNetwork::new();
        let node = spawn_node(&network, "alice", NodeConfig::default());
        node.initialize().await.unwrap();

        let err = node
            .send_file("nobody", OutgoingFile::new("a", "b", vec![1]))
            .await
            .unwrap_err();
        assert_eq!(err, Error::SessionNotFound("nobody".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_expire_and_dismiss() {
        let mut config = NodeConfig::default();
        config.transfer = TransferConfig {
            sender_retention: Duration::from_millis(50),
            receiver_retention: Duration::from_secs(60),
            sweep_interval: Duration::from_millis(10),
            ..TransferConfig::default()
        };
        let (alice, bob, _, bob_id) = connected_pair(config).await;

        let file_id = alice
            .send_file(&bob_id, OutgoingFile::new("a.txt", "text/plain", b"hi".to_vec()))
            .await
            .unwrap();
        alice.wait_for_transfer(&file_id).await.unwrap();
        bob.wait_for_transfer(&file_id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(alice.transfer(&file_id).await.unwrap().is_none());

        assert!(bob.transfer(&file_id).await.unwrap().is_some());
        bob.dismiss_transfer(&file_id).await.unwrap();
        assert!(bob.transfers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_disconnects_peer() {
        let (alice, bob, alice_id, bob_id) = connected_pair(NodeConfig::default()).await;
        let mut bob_events = bob.subscribe();

        alice.teardown().await.unwrap();

        loop {
            match bob_events.recv().await.unwrap() {
                NodeEvent::PeerDisconnected { peer_id } => {
                    assert_eq!(peer_id, alice_id);
                    break;
                }
                _ => continue,
            }
        }
        let status = alice.status().await.unwrap();
        assert!(!status.ready);
        assert_eq!(status.peer_count, 0);
        assert!(bob.peers().await.unwrap().is_empty());
        assert!(bob.is_ready().await.unwrap());
        assert!(matches!(alice.dial(&bob_id).await, Err(Error::NotReady(_))));
    }

    #[tokio::test]
    async fn test_handle_reports_shutdown() {
        let network = MemoryNetwork::new();
        let node = spawn_node(&network, "alice", NodeConfig::default());
        node.shutdown().await.unwrap();

        assert_eq!(node.peers().await.unwrap_err(), Error::Shutdown);
    }

    #[test]
    fn test_spawn_rejects_invalid_config() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();

        let mut config = NodeConfig::default();
        config.transfer.chunk_size = 0;
        let result = Node::spawn(
            Arc::new(MemoryNetwork::new()),
            DeviceIdentity::generate(),
            ROOM,
            config,
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
