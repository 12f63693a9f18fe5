//! Cloneable handle to a running node.

use super::event::NodeEvent;
use crate::connection::PeerInfo;
use crate::error::{Error, Result};
use crate::ids::FileId;
use crate::transfer::{TransferRecord, TransferUpdate};
use std::path::Path;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Requests processed by the node loop, one at a time
pub(crate) enum Command {
    Initialize {
        reply: oneshot::Sender<Result<String>>,
    },
    Dial {
        target: String,
        reply: oneshot::Sender<Result<bool>>,
    },
    SendFile {
        peer_id: String,
        file: OutgoingFile,
        reply: oneshot::Sender<Result<FileId>>,
    },
    Dismiss {
        file_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Teardown {
        reply: oneshot::Sender<()>,
    },
    Peers {
        reply: oneshot::Sender<Vec<PeerInfo>>,
    },
    Transfers {
        reply: oneshot::Sender<Vec<TransferRecord>>,
    },
    Transfer {
        file_id: String,
        reply: oneshot::Sender<Option<TransferRecord>>,
    },
    Logs {
        reply: oneshot::Sender<Vec<String>>,
    },
    Status {
        reply: oneshot::Sender<NodeStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Point-in-time view of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    /// Current endpoint id (may change on collision recovery)
    pub endpoint_id: String,
    /// Endpoint registered
    pub ready: bool,
    /// Last user-visible registration error
    pub last_error: Option<String>,
    /// Established peers
    pub peer_count: usize,
    /// Transfers still moving
    pub active_transfers: usize,
}

/// File content queued for sending
#[derive(Clone)]
pub struct OutgoingFile {
    /// File name announced to the receiver
    pub name: String,
    /// MIME type announced to the receiver
    pub mime_type: String,
    /// Whole file content
    pub data: Vec<u8>,
}

impl OutgoingFile {
    /// Wrap in-memory content
    #[must_use]
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Read a file from disk; the MIME type is guessed from the extension
    ///
    /// # Errors
    /// Returns `Error::Io` if the file cannot be read.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let mime_type = guess_mime_type(&name).to_string();
        Ok(Self::new(name, mime_type, data))
    }
}

impl std::fmt::Debug for OutgoingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .finish()
    }
}

fn guess_mime_type(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "json" => "application/json",
        "txt" | "log" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Handle to a running node. Cheap to clone; all clones address the same node.
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<NodeEvent>,
}

impl NodeHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, events: broadcast::Sender<NodeEvent>) -> Self {
        Self { commands, events }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| Error::Shutdown)?;
        response.await.map_err(|_| Error::Shutdown)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Register the local endpoint; returns the endpoint id that was claimed
    ///
    /// # Errors
    /// `Error::EndpointUnavailable` after exhausting collision retries, or
    /// `Error::Registration` for other transport failures.
    pub async fn initialize(&self) -> Result<String> {
        self.request(|reply| Command::Initialize { reply }).await?
    }

    /// Close every session and release the endpoint. The node keeps running
    /// and may be initialized again.
    ///
    /// # Errors
    /// `Error::Shutdown` if the node has stopped.
    pub async fn teardown(&self) -> Result<()> {
        self.request(|reply| Command::Teardown { reply }).await
    }

    /// Tear down and stop the node task
    ///
    /// # Errors
    /// `Error::Shutdown` if the node had already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Peers
    // ═══════════════════════════════════════════════════════════════════════

    /// Connect to `target`. Returns `false` if a session already exists.
    ///
    /// The handshake completes asynchronously; see [`wait_for_peer`](Self::wait_for_peer).
    ///
    /// # Errors
    /// `Error::NotReady` before [`initialize`](Self::initialize) succeeds, or
    /// a transport error if the dial fails.
    pub async fn dial(&self, target: &str) -> Result<bool> {
        let target = target.to_string();
        self.request(|reply| Command::Dial { target, reply }).await?
    }

    /// Established peers
    ///
    /// # Errors
    /// `Error::Shutdown` if the node has stopped.
    pub async fn peers(&self) -> Result<Vec<PeerInfo>> {
        self.request(|reply| Command::Peers { reply }).await
    }

    /// Wait until `peer_id` completes its handshake
    ///
    /// # Errors
    /// `Error::Shutdown` if the node stops first.
    pub async fn wait_for_peer(&self, peer_id: &str) -> Result<PeerInfo> {
        let mut events = self.subscribe();
        loop {
            if let Some(peer) = self.peers().await?.into_iter().find(|p| p.peer_id == peer_id) {
                return Ok(peer);
            }
            loop {
                let received = tokio::select! {
                    received = events.recv() => received,
                    () = self.commands.closed() => return Err(Error::Shutdown),
                };
                match received {
                    Ok(NodeEvent::PeerConnected(peer)) if peer.peer_id == peer_id => {
                        return Ok(peer);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => break,
                    Err(RecvError::Closed) => return Err(Error::Shutdown),
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transfers
    // ═══════════════════════════════════════════════════════════════════════

    /// Start sending `file` to an established peer. Returns once the transfer
    /// is registered; chunks stream in the background.
    ///
    /// # Errors
    /// `Error::SessionNotFound` if `peer_id` is not established.
    pub async fn send_file(&self, peer_id: &str, file: OutgoingFile) -> Result<FileId> {
        let peer_id = peer_id.to_string();
        self.request(|reply| Command::SendFile {
            peer_id,
            file,
            reply,
        })
        .await?
    }

    /// Remove a finished transfer record before its retention expires
    ///
    /// # Errors
    /// `Error::TransferNotFound` for unknown ids, `Error::InvalidState` for
    /// transfers still in flight.
    pub async fn dismiss_transfer(&self, file_id: &str) -> Result<()> {
        let file_id = file_id.to_string();
        self.request(|reply| Command::Dismiss { file_id, reply }).await?
    }

    /// All tracked transfers, oldest first
    ///
    /// # Errors
    /// `Error::Shutdown` if the node has stopped.
    pub async fn transfers(&self) -> Result<Vec<TransferRecord>> {
        self.request(|reply| Command::Transfers { reply }).await
    }

    /// One transfer record
    ///
    /// # Errors
    /// `Error::Shutdown` if the node has stopped.
    pub async fn transfer(&self, file_id: &str) -> Result<Option<TransferRecord>> {
        let file_id = file_id.to_string();
        self.request(|reply| Command::Transfer { file_id, reply }).await
    }

    /// Wait until a transfer completes or fails.
    ///
    /// An incoming transfer whose `file-meta` has not been processed yet has
    /// no record; the wait then covers its arrival too. Wrap calls for ids
    /// that may never arrive in a timeout.
    ///
    /// # Errors
    /// `Error::TransferNotFound` if the record is removed before finishing,
    /// `Error::Shutdown` if the node stops.
    pub async fn wait_for_transfer(&self, file_id: &str) -> Result<TransferRecord> {
        let mut events = self.subscribe();
        loop {
            if let Some(record) = self.transfer(file_id).await? {
                if record.is_terminal() {
                    return Ok(record);
                }
            }
            loop {
                let received = tokio::select! {
                    received = events.recv() => received,
                    () = self.commands.closed() => return Err(Error::Shutdown),
                };
                match received {
                    Ok(NodeEvent::Transfer(update)) if update.file_id() == file_id => {
                        if matches!(update, TransferUpdate::Removed { .. }) {
                            return Err(Error::TransferNotFound(file_id.to_string()));
                        }
                        if update.is_final() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => break,
                    Err(RecvError::Closed) => return Err(Error::Shutdown),
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Observability
    // ═══════════════════════════════════════════════════════════════════════

    /// Subscribe to node events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Activity log lines, newest first
    ///
    /// # Errors
    /// `Error::Shutdown` if the node has stopped.
    pub async fn logs(&self) -> Result<Vec<String>> {
        self.request(|reply| Command::Logs { reply }).await
    }

    /// Current status
    ///
    /// # Errors
    /// `Error::Shutdown` if the node has stopped.
    pub async fn status(&self) -> Result<NodeStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Check if the endpoint is registered
    ///
    /// # Errors
    /// `Error::Shutdown` if the node has stopped.
    pub async fn is_ready(&self) -> Result<bool> {
        Ok(self.status().await?.ready)
    }

    /// Current endpoint id
    ///
    /// # Errors
    /// `Error::Shutdown` if the node has stopped.
    pub async fn endpoint_id(&self) -> Result<String> {
        Ok(self.status().await?.endpoint_id)
    }

    /// Last user-visible registration error
    ///
    /// # Errors
    /// `Error::Shutdown` if the node has stopped.
    pub async fn last_error(&self) -> Result<Option<String>> {
        Ok(self.status().await?.last_error)
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}
