//! Transfer engine: the single owner of every transfer record and chunk buffer.
//!
//! The engine does no I/O. The node loop feeds it decoded peer messages and
//! sender progress, and forwards the [`TransferUpdate`]s it returns to
//! observers. All time-dependent behaviour takes `now` explicitly.

use super::buffer::{ChunkBuffer, ChunkWrite};
use super::chunker::Chunker;
use super::record::{Direction, ReceivedFile, TransferRecord, TransferStatus};
use crate::config::{CompletionPolicy, TransferConfig};
use crate::error::{Error, Result};
use crate::identity::DeviceIdentity;
use crate::ids::{FileId, PeerId, generate_file_id};
use crate::protocol::{FileChunk, FileMeta, PeerMessage};
use crate::session::SessionKey;
use std::borrow::Cow;
use std::collections::HashMap;
use tokio::time::Instant;

/// Observable change to a transfer
#[derive(Debug, Clone, PartialEq)]
pub enum TransferUpdate {
    /// A record was created
    Started {
        /// Transfer id
        file_id: FileId,
        /// Direction
        direction: Direction,
        /// Remote peer
        peer_id: PeerId,
        /// File name
        file_name: String,
        /// Declared size in bytes
        file_size: u64,
    },
    /// Progress moved forward
    Progress {
        /// Transfer id
        file_id: FileId,
        /// Direction
        direction: Direction,
        /// New progress, below 1
        progress: f64,
    },
    /// Transfer finished successfully
    Completed {
        /// Transfer id
        file_id: FileId,
        /// Direction
        direction: Direction,
    },
    /// An incoming file was reconstructed
    Received(ReceivedFile),
    /// Transfer failed
    Failed {
        /// Transfer id
        file_id: FileId,
        /// Direction
        direction: Direction,
        /// Failure reason
        reason: String,
    },
    /// Record removed by expiry or dismissal
    Removed {
        /// Transfer id
        file_id: FileId,
    },
}

impl TransferUpdate {
    /// Transfer this update refers to
    #[must_use]
    pub fn file_id(&self) -> &str {
        match self {
            Self::Started { file_id, .. }
            | Self::Progress { file_id, .. }
            | Self::Completed { file_id, .. }
            | Self::Failed { file_id, .. }
            | Self::Removed { file_id } => file_id,
            Self::Received(file) => &file.file_id,
        }
    }

    /// Check if the update ends the transfer or its record
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Removed { .. }
        )
    }
}

/// Receiver-side state for one incoming file
#[derive(Debug)]
struct Inbound {
    meta: FileMeta,
    peer_id: PeerId,
    session: SessionKey,
    buffer: ChunkBuffer,
}

/// Owns transfer records and receive buffers
#[derive(Debug)]
pub struct TransferEngine {
    config: TransferConfig,
    chunker: Chunker,
    records: HashMap<FileId, TransferRecord>,
    inbound: HashMap<FileId, Inbound>,
}

impl TransferEngine {
    /// Create an engine
    #[must_use]
    pub fn new(config: TransferConfig) -> Self {
        let chunker = Chunker::with_chunk_size(config.chunk_size);
        Self {
            config,
            chunker,
            records: HashMap::new(),
            inbound: HashMap::new(),
        }
    }

    /// Chunker used for outgoing files
    #[must_use]
    pub fn chunker(&self) -> Chunker {
        self.chunker
    }

    /// Create an outgoing transfer record.
    ///
    /// # Arguments
    /// * `peer_id` - Destination peer
    /// * `sender` - Local identity, announced in the metadata
    /// * `file_name` - File name
    /// * `file_type` - MIME type
    /// * `file_size` - Content length in bytes
    /// * `now` - Current time
    ///
    /// # Returns
    /// The metadata to send ahead of the chunks, and the `Started` update.
    pub fn begin_send(
        &mut self,
        peer_id: &str,
        sender: &DeviceIdentity,
        file_name: &str,
        file_type: &str,
        file_size: u64,
        now: Instant,
    ) -> (FileMeta, TransferUpdate) {
        let mut file_id = generate_file_id();
        while self.records.contains_key(&file_id) {
            file_id = generate_file_id();
        }

        let total_chunks = self.chunker.chunk_count(file_size);
        let record = TransferRecord::new(
            file_id.clone(),
            file_name.to_string(),
            file_type.to_string(),
            file_size,
            peer_id.to_string(),
            Direction::Sending,
            total_chunks,
            now,
        );
        self.records.insert(file_id.clone(), record);

        tracing::info!(
            "Sending {} ({} bytes, {} chunks) to {} as {}",
            file_name,
            file_size,
            total_chunks,
            peer_id,
            file_id
        );

        let meta = FileMeta {
            file_id: file_id.clone(),
            file_name: file_name.to_string(),
            file_type: file_type.to_string(),
            file_size,
            total_chunks,
            sender_name: sender.name.clone(),
            sender_emoji: sender.emoji.clone(),
        };
        let update = TransferUpdate::Started {
            file_id,
            direction: Direction::Sending,
            peer_id: peer_id.to_string(),
            file_name: file_name.to_string(),
            file_size,
        };
        (meta, update)
    }

    /// Record that chunk `index` of an outgoing transfer was handed to the channel
    pub fn chunk_sent(&mut self, file_id: &str, index: u64) -> Option<TransferUpdate> {
        let record = self.records.get_mut(file_id)?;
        if record.direction != Direction::Sending || !record.advance(index + 1) {
            return None;
        }
        tracing::trace!("{} chunk {} sent", file_id, index);
        Some(TransferUpdate::Progress {
            file_id: file_id.to_string(),
            direction: Direction::Sending,
            progress: record.progress(),
        })
    }

    /// Mark an outgoing transfer complete once `file-complete` was sent
    pub fn finish_send(&mut self, file_id: &str, now: Instant) -> Option<TransferUpdate> {
        let record = self.records.get_mut(file_id)?;
        if record.direction != Direction::Sending || record.is_terminal() {
            return None;
        }
        record.complete(None, now, self.config.sender_retention);
        tracing::info!("Sent {} ({}) in {:?}", record.file_name, file_id, record.elapsed());
        Some(TransferUpdate::Completed {
            file_id: file_id.to_string(),
            direction: Direction::Sending,
        })
    }

    /// Fail a transfer in either direction and release its buffer
    pub fn fail(&mut self, file_id: &str, reason: &str, now: Instant) -> Option<TransferUpdate> {
        self.inbound.remove(file_id);
        let record = self.records.get_mut(file_id)?;
        if record.is_terminal() {
            return None;
        }
        let retention = retention_for(&self.config, record.direction);
        record.fail(reason, now, retention);
        tracing::warn!("Transfer {} failed: {}", file_id, reason);
        Some(TransferUpdate::Failed {
            file_id: file_id.to_string(),
            direction: record.direction,
            reason: reason.to_string(),
        })
    }

    /// Dispatch a post-handshake message from `peer_id`, received on
    /// session `session`.
    ///
    /// Chunks or completions for unknown transfers are ignored with a
    /// warning. An incomplete completion under the strict policy fails the
    /// transfer and is reported as a `Failed` update.
    ///
    /// # Errors
    /// - `Error::DuplicateTransfer` if `file-meta` reuses a tracked id
    /// - `Error::InvalidMessage` for oversized metadata or an `identity` message
    pub fn handle_message(
        &mut self,
        peer_id: &str,
        session: SessionKey,
        message: PeerMessage,
        now: Instant,
    ) -> Result<Vec<TransferUpdate>> {
        match message {
            PeerMessage::Identity { .. } => {
                Err(Error::invalid_message("identity is handled by the session"))
            }
            PeerMessage::FileMeta(meta) => {
                self.on_meta(peer_id, session, meta, now).map(|u| vec![u])
            }
            PeerMessage::FileChunk(chunk) => Ok(self.on_chunk(peer_id, chunk).into_iter().collect()),
            PeerMessage::FileComplete { file_id } => match self.on_complete(peer_id, &file_id, now) {
                Ok(file) => Ok(vec![
                    TransferUpdate::Completed {
                        file_id,
                        direction: Direction::Receiving,
                    },
                    TransferUpdate::Received(file),
                ]),
                Err(Error::TransferNotFound(_)) => {
                    tracing::warn!("Ignoring file-complete for unknown transfer {}", file_id);
                    Ok(Vec::new())
                }
                Err(e) => Ok(vec![TransferUpdate::Failed {
                    file_id,
                    direction: Direction::Receiving,
                    reason: e.to_string(),
                }]),
            },
        }
    }

    /// Start receiving a file. Its buffer lives as long as `session`.
    ///
    /// # Errors
    /// - `Error::DuplicateTransfer` if the id is already tracked
    /// - `Error::InvalidMessage` if `totalChunks` exceeds the configured ceiling
    pub fn on_meta(
        &mut self,
        peer_id: &str,
        session: SessionKey,
        meta: FileMeta,
        now: Instant,
    ) -> Result<TransferUpdate> {
        if self.records.contains_key(&meta.file_id) {
            return Err(Error::DuplicateTransfer(meta.file_id));
        }
        if meta.total_chunks > self.config.max_total_chunks {
            return Err(Error::InvalidMessage(Cow::Owned(format!(
                "file {} declares {} chunks (limit {})",
                meta.file_id, meta.total_chunks, self.config.max_total_chunks
            ))));
        }

        let record = TransferRecord::new(
            meta.file_id.clone(),
            meta.file_name.clone(),
            meta.file_type.clone(),
            meta.file_size,
            peer_id.to_string(),
            Direction::Receiving,
            meta.total_chunks,
            now,
        );
        self.records.insert(meta.file_id.clone(), record);

        tracing::info!(
            "Receiving {} ({} bytes, {} chunks) from {} {}",
            meta.file_name,
            meta.file_size,
            meta.total_chunks,
            meta.sender_emoji,
            meta.sender_name
        );

        let update = TransferUpdate::Started {
            file_id: meta.file_id.clone(),
            direction: Direction::Receiving,
            peer_id: peer_id.to_string(),
            file_name: meta.file_name.clone(),
            file_size: meta.file_size,
        };
        self.inbound.insert(
            meta.file_id.clone(),
            Inbound {
                buffer: ChunkBuffer::new(meta.total_chunks),
                peer_id: peer_id.to_string(),
                session,
                meta,
            },
        );
        Ok(update)
    }

    /// Store one incoming chunk. Unknown, foreign or out-of-range chunks are
    /// dropped with a warning.
    pub fn on_chunk(&mut self, peer_id: &str, chunk: FileChunk) -> Option<TransferUpdate> {
        let Some(inbound) = self.inbound.get_mut(&chunk.file_id) else {
            tracing::warn!(
                "Ignoring chunk {} for unknown transfer {}",
                chunk.chunk_index,
                chunk.file_id
            );
            return None;
        };
        if inbound.peer_id != peer_id {
            tracing::warn!(
                "Ignoring chunk for {} from {} (transfer belongs to {})",
                chunk.file_id,
                peer_id,
                inbound.peer_id
            );
            return None;
        }

        match inbound.buffer.insert(chunk.chunk_index, chunk.data) {
            Ok(ChunkWrite::Filled) => {}
            Ok(ChunkWrite::Duplicate) => {
                tracing::debug!("Duplicate chunk {} for {}", chunk.chunk_index, chunk.file_id);
                return None;
            }
            Err(e) => {
                tracing::warn!("Ignoring chunk for {}: {}", chunk.file_id, e);
                return None;
            }
        }

        let filled = inbound.buffer.filled();
        let record = self.records.get_mut(&chunk.file_id)?;
        if !record.advance(filled) {
            return None;
        }
        tracing::trace!(
            "{} chunk {} received ({}/{})",
            chunk.file_id,
            chunk.chunk_index,
            filled,
            record.total_chunks
        );
        Some(TransferUpdate::Progress {
            file_id: chunk.file_id,
            direction: Direction::Receiving,
            progress: record.progress(),
        })
    }

    /// Reassemble an incoming file after `file-complete`
    ///
    /// # Errors
    /// - `Error::TransferNotFound` if no buffer exists for the id and peer
    /// - `Error::IncompleteTransfer` under the strict policy with slots missing;
    ///   the record is marked failed and the buffer released
    pub fn on_complete(&mut self, peer_id: &str, file_id: &str, now: Instant) -> Result<ReceivedFile> {
        if self
            .inbound
            .get(file_id)
            .is_none_or(|inbound| inbound.peer_id != peer_id)
        {
            return Err(Error::TransferNotFound(file_id.to_string()));
        }
        let Some(Inbound { meta, buffer, .. }) = self.inbound.remove(file_id) else {
            return Err(Error::TransferNotFound(file_id.to_string()));
        };

        let bytes = match self.config.completion_policy {
            CompletionPolicy::Strict => match buffer.assemble() {
                Ok(bytes) => bytes,
                Err(Error::IncompleteTransfer { missing, total, .. }) => {
                    let err = Error::IncompleteTransfer {
                        file_id: file_id.to_string(),
                        missing,
                        total,
                    };
                    if let Some(record) = self.records.get_mut(file_id) {
                        record.fail(err.to_string(), now, self.config.receiver_retention);
                    }
                    tracing::warn!("{}", err);
                    return Err(err);
                }
                Err(e) => return Err(e),
            },
            CompletionPolicy::Permissive => {
                let missing = buffer.total() - buffer.filled();
                if missing > 0 {
                    tracing::warn!(
                        "Assembling {} with {} of {} chunks missing",
                        file_id,
                        missing,
                        buffer.total()
                    );
                }
                buffer.assemble_lossy()
            }
        };

        let file = ReceivedFile::new(
            meta.file_id,
            meta.file_name,
            meta.file_type,
            meta.sender_name,
            meta.sender_emoji,
            peer_id.to_string(),
            bytes,
        );
        if let Some(record) = self.records.get_mut(file_id) {
            record.complete(Some(file.clone()), now, self.config.receiver_retention);
            tracing::info!(
                "Received {} ({} bytes) in {:?}",
                record.file_name,
                file.len(),
                record.elapsed()
            );
        }
        Ok(file)
    }

    /// Fail every in-flight transfer tied to `peer_id` and release its buffers
    pub fn drop_peer(&mut self, peer_id: &str, now: Instant) -> Vec<TransferUpdate> {
        let affected: Vec<FileId> = self
            .records
            .values()
            .filter(|r| r.peer_id == peer_id && r.is_active())
            .map(|r| r.file_id.clone())
            .collect();

        affected
            .iter()
            .filter_map(|file_id| self.fail(file_id, "peer disconnected", now))
            .collect()
    }

    /// Fail every incoming transfer carried by `session` and release its buffers
    pub fn drop_session(&mut self, session: SessionKey, now: Instant) -> Vec<TransferUpdate> {
        let affected: Vec<FileId> = self
            .inbound
            .iter()
            .filter(|(_, inbound)| inbound.session == session)
            .map(|(file_id, _)| file_id.clone())
            .collect();

        affected
            .iter()
            .filter_map(|file_id| self.fail(file_id, "session closed", now))
            .collect()
    }

    /// Remove a finished record ahead of its expiry
    ///
    /// # Errors
    /// - `Error::TransferNotFound` if the id is unknown
    /// - `Error::InvalidState` if the transfer is still in flight
    pub fn dismiss(&mut self, file_id: &str) -> Result<TransferUpdate> {
        let record = self
            .records
            .get(file_id)
            .ok_or_else(|| Error::TransferNotFound(file_id.to_string()))?;
        if record.is_active() {
            return Err(Error::invalid_state("transfer is still in flight"));
        }
        self.records.remove(file_id);
        Ok(TransferUpdate::Removed {
            file_id: file_id.to_string(),
        })
    }

    /// Remove every terminal record past its retention deadline
    pub fn sweep(&mut self, now: Instant) -> Vec<TransferUpdate> {
        let expired: Vec<FileId> = self
            .records
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.file_id.clone())
            .collect();

        for file_id in &expired {
            self.records.remove(file_id);
            tracing::debug!("Expired transfer record {}", file_id);
        }
        expired
            .into_iter()
            .map(|file_id| TransferUpdate::Removed { file_id })
            .collect()
    }

    /// Look up one record
    #[must_use]
    pub fn record(&self, file_id: &str) -> Option<&TransferRecord> {
        self.records.get(file_id)
    }

    /// Snapshot of every record, oldest first
    #[must_use]
    pub fn records(&self) -> Vec<TransferRecord> {
        let mut records: Vec<TransferRecord> = self.records.values().cloned().collect();
        records.sort_by_key(TransferRecord::started_at);
        records
    }

    /// Number of records still transferring
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.status() == TransferStatus::Transferring)
            .count()
    }

    /// Number of receive buffers held
    #[must_use]
    pub fn buffered_count(&self) -> usize {
        self.inbound.len()
    }

    /// Number of tracked records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no records are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn retention_for(config: &TransferConfig, direction: Direction) -> std::time::Duration {
    match direction {
        Direction::Sending => config.sender_retention,
        Direction::Receiving => config.receiver_retention,
    }
}
