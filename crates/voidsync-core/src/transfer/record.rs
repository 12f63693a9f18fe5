//! Transfer records and received-file artifacts.

use crate::ids::{FileId, PeerId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Highest progress an in-flight transfer can report; 1.0 is reserved for completion
pub const IN_FLIGHT_PROGRESS_CEILING: f64 = 0.999;

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// We are sending
    Sending,
    /// We are receiving
    Receiving,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sending => write!(f, "sending"),
            Self::Receiving => write!(f, "receiving"),
        }
    }
}

/// Transfer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    /// Chunks are moving
    Transferring,
    /// Finished successfully
    Complete,
    /// Failed
    Error,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transferring => write!(f, "transferring"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A reconstructed file. Cloning shares the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Transfer id
    pub file_id: FileId,
    /// Original file name
    pub file_name: String,
    /// MIME type
    pub file_type: String,
    /// Sender display name
    pub sender_name: String,
    /// Sender display emoji
    pub sender_emoji: String,
    /// Sending peer
    pub peer_id: PeerId,
    bytes: Arc<[u8]>,
}

impl ReceivedFile {
    pub(crate) fn new(
        file_id: FileId,
        file_name: String,
        file_type: String,
        sender_name: String,
        sender_emoji: String,
        peer_id: PeerId,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_id,
            file_name,
            file_type,
            sender_name,
            sender_emoji,
            peer_id,
            bytes: bytes.into(),
        }
    }

    /// File content
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Content length
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the file is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ReceivedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivedFile")
            .field("file_id", &self.file_id)
            .field("file_name", &self.file_name)
            .field("file_type", &self.file_type)
            .field("sender_name", &self.sender_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// State of one transfer, in either direction
#[derive(Debug, Clone)]
pub struct TransferRecord {
    /// Transfer id
    pub file_id: FileId,
    /// File name
    pub file_name: String,
    /// MIME type
    pub file_type: String,
    /// Declared size in bytes
    pub file_size: u64,
    /// Remote peer
    pub peer_id: PeerId,
    /// Direction
    pub direction: Direction,
    /// Number of chunks in the file
    pub total_chunks: u64,
    status: TransferStatus,
    chunks_done: u64,
    progress: f64,
    result: Option<ReceivedFile>,
    error: Option<String>,
    started_at: Instant,
    finished_at: Option<Instant>,
    expires_at: Option<Instant>,
}

impl TransferRecord {
    /// Create a record in the `Transferring` state
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_id: FileId,
        file_name: String,
        file_type: String,
        file_size: u64,
        peer_id: PeerId,
        direction: Direction,
        total_chunks: u64,
        now: Instant,
    ) -> Self {
        Self {
            file_id,
            file_name,
            file_type,
            file_size,
            peer_id,
            direction,
            total_chunks,
            status: TransferStatus::Transferring,
            chunks_done: 0,
            progress: 0.0,
            result: None,
            error: None,
            started_at: now,
            finished_at: None,
            expires_at: None,
        }
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Progress in `[0, 1]`; exactly 1 only once complete
    #[must_use]
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Chunks sent or received so far
    #[must_use]
    pub fn chunks_done(&self) -> u64 {
        self.chunks_done
    }

    /// Reconstructed file, for completed incoming transfers
    #[must_use]
    pub fn result(&self) -> Option<&ReceivedFile> {
        self.result.as_ref()
    }

    /// Failure reason
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Check if the transfer has finished, successfully or not
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status != TransferStatus::Transferring
    }

    /// Check if the transfer is still moving
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TransferStatus::Transferring
    }

    /// When the record becomes eligible for removal
    #[must_use]
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Check if the record is past its retention deadline
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    /// Time from start to finish, or to now while in flight
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.started_at)
    }

    /// When the record was created
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Record that `done` chunks have moved. Never lowers progress and never
    /// reaches 1 before completion. Ignored once terminal.
    ///
    /// # Returns
    /// `true` if progress changed.
    pub fn advance(&mut self, done: u64) -> bool {
        if self.is_terminal() || done <= self.chunks_done {
            return false;
        }
        self.chunks_done = done.min(self.total_chunks);

        let fraction = if self.total_chunks == 0 {
            0.0
        } else {
            self.chunks_done as f64 / self.total_chunks as f64
        };
        let next = fraction.min(IN_FLIGHT_PROGRESS_CEILING);
        if next > self.progress {
            self.progress = next;
            return true;
        }
        false
    }

    /// Mark complete, set progress to 1 and schedule removal
    pub fn complete(&mut self, result: Option<ReceivedFile>, now: Instant, retention: Duration) {
        if self.is_terminal() {
            return;
        }
        self.status = TransferStatus::Complete;
        self.chunks_done = self.total_chunks;
        self.progress = 1.0;
        self.result = result;
        self.finish(now, retention);
    }

    /// Mark failed and schedule removal. Progress keeps its last value.
    pub fn fail(&mut self, reason: impl Into<String>, now: Instant, retention: Duration) {
        if self.is_terminal() {
            return;
        }
        self.status = TransferStatus::Error;
        self.error = Some(reason.into());
        self.finish(now, retention);
    }

    fn finish(&mut self, now: Instant, retention: Duration) {
        self.finished_at = Some(now);
        self.expires_at = Some(now + retention);
    }
}
