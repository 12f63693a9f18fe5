//! Peer wire protocol.
//!
//! Every payload on a data channel is one JSON object whose `type` field
//! selects the variant. Field names are camelCase on the wire and chunk
//! bytes travel as standard base64.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Messages exchanged over a peer session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerMessage {
    /// Display identity, sent by each side as soon as the channel opens
    Identity {
        /// Display name
        name: String,
        /// Display emoji
        emoji: String,
    },
    /// Announces a file before any of its chunks
    FileMeta(FileMeta),
    /// One chunk of a file
    FileChunk(FileChunk),
    /// All chunks of a file have been sent
    FileComplete {
        /// Transfer the completion refers to
        #[serde(rename = "fileId")]
        file_id: String,
    },
}

/// `file-meta` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    /// Transfer identifier
    pub file_id: String,
    /// Original file name
    pub file_name: String,
    /// MIME type
    pub file_type: String,
    /// Size in bytes
    pub file_size: u64,
    /// Number of chunks that follow
    pub total_chunks: u64,
    /// Sender display name
    pub sender_name: String,
    /// Sender display emoji
    pub sender_emoji: String,
}

/// `file-chunk` payload
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    /// Transfer identifier
    pub file_id: String,
    /// Original file name
    pub file_name: String,
    /// MIME type
    pub file_type: String,
    /// Size in bytes of the whole file
    pub file_size: u64,
    /// Zero-based chunk position
    pub chunk_index: u64,
    /// Number of chunks in the file
    pub total_chunks: u64,
    /// Chunk bytes
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl std::fmt::Debug for FileChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChunk")
            .field("file_id", &self.file_id)
            .field("chunk_index", &self.chunk_index)
            .field("total_chunks", &self.total_chunks)
            .field("len", &self.data.len())
            .finish()
    }
}

impl PeerMessage {
    /// Serialize to the JSON wire form
    ///
    /// # Errors
    /// Returns `Error::Serialization` if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::from)
    }

    /// Parse one wire payload
    ///
    /// # Errors
    /// Returns `Error::Serialization` for malformed JSON or an unknown `type`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            Error::Serialization(Cow::Owned(format!("undecodable peer message: {e}")))
        })
    }

    /// Wire tag of this message
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Identity { .. } => "identity",
            Self::FileMeta(_) => "file-meta",
            Self::FileChunk(_) => "file-chunk",
            Self::FileComplete { .. } => "file-complete",
        }
    }

    /// Transfer this message belongs to, if any
    #[must_use]
    pub fn file_id(&self) -> Option<&str> {
        match self {
            Self::Identity { .. } => None,
            Self::FileMeta(meta) => Some(&meta.file_id),
            Self::FileChunk(chunk) => Some(&chunk.file_id),
            Self::FileComplete { file_id } => Some(file_id),
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
