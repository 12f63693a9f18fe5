//! Hand-driven peer that speaks the wire protocol directly.
//!
//! Lets tests send message sequences a well-behaved node never would:
//! data before the identity handshake, gaps in chunk streams, garbage.

use crate::test_helpers::{DEFAULT_TIMEOUT, with_timeout};
use voidsync_core::{Error, FileChunk, FileMeta, PeerMessage, Result};
use voidsync_transport::{Channel, ChannelEvent, MemoryNetwork, Transport};

/// One raw channel to a node
pub struct RawPeer {
    /// Endpoint the node sees as the remote id
    pub endpoint: String,
    channel: Channel,
}

impl RawPeer {
    /// Dial `target` from an unregistered `endpoint`
    ///
    /// # Errors
    ///
    /// Returns a transport error if `target` is not registered.
    pub async fn connect(network: &MemoryNetwork, endpoint: &str, target: &str) -> Result<Self> {
        let channel = network.dial(endpoint, target).await?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            channel,
        })
    }

    /// Encode and send one message
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed.
    pub async fn send(&self, message: &PeerMessage) -> Result<()> {
        self.send_raw(message.encode()?).await
    }

    /// Send arbitrary bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed.
    pub async fn send_raw(&self, bytes: Vec<u8>) -> Result<()> {
        self.channel.handle.send(bytes).await?;
        Ok(())
    }

    /// Announce an identity
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed.
    pub async fn send_identity(&self, name: &str, emoji: &str) -> Result<()> {
        self.send(&PeerMessage::Identity {
            name: name.to_string(),
            emoji: emoji.to_string(),
        })
        .await
    }

    /// Send `file-meta` for `data` split into `chunk_size` pieces
    ///
    /// # Returns
    ///
    /// The chunks, ready for [`send_chunk`](Self::send_chunk).
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed.
    pub async fn send_meta(
        &self,
        file_id: &str,
        file_name: &str,
        data: &[u8],
        chunk_size: usize,
    ) -> Result<Vec<FileChunk>> {
        let pieces: Vec<&[u8]> = data.chunks(chunk_size).collect();
        let meta = FileMeta {
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            file_type: "application/octet-stream".to_string(),
            file_size: data.len() as u64,
            total_chunks: pieces.len() as u64,
            sender_name: "Raw Peer".to_string(),
            sender_emoji: "🤖".to_string(),
        };
        self.send(&PeerMessage::FileMeta(meta.clone())).await?;

        Ok(pieces
            .into_iter()
            .enumerate()
            .map(|(index, piece)| FileChunk {
                file_id: meta.file_id.clone(),
                file_name: meta.file_name.clone(),
                file_type: meta.file_type.clone(),
                file_size: meta.file_size,
                chunk_index: index as u64,
                total_chunks: meta.total_chunks,
                data: piece.to_vec(),
            })
            .collect())
    }

    /// Send one chunk
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed.
    pub async fn send_chunk(&self, chunk: &FileChunk) -> Result<()> {
        self.send(&PeerMessage::FileChunk(chunk.clone())).await
    }

    /// Send `file-complete`
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed.
    pub async fn send_complete(&self, file_id: &str) -> Result<()> {
        self.send(&PeerMessage::FileComplete {
            file_id: file_id.to_string(),
        })
        .await
    }

    /// Next decoded message from the node, skipping `Open`
    ///
    /// # Errors
    ///
    /// Returns `Error::Channel` if the channel closes first, or a timeout error.
    pub async fn next_message(&mut self) -> Result<PeerMessage> {
        loop {
            let event = with_timeout(DEFAULT_TIMEOUT, async {
                self.channel
                    .events
                    .recv()
                    .await
                    .ok_or_else(|| Error::Channel("event stream ended".into()))
            })
            .await?;
            match event {
                ChannelEvent::Open => continue,
                ChannelEvent::Data(bytes) => return PeerMessage::decode(&bytes),
                ChannelEvent::Close => return Err(Error::Channel("channel closed".into())),
                ChannelEvent::Error { message, .. } => return Err(Error::Channel(message.into())),
            }
        }
    }

    /// Close the channel
    pub fn close(&self) {
        self.channel.handle.close();
    }
}
