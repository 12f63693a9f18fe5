//! Two-node test fixture for integration testing
//!
//! Provides a reusable test infrastructure for testing two-node scenarios:
//! - Endpoint registration on a shared in-process network
//! - Session establishment (identity handshake both ways)
//! - File transfers
//!
//! # Example
//!
//! ```no_run
//! use voidsync_integration_tests::fixtures::TwoNodeFixture;
//!
//! #[tokio::test]
//! async fn test_basic_transfer() {
//!     let mut fixture = TwoNodeFixture::new().await.unwrap();
//!     fixture.establish_session().await.unwrap();
//!
//!     let file_id = fixture.send_bytes("a.bin", vec![1, 2, 3]).await.unwrap();
//!     // ... test transfer ...
//!
//!     fixture.cleanup().await.unwrap();
//! }
//! ```

use crate::test_helpers::{DEFAULT_TIMEOUT, with_timeout};
use std::sync::Arc;
use voidsync_core::{
    DeviceIdentity, FileId, Node, NodeConfig, NodeHandle, OutgoingFile, Result, TransferRecord,
};
use voidsync_transport::MemoryNetwork;

/// Room shared by fixture nodes
pub const FIXTURE_ROOM: &str = "TESTRM";

/// Two-node test fixture
///
/// Provides lifecycle management for a pair of VoidSync nodes registered on
/// the same [`MemoryNetwork`].
pub struct TwoNodeFixture {
    /// Shared network; use it to add raw peers or inject faults
    pub network: MemoryNetwork,
    /// Node that dials and sends
    pub sender: NodeHandle,
    /// Node that accepts and receives
    pub receiver: NodeHandle,
    /// Registered endpoint of `sender`
    pub sender_id: String,
    /// Registered endpoint of `receiver`
    pub receiver_id: String,
    session_established: bool,
}

impl TwoNodeFixture {
    /// Create and initialize two nodes with default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if either node fails to register.
    pub async fn new() -> Result<Self> {
        Self::new_with_config(NodeConfig::default(), NodeConfig::default()).await
    }

    /// Create and initialize two nodes with custom configurations
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration is invalid or registration fails.
    pub async fn new_with_config(
        sender_config: NodeConfig,
        receiver_config: NodeConfig,
    ) -> Result<Self> {
        let network = MemoryNetwork::new();
        let sender = Node::spawn(
            Arc::new(network.clone()),
            DeviceIdentity::new("sender00", "Swift Fox", "🦊"),
            FIXTURE_ROOM,
            sender_config,
        )?;
        let receiver = Node::spawn(
            Arc::new(network.clone()),
            DeviceIdentity::new("recvr000", "Calm Owl", "🦉"),
            FIXTURE_ROOM,
            receiver_config,
        )?;

        let sender_id = sender.initialize().await?;
        let receiver_id = receiver.initialize().await?;

        Ok(Self {
            network,
            sender,
            receiver,
            sender_id,
            receiver_id,
            session_established: false,
        })
    }

    /// Dial the receiver and wait until both sides completed the handshake
    ///
    /// # Errors
    ///
    /// Returns an error if the dial fails or the handshake does not finish.
    pub async fn establish_session(&mut self) -> Result<()> {
        if self.session_established {
            return Ok(());
        }

        self.sender.dial(&self.receiver_id).await?;
        with_timeout(DEFAULT_TIMEOUT, self.sender.wait_for_peer(&self.receiver_id)).await?;
        with_timeout(DEFAULT_TIMEOUT, self.receiver.wait_for_peer(&self.sender_id)).await?;

        self.session_established = true;
        Ok(())
    }

    /// Check if the session has been established
    pub fn is_session_established(&self) -> bool {
        self.session_established
    }

    /// Send in-memory bytes from `sender` to `receiver`
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionNotFound` if the session is not established.
    pub async fn send_bytes(&self, name: &str, data: Vec<u8>) -> Result<FileId> {
        self.sender
            .send_file(
                &self.receiver_id,
                OutgoingFile::new(name, "application/octet-stream", data),
            )
            .await
    }

    /// Wait for both ends of a transfer to finish
    ///
    /// # Errors
    ///
    /// Returns an error if either record disappears or the node stops.
    pub async fn wait_for_both(&self, file_id: &str) -> Result<(TransferRecord, TransferRecord)> {
        let sent = with_timeout(DEFAULT_TIMEOUT, self.sender.wait_for_transfer(file_id)).await?;
        let received =
            with_timeout(DEFAULT_TIMEOUT, self.receiver.wait_for_transfer(file_id)).await?;
        Ok((sent, received))
    }

    /// Shut down both nodes
    ///
    /// # Errors
    ///
    /// Returns an error if a node had already stopped.
    pub async fn cleanup(self) -> Result<()> {
        self.sender.shutdown().await?;
        self.receiver.shutdown().await?;
        Ok(())
    }
}
