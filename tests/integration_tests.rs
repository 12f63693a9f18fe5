//! Integration tests for end-to-end node behaviour.
//!
//! Runs real node loops over the in-process `MemoryNetwork`, covering the
//! registration, handshake and transfer paths across both ends.

use std::sync::Arc;
use std::time::Duration;
use voidsync_core::{
    CompletionPolicy, DeviceIdentity, Direction, Error, Node, NodeConfig, NodeEvent, PeerMessage,
    TransferStatus, TransferUpdate,
};
use voidsync_integration_tests::fixtures::{RawPeer, TwoNodeFixture};
use voidsync_integration_tests::test_helpers::{
    DEFAULT_TIMEOUT, patterned_bytes, random_bytes, with_timeout,
};
use voidsync_transport::{MemoryNetwork, RegistrationFault};

fn config_with_policy(policy: CompletionPolicy) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.transfer.completion_policy = policy;
    config
}

/// Wait for the first event matching `predicate`
async fn next_event(
    events: &mut tokio::sync::broadcast::Receiver<NodeEvent>,
    predicate: impl Fn(&NodeEvent) -> bool,
) -> NodeEvent {
    with_timeout(DEFAULT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return Err(Error::Shutdown);
                }
            }
        }
    })
    .await
    .expect("event did not arrive")
}

// ============================================================================
// Transfer Tests
// ============================================================================

/// 150 KB file arrives intact as three chunks of 64, 64 and 22 KiB.
#[tokio::test]
async fn test_report_pdf_transfer() {
    let mut fixture = TwoNodeFixture::new().await.unwrap();
    fixture.establish_session().await.unwrap();
    let data = patterned_bytes(150 * 1024);

    let file_id = fixture.send_bytes("report.pdf", data.clone()).await.unwrap();
    let (sent, received) = fixture.wait_for_both(&file_id).await.unwrap();

    assert!(file_id.starts_with("f_"));
    assert_eq!(sent.status(), TransferStatus::Complete);
    assert_eq!(sent.total_chunks, 3);
    assert!((sent.progress() - 1.0).abs() < f64::EPSILON);

    assert_eq!(received.direction, Direction::Receiving);
    assert_eq!(received.file_name, "report.pdf");
    assert_eq!(received.file_size, 150 * 1024);
    let file = received.result().unwrap();
    assert_eq!(file.bytes(), &data[..]);
    assert_eq!(file.sender_name, "Swift Fox");
    assert_eq!(file.sender_emoji, "🦊");

    fixture.cleanup().await.unwrap();
}

/// Progress events are strictly increasing and stay below 1 until completion.
#[tokio::test]
async fn test_progress_is_monotonic() {
    let mut fixture = TwoNodeFixture::new().await.unwrap();
    fixture.establish_session().await.unwrap();
    let mut receiver_events = fixture.receiver.subscribe();

    let file_id = fixture
        .send_bytes("big.bin", random_bytes(20 * 64 * 1024 + 5))
        .await
        .unwrap();
    fixture.wait_for_both(&file_id).await.unwrap();

    let mut last = 0.0;
    let mut completed = false;
    while let Ok(event) = receiver_events.try_recv() {
        match event {
            NodeEvent::Transfer(TransferUpdate::Progress { progress, .. }) => {
                assert!(!completed);
                assert!(progress > last);
                assert!(progress < 1.0);
                last = progress;
            }
            NodeEvent::Transfer(TransferUpdate::Completed { .. }) => completed = true,
            _ => {}
        }
    }
    assert!(completed);
    assert!(last > 0.9);
}

/// Several files to the same peer proceed concurrently and all arrive.
#[tokio::test]
async fn test_concurrent_transfers() {
    let mut fixture = TwoNodeFixture::new().await.unwrap();
    fixture.establish_session().await.unwrap();

    let payloads: Vec<Vec<u8>> = (0..4).map(|i| random_bytes(70_000 + i * 1000)).collect();
    let mut ids = Vec::new();
    for (i, data) in payloads.iter().enumerate() {
        ids.push(
            fixture
                .send_bytes(&format!("file-{i}.bin"), data.clone())
                .await
                .unwrap(),
        );
    }

    for (file_id, data) in ids.iter().zip(&payloads) {
        let (_, received) = fixture.wait_for_both(file_id).await.unwrap();
        assert_eq!(received.result().unwrap().bytes(), &data[..]);
    }
    assert_eq!(fixture.sender.transfers().await.unwrap().len(), 4);
}

/// Zero-length files complete with empty content.
#[tokio::test]
async fn test_empty_file_transfer() {
    let mut fixture = TwoNodeFixture::new().await.unwrap();
    fixture.establish_session().await.unwrap();

    let file_id = fixture.send_bytes("empty.txt", Vec::new()).await.unwrap();
    let (sent, received) = fixture.wait_for_both(&file_id).await.unwrap();

    assert_eq!(sent.total_chunks, 0);
    assert!(received.result().unwrap().is_empty());
}

/// Sending to a peer without an established session is rejected.
#[tokio::test]
async fn test_send_without_session() {
    let fixture = TwoNodeFixture::new().await.unwrap();

    let err = fixture.send_bytes("a.txt", vec![1]).await.unwrap_err();
    assert_eq!(err, Error::SessionNotFound(fixture.receiver_id.clone()));
    assert!(fixture.sender.transfers().await.unwrap().is_empty());
}

// ============================================================================
// Connection Tests
// ============================================================================

/// A second dial to a connected peer is a no-op.
#[tokio::test]
async fn test_dial_existing_peer_is_noop() {
    let mut fixture = TwoNodeFixture::new().await.unwrap();
    fixture.establish_session().await.unwrap();

    assert!(!fixture.sender.dial(&fixture.receiver_id).await.unwrap());
    assert_eq!(fixture.sender.peers().await.unwrap().len(), 1);
    let logs = fixture.sender.logs().await.unwrap();
    assert!(logs[0].contains(&format!("ALREADY CONNECTED TO {}", fixture.receiver_id)));
}

/// Identifier collisions are retried with a fresh suffix.
#[tokio::test]
async fn test_registration_collision_retry() {
    let network = MemoryNetwork::new();
    network.inject_registration_fault(RegistrationFault::Unavailable);
    network.inject_registration_fault(RegistrationFault::Unavailable);

    let node = Node::spawn(
        Arc::new(network.clone()),
        DeviceIdentity::generate(),
        "ROOM01",
        NodeConfig::default(),
    )
    .unwrap();
    let endpoint = node.initialize().await.unwrap();

    assert!(endpoint.starts_with("voidsync-ROOM01-"));
    assert!(network.is_registered(&endpoint));
    let logs = node.logs().await.unwrap();
    assert_eq!(logs.iter().filter(|l| l.contains("ID CONFLICT")).count(), 2);
    assert!(logs[0].contains("PEER READY"));
}

/// Collisions past the attempt limit surface as `EndpointUnavailable`.
#[tokio::test]
async fn test_registration_collision_exhausted() {
    let network = MemoryNetwork::new();
    let mut config = NodeConfig::default();
    config.connection.max_register_attempts = 3;
    for _ in 0..3 {
        network.inject_registration_fault(RegistrationFault::Unavailable);
    }

    let node = Node::spawn(Arc::new(network), DeviceIdentity::generate(), "ROOM01", config).unwrap();
    let mut events = node.subscribe();

    let err = node.initialize().await.unwrap_err();
    assert!(matches!(err, Error::EndpointUnavailable { attempts: 3, .. }));

    let event = next_event(&mut events, |e| matches!(e, NodeEvent::RegistrationFailed { .. })).await;
    assert!(matches!(event, NodeEvent::RegistrationFailed { .. }));
    assert!(!node.is_ready().await.unwrap());
}

/// Other registration failures are not retried and set `last_error`.
#[tokio::test]
async fn test_registration_failure_sets_last_error() {
    let network = MemoryNetwork::new();
    network.inject_registration_fault(RegistrationFault::Failure("server unreachable".into()));

    let node = Node::spawn(
        Arc::new(network.clone()),
        DeviceIdentity::generate(),
        "ROOM01",
        NodeConfig::default(),
    )
    .unwrap();

    assert!(matches!(node.initialize().await, Err(Error::Registration(_))));
    let last_error = node.last_error().await.unwrap().unwrap();
    assert!(last_error.starts_with("Connection error:"));
    assert!(last_error.contains("server unreachable"));

    // The fault queue is drained; a retry succeeds
    node.initialize().await.unwrap();
    assert!(node.is_ready().await.unwrap());
    assert!(node.last_error().await.unwrap().is_none());
}

/// Dialing before registration fails with `NotReady`.
#[tokio::test]
async fn test_dial_before_ready() {
    let network = MemoryNetwork::new();
    let node = Node::spawn(
        Arc::new(network),
        DeviceIdentity::generate(),
        "ROOM01",
        NodeConfig::default(),
    )
    .unwrap();

    let err = node.dial("voidsync-ROOM01-someone0-abcd").await.unwrap_err();
    assert!(matches!(err, Error::NotReady(_)));
    assert!(node.logs().await.unwrap()[0].contains("CANNOT CONNECT: PEER NOT READY"));
}

/// Teardown releases the endpoint and a node can register again.
#[tokio::test]
async fn test_teardown_and_reinitialize() {
    let mut fixture = TwoNodeFixture::new().await.unwrap();
    fixture.establish_session().await.unwrap();

    fixture.receiver.teardown().await.unwrap();
    assert!(!fixture.network.is_registered(&fixture.receiver_id));
    assert!(fixture.receiver.peers().await.unwrap().is_empty());

    let again = fixture.receiver.initialize().await.unwrap();
    assert!(fixture.network.is_registered(&again));
}

// ============================================================================
// Wire-Level Tests
// ============================================================================

/// The node announces its identity first on every new channel.
#[tokio::test]
async fn test_identity_sent_on_open() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let mut raw = RawPeer::connect(&fixture.network, "voidsync-TESTRM-raw00000-0001", &fixture.receiver_id)
        .await
        .unwrap();

    let first = raw.next_message().await.unwrap();
    assert_eq!(
        first,
        PeerMessage::Identity {
            name: "Calm Owl".into(),
            emoji: "🦉".into()
        }
    );
}

/// Data sent before the identity is buffered and delivered after it.
#[tokio::test]
async fn test_pre_handshake_data_buffered() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let mut events = fixture.receiver.subscribe();
    let raw = RawPeer::connect(&fixture.network, "voidsync-TESTRM-early000-0001", &fixture.receiver_id)
        .await
        .unwrap();

    let data = patterned_bytes(10_000);
    let chunks = raw.send_meta("f_1_early1", "early.bin", &data, 4096).await.unwrap();
    for chunk in &chunks {
        raw.send_chunk(chunk).await.unwrap();
    }
    raw.send_complete("f_1_early1").await.unwrap();
    raw.send_identity("Raw Peer", "🤖").await.unwrap();

    let event = next_event(&mut events, |e| {
        matches!(e, NodeEvent::Transfer(TransferUpdate::Received(_)))
    })
    .await;
    let NodeEvent::Transfer(TransferUpdate::Received(file)) = event else {
        unreachable!();
    };
    assert_eq!(file.bytes(), &data[..]);
    assert_eq!(file.peer_id, raw.endpoint);
}

/// Strict completion fails a transfer with a missing chunk.
#[tokio::test]
async fn test_strict_completion_rejects_gap() {
    let fixture = TwoNodeFixture::new_with_config(
        NodeConfig::default(),
        config_with_policy(CompletionPolicy::Strict),
    )
    .await
    .unwrap();
    let raw = RawPeer::connect(&fixture.network, "voidsync-TESTRM-gappy000-0001", &fixture.receiver_id)
        .await
        .unwrap();
    raw.send_identity("Raw Peer", "🤖").await.unwrap();

    let data = patterned_bytes(3 * 1024);
    let chunks = raw.send_meta("f_1_gappy1", "gappy.bin", &data, 1024).await.unwrap();
    raw.send_chunk(&chunks[0]).await.unwrap();
    raw.send_chunk(&chunks[2]).await.unwrap();
    raw.send_complete("f_1_gappy1").await.unwrap();

    let record = with_timeout(DEFAULT_TIMEOUT, fixture.receiver.wait_for_transfer("f_1_gappy1"))
        .await
        .unwrap();
    assert_eq!(record.status(), TransferStatus::Error);
    assert_eq!(
        record.error(),
        Some("Incomplete transfer f_1_gappy1: 1 of 3 chunks missing")
    );
    assert!(record.result().is_none());
    assert!(record.progress() < 1.0);
}

/// Permissive completion concatenates the chunks that did arrive.
#[tokio::test]
async fn test_permissive_completion_truncates() {
    let fixture = TwoNodeFixture::new_with_config(
        NodeConfig::default(),
        config_with_policy(CompletionPolicy::Permissive),
    )
    .await
    .unwrap();
    let raw = RawPeer::connect(&fixture.network, "voidsync-TESTRM-gappy000-0002", &fixture.receiver_id)
        .await
        .unwrap();
    raw.send_identity("Raw Peer", "🤖").await.unwrap();

    let data = patterned_bytes(3 * 1024);
    let chunks = raw.send_meta("f_1_gappy2", "gappy.bin", &data, 1024).await.unwrap();
    raw.send_chunk(&chunks[2]).await.unwrap();
    raw.send_chunk(&chunks[0]).await.unwrap();
    raw.send_complete("f_1_gappy2").await.unwrap();

    let record = with_timeout(DEFAULT_TIMEOUT, fixture.receiver.wait_for_transfer("f_1_gappy2"))
        .await
        .unwrap();
    assert_eq!(record.status(), TransferStatus::Complete);
    let mut expected = data[..1024].to_vec();
    expected.extend_from_slice(&data[2048..]);
    assert_eq!(record.result().unwrap().bytes(), &expected[..]);
}

/// Garbage payloads are dropped without tearing the session down.
#[tokio::test]
async fn test_undecodable_payload_ignored() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let raw = RawPeer::connect(&fixture.network, "voidsync-TESTRM-noisy000-0001", &fixture.receiver_id)
        .await
        .unwrap();
    raw.send_identity("Raw Peer", "🤖").await.unwrap();
    with_timeout(DEFAULT_TIMEOUT, fixture.receiver.wait_for_peer(&raw.endpoint))
        .await
        .unwrap();

    raw.send_raw(b"{not json".to_vec()).await.unwrap();
    raw.send_raw(br#"{"type":"teleport"}"#.to_vec()).await.unwrap();
    let chunks = raw.send_meta("f_1_after1", "after.bin", b"still works", 4).await.unwrap();
    for chunk in &chunks {
        raw.send_chunk(chunk).await.unwrap();
    }
    raw.send_complete("f_1_after1").await.unwrap();

    let record = with_timeout(DEFAULT_TIMEOUT, fixture.receiver.wait_for_transfer("f_1_after1"))
        .await
        .unwrap();
    assert_eq!(record.result().unwrap().bytes(), b"still works");
    assert_eq!(fixture.receiver.peers().await.unwrap().len(), 1);
}

/// Duplicate `file-meta` surfaces as a session error and keeps the first record.
#[tokio::test]
async fn test_duplicate_meta_reported() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let mut events = fixture.receiver.subscribe();
    let raw = RawPeer::connect(&fixture.network, "voidsync-TESTRM-dupes000-0001", &fixture.receiver_id)
        .await
        .unwrap();
    raw.send_identity("Raw Peer", "🤖").await.unwrap();

    raw.send_meta("f_1_dupe01", "a.bin", b"abc", 2).await.unwrap();
    raw.send_meta("f_1_dupe01", "b.bin", b"abcdef", 2).await.unwrap();

    let event = next_event(&mut events, |e| matches!(e, NodeEvent::SessionError { .. })).await;
    let NodeEvent::SessionError { peer_id, message } = event else {
        unreachable!();
    };
    assert_eq!(peer_id, raw.endpoint);
    assert!(message.contains("f_1_dupe01"));

    let record = fixture.receiver.transfer("f_1_dupe01").await.unwrap().unwrap();
    assert_eq!(record.file_name, "a.bin");
}

// ============================================================================
// Disconnect and Expiry Tests
// ============================================================================

/// A peer vanishing mid-transfer fails the record and releases the buffer.
#[tokio::test]
async fn test_disconnect_mid_transfer() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let mut events = fixture.receiver.subscribe();
    let raw = RawPeer::connect(&fixture.network, "voidsync-TESTRM-leaver00-0001", &fixture.receiver_id)
        .await
        .unwrap();
    raw.send_identity("Raw Peer", "🤖").await.unwrap();

    let chunks = raw
        .send_meta("f_1_leave1", "partial.bin", &patterned_bytes(4096), 1024)
        .await
        .unwrap();
    raw.send_chunk(&chunks[0]).await.unwrap();
    next_event(&mut events, |e| {
        matches!(e, NodeEvent::Transfer(TransferUpdate::Progress { .. }))
    })
    .await;
    raw.close();

    let event = next_event(&mut events, |e| matches!(e, NodeEvent::PeerDisconnected { .. })).await;
    assert_eq!(
        event,
        NodeEvent::PeerDisconnected {
            peer_id: raw.endpoint.clone()
        }
    );

    let record = fixture.receiver.transfer("f_1_leave1").await.unwrap().unwrap();
    assert_eq!(record.status(), TransferStatus::Error);
    assert_eq!(record.error(), Some("peer disconnected"));
    assert!((record.progress() - 0.25).abs() < 1e-9);
    assert!(fixture.receiver.peers().await.unwrap().is_empty());
}

/// A second channel from the same peer replaces the first; transfers riding
/// the replaced channel fail instead of waiting forever.
#[tokio::test]
async fn test_replaced_session_fails_its_transfers() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let mut events = fixture.receiver.subscribe();
    let endpoint = "voidsync-TESTRM-twotab00-0001";
    let first = RawPeer::connect(&fixture.network, endpoint, &fixture.receiver_id)
        .await
        .unwrap();
    first.send_identity("Raw Peer", "🤖").await.unwrap();

    let chunks = first
        .send_meta("f_1_twotab", "partial.bin", &patterned_bytes(4096), 1024)
        .await
        .unwrap();
    first.send_chunk(&chunks[0]).await.unwrap();
    next_event(&mut events, |e| {
        matches!(e, NodeEvent::Transfer(TransferUpdate::Progress { .. }))
    })
    .await;

    let second = RawPeer::connect(&fixture.network, endpoint, &fixture.receiver_id)
        .await
        .unwrap();
    second.send_identity("Raw Peer", "🤖").await.unwrap();

    let event = next_event(&mut events, |e| {
        matches!(e, NodeEvent::Transfer(TransferUpdate::Failed { .. }))
    })
    .await;
    assert_eq!(
        event,
        NodeEvent::Transfer(TransferUpdate::Failed {
            file_id: "f_1_twotab".into(),
            direction: Direction::Receiving,
            reason: "session closed".into(),
        })
    );
    let record = fixture.receiver.transfer("f_1_twotab").await.unwrap().unwrap();
    assert_eq!(record.status(), TransferStatus::Error);
    assert!((record.progress() - 0.25).abs() < 1e-9);

    first.close();

    // The peer is still reachable through the replacement channel
    let peers = fixture.receiver.peers().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].peer_id, endpoint);
    let chunks = second.send_meta("f_1_second", "whole.bin", b"fresh", 2).await.unwrap();
    for chunk in &chunks {
        second.send_chunk(chunk).await.unwrap();
    }
    second.send_complete("f_1_second").await.unwrap();
    let record = with_timeout(DEFAULT_TIMEOUT, fixture.receiver.wait_for_transfer("f_1_second"))
        .await
        .unwrap();
    assert_eq!(record.result().unwrap().bytes(), b"fresh");
}

/// Finished records disappear after their retention and emit `Removed`.
#[tokio::test(start_paused = true)]
async fn test_records_expire_after_retention() {
    let mut fixture = TwoNodeFixture::new().await.unwrap();
    fixture.establish_session().await.unwrap();
    let mut sender_events = fixture.sender.subscribe();

    let file_id = fixture.send_bytes("a.txt", b"hello".to_vec()).await.unwrap();
    fixture.wait_for_both(&file_id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(5_500)).await;
    assert!(fixture.sender.transfer(&file_id).await.unwrap().is_none());
    assert!(fixture.receiver.transfer(&file_id).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(fixture.receiver.transfers().await.unwrap().is_empty());

    let removed = next_event(&mut sender_events, |e| {
        matches!(e, NodeEvent::Transfer(TransferUpdate::Removed { .. }))
    })
    .await;
    assert_eq!(removed.file_id(), Some(file_id.as_str()));
}

/// Dismissal removes a finished record early but refuses in-flight ones.
#[tokio::test]
async fn test_dismiss_transfer() {
    let mut fixture = TwoNodeFixture::new().await.unwrap();
    fixture.establish_session().await.unwrap();

    let file_id = fixture.send_bytes("a.txt", b"hello".to_vec()).await.unwrap();
    fixture.wait_for_both(&file_id).await.unwrap();

    fixture.receiver.dismiss_transfer(&file_id).await.unwrap();
    assert!(fixture.receiver.transfer(&file_id).await.unwrap().is_none());
    assert!(matches!(
        fixture.receiver.dismiss_transfer(&file_id).await,
        Err(Error::TransferNotFound(_))
    ));
}
