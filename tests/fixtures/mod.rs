//! Reusable multi-node test fixtures.

mod raw_peer;
mod two_node;

pub use raw_peer::RawPeer;
pub use two_node::TwoNodeFixture;
