//! File transfer engine.
//!
//! - [`chunker`]: splits outgoing content into fixed-size chunks
//! - [`buffer`]: receiver-side slot buffer and reassembly
//! - [`record`]: per-transfer lifecycle and progress
//! - [`engine`]: the state machine that owns records and buffers

pub mod buffer;
pub mod chunker;
pub mod engine;
pub mod record;

pub use buffer::{ChunkBuffer, ChunkWrite};
pub use chunker::{Chunker, DEFAULT_CHUNK_SIZE};
pub use engine::{TransferEngine, TransferUpdate};
pub use record::{Direction, ReceivedFile, TransferRecord, TransferStatus};
