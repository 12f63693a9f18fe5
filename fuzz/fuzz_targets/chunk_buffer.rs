//! Fuzz target for chunk reassembly
//!
//! Drives a buffer with arbitrary writes and checks the fill accounting.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use voidsync_core::ChunkBuffer;

#[derive(Debug, Arbitrary)]
struct Input {
    total: u8,
    writes: Vec<(u16, Vec<u8>)>,
}

fuzz_target!(|input: Input| {
    let total = u64::from(input.total);
    let mut buffer = ChunkBuffer::new(total);

    for (index, data) in input.writes {
        let accepted = buffer.insert(u64::from(index), data).is_ok();
        assert_eq!(accepted, u64::from(index) < total);
    }

    assert!(buffer.filled() <= total);
    assert_eq!(buffer.missing().len() as u64, total - buffer.filled());

    let complete = buffer.is_complete();
    let held = buffer.bytes_received();
    match buffer.assemble() {
        Ok(bytes) => {
            assert!(complete);
            assert_eq!(bytes.len() as u64, held);
        }
        Err(_) => assert!(!complete),
    }
});
