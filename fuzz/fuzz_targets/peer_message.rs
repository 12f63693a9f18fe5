//! Fuzz target for peer message decoding
//!
//! Arbitrary bytes must decode to a message or an error, never a panic.
//! Anything that decodes must survive a second trip through the codec.

#![no_main]

use libfuzzer_sys::fuzz_target;
use voidsync_core::PeerMessage;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = PeerMessage::decode(data) {
        let encoded = message.encode().expect("decoded message re-encodes");
        let again = PeerMessage::decode(&encoded).expect("re-encoded message decodes");
        assert_eq!(again, message);
    }
});
