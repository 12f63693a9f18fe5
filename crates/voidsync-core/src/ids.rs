//! Identifier generation: endpoint ids, file ids, room tokens.

use rand::Rng;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Remote endpoint identifier as seen by the transport
pub type PeerId = String;

/// Transfer identifier, `f_{unixMillis}_{6 base-36 chars}`
pub type FileId = String;

const BASE36: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Uppercase alphabet without look-alike glyphs (no I, O, 0, 1)
const ROOM_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of the collision-recovery suffix on endpoint ids
pub const SUFFIX_LEN: usize = 4;

fn random_from(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// Random lowercase base-36 string
#[must_use]
pub fn random_base36(len: usize) -> String {
    random_from(BASE36, len)
}

/// Generate a fresh transfer id
#[must_use]
pub fn generate_file_id() -> FileId {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("f_{millis}_{}", random_base36(6))
}

/// Generate a 6-character room token
#[must_use]
pub fn generate_room_id() -> String {
    random_from(ROOM_ALPHABET, 6)
}

/// Local endpoint identifier: `voidsync-{room}-{deviceId}-{suffix}`
///
/// The suffix is regenerated when the transport reports the identifier as
/// already claimed, e.g. when the same device joins a room from two tabs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointId {
    room: String,
    device_id: String,
    suffix: String,
}

impl EndpointId {
    /// Build an id with a random suffix
    #[must_use]
    pub fn new(room: &str, device_id: &str) -> Self {
        Self::with_suffix(room, device_id, &random_base36(SUFFIX_LEN))
    }

    /// Build an id with a fixed suffix
    #[must_use]
    pub fn with_suffix(room: &str, device_id: &str, suffix: &str) -> Self {
        Self {
            room: room.to_string(),
            device_id: device_id.to_string(),
            suffix: suffix.to_string(),
        }
    }

    /// Replace the suffix with a different random one
    pub fn regenerate_suffix(&mut self) {
        let previous = std::mem::take(&mut self.suffix);
        loop {
            let candidate = random_base36(SUFFIX_LEN);
            if candidate != previous {
                self.suffix = candidate;
                break;
            }
        }
    }

    /// Room token
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Device id component
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Collision-recovery suffix
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voidsync-{}-{}-{}", self.room, self.device_id, self.suffix)
    }
}
