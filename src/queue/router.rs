//! Partition routing
//!
//! Keyed messages hash to a fixed partition so that one key always lands in
//! one log. Keyless messages go to the shortest log; that choice is made by
//! the store inside the atomic send so length check and append cannot race.

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Where an outbound message goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Partition(u32),
    /// Shortest partition at append time, lowest index on ties
    Shortest,
}

impl Route {
    pub fn partition(self) -> Option<u32> {
        match self {
            Route::Partition(idx) => Some(idx),
            Route::Shortest => None,
        }
    }
}

/// 32-bit FNV-1a
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Route a message by key over `partitions` partitions
pub fn route(key: &str, partitions: u32) -> Route {
    if key.is_empty() || partitions == 0 {
        return Route::Shortest;
    }
    Route::Partition(fnv1a32(key.as_bytes()) % partitions)
}
