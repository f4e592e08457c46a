//! Identifier generation.
//!
//! Connections, scenes, and requests each draw from their own monotonic
//! sequence of 8-character lowercase hex ids; client ids are random.

use scenecast_core::RandomProvider;

/// Length of every id the relay hands out.
pub const ID_LENGTH: usize = 8;

/// Base of the connection id sequence; the first id is `00010001`.
pub const CONNECTION_ID_BASE: u64 = 0x10000;

/// Base of the scene id sequence, a numbering space distinct from
/// connection ids; the first id is `00020001`.
pub const SCENE_ID_BASE: u64 = 0x20000;

/// Base of the process-wide request id sequence; the first id is `00010001`.
pub const REQUEST_ID_BASE: u64 = 0x10000;

/// Render a counter value as an 8-character lowercase hex id.
fn hex_id(value: u64) -> String {
    format!("{:08x}", value & 0xffff_ffff)
}

/// A monotonic id sequence.
#[derive(Debug)]
pub struct IdSequence {
    next: u64,
}

impl IdSequence {
    /// Create a sequence; the first id issued is `base + 1`.
    pub fn new(base: u64) -> Self {
        Self { next: base }
    }

    /// Issue the next id.
    pub fn next_id(&mut self) -> String {
        self.next += 1;
        hex_id(self.next)
    }
}

/// Draw a fresh random client id.
pub fn client_id<R: RandomProvider>(random: &R) -> String {
    hex_id(random.random::<u32>() as u64)
}
