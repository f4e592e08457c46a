//! Error taxonomy for a single client connection.

use std::io;

use thiserror::Error;

use crate::wire::WireError;

/// Errors that end the life of one connection.
///
/// Every variant is connection-fatal: the owner of the connection reacts by
/// closing it and continuing to serve the others. Transient conditions
/// (would-block, interrupted) never surface here; the I/O layer reports those
/// as "nothing happened, retry next turn".
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Unrecoverable socket error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the connection (EOF, reset, or abort).
    #[error("closed by foreign host")]
    PeerClosed,

    /// The frame violated the wire format.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A frame announced more bytes than the receive buffer can hold.
    #[error("packet too large: {0} bytes")]
    FrameTooLarge(usize),

    /// A frame was too short to carry a request.
    #[error("not enough data in packet: {0} bytes")]
    ShortPacket(usize),

    /// The payload did not start with a known two-byte tag.
    #[error("bad leading tag bytes {0:#04x} {1:#04x}")]
    BadTag(u8, u8),

    /// A request failed structural validation.
    #[error("malformed request: {0}")]
    MalformedRequest(&'static str),
}

impl ConnectionError {
    /// Whether this is an ordinary peer disconnect rather than a fault.
    ///
    /// Disconnects are logged quietly; everything else at error level.
    pub fn is_peer_close(&self) -> bool {
        matches!(self, ConnectionError::PeerClosed)
    }
}

/// Result type for per-connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;
