//! Wire format for relay frames.
//!
//! Frame layout: `[payload_len:2][protocol:1][request:1][forward_ip:4][forward_port:2][payload:N]`
//!
//! - **payload_len**: Total frame size minus 2 (big-endian u16)
//! - **protocol**: Must equal 1
//! - **request**: Must equal 10
//! - **forward_ip / forward_port**: IPv4 address echoed verbatim in replies,
//!   opaque to the relay (big-endian)
//! - **payload**: NUL-terminated argument strings, in order
//!
//! All numeric header fields are big-endian. The whole frame, header
//! included, must stay below the 8 KiB receive buffer.

use std::net::Ipv4Addr;

use thiserror::Error;

/// Offset of the first payload byte: the fixed header is 10 bytes.
pub const DATA_OFFSET: usize = 10;

/// Length of the leading prefix needed to size a frame: length field,
/// protocol number, and request code.
pub const PREFIX_LEN: usize = 4;

/// Size of the per-connection receive buffer. A frame announcing
/// `RECEIVE_BUFFER_LEN - 1` bytes or more is rejected.
pub const RECEIVE_BUFFER_LEN: usize = 8 * 1024;

/// The only protocol number clients are allowed to speak.
pub const PROTOCOL_NUMBER: u8 = 1;

/// The only request code clients are allowed to send.
pub const REQUEST_CODE: u8 = 10;

/// Wire format error types.
#[derive(Debug, Clone, Error)]
pub enum WireError {
    /// Protocol number byte was not [`PROTOCOL_NUMBER`].
    #[error("bad protocol number {0}")]
    BadProtocol(u8),

    /// Request code byte was not [`REQUEST_CODE`].
    #[error("bad request code {0}")]
    BadRequestCode(u8),

    /// An outbound frame would not fit the frame size bound.
    #[error("send buffer overflow at {0} bytes")]
    FrameOverflow(usize),
}

/// The first four bytes of a frame: enough to validate and size it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePrefix {
    /// Length of everything after the 2-byte length field itself.
    pub payload_len: u16,
}

impl FramePrefix {
    /// Decode and validate the 4-byte prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the protocol number or request code is wrong;
    /// the caller is expected to drop the connection.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        debug_assert!(buf.len() >= PREFIX_LEN);
        if buf[2] != PROTOCOL_NUMBER {
            return Err(WireError::BadProtocol(buf[2]));
        }
        if buf[3] != REQUEST_CODE {
            return Err(WireError::BadRequestCode(buf[3]));
        }
        Ok(Self {
            payload_len: u16::from_be_bytes([buf[0], buf[1]]),
        })
    }

    /// Total frame size announced by this prefix, header included.
    pub fn frame_len(&self) -> usize {
        2 + self.payload_len as usize
    }
}

/// The forward address carried in bytes 4..10 of every frame header.
///
/// The relay parrots it back in every frame it sends to the connection the
/// frame arrived on; it never interprets it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardAddress {
    /// IPv4 address in host order.
    pub ip: u32,
    /// Port in host order.
    pub port: u16,
}

impl ForwardAddress {
    /// Decode from a complete 10-byte frame header.
    pub fn decode(header: &[u8]) -> Self {
        debug_assert!(header.len() >= DATA_OFFSET);
        Self {
            ip: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
            port: u16::from_be_bytes([header[8], header[9]]),
        }
    }

    /// Dotted-decimal rendering of the IPv4 address.
    pub fn display_ip(&self) -> String {
        Ipv4Addr::from(self.ip).to_string()
    }
}

/// Serialize an argument list into a complete frame.
///
/// The header carries the given forward address; each argument is appended
/// as its bytes followed by a terminating NUL; finally the leading length
/// field is back-patched to `total - 2`.
///
/// # Errors
///
/// Returns [`WireError::FrameOverflow`] if the frame would reach the receive
/// buffer bound on the peer side.
pub fn encode_arguments(
    forward: ForwardAddress,
    args: &[&str],
) -> Result<Vec<u8>, WireError> {
    let mut frame = Vec::with_capacity(64);
    frame.extend_from_slice(&[0, 0, PROTOCOL_NUMBER, REQUEST_CODE]);
    frame.extend_from_slice(&forward.ip.to_be_bytes());
    frame.extend_from_slice(&forward.port.to_be_bytes());

    for arg in args {
        let needed = frame.len() + arg.len() + 1;
        if needed >= RECEIVE_BUFFER_LEN {
            return Err(WireError::FrameOverflow(needed));
        }
        frame.extend_from_slice(arg.as_bytes());
        frame.push(0);
    }

    let payload_len = (frame.len() - 2) as u16;
    frame[..2].copy_from_slice(&payload_len.to_be_bytes());
    Ok(frame)
}

/// Split a payload into its NUL-terminated arguments.
///
/// Empty tokens (consecutive NULs) are preserved as empty strings. A
/// trailing fragment without its terminating NUL is ignored.
pub fn parse_arguments(payload: &[u8]) -> Vec<String> {
    let mut args = Vec::new();
    let mut start = 0;
    for (offset, &byte) in payload.iter().enumerate() {
        if byte == 0 {
            args.push(String::from_utf8_lossy(&payload[start..offset]).into_owned());
            start = offset + 1;
        }
    }
    args
}

/// Render payload bytes for the packet trace log.
///
/// Control bytes (including the argument NULs) become spaces; output is
/// truncated to `limit` bytes.
pub fn printable(payload: &[u8], limit: usize) -> String {
    payload
        .iter()
        .take(limit)
        .map(|&b| if (b' '..=b'~').contains(&b) { b as char } else { ' ' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_parse_roundtrip() {
        let forward = ForwardAddress {
            ip: 0x0a00_0001,
            port: 4711,
        };
        let args = ["RQ", "100", "aaaaaaa0", "ENTER", "NNM", "Alice"];
        let frame = encode_arguments(forward, &args).expect("encode");

        assert_eq!(frame[2], PROTOCOL_NUMBER);
        assert_eq!(frame[3], REQUEST_CODE);
        let announced = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        assert_eq!(announced, frame.len() - 2);

        let parsed = parse_arguments(&frame[DATA_OFFSET..]);
        assert_eq!(parsed, args);
    }

    #[test]
    fn test_parse_then_encode_preserves_payload() {
        let forward = ForwardAddress {
            ip: 0xc0a8_0001,
            port: 9000,
        };
        let original =
            encode_arguments(forward, &["RQ", "7", "00010001", "SET", "color", "red"])
                .expect("encode");

        let parsed = parse_arguments(&original[DATA_OFFSET..]);
        let views: Vec<&str> = parsed.iter().map(String::as_str).collect();
        let reencoded = encode_arguments(forward, &views).expect("reencode");

        assert_eq!(&reencoded[DATA_OFFSET..], &original[DATA_OFFSET..]);
    }

    #[test]
    fn test_prefix_rejects_bad_protocol() {
        let mut frame =
            encode_arguments(ForwardAddress::default(), &["RQ", "1", "x", "PING"]).expect("encode");
        frame[2] = 2;
        assert!(matches!(
            FramePrefix::decode(&frame[..PREFIX_LEN]),
            Err(WireError::BadProtocol(2))
        ));
    }

    #[test]
    fn test_prefix_rejects_bad_request_code() {
        let mut frame =
            encode_arguments(ForwardAddress::default(), &["RQ", "1", "x", "PING"]).expect("encode");
        frame[3] = 11;
        assert!(matches!(
            FramePrefix::decode(&frame[..PREFIX_LEN]),
            Err(WireError::BadRequestCode(11))
        ));
    }

    #[test]
    fn test_prefix_sizes_frame() {
        let frame = encode_arguments(ForwardAddress::default(), &["RQ", "1", "x", "PING"])
            .expect("encode");
        let prefix = FramePrefix::decode(&frame[..PREFIX_LEN]).expect("prefix");
        assert_eq!(prefix.frame_len(), frame.len());
    }

    #[test]
    fn test_empty_tokens_preserved() {
        let payload = b"RQ\0\0abc\0\0";
        assert_eq!(parse_arguments(payload), vec!["RQ", "", "abc", ""]);
    }

    #[test]
    fn test_unterminated_tail_ignored() {
        let payload = b"RQ\0100\0tail-without-nul";
        assert_eq!(parse_arguments(payload), vec!["RQ", "100"]);
    }

    #[test]
    fn test_encode_overflow() {
        let big = "x".repeat(RECEIVE_BUFFER_LEN);
        let result = encode_arguments(ForwardAddress::default(), &[&big]);
        assert!(matches!(result, Err(WireError::FrameOverflow(_))));
    }

    #[test]
    fn test_forward_address_roundtrip() {
        let forward = ForwardAddress {
            ip: 0x7f00_0001,
            port: 8080,
        };
        let frame = encode_arguments(forward, &["AN", "1", "x"]).expect("encode");
        let decoded = ForwardAddress::decode(&frame[..DATA_OFFSET]);
        assert_eq!(decoded, forward);
        assert_eq!(decoded.display_ip(), "127.0.0.1");
    }

    #[test]
    fn test_printable_masks_control_bytes() {
        assert_eq!(printable(b"RQ\0100\0PING\0", 64), "RQ 100 PING ");
        assert_eq!(printable(b"abcdef", 3), "abc");
    }
}
