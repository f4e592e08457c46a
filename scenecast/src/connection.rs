//! One live TCP session: receive assembly, send residue, identity.
//!
//! Connections are owned by the registry behind `Rc<RefCell<_>>` and mutated
//! only from the event loop. The stream itself is shared behind its own `Rc`
//! so readiness futures never hold a connection borrow across an await.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use scenecast_core::wire::{self, ForwardAddress};
use scenecast_core::{
    ConnectionError, ConnectionResult, NetProvider, Providers, StreamSocket, TimeProvider,
};
use tokio::io::Interest;
use tracing::{error, info, trace};

use crate::stats::ThroughputRing;

/// The stream type of a provider bundle.
pub type NetStream<P> = <<P as Providers>::Network as NetProvider>::Stream;

/// Bytes of an outbound frame a non-blocking send could not accept.
///
/// The unsent region is `[start, data.len())`; the residue exists only while
/// that region is non-empty.
#[derive(Debug)]
struct SendResidue {
    data: Vec<u8>,
    start: usize,
}

/// One live TCP session.
pub struct Connection<P: Providers> {
    stream: Rc<NetStream<P>>,
    socket: u64,
    id: String,
    peer: SocketAddr,

    /// Random client id assigned on ENTER.
    pub client_id: Option<String>,
    /// Client-declared nickname (NNM).
    pub nickname: Option<String>,
    /// Client-declared scene display name (SCN).
    pub scene_name: Option<String>,
    /// Client-declared scene URL (SCU), the routing key.
    pub scene_url: Option<String>,

    forward: ForwardAddress,
    /// Dotted-decimal form of the forward address, derived on first receipt
    /// and cleared again by BYE.
    pub forward_addr: Option<String>,

    started_at: Duration,
    /// Stamped by the event loop whenever the socket turns readable.
    pub last_receive: Duration,
    /// Stamped whenever bytes go out, and by the idle probe.
    pub last_send: Duration,

    recv_buf: Box<[u8; wire::RECEIVE_BUFFER_LEN]>,
    bytes_read: usize,
    bytes_expected: usize,
    packet_len: usize,

    residue: Option<SendResidue>,

    packets_received: u64,
    bytes_received: u64,
    packets_sent: u64,
    bytes_sent: u64,

    open: bool,
    time: P::Time,
    stats: Rc<RefCell<ThroughputRing>>,
}

impl<P: Providers> Connection<P> {
    /// Wrap a freshly accepted stream.
    pub fn new(
        stream: NetStream<P>,
        peer: SocketAddr,
        id: String,
        time: P::Time,
        stats: Rc<RefCell<ThroughputRing>>,
    ) -> Self {
        let now = time.now();
        let socket = stream.socket_id();
        Self {
            stream: Rc::new(stream),
            socket,
            id,
            peer,
            client_id: None,
            nickname: None,
            scene_name: None,
            scene_url: None,
            forward: ForwardAddress::default(),
            forward_addr: None,
            started_at: now,
            last_receive: now,
            last_send: now,
            recv_buf: Box::new([0u8; wire::RECEIVE_BUFFER_LEN]),
            bytes_read: 0,
            bytes_expected: 0,
            packet_len: 0,
            residue: None,
            packets_received: 0,
            bytes_received: 0,
            packets_sent: 0,
            bytes_sent: 0,
            open: true,
            time,
            stats,
        }
    }

    /// The server-assigned connection id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The socket handle keying this connection in the registry and in
    /// scene member sets.
    pub fn socket(&self) -> u64 {
        self.socket
    }

    /// The remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the session is still usable for I/O.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// A shared handle to the stream for readiness waits.
    pub fn stream_handle(&self) -> Rc<NetStream<P>> {
        self.stream.clone()
    }

    /// The readiness interests this connection currently has.
    pub fn interest(&self) -> Interest {
        if self.has_residue() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    /// Whether a partial send left unsent bytes behind.
    pub fn has_residue(&self) -> bool {
        self.residue.is_some()
    }

    /// Number of buffered bytes still waiting to go out.
    pub fn pending_residue(&self) -> usize {
        self.residue
            .as_ref()
            .map(|r| r.data.len() - r.start)
            .unwrap_or(0)
    }

    /// Length of the last completely assembled frame.
    pub fn packet_len(&self) -> usize {
        self.packet_len
    }

    /// The bytes of the last completely assembled frame.
    pub fn frame_bytes(&self) -> &[u8] {
        &self.recv_buf[..self.packet_len]
    }

    /// Record the forward address parroted from a frame header.
    pub fn set_forward(&mut self, forward: ForwardAddress) {
        self.forward = forward;
        if self.forward_addr.is_none() {
            let addr = forward.display_ip();
            trace!(
                "{} {} forward address {}:{}",
                self.socket, self.peer, addr, forward.port
            );
            self.forward_addr = Some(addr);
        }
    }

    /// Lifetime counters: packets and bytes received and sent.
    pub fn counters(&self) -> (u64, u64, u64, u64) {
        (
            self.packets_received,
            self.bytes_received,
            self.packets_sent,
            self.bytes_sent,
        )
    }

    /// Seconds this session has been alive.
    pub fn session_duration(&self) -> Duration {
        self.time.now().saturating_sub(self.started_at)
    }

    /// Mark the session closed and drop any pending data with it.
    ///
    /// Only the relay state's close cascade calls this; the socket itself
    /// goes away when the last stream handle is dropped.
    pub fn mark_closed(&mut self) {
        if self.open {
            self.open = false;
            let _ = self.stream.set_linger(Some(Duration::ZERO));
        }
    }

    fn read_some(&mut self, len: usize) -> ConnectionResult<usize> {
        if !self.open {
            return Ok(0);
        }
        debug_assert!(len > 0);
        let range = self.bytes_read..self.bytes_read + len;
        match self.stream.try_read(&mut self.recv_buf[range]) {
            Ok(0) => Err(ConnectionError::PeerClosed),
            Ok(n) => {
                self.bytes_read += n;
                self.bytes_received += n as u64;
                Ok(n)
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                Ok(0)
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::ConnectionReset
                    || e.kind() == std::io::ErrorKind::ConnectionAborted =>
            {
                Err(ConnectionError::PeerClosed)
            }
            Err(e) => Err(ConnectionError::Io(e)),
        }
    }

    /// Advance the frame assembler by one readable event.
    ///
    /// Returns `Ok(Some(len))` once a complete frame sits in the buffer (a
    /// NUL is appended behind it and the assembly counters reset), and
    /// `Ok(None)` when more bytes are needed. Errors are connection-fatal.
    pub fn read_frame(&mut self) -> ConnectionResult<Option<usize>> {
        self.packet_len = 0;

        let missing = if self.bytes_expected > 0 {
            self.bytes_expected - self.bytes_read
        } else {
            wire::PREFIX_LEN - self.bytes_read
        };
        if self.bytes_read + missing >= wire::RECEIVE_BUFFER_LEN - 1 {
            return Err(ConnectionError::FrameTooLarge(self.bytes_read + missing));
        }

        if self.read_some(missing)? == 0 {
            return Ok(None);
        }

        if self.bytes_expected == 0 {
            if self.bytes_read < wire::PREFIX_LEN {
                // Not even the length field yet; wait for more data.
                return Ok(None);
            }

            let prefix = wire::FramePrefix::decode(&self.recv_buf[..wire::PREFIX_LEN])?;
            self.bytes_expected = prefix.frame_len();
            if self.bytes_expected >= wire::RECEIVE_BUFFER_LEN - 1 {
                return Err(ConnectionError::FrameTooLarge(self.bytes_expected));
            }
            if self.bytes_expected < self.bytes_read {
                return Err(ConnectionError::ShortPacket(self.bytes_expected));
            }

            // The rest of the frame may already be queued; try for it now.
            let missing = self.bytes_expected - self.bytes_read;
            if missing > 0 && self.read_some(missing)? == 0 {
                return Ok(None);
            }
        }

        if self.bytes_read < self.bytes_expected {
            return Ok(None);
        }

        self.packets_received += 1;
        self.recv_buf[self.bytes_read] = 0;
        self.packet_len = self.bytes_read;
        self.stats
            .borrow_mut()
            .record_received(self.time.now().as_secs(), self.packet_len);

        self.bytes_read = 0;
        self.bytes_expected = 0;
        Ok(Some(self.packet_len))
    }

    /// Send a frame, or flush residue when called with an empty slice.
    ///
    /// Residue-first discipline: while earlier bytes are still buffered, the
    /// new frame is discarded rather than queued, preserving single-writer
    /// FIFO without unbounded buffering. A frame a would-block send rejects
    /// outright is dropped whole; only a partial send creates residue.
    pub fn send_bytes(&mut self, frame: &[u8]) -> ConnectionResult<()> {
        if !self.open {
            return Ok(());
        }

        if let Some(residue) = self.residue.take() {
            let pending = residue.data.len() - residue.start;
            return match self.stream.try_write(&residue.data[residue.start..]) {
                Ok(n) => {
                    self.last_send = self.time.now();
                    self.bytes_sent += n as u64;
                    if n == pending {
                        self.packets_sent += 1;
                        self.stats
                            .borrow_mut()
                            .record_sent(self.time.now().as_secs(), n);
                    } else {
                        self.residue = Some(SendResidue {
                            data: residue.data,
                            start: residue.start + n,
                        });
                    }
                    // The new frame is dropped either way; the residue must
                    // drain before anything else goes out.
                    Ok(())
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::Interrupted =>
                {
                    trace!("{} {} send would block", self.socket, self.peer);
                    self.residue = Some(residue);
                    Ok(())
                }
                Err(e) => {
                    error!("{} {} send failed: {}", self.socket, self.peer, e);
                    self.residue = Some(residue);
                    Err(ConnectionError::Io(e))
                }
            };
        }

        if frame.is_empty() {
            return Ok(());
        }

        match self.stream.try_write(frame) {
            Ok(n) => {
                self.last_send = self.time.now();
                self.bytes_sent += n as u64;
                if n == frame.len() {
                    self.packets_sent += 1;
                    self.stats
                        .borrow_mut()
                        .record_sent(self.time.now().as_secs(), n);
                } else {
                    self.residue = Some(SendResidue {
                        data: frame[n..].to_vec(),
                        start: 0,
                    });
                    trace!(
                        "{} {} buffered {} bytes",
                        self.socket,
                        self.peer,
                        frame.len() - n
                    );
                }
                Ok(())
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                trace!("{} {} send would block", self.socket, self.peer);
                Ok(())
            }
            Err(e) => {
                error!("{} {} send failed: {}", self.socket, self.peer, e);
                Err(ConnectionError::Io(e))
            }
        }
    }

    /// Encode an argument list into a frame and send it.
    ///
    /// The header carries this connection's forward address. The printable
    /// payload is logged with a `>` direction marker.
    pub fn send_arguments(&mut self, args: &[&str]) -> ConnectionResult<()> {
        let frame = wire::encode_arguments(self.forward, args)?;
        info!(
            "> {} {} {}",
            self.peer,
            frame.len(),
            wire::printable(&frame[wire::DATA_OFFSET..], 64)
        );
        self.send_bytes(&frame)
    }
}
