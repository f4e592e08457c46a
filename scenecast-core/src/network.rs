//! Network provider abstraction for real and scripted networking.
//!
//! The relay is a readiness-multiplexing loop with explicit handling of
//! partial reads and partial writes, so the stream seam exposes readiness
//! and try-I/O primitives rather than buffered async read/write. All stream
//! methods take `&self`; streams are shared behind `Rc` so the event loop
//! can await readiness without holding any connection borrow.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{Interest, Ready};

/// Provider trait for creating listeners.
///
/// Single-core design - no Send bounds needed.
/// Clone allows sharing providers cheaply.
#[async_trait(?Send)]
pub trait NetProvider: Clone {
    /// The stream type produced by this provider's listeners.
    type Stream: StreamSocket + 'static;
    /// The listener type for this provider.
    type Listener: ListenerSocket<Stream = Self::Stream> + 'static;

    /// Create a TCP listener bound to the given address with the given
    /// accept backlog.
    async fn bind(&self, addr: &str, backlog: u32) -> io::Result<Self::Listener>;
}

/// Trait for listeners that can accept connections.
#[async_trait(?Send)]
pub trait ListenerSocket {
    /// The stream type this listener produces.
    type Stream: StreamSocket + 'static;

    /// Accept a single incoming connection.
    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Get the local address this listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Trait for non-blocking connection streams.
#[async_trait(?Send)]
pub trait StreamSocket {
    /// Wait until the stream is ready for any of the given interests.
    async fn ready(&self, interest: Interest) -> io::Result<Ready>;

    /// Attempt a non-blocking read into `buf`.
    ///
    /// `Ok(0)` means the peer closed the stream; `WouldBlock` means no data
    /// is available right now.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Attempt a non-blocking write of `buf`, returning how many bytes the
    /// kernel accepted.
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;

    /// The remote address of this stream.
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// A stable integer handle for this stream (the raw fd in production).
    ///
    /// Used as the connection registry key and as the scene member set key.
    fn socket_id(&self) -> u64;

    /// Configure SO_LINGER; `Some(Duration::ZERO)` drops pending data on
    /// close.
    fn set_linger(&self, linger: Option<Duration>) -> io::Result<()>;
}

/// Real Tokio networking implementation.
#[derive(Debug, Clone)]
pub struct TokioNetProvider;

impl TokioNetProvider {
    /// Create a new Tokio network provider.
    pub fn new() -> Self {
        Self
    }
}

impl Default for TokioNetProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl NetProvider for TokioNetProvider {
    type Stream = tokio::net::TcpStream;
    type Listener = TokioListener;

    async fn bind(&self, addr: &str, backlog: u32) -> io::Result<Self::Listener> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let socket = tokio::net::TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let inner = socket.listen(backlog)?;
        Ok(TokioListener { inner })
    }
}

/// Wrapper for Tokio TcpListener to implement our trait.
#[derive(Debug)]
pub struct TokioListener {
    inner: tokio::net::TcpListener,
}

#[async_trait(?Send)]
impl ListenerSocket for TokioListener {
    type Stream = tokio::net::TcpStream;

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)> {
        self.inner.accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[async_trait(?Send)]
impl StreamSocket for tokio::net::TcpStream {
    async fn ready(&self, interest: Interest) -> io::Result<Ready> {
        tokio::net::TcpStream::ready(self, interest).await
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        tokio::net::TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        tokio::net::TcpStream::try_write(self, buf)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        tokio::net::TcpStream::peer_addr(self)
    }

    #[cfg(unix)]
    fn socket_id(&self) -> u64 {
        use std::os::fd::AsRawFd;
        self.as_raw_fd() as u64
    }

    #[cfg(windows)]
    fn socket_id(&self) -> u64 {
        use std::os::windows::io::AsRawSocket;
        self.as_raw_socket()
    }

    fn set_linger(&self, linger: Option<Duration>) -> io::Result<()> {
        tokio::net::TcpStream::set_linger(self, linger)
    }
}
