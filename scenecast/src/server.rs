//! The relay state and the readiness-multiplexing event loop.
//!
//! Single-threaded cooperative model: every state transition happens inside
//! the event-loop turn that observed its trigger. The only suspension points
//! are the readiness wait (capped at the poll interval) and the individual
//! non-blocking syscalls behind it.

use std::cell::{Cell, RefCell};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use scenecast_core::{ListenerSocket, NetProvider, Providers, StreamSocket, TimeProvider};
use tokio::io::Ready;
use tracing::{error, info, trace};

use crate::config::RelayConfig;
use crate::connection::{Connection, NetStream};
use crate::dispatch;
use crate::ident::{CONNECTION_ID_BASE, IdSequence, REQUEST_ID_BASE};
use crate::registry::ConnectionRegistry;
use crate::scene::SceneRegistry;
use crate::stats::ThroughputRing;

/// The listener type of a provider bundle.
type NetListener<P> = <<P as Providers>::Network as NetProvider>::Listener;

/// Everything the event loop owns: registries, id sequences, statistics.
///
/// Accessed only from the event loop (or a test driving it by hand); there
/// is no locking anywhere because there is nothing to lock against.
pub struct RelayState<P: Providers> {
    /// The provider bundle.
    pub providers: P,
    /// All live connections, keyed by socket handle.
    pub connections: ConnectionRegistry<P>,
    /// All live scenes.
    pub scenes: SceneRegistry,
    /// Connection id sequence.
    pub connection_ids: IdSequence,
    /// Process-wide request id sequence, shared by keep-alive probes and
    /// SET fan-out.
    pub request_ids: IdSequence,
    /// Per-second throughput ring, shared with every connection.
    pub stats: Rc<RefCell<ThroughputRing>>,
}

impl<P: Providers> RelayState<P> {
    /// Create empty relay state around a provider bundle.
    pub fn new(providers: P) -> Self {
        Self {
            providers,
            connections: ConnectionRegistry::new(),
            scenes: SceneRegistry::new(),
            connection_ids: IdSequence::new(CONNECTION_ID_BASE),
            request_ids: IdSequence::new(REQUEST_ID_BASE),
            stats: Rc::new(RefCell::new(ThroughputRing::new())),
        }
    }

    /// Register a freshly accepted stream as a connection.
    ///
    /// A connection already registered under the same socket handle is
    /// closed and replaced.
    pub fn add_connection(
        &mut self,
        stream: NetStream<P>,
        peer: SocketAddr,
    ) -> Rc<RefCell<Connection<P>>> {
        let id = self.connection_ids.next_id();
        let conn = Rc::new(RefCell::new(Connection::new(
            stream,
            peer,
            id,
            self.providers.time().clone(),
            self.stats.clone(),
        )));
        if let Some(displaced) = self.connections.insert(conn.clone()) {
            self.close_handle(displaced);
        }
        conn
    }

    /// Close a connection and run the full cascade.
    ///
    /// Removes it from the registry and from its scene's member set, shuts
    /// the socket down with linger-0, and destroys the scene if it emptied.
    /// Closing an unknown socket is a no-op, so error paths may call this
    /// without checking whether someone else got there first.
    pub fn close_connection(&mut self, socket: u64) {
        let Some(conn) = self.connections.remove(socket) else {
            return;
        };
        self.close_handle(conn);
    }

    fn close_handle(&mut self, conn: Rc<RefCell<Connection<P>>>) {
        let scene = {
            let mut c = conn.borrow_mut();
            let socket = c.socket();
            let scene = c
                .scene_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .and_then(|url| self.scenes.find_by_url(url));
            if let Some(scene) = &scene {
                scene.borrow_mut().members.remove(&socket);
            }
            c.mark_closed();

            info!(
                "connection closed: id {} client id {}",
                c.id(),
                c.client_id.as_deref().unwrap_or("?")
            );
            let (pr, br, ps, bs) = c.counters();
            info!(
                "{} {} up {}s, {} pkts / {} B in, {} pkts / {} B out, {} connections left",
                socket,
                c.peer(),
                c.session_duration().as_secs(),
                pr,
                br,
                ps,
                bs,
                self.connections.len()
            );
            scene
        };

        if let Some(scene) = scene {
            if scene.borrow().members.is_empty() {
                {
                    let s = scene.borrow();
                    info!("scene destroyed: id {} url {}", s.id, s.url);
                }
                self.scenes.destroy(&scene);
            }
        }
    }

    /// Probe quiet connections and reap the silent ones.
    ///
    /// A connection quiet in both directions for a quarter of the timeout
    /// gets a PING; one that has not been heard from for the whole timeout
    /// is closed. The sweep restarts from the top after every close, since
    /// closing invalidates the iteration.
    pub fn sweep_idle(&mut self, idle_timeout: Duration) {
        let quarter = idle_timeout / 4;
        loop {
            let now = self.providers.time().now();
            let mut closed = false;
            for socket in self.connections.sockets() {
                let Some(conn) = self.connections.get(socket) else {
                    continue;
                };
                let (idle_recv, idle_send, id) = {
                    let c = conn.borrow();
                    (
                        now.saturating_sub(c.last_receive),
                        now.saturating_sub(c.last_send),
                        c.id().to_string(),
                    )
                };

                if idle_recv > quarter && idle_send > quarter {
                    let request_id = self.request_ids.next_id();
                    let mut c = conn.borrow_mut();
                    if let Err(err) = c.send_arguments(&["RQ", &request_id, &id, "PING"]) {
                        // The timeout below reaps the peer if it is gone.
                        trace!("{} keep-alive probe failed: {}", socket, err);
                    }
                    c.last_send = now;
                }

                if idle_recv > idle_timeout {
                    {
                        let c = conn.borrow();
                        info!("{} {} idle timeout", socket, c.peer());
                    }
                    self.close_connection(socket);
                    closed = true;
                    break;
                }
            }
            if !closed {
                break;
            }
        }
    }
}

enum Wake<S> {
    Accepted(io::Result<(S, SocketAddr)>),
    Socket(u64, io::Result<Ready>),
    Tick,
}

/// The relay server: a listener plus the event loop over the relay state.
pub struct RelayServer<P: Providers> {
    config: RelayConfig,
    state: RelayState<P>,
    listener: NetListener<P>,
    shutdown: Rc<Cell<bool>>,
    last_periodic: Duration,
}

impl<P: Providers> RelayServer<P> {
    /// Bind the listen socket and set up empty relay state.
    pub async fn bind(providers: P, config: RelayConfig) -> io::Result<Self> {
        let listener = providers
            .network()
            .bind(&config.listen_addr(), config.listen_backlog)
            .await?;
        match listener.local_addr() {
            Ok(addr) => info!("listening on {}, backlog {}", addr, config.listen_backlog),
            Err(_) => info!("listening, backlog {}", config.listen_backlog),
        }
        let last_periodic = providers.time().now();
        Ok(Self {
            config,
            state: RelayState::new(providers),
            listener,
            shutdown: Rc::new(Cell::new(false)),
            last_periodic,
        })
    }

    /// A flag that makes the loop wind down when set.
    pub fn shutdown_handle(&self) -> Rc<Cell<bool>> {
        self.shutdown.clone()
    }

    /// The address the listener actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The relay state, for inspection.
    pub fn state(&self) -> &RelayState<P> {
        &self.state
    }

    /// Run the event loop until the shutdown flag is set.
    pub async fn run(&mut self) {
        info!("relay loop running");
        while !self.shutdown.get() {
            let now = self.state.providers.time().now();
            if now.saturating_sub(self.last_periodic) >= self.config.periodic_interval {
                self.last_periodic = now;
                self.periodic_pass(now);
            }

            let wake = self.wait_for_event().await;
            if self.shutdown.get() {
                break;
            }

            match wake {
                Wake::Tick => {
                    let now_secs = self.state.providers.time().now().as_secs();
                    self.state.stats.borrow_mut().touch(now_secs);
                }
                Wake::Accepted(Ok((stream, peer))) => {
                    let conn = self.state.add_connection(stream, peer);
                    let socket = conn.borrow().socket();
                    info!(
                        "accepted {} from {}, {} connections",
                        socket,
                        peer,
                        self.state.connections.len()
                    );
                }
                Wake::Accepted(Err(e)) => {
                    if e.kind() != io::ErrorKind::Interrupted {
                        error!("accept failed: {}", e);
                    }
                }
                Wake::Socket(socket, Ok(ready)) => {
                    if ready.is_writable() && !self.flush_residue(socket) {
                        continue;
                    }
                    if ready.is_readable() {
                        self.handle_readable(socket);
                    }
                }
                Wake::Socket(socket, Err(e)) => {
                    error!("{} readiness wait failed: {}", socket, e);
                    self.state.close_connection(socket);
                }
            }
        }
        self.drain();
    }

    /// One readiness wait, capped at the poll interval.
    ///
    /// The interest sets are rebuilt from the registry on every call, so a
    /// connection closed in the previous turn simply is not raced anymore;
    /// there is no persistent mask to invalidate.
    async fn wait_for_event(&self) -> Wake<NetStream<P>> {
        let mut readiness: FuturesUnordered<_> = self
            .state
            .connections
            .iter()
            .map(|(&socket, conn)| {
                let (stream, interest) = {
                    let c = conn.borrow();
                    (c.stream_handle(), c.interest())
                };
                async move { (socket, stream.ready(interest).await) }
            })
            .collect();

        tokio::select! {
            accepted = self.listener.accept() => Wake::Accepted(accepted),
            Some((socket, ready)) = readiness.next() => Wake::Socket(socket, ready),
            _ = self.state.providers.time().sleep(self.config.poll_interval) => Wake::Tick,
        }
    }

    /// Flush pending residue; returns false if the connection was closed.
    fn flush_residue(&mut self, socket: u64) -> bool {
        let Some(conn) = self.state.connections.get(socket) else {
            return false;
        };
        let result = conn.borrow_mut().send_bytes(&[]);
        if let Err(err) = result {
            error!("{} flush failed: {}", socket, err);
            self.state.close_connection(socket);
            return false;
        }
        true
    }

    fn handle_readable(&mut self, socket: u64) {
        let Some(conn) = self.state.connections.get(socket) else {
            return;
        };
        let read = {
            let mut c = conn.borrow_mut();
            c.last_receive = self.state.providers.time().now();
            c.read_frame()
        };
        match read {
            Ok(Some(_)) => {
                if let Err(err) = dispatch::dispatch_frame(&mut self.state, socket) {
                    self.close_after_error(socket, err);
                }
            }
            Ok(None) => {}
            Err(err) => self.close_after_error(socket, err),
        }
    }

    fn close_after_error(&mut self, socket: u64, err: scenecast_core::ConnectionError) {
        if err.is_peer_close() {
            trace!("{} closed by foreign host", socket);
        } else {
            error!("{} dropped: {}", socket, err);
        }
        self.state.close_connection(socket);
    }

    fn periodic_pass(&mut self, now: Duration) {
        let connections = self.state.connections.len();
        let added = self.state.connections.added;
        let removed = self.state.connections.removed;
        info!(
            "{} connections ({} added, {} removed), {} total, {} scenes live, {} scenes total",
            connections,
            added,
            removed,
            self.state.connections.total,
            self.state.scenes.len(),
            self.state.scenes.scenes_total
        );
        if connections > 0 || added > 0 || removed > 0 {
            self.state.connections.added = 0;
            self.state.connections.removed = 0;
            self.state.stats.borrow().log_report(now.as_secs());
        }
        self.state.sweep_idle(self.config.idle_timeout);
    }

    /// Close every connection, then every remaining scene.
    fn drain(&mut self) {
        for socket in self.state.connections.sockets() {
            self.state.close_connection(socket);
        }
        for scene in self.state.scenes.all() {
            self.state.scenes.destroy(&scene);
        }
        info!("listening socket closed, going down");
    }
}
