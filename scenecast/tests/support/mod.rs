//! Scripted providers and helpers for driving the relay deterministically.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use rand::prelude::*;
use scenecast::RelayState;
use scenecast::dispatch::dispatch_frame;
use scenecast_core::wire::{self, ForwardAddress};
use scenecast_core::{
    ListenerSocket, NetProvider, Providers, RandomProvider, StreamSocket, TimeProvider,
};
use tokio::io::{Interest, Ready};

/// One step of a stream's read script.
pub enum ReadStep {
    /// Bytes the next `try_read` calls deliver.
    Data(Vec<u8>),
    /// The peer closed the stream.
    Eof,
    /// A read error of the given kind.
    Fail(io::ErrorKind),
}

struct StreamScript {
    id: u64,
    peer: SocketAddr,
    input: RefCell<VecDeque<ReadStep>>,
    write_budget: RefCell<VecDeque<usize>>,
    unlimited_write: Cell<bool>,
    written: RefCell<Vec<u8>>,
    write_error: Cell<Option<io::ErrorKind>>,
}

/// A stream whose reads and writes follow a test-provided script.
///
/// Clones share the same script, so the test keeps a handle to the stream
/// it hands to the relay.
#[derive(Clone)]
pub struct ScriptedStream {
    script: Rc<StreamScript>,
}

impl ScriptedStream {
    pub fn new(id: u64, peer: &str) -> Self {
        Self {
            script: Rc::new(StreamScript {
                id,
                peer: peer.parse().expect("peer address"),
                input: RefCell::new(VecDeque::new()),
                write_budget: RefCell::new(VecDeque::new()),
                unlimited_write: Cell::new(true),
                written: RefCell::new(Vec::new()),
                write_error: Cell::new(None),
            }),
        }
    }

    pub fn push_read(&self, bytes: Vec<u8>) {
        self.script.input.borrow_mut().push_back(ReadStep::Data(bytes));
    }

    pub fn push_eof(&self) {
        self.script.input.borrow_mut().push_back(ReadStep::Eof);
    }

    pub fn push_read_error(&self, kind: io::ErrorKind) {
        self.script.input.borrow_mut().push_back(ReadStep::Fail(kind));
    }

    /// Switch to budgeted writes: each `try_write` accepts at most the next
    /// budget entry; an exhausted budget would-blocks.
    pub fn set_write_budget(&self, budgets: &[usize]) {
        self.script.unlimited_write.set(false);
        *self.script.write_budget.borrow_mut() = budgets.iter().copied().collect();
    }

    pub fn set_write_unlimited(&self) {
        self.script.unlimited_write.set(true);
    }

    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        self.script.write_error.set(Some(kind));
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.script.written.borrow().clone()
    }

    /// Drain and return everything written so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut *self.script.written.borrow_mut())
    }
}

#[async_trait(?Send)]
impl StreamSocket for ScriptedStream {
    async fn ready(&self, interest: Interest) -> io::Result<Ready> {
        let mut ready = Ready::EMPTY;
        if interest.is_readable() && !self.script.input.borrow().is_empty() {
            ready = ready | Ready::READABLE;
        }
        if interest.is_writable() {
            ready = ready | Ready::WRITABLE;
        }
        if ready.is_empty() {
            std::future::pending::<()>().await;
        }
        Ok(ready)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut input = self.script.input.borrow_mut();
        match input.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(ReadStep::Eof) => Ok(0),
            Some(ReadStep::Fail(kind)) => Err(kind.into()),
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    input.push_front(ReadStep::Data(rest));
                }
                Ok(n)
            }
        }
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        if let Some(kind) = self.script.write_error.take() {
            return Err(kind.into());
        }
        if self.script.unlimited_write.get() {
            self.script.written.borrow_mut().extend_from_slice(buf);
            return Ok(buf.len());
        }
        let mut budget = self.script.write_budget.borrow_mut();
        match budget.pop_front() {
            None | Some(0) => Err(io::ErrorKind::WouldBlock.into()),
            Some(limit) => {
                let n = limit.min(buf.len());
                self.script.written.borrow_mut().extend_from_slice(&buf[..n]);
                Ok(n)
            }
        }
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.script.peer)
    }

    fn socket_id(&self) -> u64 {
        self.script.id
    }

    fn set_linger(&self, _linger: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

/// Network provider whose listener never produces connections; tests
/// register scripted streams with the relay state directly.
#[derive(Clone, Default)]
pub struct FakeNet;

pub struct FakeListener;

#[async_trait(?Send)]
impl NetProvider for FakeNet {
    type Stream = ScriptedStream;
    type Listener = FakeListener;

    async fn bind(&self, _addr: &str, _backlog: u32) -> io::Result<FakeListener> {
        Ok(FakeListener)
    }
}

#[async_trait(?Send)]
impl ListenerSocket for FakeListener {
    type Stream = ScriptedStream;

    async fn accept(&self) -> io::Result<(ScriptedStream, SocketAddr)> {
        std::future::pending().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok("127.0.0.1:0".parse().expect("address"))
    }
}

/// A clock that only moves when the test says so.
#[derive(Clone)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, delta: Duration) {
        self.now.set(self.now.get() + delta);
    }
}

#[async_trait(?Send)]
impl TimeProvider for ManualClock {
    async fn sleep(&self, _duration: Duration) {
        // Tests drive the relay by hand; nothing ever waits on this.
        std::future::pending::<()>().await
    }

    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Deterministic randomness for reproducible client ids.
#[derive(Clone)]
pub struct SeededRandom {
    rng: Rc<RefCell<rand::rngs::StdRng>>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Rc::new(RefCell::new(rand::rngs::StdRng::seed_from_u64(seed))),
        }
    }
}

impl RandomProvider for SeededRandom {
    fn random<T>(&self) -> T
    where
        rand::distr::StandardUniform: rand::distr::Distribution<T>,
    {
        self.rng.borrow_mut().random()
    }
}

/// Provider bundle wiring the scripted implementations together.
#[derive(Clone)]
pub struct TestProviders {
    net: FakeNet,
    clock: ManualClock,
    random: SeededRandom,
}

impl TestProviders {
    pub fn new() -> Self {
        Self {
            net: FakeNet,
            clock: ManualClock::new(),
            random: SeededRandom::new(7),
        }
    }

    /// A handle on the manual clock for fast-forwarding.
    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }
}

impl Providers for TestProviders {
    type Network = FakeNet;
    type Time = ManualClock;
    type Random = SeededRandom;

    fn network(&self) -> &Self::Network {
        &self.net
    }

    fn time(&self) -> &Self::Time {
        &self.clock
    }

    fn random(&self) -> &Self::Random {
        &self.random
    }
}

/// Fresh relay state over scripted providers.
pub fn new_state() -> RelayState<TestProviders> {
    RelayState::new(TestProviders::new())
}

/// The forward address test clients stamp into their frame headers.
pub fn test_forward() -> ForwardAddress {
    ForwardAddress {
        ip: 0x0a00_0001,
        port: 7000,
    }
}

/// Build a client frame from an argument list.
pub fn client_frame(args: &[&str]) -> Vec<u8> {
    wire::encode_arguments(test_forward(), args).expect("client frame")
}

/// Drive one readable event the way the event loop does: stamp the receive
/// time, advance the frame assembler, dispatch a complete frame, close on
/// any error.
pub fn pump(state: &mut RelayState<TestProviders>, socket: u64) {
    let Some(conn) = state.connections.get(socket) else {
        return;
    };
    let now = state.providers.time().now();
    let read = {
        let mut c = conn.borrow_mut();
        c.last_receive = now;
        c.read_frame()
    };
    match read {
        Ok(Some(_)) => {
            if dispatch_frame(state, socket).is_err() {
                state.close_connection(socket);
            }
        }
        Ok(None) => {}
        Err(_) => state.close_connection(socket),
    }
}

/// Split a written-bytes capture into frames and parse each one's payload
/// into its argument vector.
pub fn parse_frames(bytes: &[u8]) -> Vec<Vec<String>> {
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset + wire::DATA_OFFSET <= bytes.len() {
        let frame_len = 2 + u16::from_be_bytes([bytes[offset], bytes[offset + 1]]) as usize;
        frames.push(wire::parse_arguments(
            &bytes[offset + wire::DATA_OFFSET..offset + frame_len],
        ));
        offset += frame_len;
    }
    frames
}

/// Whether a string is a server-assigned id: exactly 8 lowercase hex chars.
pub fn is_hex8(value: &str) -> bool {
    value.len() == 8
        && value
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}
