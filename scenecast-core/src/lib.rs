//! # scenecast-core
//!
//! Core abstractions for the scenecast relay.
//!
//! This crate provides the seams that let the relay's state machines run
//! identically against real sockets and scripted test doubles. Application
//! code depends on these abstractions rather than concrete implementations.
//!
//! ## The Provider Pattern
//!
//! The relay interacts with the outside world through a small set of
//! operations: time, networking, and randomness. By abstracting these behind
//! traits, deterministic implementations can be substituted during testing.
//!
//! | Trait | Production | Purpose |
//! |-------|------------|---------|
//! | [`TimeProvider`] | Wall clock | Sleep, now() |
//! | [`NetProvider`] | Real TCP | Bind, accept, readiness, try-I/O |
//! | [`RandomProvider`] | Thread-local RNG | Client id assignment |
//!
//! **Important**: Never call tokio directly in application code.
//! - ❌ `tokio::time::sleep()`
//! - ✅ `time_provider.sleep()`
//!
//! The [`wire`] module carries the relay's frame format: a 10-byte big-endian
//! header followed by a NUL-delimited argument list.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod error;
mod network;
mod providers;
mod random;
mod time;

/// Frame layout, argument encoding, and parsing.
pub mod wire;

pub use error::{ConnectionError, ConnectionResult};
pub use network::{ListenerSocket, NetProvider, StreamSocket, TokioListener, TokioNetProvider};
pub use providers::{Providers, TokioProviders};
pub use random::{RandomProvider, TokioRandomProvider};
pub use time::{TimeProvider, TokioTimeProvider};
pub use wire::WireError;
