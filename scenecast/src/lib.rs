//! # scenecast
//!
//! A lightweight publish/subscribe relay for augmented-reality clients.
//!
//! Clients connect over TCP, ENTER a scene named by a URL, and from then on
//! SET key/value pairs that the relay fans out to every member of the same
//! scene. The relay probes quiet connections with PING and reaps the silent
//! ones.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │  Event loop (server)                            │
//! │  • readiness multiplexing, 100 ms poll cap      │
//! │  • periodic pass: status, throughput, idle sweep│
//! ├─────────────────────────────────────────────────┤
//! │  Dispatcher (dispatch)                          │
//! │  • ENTER / SET / PING / BYE                     │
//! ├─────────────────────────────────────────────────┤
//! │  Connections + scenes (connection, registry,    │
//! │  scene) — weak cross-references via socket ids  │
//! ├─────────────────────────────────────────────────┤
//! │  Framed transport (scenecast-core wire +        │
//! │  connection I/O) — partial reads, send residue  │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on one thread; the provider seams in `scenecast-core`
//! let the whole stack run against scripted streams and a manual clock in
//! tests.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod ident;
pub mod process;
pub mod registry;
pub mod scene;
pub mod server;
pub mod stats;

pub use config::RelayConfig;
pub use server::{RelayServer, RelayState};
