//! The connection registry: socket handle to connection.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use scenecast_core::Providers;
use tracing::info;

use crate::connection::Connection;

/// Mapping from socket handle to its connection.
///
/// Values are the exclusively owning handles; everything else (scene member
/// sets, readiness futures) refers back here through the socket id.
pub struct ConnectionRegistry<P: Providers> {
    map: HashMap<u64, Rc<RefCell<Connection<P>>>>,

    /// Connections accepted since the last periodic report.
    pub added: u64,
    /// Connections removed since the last periodic report.
    pub removed: u64,
    /// Connections accepted over the lifetime of the process.
    pub total: u64,
}

impl<P: Providers> ConnectionRegistry<P> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            added: 0,
            removed: 0,
            total: 0,
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether there are no live connections.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look up a connection by socket handle.
    pub fn get(&self, socket: u64) -> Option<Rc<RefCell<Connection<P>>>> {
        self.map.get(&socket).cloned()
    }

    /// Insert a connection under its socket handle.
    ///
    /// Returns any connection previously registered under the same handle;
    /// the caller must close it.
    pub fn insert(&mut self, conn: Rc<RefCell<Connection<P>>>) -> Option<Rc<RefCell<Connection<P>>>> {
        let socket = conn.borrow().socket();
        let displaced = self.map.insert(socket, conn);
        if displaced.is_some() {
            info!("connection for socket {} already existed in map", socket);
        }
        self.added += 1;
        self.total += 1;
        displaced
    }

    /// Remove a connection by socket handle.
    pub fn remove(&mut self, socket: u64) -> Option<Rc<RefCell<Connection<P>>>> {
        let removed = self.map.remove(&socket);
        if removed.is_some() {
            self.removed += 1;
        }
        removed
    }

    /// A snapshot of the registered socket handles.
    ///
    /// Iteration works on the snapshot so closing a connection mid-walk can
    /// never invalidate it.
    pub fn sockets(&self) -> Vec<u64> {
        self.map.keys().copied().collect()
    }

    /// Iterate over all live connections.
    pub fn iter(&self) -> impl Iterator<Item = (&u64, &Rc<RefCell<Connection<P>>>)> {
        self.map.iter()
    }
}

impl<P: Providers> Default for ConnectionRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}
