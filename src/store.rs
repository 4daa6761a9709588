//! Connection records and the capacity-bounded connection store.
//!
//! The store is indexed both by peer address and by local Connection ID.
//! On overflow the least-recently-used connection is evicted, but only if
//! it has passed the stale threshold; otherwise the new handshake is
//! refused. Failed handshakes release their slot immediately.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::engine::Engine;
use crate::error::Error;
use crate::handshake::Handshaker;
use crate::message::{ConnectionId, Random};
use crate::session::Session;

/// Per-peer state: the engine (record layer + flights), the in-progress
/// handshaker and the established session.
///
/// Invariant: at most one in-progress handshaker per connection.
pub(crate) struct Connection {
    pub peer: SocketAddr,
    pub engine: Engine,
    pub handshaker: Option<Handshaker>,
    pub session: Option<Session>,
    /// Random of the ClientHello this (server-side) connection was created
    /// from. A cookie-verified hello with a *different* random is a new
    /// handshake attempt, not a retransmission.
    pub hello_random: Option<Random>,
    pub last_activity: Instant,
}

impl Connection {
    pub fn new(peer: SocketAddr, engine: Engine, handshaker: Handshaker, now: Instant) -> Self {
        Connection {
            peer,
            engine,
            handshaker: Some(handshaker),
            session: None,
            hello_random: None,
            last_activity: now,
        }
    }

    pub fn is_established(&self) -> bool {
        self.session.is_some()
    }

    pub fn local_cid(&self) -> &ConnectionId {
        self.engine.local_cid()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("established", &self.is_established())
            .finish_non_exhaustive()
    }
}

pub(crate) struct ConnectionStore {
    capacity: usize,
    stale_after: Duration,
    slots: Vec<Option<Connection>>,
    free: Vec<usize>,
    by_addr: HashMap<SocketAddr, usize>,
    by_cid: HashMap<ConnectionId, usize>,
}

impl ConnectionStore {
    pub fn new(capacity: usize, stale_after: Duration) -> Self {
        ConnectionStore {
            capacity,
            stale_after,
            slots: Vec::new(),
            free: Vec::new(),
            by_addr: HashMap::new(),
            by_cid: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.len()
    }

    pub fn get_by_address(&self, addr: &SocketAddr) -> Option<usize> {
        self.by_addr.get(addr).copied()
    }

    pub fn get_by_cid(&self, cid: &ConnectionId) -> Option<usize> {
        if cid.is_empty() {
            return None;
        }
        self.by_cid.get(cid).copied()
    }

    pub fn get(&self, index: usize) -> Option<&Connection> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Connection> {
        self.slots.get_mut(index).and_then(|s| s.as_mut())
    }

    pub fn touch(&mut self, index: usize, now: Instant) {
        if let Some(conn) = self.get_mut(index) {
            conn.last_activity = now;
        }
    }

    /// Indices of all live connections.
    pub fn indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }

    /// Insert a connection, evicting a stale LRU entry if needed.
    ///
    /// Local CIDs must be unique in the store at any time; a collision is
    /// an internal error (the caller draws CIDs from the store's RNG space).
    pub fn insert(&mut self, connection: Connection, now: Instant) -> Result<usize, Error> {
        if self.remaining_capacity() == 0 && !self.evict_stale_lru(now) {
            return Err(Error::ResourceExhausted("connection store full"));
        }

        let cid = *connection.local_cid();
        if !cid.is_empty() && self.by_cid.contains_key(&cid) {
            return Err(Error::CryptoError("connection id collision".to_string()));
        }

        // A new handshake from an address replaces nothing here; lookups
        // happen before insertion.
        let index = match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(connection);
                i
            }
            None => {
                self.slots.push(Some(connection));
                self.slots.len() - 1
            }
        };

        let conn = self.slots[index].as_ref().expect("just inserted");
        self.by_addr.insert(conn.peer, index);
        if !cid.is_empty() {
            self.by_cid.insert(cid, index);
        }

        Ok(index)
    }

    /// Evict the least-recently-used connection older than the stale
    /// threshold. Returns whether a slot was freed.
    fn evict_stale_lru(&mut self, now: Instant) -> bool {
        let mut lru: Option<(usize, Instant)> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(conn) = slot {
                if now.duration_since(conn.last_activity) < self.stale_after {
                    continue;
                }
                if lru.map(|(_, t)| conn.last_activity < t).unwrap_or(true) {
                    lru = Some((i, conn.last_activity));
                }
            }
        }

        match lru {
            Some((index, _)) => {
                debug!("Evicting stale connection at slot {}", index);
                self.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove connections idle past the stale threshold. Returns the evicted
    /// connections so the caller can emit events.
    pub fn sweep_stale(&mut self, now: Instant) -> Vec<Connection> {
        let stale: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.as_ref().and_then(|c| {
                    (now.duration_since(c.last_activity) >= self.stale_after).then_some(i)
                })
            })
            .collect();

        stale.into_iter().filter_map(|i| self.remove(i)).collect()
    }

    pub fn remove(&mut self, index: usize) -> Option<Connection> {
        let connection = self.slots.get_mut(index)?.take()?;
        self.free.push(index);
        self.by_addr.remove(&connection.peer);
        let cid = *connection.local_cid();
        if !cid.is_empty() {
            self.by_cid.remove(&cid);
        }
        Some(connection)
    }

    /// Re-index a connection after the peer's address changed (CID routing
    /// across a NAT rebind).
    pub fn rebind(&mut self, index: usize, new_addr: SocketAddr) {
        let Some(conn) = self.slots.get_mut(index).and_then(|s| s.as_mut()) else {
            return;
        };
        let old = conn.peer;
        if old == new_addr {
            return;
        }
        debug!("Peer address changed {} -> {}", old, new_addr);
        conn.peer = new_addr;
        self.by_addr.remove(&old);
        self.by_addr.insert(new_addr, index);
    }
}

impl std::fmt::Debug for ConnectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStore")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
