//! Client registry: who is connected, keyed by the endpoint the relay saw.
//!
//! A [`ClientRegistry`] is one scope: a map from `"a.b.c.d:port"` keys to
//! [`SharedHandle`]s.  A [`RoomRegistry`] owns a process-global scope (TCP
//! clients) plus one lazily created scope per WebSocket room.  An empty room
//! is removed as soon as its last client leaves.
//!
//! # Locking
//!
//! One `RwLock` guards the room map and one guards each scope.  Routing only
//! takes read locks.  When both are held the room map is always locked first.
//! Room removal re-checks emptiness under the room map's write lock, and
//! joins happen under its read lock, so a client can never join a room that is
//! being removed.
//!
//! Handles are closed and sent to outside the scope lock wherever the
//! operation allows it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use ipx_core::{to_endpoint, AddressError, TransportAddress};
use tracing::{debug, info, trace};

use crate::domain::{same_handle, SharedHandle};

/// Registry key for a connected peer: its IPv4 endpoint as a string.
///
/// # Errors
///
/// Returns [`AddressError::NotIpv4`] for peers with no IPv4 form.
pub fn peer_key(peer: SocketAddr) -> Result<String, AddressError> {
    Ok(to_endpoint(&TransportAddress::from_socket_addr(peer)?))
}

/// One routing scope.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, SharedHandle>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handle` under `key`, closing any handle it replaces.
    pub fn connect(&self, key: &str, handle: SharedHandle) {
        let previous = self.write().insert(key.to_string(), Arc::clone(&handle));

        if let Some(old) = previous {
            if !same_handle(&old, &handle) {
                debug!(key, "replacing existing connection");
                old.close();
            }
        }
    }

    /// Removes and returns whatever is stored under `key`.
    pub fn disconnect(&self, key: &str) -> Option<SharedHandle> {
        self.write().remove(key)
    }

    /// Removes `key` only while it still maps to `handle`.
    ///
    /// A session whose entry was taken over by a reconnect must not remove
    /// its successor on the way out.
    pub fn release(&self, key: &str, handle: &SharedHandle) -> bool {
        let mut clients = self.write();
        match clients.get(key) {
            Some(current) if same_handle(current, handle) => {
                clients.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, key: &str) -> Option<SharedHandle> {
        self.read().get(key).cloned()
    }

    /// Sends `frame` to every client in the scope except `exclude`.
    ///
    /// Works on a snapshot taken at the start of the call: clients joining
    /// or leaving meanwhile may or may not receive the frame.  Returns how many
    /// clients accepted it.
    pub fn broadcast(&self, exclude: &SharedHandle, frame: &Bytes) -> usize {
        let recipients: Vec<SharedHandle> = self
            .read()
            .values()
            .filter(|handle| !same_handle(handle, exclude))
            .cloned()
            .collect();

        let mut delivered = 0;
        for handle in recipients {
            match handle.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => trace!("broadcast recipient skipped: {e}"),
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SharedHandle>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SharedHandle>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The global scope plus one scope per room.
///
/// Every operation takes `room: Option<&str>`; `None` is the global scope,
/// which is never removed.
#[derive(Default)]
pub struct RoomRegistry {
    global: ClientRegistry,
    rooms: RwLock<HashMap<String, Arc<ClientRegistry>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handle` under `key` in `room`, creating the room if needed.
    pub fn connect(&self, room: Option<&str>, key: &str, handle: SharedHandle) {
        let Some(room) = room else {
            return self.global.connect(key, handle);
        };

        {
            let rooms = self.read_rooms();
            if let Some(scope) = rooms.get(room) {
                scope.connect(key, handle);
                return;
            }
        }

        let mut rooms = self.write_rooms();
        let scope = rooms.entry(room.to_string()).or_insert_with(|| {
            info!(room, "room created");
            Arc::default()
        });
        scope.connect(key, handle);
    }

    pub fn disconnect(&self, room: Option<&str>, key: &str) -> Option<SharedHandle> {
        let Some(room) = room else {
            return self.global.disconnect(key);
        };

        let (removed, now_empty) = {
            let rooms = self.read_rooms();
            let scope = rooms.get(room)?;
            let removed = scope.disconnect(key);
            (removed, scope.is_empty())
        };
        if now_empty {
            self.remove_if_empty(room);
        }
        removed
    }

    /// Removes `key` from `room` only while it still maps to `handle`.
    pub fn release(&self, room: Option<&str>, key: &str, handle: &SharedHandle) -> bool {
        let Some(room) = room else {
            return self.global.release(key, handle);
        };

        let (released, now_empty) = {
            let rooms = self.read_rooms();
            let Some(scope) = rooms.get(room) else {
                return false;
            };
            let released = scope.release(key, handle);
            (released, scope.is_empty())
        };
        if now_empty {
            self.remove_if_empty(room);
        }
        released
    }

    pub fn lookup(&self, room: Option<&str>, key: &str) -> Option<SharedHandle> {
        match room {
            None => self.global.lookup(key),
            Some(room) => self.scope(room)?.lookup(key),
        }
    }

    /// Sends `frame` to every client in `room` except `exclude`.
    pub fn broadcast(&self, room: Option<&str>, exclude: &SharedHandle, frame: &Bytes) -> usize {
        match room {
            None => self.global.broadcast(exclude, frame),
            Some(room) => self
                .scope(room)
                .map_or(0, |scope| scope.broadcast(exclude, frame)),
        }
    }

    /// Number of live rooms (the global scope is not counted).
    pub fn room_count(&self) -> usize {
        self.read_rooms().len()
    }

    pub fn contains_room(&self, room: &str) -> bool {
        self.read_rooms().contains_key(room)
    }

    /// Number of clients in `room`, or in the global scope for `None`.
    pub fn client_count(&self, room: Option<&str>) -> usize {
        match room {
            None => self.global.len(),
            Some(room) => self.scope(room).map_or(0, |scope| scope.len()),
        }
    }

    fn scope(&self, room: &str) -> Option<Arc<ClientRegistry>> {
        self.read_rooms().get(room).cloned()
    }

    fn remove_if_empty(&self, room: &str) {
        let mut rooms = self.write_rooms();
        if rooms.get(room).is_some_and(|scope| scope.is_empty()) {
            rooms.remove(room);
            info!(room, "room removed");
        }
    }

    fn read_rooms(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ClientRegistry>>> {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rooms(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ClientRegistry>>> {
        self.rooms.write().unwrap_or_else(PoisonError::into_inner)
    }
}
