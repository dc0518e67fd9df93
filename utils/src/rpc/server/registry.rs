use parking_lot::Mutex;
use std::{collections::HashMap, net::SocketAddr};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct ConnectionEntry {
    peer: SocketAddr,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<Uuid, ConnectionEntry>,
    closed: bool,
}

/// Bookkeeping of the open accepted connections.
///
/// Each entry holds the cancellation token of its handler, closing a
/// connection means cancelling that token; the handler then drops its socket.
/// All operations take the same lock, so a registration can never interleave
/// with `close_all`.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` once [`close_all`](Self::close_all) has run, the
    /// caller must then drop the connection itself.
    pub fn register(&self, id: Uuid, peer: SocketAddr, cancel: CancellationToken) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.connections.insert(id, ConnectionEntry { peer, cancel });
        true
    }

    /// Removing an absent id is not an error, returns whether it was present.
    pub fn unregister(&self, id: &Uuid) -> bool {
        self.state.lock().connections.remove(id).is_some()
    }

    /// Closes every registered connection and refuses further registrations.
    /// Returns how many connections were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<ConnectionEntry> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.connections.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &drained {
            debug!("Closing connection from {}", entry.peer);
            entry.cancel.cancel();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
