//! Peer address index.

use std::{collections::HashMap, fmt, net::SocketAddr, sync::Arc};

use crate::{collection::SharedCollection, connection::Connection, handler::Handler};

/// Map of remote socket addresses to connections.
pub struct PeerNodes<H: Handler> {
    nodes: SharedCollection<HashMap<SocketAddr, Arc<Connection<H>>>>,
}

impl<H: Handler> Default for PeerNodes<H> {
    fn default() -> Self {
        Self {
            nodes: SharedCollection::new(HashMap::new()),
        }
    }
}

impl<H: Handler> fmt::Debug for PeerNodes<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerNodes").field("nodes", &self.len()).finish()
    }
}

impl<H: Handler> PeerNodes<H> {
    /// Index `conn` under its remote address, returning the connection it
    /// replaced.
    pub fn register(&self, conn: &Arc<Connection<H>>) -> Option<Arc<Connection<H>>> {
        self.nodes
            .write()
            .insert(conn.remote_addr(), Arc::clone(conn))
    }

    /// Drop the entry for `conn`'s address if it still points at `conn`.
    pub fn unregister(&self, conn: &Arc<Connection<H>>) -> bool {
        let mut nodes = self.nodes.write();
        if nodes
            .get(&conn.remote_addr())
            .is_some_and(|current| current.id() == conn.id())
        {
            nodes.remove(&conn.remote_addr());
            true
        } else {
            false
        }
    }

    /// Connection registered for `addr`.
    #[must_use]
    pub fn find(&self, addr: SocketAddr) -> Option<Arc<Connection<H>>> {
        self.nodes.read().get(&addr).cloned()
    }

    /// Number of indexed addresses.
    #[must_use]
    pub fn len(&self) -> usize { self.nodes.read().len() }

    /// Returns `true` when no address is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
