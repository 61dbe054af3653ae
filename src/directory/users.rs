//! User identity bindings.

use std::{collections::HashMap, fmt, sync::Arc};

use tracing::debug;

use crate::{
    collection::SharedCollection,
    connection::{Connection, ConnectionId},
    handler::Handler,
};

struct UserIndex<H: Handler> {
    by_user: HashMap<String, Arc<Connection<H>>>,
    by_conn: HashMap<ConnectionId, String>,
}

impl<H: Handler> Default for UserIndex<H> {
    fn default() -> Self {
        Self {
            by_user: HashMap::new(),
            by_conn: HashMap::new(),
        }
    }
}

impl<H: Handler> UserIndex<H> {
    fn holds(&self, user: &str, id: ConnectionId) -> bool {
        self.by_user.get(user).is_some_and(|conn| conn.id() == id)
    }
}

/// Map of user ids to the connection currently serving each user.
///
/// The last bind for a user id wins. A connection displaced this way keeps no
/// claim on the id: [`user_of`](Self::user_of) only reports ids whose forward
/// entry still points back at the connection, and unbinding the displaced
/// connection leaves the newer binding untouched.
pub struct Users<H: Handler> {
    index: SharedCollection<UserIndex<H>>,
}

impl<H: Handler> Default for Users<H> {
    fn default() -> Self {
        Self {
            index: SharedCollection::new(UserIndex::default()),
        }
    }
}

impl<H: Handler> fmt::Debug for Users<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Users").field("users", &self.len()).finish()
    }
}

impl<H: Handler> Users<H> {
    /// Bind `user` to `conn`.
    ///
    /// Any previous holder of `user` is displaced. If `conn` was bound to a
    /// different id, that id is released. Returns `false`, binding nothing,
    /// once `conn` has begun closing.
    pub fn bind(&self, user: &str, conn: &Arc<Connection<H>>) -> bool {
        let mut index = self.index.write();
        // Purging takes this lock after the closing flag is set.
        if conn.is_waiting_close() {
            debug!(conn = %conn.id(), user, "bind refused; connection closing");
            return false;
        }
        if let Some(previous) = index.by_conn.insert(conn.id(), user.to_owned())
            && previous != user
            && index.holds(&previous, conn.id())
        {
            index.by_user.remove(&previous);
            debug!(conn = %conn.id(), user = %previous, "user released on rebind");
        }
        if let Some(displaced) = index.by_user.insert(user.to_owned(), Arc::clone(conn))
            && displaced.id() != conn.id()
        {
            debug!(user, from = %displaced.id(), to = %conn.id(), "user rebound");
        }
        true
    }

    /// Release whatever user id `conn` holds.
    ///
    /// Returns `false` if `conn` held none, including when its id has since
    /// been claimed by another connection.
    pub fn unbind(&self, conn: &Arc<Connection<H>>) -> bool {
        let mut index = self.index.write();
        let Some(user) = index.by_conn.remove(&conn.id()) else {
            return false;
        };
        if index.holds(&user, conn.id()) {
            index.by_user.remove(&user);
            true
        } else {
            false
        }
    }

    /// Connection currently bound to `user`.
    #[must_use]
    pub fn find(&self, user: &str) -> Option<Arc<Connection<H>>> {
        self.index.read().by_user.get(user).cloned()
    }

    /// User id held by `id`.
    #[must_use]
    pub fn user_of(&self, id: ConnectionId) -> Option<String> {
        let index = self.index.read();
        index
            .by_conn
            .get(&id)
            .filter(|user| index.holds(user, id))
            .cloned()
    }

    /// Number of bound user ids.
    #[must_use]
    pub fn len(&self) -> usize { self.index.read().by_user.len() }

    /// Returns `true` when no user id is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
