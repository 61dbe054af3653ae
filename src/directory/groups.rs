//! Group membership.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use tracing::debug;

use super::ConnectionSet;
use crate::{
    collection::SharedCollection,
    connection::{Connection, ConnectionId},
    handler::Handler,
};

struct GroupIndex<H: Handler> {
    members: HashMap<String, ConnectionSet<H>>,
    memberships: HashMap<ConnectionId, HashSet<String>>,
}

impl<H: Handler> Default for GroupIndex<H> {
    fn default() -> Self {
        Self {
            members: HashMap::new(),
            memberships: HashMap::new(),
        }
    }
}

impl<H: Handler> GroupIndex<H> {
    /// Drop `conn` from the set of `group`, removing the group once empty.
    fn leave(&mut self, group: &str, conn: &Arc<Connection<H>>) -> bool {
        let Some(set) = self.members.get(group) else {
            return false;
        };
        let mut guard = set.write();
        let removed = guard.remove(conn);
        let empty = guard.is_empty();
        drop(guard);
        if empty {
            self.members.remove(group);
            debug!(group, "group emptied");
        }
        removed
    }
}

/// Many-to-many map of group ids to connections.
///
/// Each group's member set is its own [`SharedCollection`], so a broadcast to
/// one group never blocks binds into another.
pub struct Groups<H: Handler> {
    index: SharedCollection<GroupIndex<H>>,
}

impl<H: Handler> Default for Groups<H> {
    fn default() -> Self {
        Self {
            index: SharedCollection::new(GroupIndex::default()),
        }
    }
}

impl<H: Handler> fmt::Debug for Groups<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Groups").field("groups", &self.len()).finish()
    }
}

impl<H: Handler> Groups<H> {
    /// Add `conn` to `group`, creating the group if needed.
    ///
    /// Returns `false` if `conn` was already a member or has begun closing.
    pub fn bind(&self, group: &str, conn: &Arc<Connection<H>>) -> bool {
        let mut index = self.index.write();
        // Purging takes this lock after the closing flag is set.
        if conn.is_waiting_close() {
            debug!(conn = %conn.id(), group, "bind refused; connection closing");
            return false;
        }
        let set = index.members.entry(group.to_owned()).or_default().clone();
        index
            .memberships
            .entry(conn.id())
            .or_default()
            .insert(group.to_owned());
        set.write().insert(Arc::clone(conn))
    }

    /// Remove `conn` from `group`. Unknown groups and non-members are no-ops.
    pub fn unbind(&self, group: &str, conn: &Arc<Connection<H>>) -> bool {
        let mut index = self.index.write();
        if let Some(joined) = index.memberships.get_mut(&conn.id()) {
            joined.remove(group);
            if joined.is_empty() {
                index.memberships.remove(&conn.id());
            }
        }
        index.leave(group, conn)
    }

    /// Remove `conn` from every group it belongs to.
    ///
    /// Returns the number of groups it left.
    pub fn unbind_all(&self, conn: &Arc<Connection<H>>) -> usize {
        let mut index = self.index.write();
        let Some(joined) = index.memberships.remove(&conn.id()) else {
            return 0;
        };
        joined
            .iter()
            .filter(|group| index.leave(group, conn))
            .count()
    }

    /// Member set of `group`.
    ///
    /// The returned collection is the live set, not a copy. Once a group
    /// empties it is dropped; a later bind creates a fresh set.
    #[must_use]
    pub fn members(&self, group: &str) -> Option<ConnectionSet<H>> {
        self.index.read().members.get(group).cloned()
    }

    /// Groups `id` currently belongs to.
    #[must_use]
    pub fn groups_of(&self, id: ConnectionId) -> Vec<String> {
        self.index
            .read()
            .memberships
            .get(&id)
            .map(|joined| joined.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns `true` if `conn` is a member of `group`.
    #[must_use]
    pub fn contains(&self, group: &str, conn: &Arc<Connection<H>>) -> bool {
        self.members(group)
            .is_some_and(|set| set.read().contains(conn))
    }

    /// Number of non-empty groups.
    #[must_use]
    pub fn len(&self) -> usize { self.index.read().members.len() }

    /// Returns `true` when no group has members.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use crate::{
        connection::Origin,
        test_support::{attach, context},
    };

    #[tokio::test]
    async fn bind_and_unbind_keep_both_maps_consistent() {
        let ctx = context();
        let (a, _pa) = attach(&ctx, Origin::Accepted);
        let (b, _pb) = attach(&ctx, Origin::Accepted);
        let groups = ctx.groups();

        assert!(groups.bind("room", &a));
        assert!(!groups.bind("room", &a));
        assert!(groups.bind("room", &b));
        assert!(groups.bind("lobby", &a));
        assert_eq!(groups.len(), 2);

        assert!(groups.unbind("room", &a));
        assert!(!groups.contains("room", &a));
        assert!(groups.contains("room", &b));
        assert_eq!(groups.groups_of(a.id()), vec!["lobby".to_owned()]);

        assert!(!groups.unbind("missing", &a));
        assert_eq!(groups.unbind_all(&a), 1);
        assert!(groups.groups_of(a.id()).is_empty());
        assert!(groups.members("lobby").is_none());
    }

    #[tokio::test]
    async fn closing_connections_are_refused() {
        let ctx = context();
        let (a, _pa) = attach(&ctx, Origin::Accepted);
        a.remove(None, "gone");

        assert!(!ctx.groups().bind("room", &a));
        assert!(ctx.groups().is_empty());
        assert!(ctx.groups().groups_of(a.id()).is_empty());
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn empty_groups_are_dropped() {
        let ctx = context();
        let (a, _pa) = attach(&ctx, Origin::Accepted);
        let groups = ctx.groups();

        groups.bind("solo", &a);
        groups.unbind("solo", &a);
        assert!(groups.is_empty());
        assert!(groups.members("solo").is_none());
    }
}
