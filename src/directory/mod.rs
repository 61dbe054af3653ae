//! Directories used to address subsets of connections.
//!
//! All directories are built on [`SharedCollection`]:
//!
//! - every live connection, and every parked (closed but not removed) one, is
//!   held in a [`ConnectionSet`];
//! - [`Groups`] maps group ids to member sets;
//! - [`Users`] maps user ids to a single connection;
//! - [`PeerNodes`] maps remote addresses to a connection.
//!
//! Where a directory holds two maps, the outer index lock is always taken
//! before any member set lock.

mod groups;
mod nodes;
mod users;

use std::{collections::HashSet, sync::Arc};

pub use self::{groups::Groups, nodes::PeerNodes, users::Users};
use crate::{collection::SharedCollection, connection::Connection};

/// Lock-guarded set of connections.
pub type ConnectionSet<H> = SharedCollection<HashSet<Arc<Connection<H>>>>;
