//! Presence registry: which live connections belong to which identity.
//!
//! Pure routing state, owned and mutated only by the
//! [`EventRouter`](crate::router::EventRouter). Nothing here is persisted;
//! after a restart clients re-join and the registry rebuilds itself.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use parley_shared::types::UserId;

/// Process-unique handle for one realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One joined connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub user: UserId,
    pub connection: ConnectionId,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// Same (user, connection) pair joined before; nothing changed.
    AlreadyJoined,
    /// The connection is already bound to a different identity.
    BoundToOther(UserId),
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    rooms: HashMap<UserId, HashMap<ConnectionId, SessionEntry>>,
    owners: HashMap<ConnectionId, UserId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, user: UserId, connection: ConnectionId) -> JoinOutcome {
        if let Some(owner) = self.owners.get(&connection) {
            return if *owner == user {
                JoinOutcome::AlreadyJoined
            } else {
                JoinOutcome::BoundToOther(owner.clone())
            };
        }

        let entry = SessionEntry {
            user: user.clone(),
            connection,
            joined_at: Utc::now(),
        };
        self.owners.insert(connection, user.clone());
        let room = self.rooms.entry(user.clone()).or_default();
        room.insert(connection, entry);

        info!(
            user = %user.short(),
            connection = %connection,
            devices = room.len(),
            "Connection joined room"
        );
        JoinOutcome::Joined
    }

    /// Drop the mapping for `connection`. No-op when it never joined.
    pub fn leave(&mut self, connection: ConnectionId) -> Option<SessionEntry> {
        let user = self.owners.remove(&connection)?;
        let room = self.rooms.get_mut(&user)?;
        let entry = room.remove(&connection);
        let remaining = room.len();
        if remaining == 0 {
            self.rooms.remove(&user);
            debug!(user = %user.short(), "User went offline");
        }

        info!(
            user = %user.short(),
            connection = %connection,
            remaining,
            "Connection left room"
        );
        entry
    }

    /// Connections currently joined as `user`; empty when offline.
    pub fn route(&self, user: &UserId) -> HashSet<ConnectionId> {
        self.rooms
            .get(user)
            .map(|room| room.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn user_of(&self, connection: ConnectionId) -> Option<&UserId> {
        self.owners.get(&connection)
    }

    pub fn connection_count(&self, user: &UserId) -> usize {
        self.rooms.get(user).map(HashMap::len).unwrap_or(0)
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.rooms.contains_key(user)
    }

    pub fn online_users(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_connections(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[test]
    fn test_join_leave() {
        let mut registry = PresenceRegistry::new();
        let bob = user("bob");

        assert!(registry.route(&bob).is_empty());
        assert_eq!(registry.join(bob.clone(), ConnectionId(1)), JoinOutcome::Joined);
        assert!(registry.is_online(&bob));
        assert_eq!(registry.route(&bob), HashSet::from([ConnectionId(1)]));

        let entry = registry.leave(ConnectionId(1)).unwrap();
        assert_eq!(entry.user, bob);
        assert!(!registry.is_online(&bob));
        assert_eq!(registry.online_users(), 0);
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut registry = PresenceRegistry::new();
        registry.join(user("bob"), ConnectionId(7));
        assert_eq!(
            registry.join(user("bob"), ConnectionId(7)),
            JoinOutcome::AlreadyJoined
        );
        assert_eq!(registry.connection_count(&user("bob")), 1);
    }

    #[test]
    fn test_connection_cannot_switch_identity() {
        let mut registry = PresenceRegistry::new();
        registry.join(user("bob"), ConnectionId(7));
        assert_eq!(
            registry.join(user("mallory"), ConnectionId(7)),
            JoinOutcome::BoundToOther(user("bob"))
        );
        assert!(!registry.is_online(&user("mallory")));
    }

    #[test]
    fn test_multi_device() {
        let mut registry = PresenceRegistry::new();
        let alice = user("alice");
        registry.join(alice.clone(), ConnectionId(1));
        registry.join(alice.clone(), ConnectionId(2));
        registry.join(user("bob"), ConnectionId(3));

        assert_eq!(registry.connection_count(&alice), 2);
        assert_eq!(registry.total_connections(), 3);

        registry.leave(ConnectionId(1));
        assert_eq!(registry.route(&alice), HashSet::from([ConnectionId(2)]));
        assert_eq!(registry.user_of(ConnectionId(2)), Some(&alice));
    }

    #[test]
    fn test_leave_unknown_is_noop() {
        let mut registry = PresenceRegistry::new();
        assert!(registry.leave(ConnectionId(42)).is_none());
        registry.join(user("bob"), ConnectionId(1));
        registry.leave(ConnectionId(1));
        assert!(registry.leave(ConnectionId(1)).is_none());
    }
}
