use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use tokio::sync::mpsc;
use uuid::Uuid;

/// Messages queued per connection before new ones are dropped.
pub const CONNECTION_BUFFER: usize = 64;

pub type LiveSender = mpsc::Sender<String>;
pub type LiveReceiver = mpsc::Receiver<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

/// Live connections of the users currently online, keyed by user. A user may
/// hold several connections at once (tabs, devices). Lives from process start
/// to shutdown; entries are removed when their socket closes.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, HashMap<ConnectionId, LiveSender>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, user_id: Uuid) -> (ConnectionId, LiveReceiver) {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);
        let connection_id = ConnectionId(Uuid::new_v4());

        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id)
            .or_default()
            .insert(connection_id, tx);

        (connection_id, rx)
    }

    pub fn remove(&self, user_id: Uuid, connection_id: ConnectionId) {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(user_connections) = connections.get_mut(&user_id) {
            user_connections.remove(&connection_id);
            if user_connections.is_empty() {
                connections.remove(&user_id);
            }
        }
    }

    pub fn lookup(&self, user_id: Uuid) -> Vec<LiveSender> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .map(|user_connections| user_connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Presence hint only; a user may disconnect right after this returns.
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&user_id)
    }

    pub fn all(&self) -> Vec<LiveSender> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .flat_map(|user_connections| user_connections.values().cloned())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(HashMap::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connections_are_tracked_per_user() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let (first, _rx1) = registry.add(user);
        let (second, _rx2) = registry.add(user);
        assert!(registry.is_online(user));
        assert_eq!(registry.lookup(user).len(), 2);
        assert_eq!(registry.connection_count(), 2);

        registry.remove(user, first);
        assert!(registry.is_online(user));

        registry.remove(user, second);
        assert!(!registry.is_online(user));
        assert!(registry.lookup(user).is_empty());
    }

    #[test]
    fn removing_unknown_connection_is_harmless() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (connection_id, _rx) = registry.add(user);

        registry.remove(Uuid::new_v4(), connection_id);
        assert_eq!(registry.connection_count(), 1);
    }
}
