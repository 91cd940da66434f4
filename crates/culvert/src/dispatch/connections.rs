//! Bidirectional mapping between transport connection ids and logical connection ids.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::ids::ConnectionId;
use crate::ids::TransportId;

/// At most one logical id per live transport id, and vice versa.
#[derive(Default)]
pub struct ConnectionMap {
    by_transport: DashMap<TransportId, ConnectionId>,
    by_connection: DashMap<ConnectionId, TransportId>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The logical id for `transport`, minted on first contact.
    pub fn connect(&self, transport: &TransportId) -> ConnectionId {
        match self.by_transport.entry(transport.clone()) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let id = ConnectionId::new();
                // Written while the transport shard is held, so a racing connect sees it.
                self.by_connection.insert(id, transport.clone());
                entry.insert(id);
                id
            }
        }
    }

    pub fn connection_of(&self, transport: &TransportId) -> Option<ConnectionId> {
        self.by_transport.get(transport).map(|id| *id)
    }

    pub fn transport_of(&self, connection: ConnectionId) -> Option<TransportId> {
        self.by_connection.get(&connection).map(|id| id.clone())
    }

    /// Forgets a transport connection, returning the logical id it had.
    pub fn remove_external(&self, transport: &TransportId) -> Option<ConnectionId> {
        let (_, connection) = self.by_transport.remove(transport)?;
        self.by_connection.remove(&connection);
        Some(connection)
    }

    pub fn remove(&self, connection: ConnectionId) -> Option<TransportId> {
        let (_, transport) = self.by_connection.remove(&connection)?;
        self.by_transport.remove(&transport);
        Some(transport)
    }

    pub fn all(&self) -> Vec<ConnectionId> {
        self.by_connection.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_contact_wins() {
        let map = ConnectionMap::new();
        let transport = TransportId::new("ws-1");
        let first = map.connect(&transport);
        assert_eq!(map.connect(&transport), first);
        assert_eq!(map.len(), 1);
        assert_eq!(map.transport_of(first), Some(transport));
    }

    #[test]
    fn test_distinct_transports_get_distinct_ids() {
        let map = ConnectionMap::new();
        let a = map.connect(&TransportId::new("ws-a"));
        let b = map.connect(&TransportId::new("ws-b"));
        assert_ne!(a, b);

        assert_eq!(map.remove_external(&TransportId::new("ws-a")), Some(a));
        assert_eq!(map.transport_of(a), None);
        assert_eq!(map.connection_of(&TransportId::new("ws-b")), Some(b));
        assert_eq!(map.transport_of(b), Some(TransportId::new("ws-b")));
        assert_eq!(map.all(), vec![b]);
    }

    #[test]
    fn test_remove_by_logical_id() {
        let map = ConnectionMap::new();
        let transport = TransportId::new("ws-1");
        let id = map.connect(&transport);
        assert_eq!(map.remove(id), Some(transport.clone()));
        assert!(map.is_empty());
        assert_eq!(map.connection_of(&transport), None);
        assert_eq!(map.remove_external(&transport), None);
    }
}
