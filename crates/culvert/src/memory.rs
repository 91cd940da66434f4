//! In-process hub transport.
//!
//! Lets a client and a server run end-to-end in one process, and lets tests
//! simulate connection churn with [`MemoryHub::close`].

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::ids::TransportId;
use crate::transport;
use crate::transport::ClientTransport;
use crate::transport::ConnectionEvent;
use crate::transport::ConnectionState;
use crate::transport::ServerTransport;

struct HubInner {
    connections: DashMap<TransportId, mpsc::UnboundedSender<Vec<u8>>>,
    events_tx: mpsc::UnboundedSender<Option<ConnectionEvent>>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Option<ConnectionEvent>>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl HubInner {
    fn emit(&self, event: ConnectionEvent) -> transport::Result<()> {
        self.events_tx
            .send(Some(event))
            .map_err(|_| transport::Error::ConnectionLost("hub is gone".into()))
    }
}

/// Creates a hub and the connector clients use to reach it.
pub fn hub() -> (MemoryHub, MemoryConnector) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let inner = Arc::new(HubInner {
        connections: DashMap::new(),
        events_tx,
        events_rx: tokio::sync::Mutex::new(events_rx),
        next_id: AtomicU64::new(1),
        shut_down: AtomicBool::new(false),
    });
    (MemoryHub { inner: inner.clone() }, MemoryConnector { inner })
}

/// Server side of the in-memory hub.
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    /// Drops a connection from the server side, as a network failure would.
    pub fn close(&self, id: &TransportId) -> bool {
        if self.inner.connections.remove(id).is_none() {
            return false;
        }
        let _ = self.inner.emit(ConnectionEvent::Disconnected(id.clone()));
        true
    }

    /// Closes every connection, refuses new ones and ends the event stream.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.connections.clear();
        let _ = self.inner.events_tx.send(None);
    }

    pub fn connection_ids(&self) -> Vec<TransportId> {
        self.inner.connections.iter().map(|e| e.key().clone()).collect()
    }
}

#[async_trait::async_trait]
impl ServerTransport for MemoryHub {
    async fn send(&self, connection: &TransportId, payload: &[u8]) -> transport::Result<()> {
        let tx = self
            .inner
            .connections
            .get(connection)
            .map(|tx| tx.clone())
            .ok_or_else(|| transport::Error::UnknownConnection(connection.clone()))?;
        tx.send(payload.to_vec())
            .map_err(|_| transport::Error::ConnectionLost(format!("{} hung up", connection)))
    }

    async fn next_event(&self) -> Option<ConnectionEvent> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return None;
        }
        let mut events = self.inner.events_rx.lock().await;
        events.recv().await.flatten()
    }
}

/// Mints clients attached to one hub.
#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<HubInner>,
}

impl MemoryConnector {
    pub fn client(&self) -> MemoryClient {
        MemoryClient {
            hub: self.inner.clone(),
            id: Mutex::new(None),
            inbox: tokio::sync::Mutex::new(None),
            state: AtomicU8::new(DISCONNECTED),
        }
    }
}

const DISCONNECTED: u8 = 0;
const CONNECTED: u8 = 2;

/// Client side of the in-memory hub. Each `connect` gets a fresh transport id.
pub struct MemoryClient {
    hub: Arc<HubInner>,
    id: Mutex<Option<TransportId>>,
    inbox: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    state: AtomicU8,
}

impl MemoryClient {
    pub fn transport_id(&self) -> Option<TransportId> {
        self.id.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait::async_trait]
impl ClientTransport for MemoryClient {
    async fn connect(&self) -> transport::Result<()> {
        if self.hub.shut_down.load(Ordering::SeqCst) {
            return Err(transport::Error::ConnectionLost("hub is shut down".into()));
        }

        let id = TransportId::new(format!("mem-{}", self.hub.next_id.fetch_add(1, Ordering::Relaxed)));
        let (tx, rx) = mpsc::unbounded_channel();

        *self.inbox.lock().await = Some(rx);
        self.hub.connections.insert(id.clone(), tx);
        *self.id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
        self.hub.emit(ConnectionEvent::Connected(id))?;
        self.state.store(CONNECTED, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        let id = self.transport_id().ok_or(transport::Error::NotConnected)?;
        if !self.hub.connections.contains_key(&id) {
            self.state.store(DISCONNECTED, Ordering::SeqCst);
            return Err(transport::Error::ConnectionLost(format!("{} was closed", id)));
        }
        self.hub.emit(ConnectionEvent::Message(id, payload.to_vec()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut inbox = self.inbox.lock().await;
        let rx = inbox.as_mut().ok_or(transport::Error::NotConnected)?;
        let message = rx.recv().await;
        if message.is_none() {
            self.state.store(DISCONNECTED, Ordering::SeqCst);
        }
        Ok(message)
    }

    fn state(&self) -> ConnectionState {
        if self.state.load(Ordering::SeqCst) != CONNECTED {
            return ConnectionState::Disconnected;
        }
        match self.transport_id() {
            Some(id) if self.hub.connections.contains_key(&id) => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    async fn disconnect(&self) -> transport::Result<()> {
        self.state.store(DISCONNECTED, Ordering::SeqCst);
        let id = self.id.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(id) = id {
            if self.hub.connections.remove(&id).is_some() {
                let _ = self.hub.emit(ConnectionEvent::Disconnected(id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_send_and_receive() {
        let (hub, connector) = hub();
        let client = connector.client();
        client.connect().await.expect("connect");
        let id = client.transport_id().expect("id");

        assert_eq!(hub.next_event().await, Some(ConnectionEvent::Connected(id.clone())));

        client.send(b"ping").await.expect("send");
        assert_eq!(hub.next_event().await, Some(ConnectionEvent::Message(id.clone(), b"ping".to_vec())));

        hub.send(&id, b"pong").await.expect("reply");
        assert_eq!(client.recv().await.expect("recv"), Some(b"pong".to_vec()));
    }

    #[tokio::test]
    async fn test_each_connect_gets_a_fresh_id() {
        let (_hub, connector) = hub();
        let client = connector.client();
        client.connect().await.expect("first");
        let first = client.transport_id().expect("first id");
        client.disconnect().await.expect("disconnect");
        client.connect().await.expect("second");
        assert_ne!(client.transport_id().expect("second id"), first);
    }

    #[tokio::test]
    async fn test_server_close_is_visible_to_client() {
        let (hub, connector) = hub();
        let client = connector.client();
        client.connect().await.expect("connect");
        let id = client.transport_id().expect("id");
        let _ = hub.next_event().await;

        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(hub.close(&id));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.recv().await.expect("recv"), None);
        assert_eq!(hub.next_event().await, Some(ConnectionEvent::Disconnected(id.clone())));
        assert!(matches!(hub.send(&id, b"late").await, Err(transport::Error::UnknownConnection(_))));
    }

    #[tokio::test]
    async fn test_shutdown_refuses_connections() {
        let (hub, connector) = hub();
        hub.shutdown();
        assert!(connector.client().connect().await.is_err());
        assert_eq!(hub.next_event().await, None);
    }
}
