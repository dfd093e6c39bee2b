//! In-process transport: a hub that wires endpoints together with
//! explicit point-to-point links.
//!
//! Links are created by hand (`LocalHub::link`), not automatically, so
//! tests can build exact topologies: a line for relay behavior, a star
//! for fan-out, and so on. Each side of a link sees its own
//! `ConnectionId`; frames sent on one side arrive tagged with the other
//! side's id, like a real radio link.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::peer::ConnectionId;
use crate::transport::{EventReceiver, EventSender, Transport, TransportError, TransportEvent};

pub struct LocalHub {
    inner: Mutex<HubInner>,
}

struct HubInner {
    endpoints: HashMap<Uuid, EventSender>,
    routes: HashMap<ConnectionId, Route>,
}

struct Route {
    local_endpoint: Uuid,
    remote_endpoint: Uuid,
    remote_connection: ConnectionId,
}

impl LocalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HubInner {
                endpoints: HashMap::new(),
                routes: HashMap::new(),
            }),
        })
    }

    /// Register an endpoint with no links yet. Returns the endpoint and
    /// its event stream.
    pub fn join(self: &Arc<Self>) -> (LocalEndpoint, EventReceiver) {
        let id = Uuid::new_v4();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.inner.lock().endpoints.insert(id, tx);
        (
            LocalEndpoint {
                hub: Arc::clone(self),
                id,
            },
            rx,
        )
    }

    /// Create a bidirectional link between two endpoints. Both sides get
    /// a `LinkUp` event carrying their own `ConnectionId` for the link.
    pub fn link(&self, a: &LocalEndpoint, b: &LocalEndpoint) -> (ConnectionId, ConnectionId) {
        let conn_a = ConnectionId::new();
        let conn_b = ConnectionId::new();
        let mut inner = self.inner.lock();
        inner.routes.insert(
            conn_a,
            Route {
                local_endpoint: a.id,
                remote_endpoint: b.id,
                remote_connection: conn_b,
            },
        );
        inner.routes.insert(
            conn_b,
            Route {
                local_endpoint: b.id,
                remote_endpoint: a.id,
                remote_connection: conn_a,
            },
        );
        notify(&inner, a.id, TransportEvent::LinkUp { connection: conn_a });
        notify(&inner, b.id, TransportEvent::LinkUp { connection: conn_b });
        (conn_a, conn_b)
    }

    /// Tear down one link given either side's `ConnectionId`.
    pub fn unlink(&self, connection: ConnectionId) {
        let mut inner = self.inner.lock();
        let Some(route) = inner.routes.remove(&connection) else {
            return;
        };
        let remote = route.remote_connection;
        inner.routes.remove(&remote);
        notify(&inner, route.local_endpoint, TransportEvent::LinkDown { connection });
        notify(
            &inner,
            route.remote_endpoint,
            TransportEvent::LinkDown { connection: remote },
        );
    }

    /// Inject a signal-strength reading for one side of a link, as a
    /// radio would report it for the link it measured.
    pub fn report_signal(&self, connection: ConnectionId, rssi: i16) {
        let inner = self.inner.lock();
        if let Some(route) = inner.routes.get(&connection) {
            notify(
                &inner,
                route.local_endpoint,
                TransportEvent::Signal { connection, rssi },
            );
        }
    }

    fn deliver(&self, connection: ConnectionId, data: Vec<u8>) -> Result<(), TransportError> {
        let inner = self.inner.lock();
        let route = inner
            .routes
            .get(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        let tx = inner
            .endpoints
            .get(&route.remote_endpoint)
            .ok_or(TransportError::Closed)?;
        tx.send(TransportEvent::Frame {
            connection: route.remote_connection,
            data,
        })
        .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn detach(&self, endpoint: Uuid) {
        let mut inner = self.inner.lock();
        inner.endpoints.remove(&endpoint);
        let dead: Vec<ConnectionId> = inner
            .routes
            .iter()
            .filter(|(_, r)| r.local_endpoint == endpoint)
            .map(|(c, _)| *c)
            .collect();
        for connection in dead {
            if let Some(route) = inner.routes.remove(&connection) {
                inner.routes.remove(&route.remote_connection);
                notify(
                    &inner,
                    route.remote_endpoint,
                    TransportEvent::LinkDown {
                        connection: route.remote_connection,
                    },
                );
            }
        }
    }
}

fn notify(inner: &HubInner, endpoint: Uuid, event: TransportEvent) {
    if let Some(tx) = inner.endpoints.get(&endpoint) {
        let _ = tx.send(event);
    }
}

/// One node's attachment to the hub. Clones share the attachment.
#[derive(Clone)]
pub struct LocalEndpoint {
    hub: Arc<LocalHub>,
    id: Uuid,
}

#[async_trait]
impl Transport for LocalEndpoint {
    async fn send(&self, connection: ConnectionId, frame: Vec<u8>) -> Result<(), TransportError> {
        self.hub.deliver(connection, frame)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.hub.detach(self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn expect_link_up(rx: &mut EventReceiver) -> ConnectionId {
        match rx.recv().await {
            Some(TransportEvent::LinkUp { connection }) => connection,
            other => panic!("expected LinkUp, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn frames_cross_a_link_with_remote_connection_id() {
        let hub = LocalHub::new();
        let (a, mut rx_a) = hub.join();
        let (b, mut rx_b) = hub.join();
        let (conn_a, conn_b) = hub.link(&a, &b);

        assert_eq!(expect_link_up(&mut rx_a).await, conn_a);
        assert_eq!(expect_link_up(&mut rx_b).await, conn_b);

        a.send(conn_a, b"ping".to_vec()).await.unwrap();
        match rx_b.recv().await {
            Some(TransportEvent::Frame { connection, data }) => {
                assert_eq!(connection, conn_b);
                assert_eq!(data, b"ping");
            }
            other => panic!("expected Frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_on_unknown_connection_fails() {
        let hub = LocalHub::new();
        let (a, _rx) = hub.join();
        let err = a.send(ConnectionId::new(), vec![0]).await.unwrap_err();
        assert!(matches!(err, TransportError::UnknownConnection(_)));
    }

    #[tokio::test]
    async fn signal_reports_reach_the_owning_side_only() {
        let hub = LocalHub::new();
        let (a, mut rx_a) = hub.join();
        let (b, mut rx_b) = hub.join();
        let (conn_a, _conn_b) = hub.link(&a, &b);
        expect_link_up(&mut rx_a).await;
        expect_link_up(&mut rx_b).await;

        hub.report_signal(conn_a, -55);
        assert!(matches!(
            rx_a.recv().await,
            Some(TransportEvent::Signal { connection, rssi: -55 }) if connection == conn_a
        ));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn unlink_notifies_both_sides() {
        let hub = LocalHub::new();
        let (a, mut rx_a) = hub.join();
        let (b, mut rx_b) = hub.join();
        let (conn_a, conn_b) = hub.link(&a, &b);
        expect_link_up(&mut rx_a).await;
        expect_link_up(&mut rx_b).await;

        hub.unlink(conn_a);
        assert!(matches!(
            rx_a.recv().await,
            Some(TransportEvent::LinkDown { connection }) if connection == conn_a
        ));
        assert!(matches!(
            rx_b.recv().await,
            Some(TransportEvent::LinkDown { connection }) if connection == conn_b
        ));
        assert!(a.send(conn_a, vec![0]).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_drops_links_and_informs_neighbors() {
        let hub = LocalHub::new();
        let (a, mut rx_a) = hub.join();
        let (b, mut rx_b) = hub.join();
        let (conn_a, conn_b) = hub.link(&a, &b);
        expect_link_up(&mut rx_a).await;
        expect_link_up(&mut rx_b).await;

        a.shutdown().await.unwrap();
        assert!(matches!(
            rx_b.recv().await,
            Some(TransportEvent::LinkDown { connection }) if connection == conn_b
        ));
        assert!(b.send(conn_b, vec![0]).await.is_err());
        let _ = conn_a;
    }
}
