//! Transport abstraction between devices and the inspector.
//!
//! The inspector side sees a stream of [`TransportEvent`]s keyed by
//! [`SocketId`] and can send frames back to any open socket. Frames are
//! opaque bytes; see [`crate::codec`] for their encoding.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identifier of one transport session. A device that reconnects gets a
/// new socket id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketId(pub String);

impl SocketId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Something that happened on the inspector's side of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(SocketId),
    Frame(SocketId, Bytes),
    Disconnected(SocketId),
}

impl TransportEvent {
    pub fn socket(&self) -> &SocketId {
        match self {
            TransportEvent::Connected(s)
            | TransportEvent::Frame(s, _)
            | TransportEvent::Disconnected(s) => s,
        }
    }
}

/// Inspector-side transport.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wait for the next event.
    ///
    /// Returns an error once the transport is closed and drained.
    async fn recv(&self) -> Result<TransportEvent>;

    /// Receive with timeout. `None` means the timeout expired.
    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<TransportEvent>>;

    /// Send a frame to one socket.
    async fn send(&self, socket: &SocketId, frame: Bytes) -> Result<()>;

    /// Sockets currently open.
    async fn connected_sockets(&self) -> Vec<SocketId>;
}

/// In-process transport for tests and embedding.
///
/// A [`MemoryNetwork`](memory::MemoryNetwork) hands out one
/// [`MemoryTransport`](memory::MemoryTransport) for the inspector and any
/// number of [`MemoryClient`](memory::MemoryClient)s standing in for devices.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;

    use tokio::sync::{mpsc, Mutex, RwLock};

    use crate::error::SyncError;

    /// Shared state for one inspector and its clients.
    pub struct MemoryNetwork {
        capacity: usize,
        events_tx: mpsc::Sender<TransportEvent>,
        events_rx: parking_lot::Mutex<Option<mpsc::Receiver<TransportEvent>>>,
        clients: RwLock<HashMap<SocketId, mpsc::Sender<Bytes>>>,
        next_socket: AtomicU64,
    }

    impl MemoryNetwork {
        /// Create a network whose channels buffer `capacity` messages.
        pub fn new(capacity: usize) -> Arc<Self> {
            let capacity = capacity.max(1);
            let (events_tx, events_rx) = mpsc::channel(capacity);
            Arc::new(Self {
                capacity,
                events_tx,
                events_rx: parking_lot::Mutex::new(Some(events_rx)),
                clients: RwLock::new(HashMap::new()),
                next_socket: AtomicU64::new(1),
            })
        }

        /// The inspector end. Only the first call succeeds.
        pub fn inspector_transport(self: &Arc<Self>) -> Result<MemoryTransport> {
            let receiver = self.events_rx.lock().take().ok_or_else(|| {
                SyncError::TransportError("inspector transport already taken".into())
            })?;
            Ok(MemoryTransport {
                network: Arc::clone(self),
                receiver: Mutex::new(receiver),
            })
        }

        /// Open a new device session.
        pub async fn connect(self: &Arc<Self>) -> Result<MemoryClient> {
            let n = self.next_socket.fetch_add(1, Ordering::Relaxed);
            let socket = SocketId(format!("mem-{n}"));
            let (tx, rx) = mpsc::channel(self.capacity);

            self.clients.write().await.insert(socket.clone(), tx);
            self.events_tx
                .send(TransportEvent::Connected(socket.clone()))
                .await
                .map_err(|_| SyncError::TransportError("inspector gone".into()))?;

            tracing::debug!(%socket, "memory client connected");
            Ok(MemoryClient {
                socket,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
                closed: AtomicBool::new(false),
            })
        }
    }

    /// Inspector end of a [`MemoryNetwork`].
    pub struct MemoryTransport {
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<TransportEvent>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn recv(&self) -> Result<TransportEvent> {
            let mut rx = self.receiver.lock().await;
            rx.recv()
                .await
                .ok_or_else(|| SyncError::TransportError("channel closed".into()))
        }

        async fn recv_timeout(&self, timeout: Duration) -> Result<Option<TransportEvent>> {
            let mut rx = self.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(event)) => Ok(Some(event)),
                Ok(None) => Err(SyncError::TransportError("channel closed".into())),
                Err(_) => Ok(None),
            }
        }

        async fn send(&self, socket: &SocketId, frame: Bytes) -> Result<()> {
            let sender = self
                .network
                .clients
                .read()
                .await
                .get(socket)
                .cloned()
                .ok_or_else(|| SyncError::TransportError(format!("socket {socket} not open")))?;
            sender
                .send(frame)
                .await
                .map_err(|_| SyncError::TransportError(format!("socket {socket} closed")))
        }

        async fn connected_sockets(&self) -> Vec<SocketId> {
            let mut sockets: Vec<_> = self.network.clients.read().await.keys().cloned().collect();
            sockets.sort();
            sockets
        }
    }

    /// Device end of one session.
    ///
    /// Dropping the client closes the session.
    pub struct MemoryClient {
        socket: SocketId,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<Bytes>>,
        closed: AtomicBool,
    }

    impl MemoryClient {
        pub fn socket_id(&self) -> &SocketId {
            &self.socket
        }

        /// Send a frame to the inspector.
        pub async fn send(&self, frame: Bytes) -> Result<()> {
            if self.closed.load(Ordering::Acquire) {
                return Err(SyncError::TransportError("client closed".into()));
            }
            self.network
                .events_tx
                .send(TransportEvent::Frame(self.socket.clone(), frame))
                .await
                .map_err(|_| SyncError::TransportError("inspector gone".into()))
        }

        /// Wait for the next frame from the inspector.
        pub async fn recv(&self) -> Result<Bytes> {
            let mut rx = self.receiver.lock().await;
            rx.recv()
                .await
                .ok_or_else(|| SyncError::TransportError("channel closed".into()))
        }

        /// Receive with timeout. `None` means the timeout expired.
        pub async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Bytes>> {
            let mut rx = self.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(frame)) => Ok(Some(frame)),
                Ok(None) => Err(SyncError::TransportError("channel closed".into())),
                Err(_) => Ok(None),
            }
        }

        /// Close the session. Calling this more than once has no effect.
        pub async fn close(&self) {
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            self.network.clients.write().await.remove(&self.socket);
            let _ = self
                .network
                .events_tx
                .send(TransportEvent::Disconnected(self.socket.clone()))
                .await;
            tracing::debug!(socket = %self.socket, "memory client closed");
        }
    }

    impl Drop for MemoryClient {
        fn drop(&mut self) {
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            if let Ok(mut clients) = self.network.clients.try_write() {
                clients.remove(&self.socket);
            }
            let _ = self
                .network
                .events_tx
                .try_send(TransportEvent::Disconnected(self.socket.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;

    #[tokio::test]
    async fn test_connect_send_recv() {
        let network = MemoryNetwork::new(16);
        let inspector = network.inspector_transport().unwrap();

        let client = network.connect().await.unwrap();
        let socket = client.socket_id().clone();
        assert_eq!(
            inspector.recv().await.unwrap(),
            TransportEvent::Connected(socket.clone())
        );

        client.send(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(
            inspector.recv().await.unwrap(),
            TransportEvent::Frame(socket.clone(), Bytes::from_static(b"hello"))
        );

        inspector
            .send(&socket, Bytes::from_static(b"back"))
            .await
            .unwrap();
        assert_eq!(client.recv().await.unwrap(), Bytes::from_static(b"back"));
    }

    #[tokio::test]
    async fn test_reconnect_gets_new_socket() {
        let network = MemoryNetwork::new(16);
        let inspector = network.inspector_transport().unwrap();

        let first = network.connect().await.unwrap();
        let first_id = first.socket_id().clone();
        first.close().await;
        first.close().await;

        let second = network.connect().await.unwrap();
        assert_ne!(first_id, *second.socket_id());

        let events = [
            inspector.recv().await.unwrap(),
            inspector.recv().await.unwrap(),
            inspector.recv().await.unwrap(),
        ];
        assert_eq!(events[0], TransportEvent::Connected(first_id.clone()));
        assert_eq!(events[1], TransportEvent::Disconnected(first_id.clone()));
        assert!(matches!(events[2], TransportEvent::Connected(_)));

        assert_eq!(
            inspector.connected_sockets().await,
            vec![second.socket_id().clone()]
        );
        assert!(inspector
            .send(&first_id, Bytes::from_static(b"late"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_drop_reports_disconnect() {
        let network = MemoryNetwork::new(16);
        let inspector = network.inspector_transport().unwrap();

        let client = network.connect().await.unwrap();
        let socket = client.socket_id().clone();
        drop(client);

        assert_eq!(
            inspector.recv().await.unwrap(),
            TransportEvent::Connected(socket.clone())
        );
        assert_eq!(
            inspector.recv().await.unwrap(),
            TransportEvent::Disconnected(socket)
        );
    }

    #[tokio::test]
    async fn test_recv_timeout_expires() {
        let network = MemoryNetwork::new(4);
        let inspector = network.inspector_transport().unwrap();
        assert!(network.inspector_transport().is_err());

        let event = inspector
            .recv_timeout(Duration::from_millis(10))
            .await
            .unwrap();
        assert!(event.is_none());
    }
}
