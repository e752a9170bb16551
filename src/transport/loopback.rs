//! In-memory transport for tests and demos.
//!
//! A test drives the gateway by simulating accepts, inbound buffers, and
//! disconnects; everything the gateway writes is captured per connection
//! instead of hitting a socket.

use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{constants, NetError, Result};
use crate::transport::{ListenerRole, Transport, TransportEvent};

struct LoopbackConnection {
    role: ListenerRole,
    written: Vec<Bytes>,
}

/// Captures writes and lets tests inject transport events directly.
pub struct LoopbackTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    connections: DashMap<String, LoopbackConnection>,
    /// Connections the gateway closed, writes preserved for inspection.
    closed: DashMap<String, LoopbackConnection>,
}

impl LoopbackTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                events,
                connections: DashMap::new(),
                closed: DashMap::new(),
            }),
            rx,
        )
    }

    /// Simulate an accept on a listener.
    pub fn connect(&self, connection_id: &str, role: ListenerRole) {
        self.connections.insert(
            connection_id.to_string(),
            LoopbackConnection {
                role,
                written: Vec::new(),
            },
        );
        let _ = self.events.send(TransportEvent::Connected {
            connection_id: connection_id.to_string(),
            role,
        });
    }

    /// Simulate inbound bytes from the peer.
    pub fn feed(&self, connection_id: &str, bytes: &[u8]) {
        let Some(connection) = self.connections.get(connection_id) else {
            return;
        };
        let role = connection.role;
        drop(connection);
        let _ = self.events.send(TransportEvent::Data {
            connection_id: connection_id.to_string(),
            role,
            bytes: Bytes::copy_from_slice(bytes),
        });
    }

    /// Simulate the peer hanging up.
    pub fn disconnect(&self, connection_id: &str) {
        if let Some((_, connection)) = self.connections.remove(connection_id) {
            let _ = self.events.send(TransportEvent::Disconnected {
                connection_id: connection_id.to_string(),
                role: connection.role,
            });
        }
    }

    /// Everything the gateway has written to a connection so far, including
    /// writes made before a server-side close.
    pub fn written(&self, connection_id: &str) -> Vec<Bytes> {
        self.connections
            .get(connection_id)
            .map(|c| c.written.clone())
            .or_else(|| self.closed.get(connection_id).map(|c| c.written.clone()))
            .unwrap_or_default()
    }

    /// Whether the gateway closed this connection.
    pub fn was_closed(&self, connection_id: &str) -> bool {
        self.closed.contains_key(connection_id)
    }
}

impl Transport for LoopbackTransport {
    fn add_listener(&self, name: &str, role: ListenerRole, bind: IpAddr, port: u16) -> Result<()> {
        info!(listener = name, %bind, port, role = role.as_str(), "Loopback listener ready");
        Ok(())
    }

    fn send(&self, connection_id: &str, bytes: &[u8]) -> Result<()> {
        let mut connection = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| NetError::Transport(constants::ERR_UNKNOWN_CONNECTION.to_string()))?;
        connection.written.push(Bytes::copy_from_slice(bytes));
        Ok(())
    }

    fn close(&self, connection_id: &str) {
        if let Some((id, connection)) = self.connections.remove(connection_id) {
            let role = connection.role;
            self.closed.insert(id.clone(), connection);
            let _ = self.events.send(TransportEvent::Disconnected {
                connection_id: id,
                role,
            });
        }
    }
}
