//! # Transport Layer
//!
//! The byte-moving edge of the gateway. A [`Transport`] owns listeners and
//! sockets; it reports accepts, disconnects, and raw inbound bytes as
//! [`TransportEvent`]s over a channel and accepts outbound writes by
//! connection id. It knows nothing about packets, sessions, or framing.
//!
//! ## Components
//! - **tcp**: tokio TCP listeners with per-connection read/write tasks
//! - **loopback**: in-memory transport for tests and demos

pub mod loopback;
pub mod tcp;

use bytes::Bytes;
use std::net::IpAddr;

use crate::error::Result;

/// Which of the two gateway listeners a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerRole {
    Login,
    Game,
}

impl ListenerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Game => "game",
        }
    }
}

/// Connection lifecycle and data events emitted by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected {
        connection_id: String,
        role: ListenerRole,
    },
    Disconnected {
        connection_id: String,
        role: ListenerRole,
    },
    Data {
        connection_id: String,
        role: ListenerRole,
        bytes: Bytes,
    },
}

/// A byte transport the gateway can drive.
///
/// Implementations must deliver events for each connection in order and
/// emit exactly one `Disconnected` per accepted connection, whether the
/// peer or the server closed it.
pub trait Transport: Send + Sync + 'static {
    /// Open a listener and start accepting.
    fn add_listener(&self, name: &str, role: ListenerRole, bind: IpAddr, port: u16) -> Result<()>;

    /// Write bytes to a connection.
    fn send(&self, connection_id: &str, bytes: &[u8]) -> Result<()>;

    /// Close a connection from the server side.
    fn close(&self, connection_id: &str);
}
