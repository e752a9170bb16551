//! TCP transport on tokio.
//!
//! Each listener gets an accept task; each accepted connection gets a read
//! task and a write task. Reads are pushed to the gateway as raw-byte
//! events; writes arrive over a per-connection channel so the socket is
//! only ever written from one place.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{constants, NetError, Result};
use crate::transport::{ListenerRole, Transport, TransportEvent};

/// Read buffer size per connection; login-era packets are tiny, game-era
/// bursts still fit comfortably.
const READ_BUFFER_SIZE: usize = 8192;

struct Connection {
    role: ListenerRole,
    writer: mpsc::UnboundedSender<Bytes>,
    shutdown: CancellationToken,
}

struct Shared {
    events: mpsc::UnboundedSender<TransportEvent>,
    connections: DashMap<String, Connection>,
    accept_seq: AtomicU64,
    shutdown: CancellationToken,
}

impl Shared {
    /// Remove a connection and report the disconnect. Exactly one caller
    /// wins the removal, so exactly one Disconnected goes out.
    fn drop_connection(&self, connection_id: &str, closed_by_server: bool) {
        if let Some((_, connection)) = self.connections.remove(connection_id) {
            connection.shutdown.cancel();
            let _ = self.events.send(TransportEvent::Disconnected {
                connection_id: connection_id.to_string(),
                role: connection.role,
            });
            info!(
                connection = %connection_id,
                by_server = closed_by_server,
                "Connection closed"
            );
        }
    }

    fn spawn_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        listener_name: &str,
        role: ListenerRole,
    ) {
        let seq = self.accept_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let connection_id = format!("{listener_name}-{seq}-{peer}");

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Bytes>();
        let shutdown = self.shutdown.child_token();
        self.connections.insert(
            connection_id.clone(),
            Connection {
                role,
                writer: writer_tx,
                shutdown: shutdown.clone(),
            },
        );

        let _ = self.events.send(TransportEvent::Connected {
            connection_id: connection_id.clone(),
            role,
        });
        info!(connection = %connection_id, role = role.as_str(), "Connection accepted");

        let (mut read_half, mut write_half) = stream.into_split();

        // Writer: drains the per-connection channel until close or error.
        let write_shutdown = shutdown.clone();
        let write_id = connection_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = write_shutdown.cancelled() => break,
                    maybe = writer_rx.recv() => {
                        let Some(bytes) = maybe else { break };
                        if let Err(e) = write_half.write_all(&bytes).await {
                            debug!(connection = %write_id, error = %e, "Write failed");
                            break;
                        }
                    }
                }
            }
            let _ = write_half.shutdown().await;
        });

        // Reader: pushes raw buffers upward until EOF, error, or close.
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    read = read_half.read(&mut buf) => {
                        match read {
                            Ok(0) => break,
                            Ok(n) => {
                                let _ = this.events.send(TransportEvent::Data {
                                    connection_id: connection_id.clone(),
                                    role,
                                    bytes: Bytes::copy_from_slice(&buf[..n]),
                                });
                            }
                            Err(e) => {
                                debug!(connection = %connection_id, error = %e, "Read failed");
                                break;
                            }
                        }
                    }
                }
            }
            this.drop_connection(&connection_id, false);
        });
    }
}

/// tokio-backed [`Transport`] for the two gateway listeners.
pub struct TcpTransport {
    shared: Arc<Shared>,
}

impl TcpTransport {
    /// Create the transport and the event stream the gateway will consume.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                shared: Arc::new(Shared {
                    events,
                    connections: DashMap::new(),
                    accept_seq: AtomicU64::new(0),
                    shutdown: CancellationToken::new(),
                }),
            }),
            rx,
        )
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let ids: Vec<String> = self
            .shared
            .connections
            .iter()
            .map(|e| e.key().clone())
            .collect();
        for id in ids {
            self.shared.drop_connection(&id, true);
        }
    }

    /// Live connection count across both listeners.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }
}

impl Transport for TcpTransport {
    fn add_listener(&self, name: &str, role: ListenerRole, bind: IpAddr, port: u16) -> Result<()> {
        let addr = SocketAddr::new(bind, port);
        // Bind synchronously so callers get address-in-use errors here,
        // not from a log line of the accept task.
        let std_listener = std::net::TcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        info!(listener = name, address = %addr, role = role.as_str(), "Listening");

        let name = name.to_string();
        let shared = Arc::clone(&self.shared);
        let shutdown = self.shared.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                if let Err(e) = stream.set_nodelay(true) {
                                    debug!(error = %e, "set_nodelay failed");
                                }
                                shared.spawn_connection(stream, peer, &name, role);
                            }
                            Err(e) => {
                                error!(listener = %name, error = %e, "Accept failed");
                            }
                        }
                    }
                }
            }
            debug!(listener = %name, "Accept loop exiting");
        });

        Ok(())
    }

    fn send(&self, connection_id: &str, bytes: &[u8]) -> Result<()> {
        let connection = self
            .shared
            .connections
            .get(connection_id)
            .ok_or_else(|| NetError::Transport(constants::ERR_UNKNOWN_CONNECTION.to_string()))?;
        connection
            .writer
            .send(Bytes::copy_from_slice(bytes))
            .map_err(|_| NetError::ConnectionClosed)
    }

    fn close(&self, connection_id: &str) {
        if self.shared.connections.contains_key(connection_id) {
            self.shared.drop_connection(connection_id, true);
        } else {
            warn!(connection = %connection_id, "Close for unknown connection");
        }
    }
}
