//! # Network Gateway
//!
//! The hub between the transport, the codec, the session store, and the
//! event loop. The gateway:
//!
//! - owns the login and game listeners,
//! - strips handshake seed prefixes and decodes inbound buffers,
//! - fans decoded packets out to opcode listeners via the work queue
//!   (never inline on the read path),
//! - runs the login → game handoff state machine (see [`handshake`]),
//! - and routes every outbound send through the event loop as a
//!   High-priority action, so all writes to a socket happen on the tick
//!   task in order.
//!
//! ## Concurrency model
//! Transport read callbacks and application handlers are producers only:
//! they enqueue actions and mutate the thread-safe session maps. The tick
//! task is the sole socket writer.

pub mod handshake;

use std::future::Future;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::NetConfig;
use crate::core::codec::{PacketCodec, SEED_PREFIX_LEN};
use crate::core::packet::Packet;
use crate::core::registry::PacketRegistry;
use crate::error::{NetError, Result};
use crate::protocol::{self, login::DenialReason, login::LoginDenied};
use crate::scheduler::{ActionHandle, ActionPriority, EventLoopScheduler};
use crate::session::{Session, SessionStore};
use crate::transport::{ListenerRole, Transport, TransportEvent};
use crate::utils::compression::{CompressionCodec, PassthroughCodec};
use crate::utils::hexdump::{Direction, PacketLogger};

/// The external fan-out queue that executes packet listeners.
///
/// The gateway only ever enqueues; execution order and parallelism are the
/// queue's business.
pub trait WorkQueue: Send + Sync + 'static {
    fn enqueue(&self, context: &str, work: BoxFuture<'static, ()>);
}

/// Default queue: every work item becomes a tokio task.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioWorkQueue;

impl WorkQueue for TokioWorkQueue {
    fn enqueue(&self, _context: &str, work: BoxFuture<'static, ()>) {
        tokio::spawn(work);
    }
}

/// Runs work on the caller, in order. Listener futures are expected to be
/// ready-made (no real awaiting), which every built-in handler satisfies;
/// useful for tests and embedders that need strict ordering.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineWorkQueue;

impl WorkQueue for InlineWorkQueue {
    fn enqueue(&self, _context: &str, work: BoxFuture<'static, ()>) {
        futures::executor::block_on(work);
    }
}

/// Account credential check; the real implementation lives outside this
/// crate (REST/JWT service), this is only the seam.
pub trait AccountValidator: Send + Sync + 'static {
    fn validate(&self, username: &str, password: &str) -> bool;
}

/// Accepts any non-empty username. Development default.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllValidator;

impl AccountValidator for AllowAllValidator {
    fn validate(&self, username: &str, _password: &str) -> bool {
        !username.is_empty()
    }
}

/// A decoded packet on its way to opcode listeners.
#[derive(Clone)]
pub struct PacketEvent {
    pub connection_id: String,
    pub role: ListenerRole,
    pub packet: Arc<dyn Packet>,
}

type PacketListener = Arc<dyn Fn(PacketEvent) -> BoxFuture<'static, ()> + Send + Sync>;
type SendSubscriber = Box<dyn Fn(&str, u8) + Send + Sync>;
type DisconnectSubscriber = Box<dyn Fn(&str, ListenerRole) + Send + Sync>;

/// The network-facing core: two listeners, one codec, one event loop.
pub struct NetworkGateway {
    config: NetConfig,
    registry: Arc<PacketRegistry>,
    sessions: Arc<SessionStore>,
    scheduler: Arc<EventLoopScheduler>,
    transport: Arc<dyn Transport>,
    work_queue: Arc<dyn WorkQueue>,
    validator: Arc<dyn AccountValidator>,
    compressor: Arc<dyn CompressionCodec>,
    listeners: DashMap<u8, Vec<PacketListener>>,
    send_subscribers: RwLock<Vec<SendSubscriber>>,
    disconnect_subscribers: RwLock<Vec<DisconnectSubscriber>>,
    packet_log: Option<PacketLogger>,
}

/// Step-by-step construction for [`NetworkGateway`].
pub struct GatewayBuilder {
    config: NetConfig,
    transport: Arc<dyn Transport>,
    scheduler: Option<Arc<EventLoopScheduler>>,
    registry: Option<Arc<PacketRegistry>>,
    sessions: Option<Arc<SessionStore>>,
    work_queue: Option<Arc<dyn WorkQueue>>,
    validator: Option<Arc<dyn AccountValidator>>,
    compressor: Option<Arc<dyn CompressionCodec>>,
}

impl GatewayBuilder {
    pub fn scheduler(mut self, scheduler: Arc<EventLoopScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn registry(mut self, registry: Arc<PacketRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn work_queue(mut self, queue: Arc<dyn WorkQueue>) -> Self {
        self.work_queue = Some(queue);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn AccountValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn compressor(mut self, compressor: Arc<dyn CompressionCodec>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Assemble the gateway and install the built-in protocol handlers.
    ///
    /// Must run inside a tokio runtime when packet diagnostics are enabled
    /// (the hex-dump writer is a spawned task).
    pub fn build(self) -> Arc<NetworkGateway> {
        let registry = self.registry.unwrap_or_else(|| {
            let registry = Arc::new(PacketRegistry::new());
            protocol::register_all(&registry);
            registry
        });

        let packet_log = if self.config.diagnostics.packet_log_enabled {
            self.config
                .diagnostics
                .packet_log_path
                .as_deref()
                .map(PacketLogger::start)
        } else {
            None
        };

        let scheduler = self
            .scheduler
            .unwrap_or_else(|| EventLoopScheduler::new(self.config.scheduler.clone()));

        let gateway = Arc::new(NetworkGateway {
            config: self.config,
            registry,
            sessions: self.sessions.unwrap_or_default(),
            scheduler,
            transport: self.transport,
            work_queue: self.work_queue.unwrap_or_else(|| Arc::new(TokioWorkQueue)),
            validator: self.validator.unwrap_or_else(|| Arc::new(AllowAllValidator)),
            compressor: self
                .compressor
                .unwrap_or_else(|| Arc::new(PassthroughCodec)),
            listeners: DashMap::new(),
            send_subscribers: RwLock::new(Vec::new()),
            disconnect_subscribers: RwLock::new(Vec::new()),
            packet_log,
        });

        gateway.install_protocol_handlers();
        gateway
    }
}

impl NetworkGateway {
    pub fn builder(config: NetConfig, transport: Arc<dyn Transport>) -> GatewayBuilder {
        GatewayBuilder {
            config,
            transport,
            scheduler: None,
            registry: None,
            sessions: None,
            work_queue: None,
            validator: None,
            compressor: None,
        }
    }

    /// Open both listeners, start the event loop, and pump transport
    /// events until the stream ends.
    pub fn start(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<()> {
        self.config.validate_strict()?;

        for (listener, role) in [
            (&self.config.login, ListenerRole::Login),
            (&self.config.game, ListenerRole::Game),
        ] {
            let bind: IpAddr = listener
                .bind
                .parse()
                .map_err(|_| NetError::Config(format!("Invalid bind address: {}", listener.bind)))?;
            self.transport
                .add_listener(&listener.name, role, bind, listener.port)?;
        }

        self.scheduler.start();
        handshake::schedule_migration_purge(self);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                this.handle_event(event);
            }
            debug!("Transport event stream ended");
        });

        info!(
            login_port = self.config.login.port,
            game_port = self.config.game.port,
            "Gateway started"
        );
        Ok(())
    }

    /// Stop the event loop (best effort, bounded by the shutdown timeout).
    pub async fn stop(&self) {
        self.scheduler.stop().await;
    }

    /// Process one transport event.
    ///
    /// `start` pumps these from the transport channel; embedders with their
    /// own event loop (and tests) may feed events directly instead.
    pub fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Connected {
                connection_id,
                role,
            } => {
                self.sessions.create(&connection_id);
                debug!(connection = %connection_id, role = role.as_str(), "Session created");
            }
            TransportEvent::Disconnected {
                connection_id,
                role,
            } => {
                self.handle_disconnect(&connection_id, role);
            }
            TransportEvent::Data {
                connection_id,
                role,
                bytes,
            } => {
                self.handle_data(&connection_id, role, &bytes);
            }
        }
    }

    fn handle_disconnect(&self, connection_id: &str, role: ListenerRole) {
        if let Some(session) = self.sessions.remove(connection_id) {
            // An authenticated login session is mid-handoff: stash it for
            // the game listener. Everything else just goes away.
            if role == ListenerRole::Login && session.auth_id > 0 {
                info!(
                    connection = %connection_id,
                    session_key = session.auth_id,
                    account = %session.account_id,
                    "Login session awaiting migration"
                );
                self.sessions.stash_pending(session.snapshot());
            }
        }

        match self.disconnect_subscribers.read() {
            Ok(subs) => {
                for sub in subs.iter() {
                    sub(connection_id, role);
                }
            }
            Err(poisoned) => {
                for sub in poisoned.into_inner().iter() {
                    sub(connection_id, role);
                }
            }
        }
    }

    fn handle_data(self: &Arc<Self>, connection_id: &str, role: ListenerRole, bytes: &Bytes) {
        if let Some(log) = &self.packet_log {
            log.log(Direction::Recv, connection_id, bytes);
        }

        let Some(session) = self.sessions.get(connection_id) else {
            warn!(connection = %connection_id, "Data for unknown session dropped");
            return;
        };

        let mut buf: &[u8] = bytes;

        if !session.first_packet_received {
            self.sessions
                .with_session(connection_id, |s| s.first_packet_received = true);

            if let Some((seed, rest)) = PacketCodec::split_seed_prefix(buf) {
                self.sessions.with_session(connection_id, |s| {
                    s.seed = seed;
                    s.is_seed = true;
                });
                debug!(connection = %connection_id, seed, "Seed prefix stripped");
                buf = rest;
            } else if buf.len() == SEED_PREFIX_LEN {
                // Legacy clients open with a naked 4-byte seed.
                let seed = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
                self.sessions.with_session(connection_id, |s| {
                    s.seed = seed;
                    s.is_seed = true;
                });
                debug!(connection = %connection_id, seed, "Naked seed received");
                return;
            }
        }

        while !buf.is_empty() {
            match PacketCodec::decode_frame(&self.registry, buf) {
                Ok(frame) => {
                    buf = &buf[frame.consumed..];
                    self.dispatch(connection_id, role, frame.packet);
                }
                Err(NetError::UnknownOpcode(opcode)) => {
                    warn!(
                        connection = %connection_id,
                        opcode = %format_args!("0x{opcode:02X}"),
                        dropped = buf.len(),
                        "Unregistered opcode; dropping buffer"
                    );
                    return;
                }
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Undecodable buffer dropped");
                    return;
                }
            }
        }
    }

    fn dispatch(&self, connection_id: &str, role: ListenerRole, packet: Box<dyn Packet>) {
        let opcode = packet.opcode();
        let listeners: Vec<PacketListener> = match self.listeners.get(&opcode) {
            Some(entry) => entry.value().clone(),
            None => {
                debug!(
                    connection = %connection_id,
                    opcode = %format_args!("0x{opcode:02X}"),
                    "No listener for opcode; packet dropped"
                );
                return;
            }
        };

        let packet: Arc<dyn Packet> = Arc::from(packet);
        for listener in listeners {
            let event = PacketEvent {
                connection_id: connection_id.to_string(),
                role,
                packet: Arc::clone(&packet),
            };
            let context = format!("{connection_id}/0x{opcode:02X}");
            self.work_queue.enqueue(&context, listener(event));
        }
    }

    /// Register an opcode listener. Every registered listener sees every
    /// packet for its opcode, via the work queue.
    pub fn register_listener<F, Fut>(&self, opcode: u8, listener: F)
    where
        F: Fn(PacketEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped: PacketListener = Arc::new(move |event| {
            let work: BoxFuture<'static, ()> = Box::pin(listener(event));
            work
        });
        self.listeners.entry(opcode).or_default().push(wrapped);
    }

    /// Queue an outbound packet as a High-priority event-loop action.
    ///
    /// Encoding, optional compression, and the transport write all happen
    /// on the tick task; the returned handle cancels the send if the tick
    /// has not picked it up yet.
    pub fn send_packet<P: Packet>(self: &Arc<Self>, connection_id: &str, packet: P) -> ActionHandle {
        let name = format!(
            "send {} 0x{:02X} to {}",
            packet.name(),
            packet.opcode(),
            connection_id
        );
        let this = Arc::clone(self);
        let connection_id = connection_id.to_string();
        self.scheduler.enqueue_action(
            name,
            move || {
                if let Err(e) = this.write_now(&connection_id, &packet) {
                    warn!(connection = %connection_id, error = %e, "Outbound send failed");
                }
            },
            ActionPriority::High,
        )
    }

    /// Send a denial and drop the connection, in order, on the tick task.
    pub(crate) fn deny_and_close(self: &Arc<Self>, connection_id: &str, reason: DenialReason) {
        let this = Arc::clone(self);
        let connection_id = connection_id.to_string();
        self.scheduler.enqueue_action(
            format!("deny+close {connection_id}"),
            move || {
                if let Err(e) = this.write_now(&connection_id, &LoginDenied { reason }) {
                    warn!(connection = %connection_id, error = %e, "Denial send failed");
                }
                this.transport.close(&connection_id);
                this.sessions.remove(&connection_id);
            },
            ActionPriority::High,
        );
    }

    /// Encode, compress when the session calls for it, and write. Tick-task
    /// only.
    fn write_now(&self, connection_id: &str, packet: &dyn Packet) -> Result<()> {
        let frame = PacketCodec::encode(packet)?;
        let compress = self
            .sessions
            .get(connection_id)
            .is_some_and(|s| s.use_compression);

        if compress {
            let compressed = self.compressor.compress(&frame);
            if let Some(log) = &self.packet_log {
                log.log(Direction::Send, connection_id, &compressed);
            }
            self.transport.send(connection_id, &compressed)?;
        } else {
            if let Some(log) = &self.packet_log {
                log.log(Direction::Send, connection_id, &frame);
            }
            self.transport.send(connection_id, &frame)?;
        }

        match self.send_subscribers.read() {
            Ok(subs) => {
                for sub in subs.iter() {
                    sub(connection_id, packet.opcode());
                }
            }
            Err(poisoned) => {
                for sub in poisoned.into_inner().iter() {
                    sub(connection_id, packet.opcode());
                }
            }
        }
        Ok(())
    }

    /// Subscribe to completed outbound sends (connection id, opcode).
    pub fn on_send_packet(&self, subscriber: impl Fn(&str, u8) + Send + Sync + 'static) {
        match self.send_subscribers.write() {
            Ok(mut subs) => subs.push(Box::new(subscriber)),
            Err(poisoned) => poisoned.into_inner().push(Box::new(subscriber)),
        }
    }

    /// Subscribe to connection teardown (connection id, listener role).
    pub fn on_disconnect(&self, subscriber: impl Fn(&str, ListenerRole) + Send + Sync + 'static) {
        match self.disconnect_subscribers.write() {
            Ok(mut subs) => subs.push(Box::new(subscriber)),
            Err(poisoned) => poisoned.into_inner().push(Box::new(subscriber)),
        }
    }

    /// Session accessor by connection id.
    pub fn session(&self, connection_id: &str) -> Option<Session> {
        self.sessions.get(connection_id)
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn scheduler(&self) -> &Arc<EventLoopScheduler> {
        &self.scheduler
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub(crate) fn validator(&self) -> &Arc<dyn AccountValidator> {
        &self.validator
    }
}
