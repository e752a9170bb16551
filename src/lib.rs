//! # shardnet
//!
//! Binary protocol engine, session gateway, and event-loop core for
//! game-world shard servers.
//!
//! The crate accepts client connections on two independent listeners
//! ("login" and "game"), frames and decodes a fixed-opcode wire protocol,
//! drives the handshake that migrates a logical session from the login
//! listener to the game listener via a generated session key, and
//! serializes every outbound write through a priority-aware cooperative
//! event loop that also powers server-wide timers.
//!
//! ## Architecture
//! ```text
//! transport ──► NetworkGateway ──► PacketCodec/PacketRegistry
//!     ▲               │ fan-out (WorkQueue)
//!     │               ▼
//!     │         opcode listeners ── send_packet ──► EventLoopScheduler
//!     │                                                   │ tick task
//!     └──────────────── encoded (+compressed) writes ◄────┘
//! ```
//!
//! ## Quick Start
//! ```no_run
//! use shardnet::config::NetConfig;
//! use shardnet::gateway::NetworkGateway;
//! use shardnet::transport::tcp::TcpTransport;
//!
//! #[tokio::main]
//! async fn main() -> shardnet::error::Result<()> {
//!     let config = NetConfig::default();
//!     let (transport, events) = TcpTransport::new();
//!     let gateway = NetworkGateway::builder(config, transport).build();
//!     gateway.start(events)?;
//!     tokio::signal::ctrl_c().await?;
//!     gateway.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//! - All writes to a socket happen on the single tick task, in order.
//! - Decoded packets reach handlers through the fan-out queue, never
//!   inline on the read path.
//! - A migration claim is atomic: one winner per session key.
//! - No failure in this crate terminates the process; errors are
//!   connection-scoped or action-scoped.

pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod transport;
pub mod utils;

pub use config::NetConfig;
pub use error::{NetError, Result};
pub use gateway::NetworkGateway;
pub use scheduler::{ActionHandle, ActionPriority, EventLoopScheduler};
pub use session::{Session, SessionStore};
