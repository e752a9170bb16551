//! # Protocol Packets
//!
//! The concrete packet types spoken on the login and game listeners.
//!
//! Layouts here are byte-for-byte contracts with a third-party client;
//! field order, padding, and the server-list IP octet reversal are all
//! load-bearing. Change nothing without a capture to compare against.
//!
//! ## Opcode Map
//! | opcode | direction | packet |
//! |--------|-----------|--------|
//! | 0xEF   | C → S     | [`login::LoginSeed`] |
//! | 0x80   | C → S     | [`login::AccountLoginRequest`] |
//! | 0xA8   | S → C     | [`login::ServerListPacket`] |
//! | 0xA0   | C → S     | [`login::ServerSelect`] |
//! | 0x8C   | S → C     | [`login::ServerRedirect`] |
//! | 0x82   | S → C     | [`login::LoginDenied`] |
//! | 0x91   | C → S     | [`game::GameServerLogin`] |
//! | 0x73   | C ↔ S     | [`game::Ping`] |
//! | 0x1C   | S → C     | [`game::SystemNotice`] |

pub mod game;
pub mod login;

use std::fmt;

use crate::core::registry::PacketRegistry;

/// Client version reported in the 0xEF handshake seed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientVersion {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
    pub prototype: u32,
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.revision, self.prototype
        )
    }
}

/// Register every packet this crate speaks natively.
///
/// Idempotent: the registry keeps first registrations, so embedding
/// applications may call this after registering overrides of their own.
pub fn register_all(registry: &PacketRegistry) {
    registry.register::<login::LoginSeed>();
    registry.register::<login::AccountLoginRequest>();
    registry.register::<login::ServerListPacket>();
    registry.register::<login::ServerSelect>();
    registry.register::<login::ServerRedirect>();
    registry.register::<login::LoginDenied>();
    registry.register::<game::GameServerLogin>();
    registry.register::<game::Ping>();
    registry.register::<game::SystemNotice>();
}
