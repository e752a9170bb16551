//! Packets spoken on the login listener.

use std::any::Any;
use std::net::Ipv4Addr;

use crate::core::packet::{Framing, Packet};
use crate::core::wire::{PacketReader, PacketWriter};
use crate::error::Result;
use crate::protocol::ClientVersion;

/// 0xEF — handshake seed plus client version, first frame of a modern
/// login session.
#[derive(Debug, Default, Clone)]
pub struct LoginSeed {
    pub seed: i32,
    pub version: ClientVersion,
}

impl Packet for LoginSeed {
    fn opcode(&self) -> u8 {
        0xEF
    }

    fn name(&self) -> &'static str {
        "LoginSeed"
    }

    fn framing(&self) -> Framing {
        Framing::Fixed(21)
    }

    fn write_body(&self, w: &mut PacketWriter) -> Result<()> {
        w.write_i32(self.seed);
        w.write_u32(self.version.major);
        w.write_u32(self.version.minor);
        w.write_u32(self.version.revision);
        w.write_u32(self.version.prototype);
        Ok(())
    }

    fn read_body(&mut self, r: &mut PacketReader<'_>) -> Result<()> {
        self.seed = r.read_i32()?;
        self.version = ClientVersion {
            major: r.read_u32()?,
            minor: r.read_u32()?,
            revision: r.read_u32()?,
            prototype: r.read_u32()?,
        };
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 0x80 — account credentials.
#[derive(Debug, Default, Clone)]
pub struct AccountLoginRequest {
    pub username: String,
    pub password: String,
    pub next_login_key: u8,
}

impl Packet for AccountLoginRequest {
    fn opcode(&self) -> u8 {
        0x80
    }

    fn name(&self) -> &'static str {
        "AccountLoginRequest"
    }

    fn framing(&self) -> Framing {
        Framing::Fixed(62)
    }

    fn write_body(&self, w: &mut PacketWriter) -> Result<()> {
        w.write_ascii_fixed(&self.username, 30);
        w.write_ascii_fixed(&self.password, 30);
        w.write_u8(self.next_login_key);
        Ok(())
    }

    fn read_body(&mut self, r: &mut PacketReader<'_>) -> Result<()> {
        self.username = r.read_ascii_fixed(30)?;
        self.password = r.read_ascii_fixed(30)?;
        self.next_login_key = r.read_u8()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One advertised game server in the 0xA8 list.
#[derive(Debug, Clone)]
pub struct ServerListEntry {
    pub index: u16,
    pub name: String,
    /// Load percentage, 0-100.
    pub percent_full: u8,
    pub timezone: u8,
    pub address: Ipv4Addr,
}

/// 0xA8 — the game server list sent after credentials are accepted.
///
/// Entry addresses go out with their octets reversed; the client reads
/// them that way and nothing else does.
#[derive(Debug, Default, Clone)]
pub struct ServerListPacket {
    pub flags: u8,
    pub entries: Vec<ServerListEntry>,
}

impl Packet for ServerListPacket {
    fn opcode(&self) -> u8 {
        0xA8
    }

    fn name(&self) -> &'static str {
        "ServerList"
    }

    fn framing(&self) -> Framing {
        Framing::WordLength
    }

    fn write_body(&self, w: &mut PacketWriter) -> Result<()> {
        w.write_u8(self.flags);
        w.write_u16(self.entries.len() as u16);
        for entry in &self.entries {
            w.write_u16(entry.index);
            w.write_ascii_fixed(&entry.name, 32);
            w.write_u8(entry.percent_full);
            w.write_u8(entry.timezone);
            let octets = entry.address.octets();
            w.write_bytes(&[octets[3], octets[2], octets[1], octets[0]]);
        }
        Ok(())
    }

    fn read_body(&mut self, r: &mut PacketReader<'_>) -> Result<()> {
        self.flags = r.read_u8()?;
        let count = r.read_u16()?;
        self.entries = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let index = r.read_u16()?;
            let name = r.read_ascii_fixed(32)?;
            let percent_full = r.read_u8()?;
            let timezone = r.read_u8()?;
            let raw = r.read_bytes(4)?;
            let address = Ipv4Addr::new(raw[3], raw[2], raw[1], raw[0]);
            self.entries.push(ServerListEntry {
                index,
                name,
                percent_full,
                timezone,
                address,
            });
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 0xA0 — the client's pick from the server list.
#[derive(Debug, Default, Clone)]
pub struct ServerSelect {
    pub index: u16,
}

impl Packet for ServerSelect {
    fn opcode(&self) -> u8 {
        0xA0
    }

    fn name(&self) -> &'static str {
        "ServerSelect"
    }

    fn framing(&self) -> Framing {
        Framing::Fixed(3)
    }

    fn write_body(&self, w: &mut PacketWriter) -> Result<()> {
        w.write_u16(self.index);
        Ok(())
    }

    fn read_body(&mut self, r: &mut PacketReader<'_>) -> Result<()> {
        self.index = r.read_u16()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 0x8C — redirect to the game listener, carrying the session key the
/// client must present there.
///
/// Unlike the server list, the address travels in natural octet order.
#[derive(Debug, Clone)]
pub struct ServerRedirect {
    pub address: Ipv4Addr,
    pub port: u16,
    pub session_key: u32,
}

impl Default for ServerRedirect {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::UNSPECIFIED,
            port: 0,
            session_key: 0,
        }
    }
}

impl Packet for ServerRedirect {
    fn opcode(&self) -> u8 {
        0x8C
    }

    fn name(&self) -> &'static str {
        "ServerRedirect"
    }

    fn framing(&self) -> Framing {
        Framing::Fixed(11)
    }

    fn write_body(&self, w: &mut PacketWriter) -> Result<()> {
        w.write_bytes(&self.address.octets());
        w.write_u16(self.port);
        w.write_u32(self.session_key);
        Ok(())
    }

    fn read_body(&mut self, r: &mut PacketReader<'_>) -> Result<()> {
        let raw = r.read_bytes(4)?;
        self.address = Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]);
        self.port = r.read_u16()?;
        self.session_key = r.read_u32()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Why a login or migration attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DenialReason {
    #[default]
    InvalidCredentials,
    AccountInUse,
    AccountBlocked,
    BadPassword,
    CommunicationProblem,
}

impl DenialReason {
    pub fn ordinal(self) -> u8 {
        match self {
            Self::InvalidCredentials => 0,
            Self::AccountInUse => 1,
            Self::AccountBlocked => 2,
            Self::BadPassword => 3,
            Self::CommunicationProblem => 4,
        }
    }

    pub fn from_ordinal(value: u8) -> Self {
        match value {
            1 => Self::AccountInUse,
            2 => Self::AccountBlocked,
            3 => Self::BadPassword,
            4 => Self::CommunicationProblem,
            _ => Self::InvalidCredentials,
        }
    }
}

/// 0x82 — login or migration denial.
#[derive(Debug, Default, Clone)]
pub struct LoginDenied {
    pub reason: DenialReason,
}

impl Packet for LoginDenied {
    fn opcode(&self) -> u8 {
        0x82
    }

    fn name(&self) -> &'static str {
        "LoginDenied"
    }

    fn framing(&self) -> Framing {
        Framing::Fixed(2)
    }

    fn write_body(&self, w: &mut PacketWriter) -> Result<()> {
        w.write_u8(self.reason.ordinal());
        Ok(())
    }

    fn read_body(&mut self, r: &mut PacketReader<'_>) -> Result<()> {
        self.reason = DenialReason::from_ordinal(r.read_u8()?);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::codec::PacketCodec;
    use crate::core::registry::PacketRegistry;

    #[test]
    fn login_request_roundtrip() {
        let registry = PacketRegistry::new();
        registry.register::<AccountLoginRequest>();

        let frame = PacketCodec::encode(&AccountLoginRequest {
            username: "guest".into(),
            password: "hunter2".into(),
            next_login_key: 0xFF,
        })
        .unwrap();
        assert_eq!(frame.len(), 62);

        let decoded = PacketCodec::decode_frame(&registry, &frame).unwrap();
        let request = decoded
            .packet
            .as_any()
            .downcast_ref::<AccountLoginRequest>()
            .unwrap();
        assert_eq!(request.username, "guest");
        assert_eq!(request.password, "hunter2");
        assert_eq!(request.next_login_key, 0xFF);
    }

    #[test]
    fn denial_reason_ordinals_are_stable() {
        for raw in 0..5 {
            assert_eq!(DenialReason::from_ordinal(raw).ordinal(), raw);
        }
        // Unknown ordinals collapse to the generic denial.
        assert_eq!(
            DenialReason::from_ordinal(200),
            DenialReason::InvalidCredentials
        );
    }

    #[test]
    fn login_seed_carries_version() {
        let registry = PacketRegistry::new();
        registry.register::<LoginSeed>();

        let frame = PacketCodec::encode(&LoginSeed {
            seed: -4,
            version: ClientVersion {
                major: 7,
                minor: 0,
                revision: 45,
                prototype: 0,
            },
        })
        .unwrap();
        assert_eq!(frame.len(), 21);

        let decoded = PacketCodec::decode_frame(&registry, &frame).unwrap();
        let seed = decoded.packet.as_any().downcast_ref::<LoginSeed>().unwrap();
        assert_eq!(seed.seed, -4);
        assert_eq!(seed.version.to_string(), "7.0.45.0");
    }
}
