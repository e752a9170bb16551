//! Packets spoken on the game listener.

use std::any::Any;

use crate::core::packet::{Framing, Packet};
use crate::core::wire::{PacketReader, PacketWriter};
use crate::error::Result;

/// 0x91 — the migrated client announcing itself to the game listener with
/// the session key it was handed in the redirect.
///
/// On the wire this always arrives as the 65-byte tail of a 69-byte first
/// buffer (4-byte seed prefix stripped by the gateway).
#[derive(Debug, Default, Clone)]
pub struct GameServerLogin {
    pub session_key: u32,
    pub username: String,
    pub password: String,
}

impl Packet for GameServerLogin {
    fn opcode(&self) -> u8 {
        0x91
    }

    fn name(&self) -> &'static str {
        "GameServerLogin"
    }

    fn framing(&self) -> Framing {
        Framing::Fixed(65)
    }

    fn write_body(&self, w: &mut PacketWriter) -> Result<()> {
        w.write_u32(self.session_key);
        w.write_ascii_fixed(&self.username, 30);
        w.write_ascii_fixed(&self.password, 30);
        Ok(())
    }

    fn read_body(&mut self, r: &mut PacketReader<'_>) -> Result<()> {
        self.session_key = r.read_u32()?;
        self.username = r.read_ascii_fixed(30)?;
        self.password = r.read_ascii_fixed(30)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 0x73 — keepalive; the server echoes the sequence byte back.
#[derive(Debug, Default, Clone)]
pub struct Ping {
    pub sequence: u8,
}

impl Packet for Ping {
    fn opcode(&self) -> u8 {
        0x73
    }

    fn name(&self) -> &'static str {
        "Ping"
    }

    fn framing(&self) -> Framing {
        Framing::Fixed(2)
    }

    fn write_body(&self, w: &mut PacketWriter) -> Result<()> {
        w.write_u8(self.sequence);
        Ok(())
    }

    fn read_body(&mut self, r: &mut PacketReader<'_>) -> Result<()> {
        self.sequence = r.read_u8()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 0x1C — free-form ASCII text pushed to the client.
///
/// Uses the default byte-length framing, so text past 255 bytes is cut at
/// the receiver even though the full body is sent.
#[derive(Debug, Default, Clone)]
pub struct SystemNotice {
    pub text: String,
}

impl Packet for SystemNotice {
    fn opcode(&self) -> u8 {
        0x1C
    }

    fn name(&self) -> &'static str {
        "SystemNotice"
    }

    fn write_body(&self, w: &mut PacketWriter) -> Result<()> {
        w.write_ascii(&self.text);
        Ok(())
    }

    fn read_body(&mut self, r: &mut PacketReader<'_>) -> Result<()> {
        self.text = r.read_ascii_remaining()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
