//! Packet diagnostics: timestamped hex dumps to a log file.
//!
//! The hot path only formats a line and pushes it onto an unbounded
//! channel; a dedicated writer task does the file I/O. Errors anywhere on
//! this path are swallowed — diagnostics must never block or fail a read
//! or a send.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::warn;

/// Whether a dumped buffer was inbound or outbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Recv,
    Send,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Self::Recv => "recv",
            Self::Send => "send",
        }
    }
}

/// Fire-and-forget hex-dump logger.
#[derive(Clone)]
pub struct PacketLogger {
    tx: mpsc::UnboundedSender<String>,
}

impl PacketLogger {
    /// Spawn the writer task appending to `path`.
    pub fn start(path: &str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let path = path.to_string();

        tokio::spawn(async move {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await;

            let mut file = match file {
                Ok(file) => file,
                Err(e) => {
                    // Drain and drop everything; diagnostics are optional.
                    warn!(path = %path, error = %e, "Packet log unavailable");
                    while rx.recv().await.is_some() {}
                    return;
                }
            };

            while let Some(line) = rx.recv().await {
                if file.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        Self { tx }
    }

    /// Queue a dump of `bytes`; never blocks, never errors.
    pub fn log(&self, direction: Direction, connection_id: &str, bytes: &[u8]) {
        let _ = self.tx.send(format_dump(direction, connection_id, bytes));
    }
}

fn format_dump(direction: Direction, connection_id: &str, bytes: &[u8]) -> String {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| format!("{}.{:03}", d.as_secs(), d.subsec_millis()))
        .unwrap_or_else(|_| String::from("0.000"));

    let mut out = String::with_capacity(64 + bytes.len() * 3);
    out.push_str(&format!(
        "[{stamp}] {} {} {} bytes\n",
        direction.tag(),
        connection_id,
        bytes.len()
    ));
    for chunk in bytes.chunks(16) {
        for (i, byte) in chunk.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&format!("{byte:02X}"));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_contains_header_and_hex() {
        let dump = format_dump(Direction::Send, "login-1", &[0x8C, 0x7F, 0x00]);
        assert!(dump.contains("send login-1 3 bytes"));
        assert!(dump.contains("8C 7F 00"));
    }

    #[test]
    fn dump_wraps_at_sixteen_bytes() {
        let dump = format_dump(Direction::Recv, "game-1", &[0u8; 20]);
        // Header line + two hex lines.
        assert_eq!(dump.lines().count(), 3);
    }
}
