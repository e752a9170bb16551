//! Outbound compression seam.
//!
//! Once a session migrates to the game listener every outbound payload is
//! run through the configured codec before the transport write. The trait
//! keeps the gateway independent of the algorithm: deployments pair it
//! with whatever the client build expects.

use tracing::warn;

/// One-way compressor applied to outbound payloads.
///
/// Infallible by contract: a codec that cannot compress a buffer must
/// return it unchanged rather than fail a send.
pub trait CompressionCodec: Send + Sync + 'static {
    fn compress(&self, src: &[u8]) -> Vec<u8>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// No-op codec for tests and for clients negotiated without compression.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCodec;

impl CompressionCodec for PassthroughCodec {
    fn compress(&self, src: &[u8]) -> Vec<u8> {
        src.to_vec()
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// LZ4 with a length prefix; cheap enough for per-packet use.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Codec;

impl CompressionCodec for Lz4Codec {
    fn compress(&self, src: &[u8]) -> Vec<u8> {
        lz4_flex::compress_prepend_size(src)
    }

    fn name(&self) -> &'static str {
        "lz4"
    }
}

/// Zstd at a fixed fast level.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 1 }
    }
}

impl CompressionCodec for ZstdCodec {
    fn compress(&self, src: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        match zstd::stream::copy_encode(src, &mut out, self.level) {
            Ok(()) => out,
            Err(e) => {
                // A send must not fail on a codec hiccup; fall back to raw.
                warn!(error = %e, "Zstd compression failed; sending raw");
                src.to_vec()
            }
        }
    }

    fn name(&self) -> &'static str {
        "zstd"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn lz4_roundtrip() {
        let original = vec![7u8; 2048];
        let compressed = Lz4Codec.compress(&original);
        assert!(compressed.len() < original.len());
        let restored = lz4_flex::decompress_size_prepended(&compressed).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn zstd_roundtrip() {
        let original = b"the quick brown fox jumps over the lazy dog".repeat(40);
        let compressed = ZstdCodec::default().compress(&original);
        assert!(compressed.len() < original.len());
        let restored = zstd::stream::decode_all(compressed.as_slice()).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn passthrough_is_identity() {
        let buf = [1u8, 2, 3];
        assert_eq!(PassthroughCodec.compress(&buf), buf);
    }
}
