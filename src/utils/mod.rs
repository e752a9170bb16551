//! # Utility Modules
//!
//! Supporting utilities for outbound compression and packet diagnostics.
//!
//! ## Components
//! - **Compression**: the codec seam applied to post-migration sessions,
//!   with LZ4 and Zstd implementations
//! - **Hexdump**: timestamped buffer dumps to a log file, off the hot path

pub mod compression;
pub mod hexdump;

pub use compression::{CompressionCodec, Lz4Codec, PassthroughCodec, ZstdCodec};
pub use hexdump::{Direction, PacketLogger};
