//! # Error Types
//!
//! Comprehensive error handling for the shard network core.
//!
//! This module defines all error variants that can occur between the
//! transport edge and the packet handlers, from low-level I/O errors to
//! protocol violations and scheduler lifecycle failures.
//!
//! ## Error Categories
//! - **I/O Errors**: Socket and file system failures
//! - **Wire Errors**: Truncated buffers, unknown opcodes, bad frames
//! - **Gateway Errors**: Rejected migrations, closed connections
//! - **Lifecycle Errors**: Scheduler shutdown, configuration problems
//!
//! No error in this crate is allowed to terminate the process; every
//! failure is connection-scoped or action-scoped and is handled (logged,
//! dropped, or answered with a denial packet) at the layer that saw it.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Frame shorter than its declared or implied length
    pub const ERR_SHORT_FRAME: &str = "Frame shorter than declared length";

    /// Fixed-size packet body did not match its wire length
    pub const ERR_FIXED_LENGTH_MISMATCH: &str = "Fixed-size packet body length mismatch";

    /// Word-length packet grew past the u16 length field
    pub const ERR_FRAME_TOO_LARGE: &str = "Packet exceeds u16 frame length";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_UNKNOWN_CONNECTION: &str = "Unknown connection id";

    /// Scheduler lifecycle
    pub const ERR_SCHEDULER_STOPPED: &str = "Event loop is not running";
}

/// Primary error type for all gateway, codec, and scheduler operations.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Buffer truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("No packet registered for opcode 0x{0:02X}")]
    UnknownOpcode(u8),

    #[error("Malformed frame: {0}")]
    BadFrame(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("No pending migration for session key {0}")]
    MigrationRejected(u32),

    #[error("Event loop is not running")]
    SchedulerStopped,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using NetError
pub type Result<T> = std::result::Result<T, NetError>;
