//! # Error Types
//!
//! Error handling shared by the frame codec, the message registry and the
//! connection layer.
//!
//! ## Error Categories
//! - **I/O Errors**: failures of the underlying stream, carried unchanged
//! - **Framing Errors**: `NilData`, `WouldBlock`, `BadData`, `UndefinedType`
//! - **Registration Errors**: duplicate discriminators found while building a registry
//! - **Context Errors**: a handler asked for a value the dispatch path never set
//! - **Lifecycle Errors**: timeouts, cancellation, closed connections, configuration
//!
//! A stream error is never folded into a framing error, so a caller can tell
//! "the peer closed" (`Io` with `UnexpectedEof`) apart from "the peer sent bytes
//! we don't understand" (`UndefinedType`).
//!
//! ## Example Usage
//! ```rust
//! use framewire::error::{ProtocolError, Result};
//! use tracing::{error, warn};
//!
//! fn body_length(header: &[u8]) -> Result<usize> {
//!     if header.len() < 4 {
//!         return Err(ProtocolError::NilData);
//!     }
//!     Ok(u16::from_be_bytes([header[2], header[3]]) as usize)
//! }
//!
//! match body_length(&[0x00, 0x01]) {
//!     Ok(len) => println!("body is {len} bytes"),
//!     Err(e) if e.is_protocol() => warn!(error = %e, "malformed header"),
//!     Err(e) => error!(error = %e, "stream failure"),
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Context errors
    pub const CTX_MESSAGE: &str = "message";
    pub const CTX_NET_ID: &str = "net_id";
    pub const CTX_CONNECTION: &str = "connection";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_WRITE_QUEUE_FULL: &str = "Outbound queue is full";
    pub const ERR_CONNECTION_REJECTED: &str = "Connection rejected by on_connect callback";
    pub const ERR_MAX_CONNECTIONS: &str = "Maximum number of connections reached";
}

// ProtocolError is the primary error type for all framing operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Nil data")]
    NilData,

    #[error("Would block")]
    WouldBlock,

    #[error("Bad data")]
    BadData,

    #[error("Undefined message type {0:#06x}")]
    UndefinedType(u16),

    #[error("Message type {0:#06x} registered twice")]
    DuplicateRegistration(u16),

    #[error("Context value not set: {0}")]
    MissingContext(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// True when the failure came from the stream or the connection itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::Timeout
                | ProtocolError::Cancelled
                | ProtocolError::ConnectionClosed
        )
    }

    /// True when the peer sent bytes that do not form a valid frame.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            ProtocolError::NilData
                | ProtocolError::WouldBlock
                | ProtocolError::BadData
                | ProtocolError::UndefinedType(_)
        )
    }

    /// True when the stream ended before a complete frame arrived.
    pub fn is_eof(&self) -> bool {
        matches!(self, ProtocolError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
