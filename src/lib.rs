//! # framewire
//!
//! Registry-driven message framing for TCP.
//!
//! Every frame starts with a 2-byte big-endian message type. The functions
//! registered for that type say how many more header bytes follow, where the
//! body length lives inside the header, and how to turn the complete frame
//! into a typed message. The codec itself knows nothing about any message
//! layout.
//!
//! ```no_run
//! use std::sync::Arc;
//! use framewire::protocol::{echo, MessageRegistry};
//! use framewire::core::codec::FrameCodec;
//!
//! # fn main() -> framewire::Result<()> {
//! let mut builder = MessageRegistry::builder();
//! echo::register(&mut builder)?;
//! let codec = FrameCodec::new(Arc::new(builder.build()));
//! # let _ = codec;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::config::NetworkConfig;
pub use crate::core::codec::FrameCodec;
pub use crate::core::message::{Message, HEARTBEAT_MESSAGE_NUMBER, MESSAGE_MAX_BYTES};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::{
    ConnectionRole, Dispatcher, Handler, HandlerFunc, MessageRegistry, RegistryBuilder,
    RequestContext, WriteCloser,
};
pub use crate::transport::{Client, ConnectionCallbacks, ConnectionHandle, Server};
