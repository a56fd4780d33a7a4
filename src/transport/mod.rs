//! # Transport Layer
//!
//! TCP servers and clients that move frames through the codec and hand
//! decoded messages to the dispatcher.
//!
//! ## Components
//! - **Connection**: per-connection read and write loops with lifecycle callbacks
//! - **Tcp**: accepting server with net-ID allocation and a dialing client

pub mod connection;
pub mod tcp;

pub use connection::{Connection, ConnectionCallbacks, ConnectionHandle, ConnectionOptions};
pub use tcp::{Client, Server};
