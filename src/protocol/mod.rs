//! # Message Protocol Layer
//!
//! Registration of message types, request contexts and dispatch to handlers.
//!
//! ## Components
//! - **Registry**: per-discriminator unmarshal, handler, type and head functions
//! - **Handler**: handler capability and the `WriteCloser` connection interface
//! - **Context**: cancellable request scope carrying message, net-ID and connection
//! - **Dispatcher**: runs the registered handler for each decoded message
//! - **Echo**: the reference message type with an 18-byte extra header

pub mod context;
pub mod dispatcher;
pub mod echo;
pub mod handler;
pub mod registry;

pub use context::RequestContext;
pub use dispatcher::Dispatcher;
pub use handler::{ConnectionRole, Handler, HandlerFunc, WriteCloser};
pub use registry::{MessageRegistry, RegistryBuilder};
