//! Handler capability and the connection interface handlers talk to.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::message::Message;
use crate::error::Result;
use crate::protocol::context::RequestContext;

/// Which side of the socket a connection lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionRole {
    /// Accepted by a server.
    Server,
    /// Dialed by a client.
    Client,
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRole::Server => f.write_str("server"),
            ConnectionRole::Client => f.write_str("client"),
        }
    }
}

/// What a handler can do with the connection a message arrived on.
pub trait WriteCloser: Send + Sync {
    /// Identity assigned to this connection.
    fn net_id(&self) -> i64;

    fn role(&self) -> ConnectionRole;

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Queue `msg` for transmission. Does not wait for the socket.
    fn write(&self, msg: Arc<dyn Message>) -> Result<()>;

    /// Ask the connection to shut down.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Application-level processing of one decoded message.
pub trait Handler: Send + Sync {
    fn handle(&self, ctx: &RequestContext, conn: &Arc<dyn WriteCloser>) -> Result<()>;
}

/// Adapter that lets an ordinary function or closure act as a [`Handler`].
pub struct HandlerFunc<F>(F);

impl<F> HandlerFunc<F>
where
    F: Fn(&RequestContext, &Arc<dyn WriteCloser>) -> Result<()> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Handler for HandlerFunc<F>
where
    F: Fn(&RequestContext, &Arc<dyn WriteCloser>) -> Result<()> + Send + Sync,
{
    #[inline]
    fn handle(&self, ctx: &RequestContext, conn: &Arc<dyn WriteCloser>) -> Result<()> {
        (self.0)(ctx, conn)
    }
}

impl<F> fmt::Debug for HandlerFunc<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HandlerFunc")
    }
}
