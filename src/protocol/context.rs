//! # Request Context
//!
//! Per-message context handed to handlers. It carries the decoded message,
//! the net-ID of the connection it arrived on, the connection itself and its
//! role, layered on a cancellation token and optional deadline.
//!
//! A context is built fresh by the dispatcher for every incoming message and
//! dropped when the handler returns. Asking for a value that was never set is a
//! contract violation reported as `ProtocolError::MissingContext`.
//!
//! ```rust
//! use framewire::protocol::context::RequestContext;
//!
//! let ctx = RequestContext::background().with_net_id(42);
//! assert_eq!(ctx.net_id().unwrap(), 42);
//! assert!(ctx.message().is_err());
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::core::message::Message;
use crate::error::constants::{CTX_CONNECTION, CTX_MESSAGE, CTX_NET_ID};
use crate::error::{ProtocolError, Result};
use crate::protocol::handler::{ConnectionRole, WriteCloser};

#[derive(Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    message: Option<Arc<dyn Message>>,
    net_id: Option<i64>,
    connection: Option<Arc<dyn WriteCloser>>,
    role: Option<ConnectionRole>,
}

impl RequestContext {
    /// Empty context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Empty context cancelled together with `cancel`.
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    /// Copy of this context whose token is a child of the current one, so
    /// cancelling the copy leaves the parent untouched.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_message(mut self, msg: Arc<dyn Message>) -> Self {
        self.message = Some(msg);
        self
    }

    pub fn with_net_id(mut self, net_id: i64) -> Self {
        self.net_id = Some(net_id);
        self
    }

    /// Attach the owning connection; also records its role.
    pub fn with_connection(mut self, conn: Arc<dyn WriteCloser>) -> Self {
        self.role = Some(conn.role());
        self.connection = Some(conn);
        self
    }

    pub fn with_role(mut self, role: ConnectionRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn message(&self) -> Result<&Arc<dyn Message>> {
        self.message
            .as_ref()
            .ok_or_else(|| ProtocolError::MissingContext(CTX_MESSAGE.to_string()))
    }

    /// The message downcast to its concrete type.
    pub fn message_as<T: Message>(&self) -> Result<&T> {
        self.message()?.downcast_ref::<T>().ok_or_else(|| {
            ProtocolError::MissingContext(format!(
                "{CTX_MESSAGE} of type {}",
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn net_id(&self) -> Result<i64> {
        self.net_id
            .ok_or_else(|| ProtocolError::MissingContext(CTX_NET_ID.to_string()))
    }

    pub fn connection(&self) -> Result<&Arc<dyn WriteCloser>> {
        self.connection
            .as_ref()
            .ok_or_else(|| ProtocolError::MissingContext(CTX_CONNECTION.to_string()))
    }

    pub fn role(&self) -> Option<ConnectionRole> {
        self.role
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once the token fired or the deadline passed.
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Cancelled)` or `Err(Timeout)` once the context is done.
    pub fn err(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ProtocolError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Err(ProtocolError::Timeout)
        } else {
            Ok(())
        }
    }

    /// Resolves when the token is cancelled or the deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline.into()) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("deadline", &self.deadline)
            .field("message", &self.message)
            .field("net_id", &self.net_id)
            .field("role", &self.role)
            .finish()
    }
}
