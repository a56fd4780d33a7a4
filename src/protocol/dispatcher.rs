use crate::core::message::Message;
use crate::error::{ProtocolError, Result};
use crate::protocol::context::RequestContext;
use crate::protocol::handler::WriteCloser;
use crate::protocol::registry::MessageRegistry;
use crate::utils::metrics::global_metrics;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Routes decoded messages to the handler registered for their discriminator.
/// Holds the frozen registry; cloning is cheap.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: Arc<MessageRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    /// Build a fresh context for `msg` and run its handler to completion.
    ///
    /// The context's token is a child of `parent`, so closing the connection
    /// cancels in-flight handlers without the handler cancelling the connection.
    pub fn dispatch(
        &self,
        msg: Box<dyn Message>,
        conn: &Arc<dyn WriteCloser>,
        parent: &CancellationToken,
    ) -> Result<()> {
        let msg_type = msg.message_number();

        let handler = self
            .registry
            .get_handler_func(msg_type)
            .ok_or(ProtocolError::UndefinedType(msg_type))?;

        let ctx = RequestContext::with_cancel(parent.child_token())
            .with_message(Arc::from(msg))
            .with_net_id(conn.net_id())
            .with_connection(conn.clone());

        let started = Instant::now();
        let result = handler.handle(&ctx, conn);
        global_metrics().message_handled(started.elapsed());

        match &result {
            Ok(()) => debug!(
                msg_type = %format_args!("{msg_type:#06x}"),
                net_id = conn.net_id(),
                "Message handled"
            ),
            Err(e) => {
                global_metrics().handler_error();
                warn!(
                    msg_type = %format_args!("{msg_type:#06x}"),
                    net_id = conn.net_id(),
                    error = %e,
                    "Handler failed"
                );
            }
        }
        result
    }
}
