//! TCP server and client built on [`Connection`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ClientConfig, CodecConfig, ServerConfig};
use crate::core::codec::FrameCodec;
use crate::error::constants::ERR_MAX_CONNECTIONS;
use crate::error::{ProtocolError, Result};
use crate::protocol::handler::ConnectionRole;
use crate::protocol::registry::MessageRegistry;
use crate::transport::connection::{
    Connection, ConnectionCallbacks, ConnectionHandle, ConnectionOptions,
};
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::with_timeout_error;

/// Pause after a failed `accept` before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts connections and runs each one on its own task.
///
/// Net-IDs are handed out from a counter starting at 1, in accept order.
pub struct Server {
    config: ServerConfig,
    codec: FrameCodec,
    callbacks: ConnectionCallbacks,
    next_net_id: AtomicI64,
}

impl Server {
    pub fn new(config: ServerConfig, codec: &CodecConfig, registry: Arc<MessageRegistry>) -> Self {
        Self {
            config,
            codec: FrameCodec::new(registry).with_max_message_bytes(codec.max_message_bytes),
            callbacks: ConnectionCallbacks::default(),
            next_net_id: AtomicI64::new(1),
        }
    }

    pub fn with_callbacks(mut self, callbacks: ConnectionCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        Ok(TcpListener::bind(&self.config.address).await?)
    }

    /// Serve until CTRL+C.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        let shutdown = CancellationToken::new();

        let signal = shutdown.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                signal.cancel();
            }
        });

        self.start(listener, shutdown).await
    }

    /// Accept connections until `shutdown` fires, then wait up to the
    /// configured shutdown timeout for open connections to finish.
    #[instrument(skip(self, listener, shutdown), fields(addr = ?listener.local_addr().ok()))]
    pub async fn start(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!("Listening for connections");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Connection task failed");
                    }
                }

                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            accept_backoff(&e).await;
                            continue;
                        }
                    };

                    if tasks.len() >= self.config.max_connections {
                        global_metrics().connection_rejected();
                        warn!(%peer, limit = self.config.max_connections, "{ERR_MAX_CONNECTIONS}");
                        continue;
                    }

                    let net_id = self.next_net_id.fetch_add(1, Ordering::Relaxed);
                    let options = ConnectionOptions {
                        idle_timeout: Some(self.config.idle_timeout),
                        write_queue_limit: self.config.write_queue_limit,
                        close_timeout: self.config.shutdown_timeout,
                    };
                    match Connection::new(
                        stream,
                        net_id,
                        ConnectionRole::Server,
                        self.codec.clone(),
                        self.callbacks.clone(),
                        options,
                        shutdown.child_token(),
                    ) {
                        Ok((_, conn)) => {
                            debug!(%peer, net_id, "Accepted connection");
                            tasks.spawn(async move {
                                // Failures are already logged and reported through callbacks
                                let _ = conn.run().await;
                            });
                        }
                        Err(e) => warn!(%peer, error = %e, "Dropping connection"),
                    }
                }
            }
        }

        info!(connections = tasks.len(), "Shutting down server. Waiting for connections to close...");
        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown timeout reached, aborting remaining connections");
            tasks.shutdown().await;
        } else {
            info!("All connections closed, shutting down");
        }
        Ok(())
    }
}

/// Log a failed `accept` and pause. Errors like EMFILE persist until a
/// connection closes, so retrying at once would spin.
async fn accept_backoff(e: &std::io::Error) {
    error!(error = %e, "Error accepting connection");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Dials a server and runs the resulting connection in the background.
#[derive(Debug, Clone, Copy, Default)]
pub struct Client;

impl Client {
    /// Connect to `config.address`.
    ///
    /// Returns the handle used to write and close, and the task driving the
    /// connection. The task resolves when the connection ends.
    #[instrument(skip_all, fields(address = %config.address, net_id = config.net_id))]
    pub async fn connect(
        config: &ClientConfig,
        codec: &CodecConfig,
        registry: Arc<MessageRegistry>,
        callbacks: ConnectionCallbacks,
    ) -> Result<(ConnectionHandle, JoinHandle<Result<()>>)> {
        let stream = with_timeout_error(
            async { Ok::<_, ProtocolError>(TcpStream::connect(&config.address).await?) },
            config.connection_timeout,
        )
        .await?;
        stream.set_nodelay(true)?;

        let options = ConnectionOptions {
            idle_timeout: Some(config.idle_timeout),
            write_queue_limit: config.write_queue_limit,
            ..ConnectionOptions::default()
        };
        let (handle, conn) = Connection::new(
            stream,
            config.net_id,
            ConnectionRole::Client,
            FrameCodec::new(registry).with_max_message_bytes(codec.max_message_bytes),
            callbacks,
            options,
            CancellationToken::new(),
        )?;

        info!(peer = %handle.peer(), "Connected");
        Ok((handle, tokio::spawn(conn.run())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Instant;

    #[tokio::test]
    async fn test_accept_error_backs_off() {
        let err = io::Error::new(io::ErrorKind::Other, "too many open files");
        let started = Instant::now();
        accept_backoff(&err).await;
        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF);
    }
}
