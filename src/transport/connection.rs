//! # Connection
//!
//! One TCP connection driven by two tasks:
//! - the read loop decodes frames in arrival order and hands each one to the
//!   dispatcher before reading the next, so handlers see a connection's
//!   messages in the order the peer wrote them;
//! - the write loop drains a bounded queue through a `FramedWrite`.
//!
//! Any decode failure ends the connection. `on_error` fires first, then
//! `on_close`. A peer that hangs up is a normal close. Once a close starts the
//! writer gets `close_timeout` to flush what is queued; a peer that stopped
//! reading cannot hold the connection open past that.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::core::codec::FrameCodec;
use crate::core::message::Message;
use crate::error::constants::{
    ERR_CONNECTION_CLOSED, ERR_CONNECTION_REJECTED, ERR_WRITE_QUEUE_FULL,
};
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handler::{ConnectionRole, WriteCloser};
use crate::utils::metrics::{global_metrics, Timer};
use crate::utils::timeout::{with_timeout_error, ReadControl, DEFAULT_CLOSE_TIMEOUT};

pub type OnConnect = Arc<dyn Fn(&ConnectionHandle) -> bool + Send + Sync>;
pub type OnMessage = Arc<dyn Fn(&dyn Message, &ConnectionHandle) + Send + Sync>;
pub type OnClose = Arc<dyn Fn(&ConnectionHandle) + Send + Sync>;
pub type OnError = Arc<dyn Fn(&ConnectionHandle, &ProtocolError) + Send + Sync>;

/// Lifecycle hooks configured by the application.
#[derive(Clone, Default)]
pub struct ConnectionCallbacks {
    on_connect: Option<OnConnect>,
    on_message: Option<OnMessage>,
    on_close: Option<OnClose>,
    on_error: Option<OnError>,
}

impl ConnectionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called before the first read; returning `false` drops the connection.
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConnectionHandle) -> bool + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Called for every decoded message, before its handler runs.
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Message, &ConnectionHandle) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConnectionHandle) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConnectionHandle, &ProtocolError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for ConnectionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCallbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Per-connection tuning.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    pub idle_timeout: Option<Duration>,
    pub write_queue_limit: usize,
    pub close_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            write_queue_limit: 64,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// Cheap, cloneable reference to a live connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    net_id: i64,
    role: ConnectionRole,
    peer: SocketAddr,
    tx: mpsc::Sender<Arc<dyn Message>>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Resolves once the connection has been asked to close.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}

impl WriteCloser for ConnectionHandle {
    fn net_id(&self) -> i64 {
        self.net_id
    }

    fn role(&self) -> ConnectionRole {
        self.role
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn write(&self, msg: Arc<dyn Message>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!(net_id = self.net_id, "{ERR_WRITE_QUEUE_FULL}");
                ProtocolError::WouldBlock
            }
            mpsc::error::TrySendError::Closed(_) => ProtocolError::ConnectionClosed,
        })
    }

    fn close(&self) {
        self.cancel.cancel();
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("net_id", &self.net_id)
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("closed", &self.cancel.is_cancelled())
            .finish()
    }
}

/// A connection that has not started running yet.
pub struct Connection {
    stream: TcpStream,
    handle: ConnectionHandle,
    rx: mpsc::Receiver<Arc<dyn Message>>,
    codec: FrameCodec,
    callbacks: ConnectionCallbacks,
    idle_timeout: Option<Duration>,
    close_timeout: Duration,
}

impl Connection {
    /// Wrap `stream`. `cancel` closes the connection when fired.
    pub fn new(
        stream: TcpStream,
        net_id: i64,
        role: ConnectionRole,
        codec: FrameCodec,
        callbacks: ConnectionCallbacks,
        options: ConnectionOptions,
        cancel: CancellationToken,
    ) -> Result<(ConnectionHandle, Self)> {
        let peer = stream.peer_addr()?;
        let (tx, rx) = mpsc::channel(options.write_queue_limit.max(1));
        let handle = ConnectionHandle {
            net_id,
            role,
            peer,
            tx,
            cancel,
        };

        let conn = Self {
            stream,
            handle: handle.clone(),
            rx,
            codec,
            callbacks,
            idle_timeout: options.idle_timeout,
            close_timeout: options.close_timeout,
        };
        Ok((handle, conn))
    }

    /// Drive the connection until it closes.
    #[instrument(
        skip(self),
        fields(net_id = self.handle.net_id, role = %self.handle.role, peer = %self.handle.peer)
    )]
    pub async fn run(self) -> Result<()> {
        let Connection {
            stream,
            handle,
            rx,
            codec,
            callbacks,
            idle_timeout,
            close_timeout,
        } = self;
        let metrics = global_metrics();

        if let Some(on_connect) = &callbacks.on_connect {
            if !on_connect(&handle) {
                metrics.connection_rejected();
                handle.close();
                info!("{ERR_CONNECTION_REJECTED}");
                return Err(ProtocolError::Custom(ERR_CONNECTION_REJECTED.to_string()));
            }
        }

        metrics.connection_established();
        let _timer = Timer::start("connection");
        info!("Connection established");

        let (mut reader, writer) = stream.into_split();
        let writer_task = tokio::spawn(write_loop(
            FramedWrite::new(writer, codec.clone()),
            rx,
            handle.cancel.clone(),
            close_timeout,
        ));

        let dispatcher = Dispatcher::new(codec.registry().clone());
        let conn: Arc<dyn WriteCloser> = Arc::new(handle.clone());
        let mut control = ReadControl::new(handle.cancel.clone());
        if let Some(idle) = idle_timeout {
            control = control.with_idle_timeout(idle);
        }

        let result = loop {
            match codec.decode_stream_with(&mut reader, &control).await {
                Ok(msg) => {
                    if let Some(on_message) = &callbacks.on_message {
                        on_message(msg.as_ref(), &handle);
                    }
                    // Handler failures are logged by the dispatcher and do not close the connection
                    let _ = dispatcher.dispatch(msg, &conn, &handle.cancel);
                }
                Err(ProtocolError::Cancelled) => {
                    debug!("Connection closed locally");
                    break Ok(());
                }
                Err(e) if e.is_eof() => {
                    debug!("Peer closed the connection");
                    break Ok(());
                }
                Err(e) => {
                    let undefined = matches!(e, ProtocolError::UndefinedType(_));
                    metrics.decode_error(undefined);
                    if undefined {
                        warn!(error = %e, "Peer sent a message type we don't understand");
                    } else if e.is_transport() {
                        error!(error = %e, "Transport failure while decoding");
                    } else {
                        warn!(error = %e, "Malformed frame");
                    }
                    if let Some(on_error) = &callbacks.on_error {
                        on_error(&handle, &e);
                    }
                    break Err(e);
                }
            }
        };

        handle.close();
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Write loop ended with error"),
            Err(e) => error!(error = %e, "Write loop task failed"),
        }

        metrics.connection_closed();
        if let Some(on_close) = &callbacks.on_close {
            on_close(&handle);
        }
        info!("{ERR_CONNECTION_CLOSED}");
        result
    }
}

/// Send queued frames until the connection closes, then flush the rest.
///
/// A send already in progress when the close starts is allowed to finish, so
/// the peer never sees half a frame followed by another. Everything from the
/// close onwards is bounded by `close_timeout`; past it the write half is
/// dropped with whatever is still queued.
async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, FrameCodec>,
    mut rx: mpsc::Receiver<Arc<dyn Message>>,
    cancel: CancellationToken,
    close_timeout: Duration,
) -> Result<()> {
    let work = async {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(msg) => {
                        if let Err(e) = sink.send(msg).await {
                            cancel.cancel();
                            return Err(e);
                        }
                    }
                    None => break,
                },
            }
        }

        // Flush what was queued before the close
        while let Ok(msg) = rx.try_recv() {
            sink.send(msg).await?;
        }
        sink.get_mut().shutdown().await?;
        Ok::<(), ProtocolError>(())
    };
    tokio::pin!(work);

    let finished = tokio::select! {
        res = &mut work => Some(res),
        _ = cancel.cancelled() => None,
    };
    if let Some(res) = finished {
        return res;
    }

    let res = with_timeout_error(work, close_timeout).await;
    if matches!(res, Err(ProtocolError::Timeout)) {
        warn!(?close_timeout, "Peer not reading, dropping unsent frames");
    }
    res
}
