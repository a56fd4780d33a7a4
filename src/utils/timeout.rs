//! # Timeouts and cancellable reads
//!
//! Blocking stream reads raced against a cancellation token and an optional
//! deadline. Reads issued through here return `Cancelled` or `Timeout` instead
//! of hanging, and otherwise surface the stream's own error unchanged.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::error::{ProtocolError, Result};

/// Default time a connection may sit idle between frames.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time allowed for a client to establish its TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a server waits for open connections during shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a closing connection may spend flushing queued frames.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Controls how the reads of one frame may be interrupted.
///
/// The token applies to every read. `idle_timeout` bounds the wait for the
/// first bytes of the next frame; `frame_timeout` bounds each later read of
/// the same frame and falls back to `idle_timeout` when unset. A read
/// interrupted halfway through a frame leaves the stream at an unknown
/// position, so the connection must be closed afterwards.
#[derive(Debug, Clone, Default)]
pub struct ReadControl {
    pub cancel: CancellationToken,
    pub idle_timeout: Option<Duration>,
    pub frame_timeout: Option<Duration>,
}

impl ReadControl {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            idle_timeout: None,
            frame_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    pub fn with_frame_timeout(mut self, frame_timeout: Duration) -> Self {
        self.frame_timeout = Some(frame_timeout);
        self
    }

    /// Deadline for reads past the discriminator.
    pub fn frame_deadline(&self) -> Option<Duration> {
        self.frame_timeout.or(self.idle_timeout)
    }
}

/// Fill `buf` completely unless the token fires or `timeout` elapses first.
pub async fn read_exact_cancellable<R>(
    reader: &mut R,
    buf: &mut [u8],
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if buf.is_empty() {
        return Ok(());
    }

    let read = async {
        reader.read_exact(buf).await?;
        Ok::<(), ProtocolError>(())
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProtocolError::Cancelled),
        res = with_optional_timeout(read, timeout) => res,
    }
}

/// Run `fut` with a deadline, mapping expiry to `ProtocolError::Timeout`.
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(res) => res,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

async fn with_optional_timeout<F, T>(fut: F, timeout: Option<Duration>) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(duration) => with_timeout_error(fut, duration).await,
        None => fut.await,
    }
}
