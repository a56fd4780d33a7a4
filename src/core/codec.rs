//! # Frame Codec
//!
//! Turns a byte stream into typed messages by consulting only the registry
//! entry for the discriminator it just read.
//!
//! ## Wire Format
//! ```text
//! [Type(2)] [Header remainder(N = type_handler(type))] [Body(head_handler(header))]
//! ```
//!
//! The codec never parses a length field itself: the registered head handler
//! locates it anywhere inside the `2 + N` header bytes. Body lengths above the
//! configured maximum are rejected with `BadData` before any body byte is read.
//!
//! Two decoding paths share the same steps:
//! - [`FrameCodec::decode_stream`] / [`FrameCodec::decode_stream_with`] pull bytes from an
//!   `AsyncRead` one step at a time (discriminator, header remainder, body).
//! - The `tokio_util::codec::Decoder` impl works on a buffered `BytesMut` and
//!   returns `Ok(None)` until a whole frame is present, so it plugs into `Framed`.

use std::ops::Deref;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{error, trace};

use crate::core::message::{Message, MESSAGE_MAX_BYTES, MESSAGE_TYPE_BYTES};
use crate::error::{ProtocolError, Result};
use crate::protocol::registry::{HeadHandlerFn, MessageRegistry, TypeHandlerFn, UnmarshalFn};
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::{read_exact_cancellable, ReadControl};

/// Registry-driven codec for variable-header frames.
#[derive(Clone)]
pub struct FrameCodec {
    registry: Arc<MessageRegistry>,
    max_message_bytes: usize,
}

/// The three functions a decode needs for one discriminator.
struct FrameRules<'a> {
    type_handler: &'a TypeHandlerFn,
    head_handler: &'a HeadHandlerFn,
    unmarshaler: &'a UnmarshalFn,
}

impl FrameCodec {
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self {
            registry,
            max_message_bytes: MESSAGE_MAX_BYTES,
        }
    }

    /// Override the body length limit (defaults to `MESSAGE_MAX_BYTES`).
    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    /// Read one complete frame from `reader`, blocking until it has arrived.
    pub async fn decode_stream<R>(&self, reader: &mut R) -> Result<Box<dyn Message>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.decode_stream_with(reader, &ReadControl::default()).await
    }

    /// Read one complete frame, honouring the cancellation token and the
    /// idle and frame timeouts in `control`.
    ///
    /// Stream errors are returned as `ProtocolError::Io` holding the original
    /// `io::Error`. Nothing past the discriminator is consumed when the type is
    /// unknown, and nothing past the header when the body is too large.
    pub async fn decode_stream_with<R>(
        &self,
        reader: &mut R,
        control: &ReadControl,
    ) -> Result<Box<dyn Message>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut type_bytes = [0u8; MESSAGE_TYPE_BYTES];
        read_exact_cancellable(reader, &mut type_bytes, &control.cancel, control.idle_timeout)
            .await?;
        let msg_type = u16::from_be_bytes(type_bytes);

        let rules = self.rules(msg_type)?;
        let header_len = MESSAGE_TYPE_BYTES + (rules.type_handler)(msg_type)?;

        let mut frame = Vec::with_capacity(header_len);
        frame.extend_from_slice(&type_bytes);
        frame.resize(header_len, 0);
        let deadline = control.frame_deadline();
        read_exact_cancellable(
            reader,
            &mut frame[MESSAGE_TYPE_BYTES..],
            &control.cancel,
            deadline,
        )
        .await?;

        let body_len = self.body_length(msg_type, &rules, &frame)?;

        frame.resize(header_len + body_len, 0);
        read_exact_cancellable(reader, &mut frame[header_len..], &control.cancel, deadline)
            .await?;

        trace!(
            msg_type = %format_args!("{msg_type:#06x}"),
            header_len,
            body_len,
            "Decoded frame"
        );
        global_metrics().frame_decoded(frame.len() as u64);
        (rules.unmarshaler)(&frame)
    }

    /// Serialize `msg` into its wire frame. The message itself is not touched.
    pub fn encode_message(&self, msg: &dyn Message) -> Result<Bytes> {
        let data = msg.serialize()?;
        let mut buf = BytesMut::with_capacity(data.len());
        buf.extend_from_slice(&data);
        Ok(buf.freeze())
    }

    fn rules(&self, msg_type: u16) -> Result<FrameRules<'_>> {
        let type_handler = self.registry.get_type_handler_func(msg_type);
        let head_handler = self.registry.get_head_handler_func(msg_type);
        let unmarshaler = self.registry.get_unmarshal_func(msg_type);

        match (type_handler, head_handler, unmarshaler) {
            (Some(type_handler), Some(head_handler), Some(unmarshaler)) => Ok(FrameRules {
                type_handler,
                head_handler,
                unmarshaler,
            }),
            _ => Err(ProtocolError::UndefinedType(msg_type)),
        }
    }

    fn body_length(&self, msg_type: u16, rules: &FrameRules<'_>, header: &[u8]) -> Result<usize> {
        let body_len = (rules.head_handler)(header)?;
        if body_len > self.max_message_bytes {
            error!(
                msg_type = %format_args!("{msg_type:#06x}"),
                body_len,
                max = self.max_message_bytes,
                "Message body beyond maximum size"
            );
            return Err(ProtocolError::BadData);
        }
        Ok(body_len)
    }
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("registered_types", &self.registry.len())
            .field("max_message_bytes", &self.max_message_bytes)
            .finish()
    }
}

impl Decoder for FrameCodec {
    type Item = Box<dyn Message>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < MESSAGE_TYPE_BYTES {
            return Ok(None);
        }

        let msg_type = u16::from_be_bytes([src[0], src[1]]);
        let rules = match self.rules(msg_type) {
            Ok(rules) => rules,
            Err(e) => {
                src.advance(MESSAGE_TYPE_BYTES);
                return Err(e);
            }
        };

        let header_len = MESSAGE_TYPE_BYTES + (rules.type_handler)(msg_type)?;
        if src.len() < header_len {
            src.reserve(header_len - src.len());
            return Ok(None);
        }

        let body_len = self.body_length(msg_type, &rules, &src[..header_len])?;
        let frame_len = header_len + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        // Zero-copy split of exactly one frame
        let frame = src.split_to(frame_len);
        global_metrics().frame_decoded(frame_len as u64);
        (rules.unmarshaler)(&frame).map(Some)
    }
}

impl<M> Encoder<M> for FrameCodec
where
    M: Deref<Target = dyn Message>,
{
    type Error = ProtocolError;

    fn encode(&mut self, item: M, dst: &mut BytesMut) -> Result<()> {
        let data = item.serialize()?;
        dst.reserve(data.len());
        dst.extend_from_slice(&data);
        global_metrics().frame_encoded(data.len() as u64);
        Ok(())
    }
}
