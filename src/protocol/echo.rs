//! # Echo Message
//!
//! Illustrative "US" message type (`0x5553`) with a fixed 20-byte header.
//!
//! ## Wire Format
//! ```text
//! [Type(2)] [Version(1)] [Session(12)] [Encrypt(1)] [Command(2)] [BodySize(2)] [Body(N)]
//! ```
//!
//! None of the header fields past `Type` mean anything to the codec; the head
//! handler simply reads `BodySize` at offset 18.

use std::sync::Arc;

use tracing::info;

use crate::core::message::{Message, MESSAGE_TYPE_BYTES};
use crate::error::{ProtocolError, Result};
use crate::protocol::context::RequestContext;
use crate::protocol::handler::{ConnectionRole, WriteCloser};
use crate::protocol::registry::RegistryBuilder;

/// Discriminator of the echo message ("US").
pub const ECHO_MESSAGE_NUMBER: u16 = 0x5553;

/// Total header size, discriminator included.
pub const ECHO_HEADER_LEN: usize = 20;

const BODY_SIZE_OFFSET: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EchoHeader {
    pub version: u8,
    pub session: [u8; 12],
    pub encrypt: u8,
    pub command: u16,
    pub body_size: u16,
}

impl EchoHeader {
    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&ECHO_MESSAGE_NUMBER.to_be_bytes());
        out.push(self.version);
        out.extend_from_slice(&self.session);
        out.push(self.encrypt);
        out.extend_from_slice(&self.command.to_be_bytes());
        out.extend_from_slice(&self.body_size.to_be_bytes());
    }

    fn read_from(data: &[u8]) -> Self {
        let mut session = [0u8; 12];
        session.copy_from_slice(&data[3..15]);
        Self {
            version: data[2],
            session,
            encrypt: data[15],
            command: u16::from_be_bytes([data[16], data[17]]),
            body_size: u16::from_be_bytes([data[18], data[19]]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoMessage {
    pub header: EchoHeader,
    pub content: Vec<u8>,
}

impl EchoMessage {
    /// Build a message whose `body_size` matches `content`.
    pub fn new(
        version: u8,
        session: [u8; 12],
        encrypt: u8,
        command: u16,
        content: impl Into<Vec<u8>>,
    ) -> Result<Self> {
        let content = content.into();
        let body_size = u16::try_from(content.len()).map_err(|_| ProtocolError::BadData)?;
        Ok(Self {
            header: EchoHeader {
                version,
                session,
                encrypt,
                command,
                body_size,
            },
            content,
        })
    }
}

impl Message for EchoMessage {
    fn message_number(&self) -> u16 {
        ECHO_MESSAGE_NUMBER
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        if usize::from(self.header.body_size) != self.content.len() {
            return Err(ProtocolError::BadData);
        }
        let mut out = Vec::with_capacity(ECHO_HEADER_LEN + self.content.len());
        self.header.write_to(&mut out);
        out.extend_from_slice(&self.content);
        Ok(out)
    }
}

/// Header bytes remaining after the discriminator.
pub fn message_type_handler(msg_type: u16) -> Result<usize> {
    match msg_type {
        ECHO_MESSAGE_NUMBER => Ok(ECHO_HEADER_LEN - MESSAGE_TYPE_BYTES),
        other => Err(ProtocolError::UndefinedType(other)),
    }
}

/// Body length from the `BodySize` field.
pub fn message_head_handler(header: &[u8]) -> Result<usize> {
    if header.len() < ECHO_HEADER_LEN {
        return Err(ProtocolError::NilData);
    }
    Ok(u16::from_be_bytes([header[BODY_SIZE_OFFSET], header[BODY_SIZE_OFFSET + 1]]) as usize)
}

pub fn deserialize_message(data: &[u8]) -> Result<Box<dyn Message>> {
    if data.is_empty() {
        return Err(ProtocolError::NilData);
    }
    if data.len() < ECHO_HEADER_LEN {
        return Err(ProtocolError::WouldBlock);
    }

    let header = EchoHeader::read_from(data);
    let body = &data[ECHO_HEADER_LEN..];
    if body.len() < usize::from(header.body_size) {
        return Err(ProtocolError::WouldBlock);
    }

    Ok(Box::new(EchoMessage {
        header,
        content: body[..usize::from(header.body_size)].to_vec(),
    }))
}

/// Server side echoes the message back; client side just logs it.
pub fn process_message(ctx: &RequestContext, conn: &Arc<dyn WriteCloser>) -> Result<()> {
    let msg = ctx.message_as::<EchoMessage>()?;
    info!(
        content = %String::from_utf8_lossy(&msg.content),
        command = %format_args!("{:#06x}", msg.header.command),
        body_size = msg.header.body_size,
        "Receiving echo message"
    );

    match ctx.role() {
        Some(ConnectionRole::Server) => conn.write(ctx.message()?.clone()),
        Some(ConnectionRole::Client) => {
            info!(net_id = ctx.net_id()?, "Echo reply received");
            Ok(())
        }
        None => Err(ProtocolError::MissingContext("role".to_string())),
    }
}

/// Register the echo type with [`process_message`] as its handler.
pub fn register(builder: &mut RegistryBuilder) -> Result<&mut RegistryBuilder> {
    builder.register(
        ECHO_MESSAGE_NUMBER,
        deserialize_message,
        process_message,
        message_type_handler,
        message_head_handler,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EchoMessage {
        EchoMessage::new(2, *b"session-0001", 0, 12289, "hello, world").unwrap()
    }

    #[test]
    fn test_serialized_layout() {
        let bytes = sample().serialize().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..2], &[0x55, 0x53]);
        assert_eq!(bytes[2], 2);
        assert_eq!(&bytes[3..15], b"session-0001");
        assert_eq!(bytes[15], 0);
        assert_eq!(&bytes[16..18], &12289u16.to_be_bytes());
        assert_eq!(&bytes[18..20], &[0x00, 0x0C]);
        assert_eq!(&bytes[20..], b"hello, world");
    }

    #[test]
    fn test_type_handler() {
        assert_eq!(message_type_handler(ECHO_MESSAGE_NUMBER).unwrap(), 18);
        assert!(matches!(
            message_type_handler(0x1111),
            Err(ProtocolError::UndefinedType(0x1111))
        ));
    }

    #[test]
    fn test_head_handler_rejects_short_header() {
        assert!(matches!(message_head_handler(&[]), Err(ProtocolError::NilData)));
        assert!(matches!(
            message_head_handler(&[0u8; 19]),
            Err(ProtocolError::NilData)
        ));
        let bytes = sample().serialize().unwrap();
        assert_eq!(message_head_handler(&bytes[..20]).unwrap(), 12);
    }

    #[test]
    fn test_deserialize_edge_cases() {
        assert!(matches!(deserialize_message(&[]), Err(ProtocolError::NilData)));
        assert!(matches!(
            deserialize_message(&[0x55, 0x53, 1]),
            Err(ProtocolError::WouldBlock)
        ));

        let bytes = sample().serialize().unwrap();
        assert!(matches!(
            deserialize_message(&bytes[..25]),
            Err(ProtocolError::WouldBlock)
        ));

        let decoded = deserialize_message(&bytes).unwrap();
        assert_eq!(decoded.downcast_ref::<EchoMessage>(), Some(&sample()));
    }

    #[test]
    fn test_oversized_content_rejected() {
        let too_big = vec![0u8; u16::MAX as usize + 1];
        assert!(matches!(
            EchoMessage::new(1, [0; 12], 0, 0, too_big),
            Err(ProtocolError::BadData)
        ));
    }

    #[test]
    fn test_mismatched_body_size_not_serialized() {
        let mut msg = sample();
        msg.header.body_size = 3;
        assert!(matches!(msg.serialize(), Err(ProtocolError::BadData)));
    }
}
