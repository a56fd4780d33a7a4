//! # Message Registry
//!
//! Maps a 16-bit discriminator to the four functions that frame, decode and
//! handle that message type.
//!
//! Registration happens on a [`RegistryBuilder`] during start-up. `build()`
//! freezes it into a [`MessageRegistry`] that has no interior mutability, so it
//! can be shared through an `Arc` by every connection without locking. Handing
//! the `Arc` to a spawned task publishes the finished table to that task.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use framewire::protocol::echo::{self, ECHO_MESSAGE_NUMBER};
//! use framewire::protocol::registry::MessageRegistry;
//!
//! let mut builder = MessageRegistry::builder();
//! builder
//!     .register(
//!         ECHO_MESSAGE_NUMBER,
//!         echo::deserialize_message,
//!         |_ctx, _conn| Ok(()),
//!         echo::message_type_handler,
//!         echo::message_head_handler,
//!     )
//!     .expect("first registration");
//!
//! let registry = Arc::new(builder.build());
//! assert!(registry.get_handler_func(ECHO_MESSAGE_NUMBER).is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use crate::core::message::Message;
use crate::error::{ProtocolError, Result};
use crate::protocol::context::RequestContext;
use crate::protocol::handler::{Handler, HandlerFunc, WriteCloser};

/// Rebuilds a typed message from a complete frame (header + body).
pub type UnmarshalFn = dyn Fn(&[u8]) -> Result<Box<dyn Message>> + Send + Sync;

/// Given the discriminator, returns how many header bytes follow it.
pub type TypeHandlerFn = dyn Fn(u16) -> Result<usize> + Send + Sync;

/// Given the full header, returns the body length.
pub type HeadHandlerFn = dyn Fn(&[u8]) -> Result<usize> + Send + Sync;

/// One registered message type.
struct RegistryEntry {
    unmarshaler: Box<UnmarshalFn>,
    handler: Arc<dyn Handler>,
    type_handler: Box<TypeHandlerFn>,
    head_handler: Box<HeadHandlerFn>,
}

/// Mutable registration phase. Not shared; consumed by [`RegistryBuilder::build`].
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<u16, RegistryEntry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the framing rules and handler closure for `msg_type`.
    ///
    /// Registering a discriminator twice is rejected with
    /// `DuplicateRegistration`; the first entry stays in place.
    pub fn register<U, H, T, D>(
        &mut self,
        msg_type: u16,
        unmarshaler: U,
        handler: H,
        type_handler: T,
        head_handler: D,
    ) -> Result<&mut Self>
    where
        U: Fn(&[u8]) -> Result<Box<dyn Message>> + Send + Sync + 'static,
        H: Fn(&RequestContext, &Arc<dyn WriteCloser>) -> Result<()> + Send + Sync + 'static,
        T: Fn(u16) -> Result<usize> + Send + Sync + 'static,
        D: Fn(&[u8]) -> Result<usize> + Send + Sync + 'static,
    {
        self.register_handler(
            msg_type,
            unmarshaler,
            HandlerFunc::new(handler),
            type_handler,
            head_handler,
        )
    }

    /// Same as [`register`](Self::register) but takes any [`Handler`] value.
    pub fn register_handler<U, H, T, D>(
        &mut self,
        msg_type: u16,
        unmarshaler: U,
        handler: H,
        type_handler: T,
        head_handler: D,
    ) -> Result<&mut Self>
    where
        U: Fn(&[u8]) -> Result<Box<dyn Message>> + Send + Sync + 'static,
        H: Handler + 'static,
        T: Fn(u16) -> Result<usize> + Send + Sync + 'static,
        D: Fn(&[u8]) -> Result<usize> + Send + Sync + 'static,
    {
        if self.entries.contains_key(&msg_type) {
            error!(
                msg_type = %format_args!("{msg_type:#06x}"),
                "Trying to register message type twice"
            );
            return Err(ProtocolError::DuplicateRegistration(msg_type));
        }

        self.entries.insert(
            msg_type,
            RegistryEntry {
                unmarshaler: Box::new(unmarshaler),
                handler: Arc::new(handler),
                type_handler: Box::new(type_handler),
                head_handler: Box::new(head_handler),
            },
        );
        debug!(msg_type = %format_args!("{msg_type:#06x}"), "Registered message type");
        Ok(self)
    }

    pub fn contains(&self, msg_type: u16) -> bool {
        self.entries.contains_key(&msg_type)
    }

    /// Freeze the table. The result is read-only for the rest of its life.
    pub fn build(self) -> MessageRegistry {
        MessageRegistry {
            entries: self.entries,
        }
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<u16> = self.entries.keys().copied().collect();
        types.sort_unstable();
        f.debug_struct("RegistryBuilder")
            .field("message_types", &types)
            .finish()
    }
}

/// Frozen, read-only table of registered message types.
pub struct MessageRegistry {
    entries: HashMap<u16, RegistryEntry>,
}

impl MessageRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn get_unmarshal_func(&self, msg_type: u16) -> Option<&UnmarshalFn> {
        self.entries.get(&msg_type).map(|e| e.unmarshaler.as_ref())
    }

    pub fn get_type_handler_func(&self, msg_type: u16) -> Option<&TypeHandlerFn> {
        self.entries.get(&msg_type).map(|e| e.type_handler.as_ref())
    }

    pub fn get_head_handler_func(&self, msg_type: u16) -> Option<&HeadHandlerFn> {
        self.entries.get(&msg_type).map(|e| e.head_handler.as_ref())
    }

    pub fn get_handler_func(&self, msg_type: u16) -> Option<&Arc<dyn Handler>> {
        self.entries.get(&msg_type).map(|e| &e.handler)
    }

    pub fn contains(&self, msg_type: u16) -> bool {
        self.entries.contains_key(&msg_type)
    }

    /// Registered discriminators in ascending order.
    pub fn message_types(&self) -> Vec<u16> {
        let mut types: Vec<u16> = self.entries.keys().copied().collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRegistry")
            .field("message_types", &self.message_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_message(_: &[u8]) -> Result<Box<dyn Message>> {
        Err(ProtocolError::NilData)
    }

    fn fixed_header(_: u16) -> Result<usize> {
        Ok(2)
    }

    fn no_body(_: &[u8]) -> Result<usize> {
        Ok(0)
    }

    #[test]
    fn test_lookup_unknown_type() {
        let registry = MessageRegistry::builder().build();
        assert!(registry.is_empty());
        assert!(registry.get_unmarshal_func(1).is_none());
        assert!(registry.get_type_handler_func(1).is_none());
        assert!(registry.get_head_handler_func(1).is_none());
        assert!(registry.get_handler_func(1).is_none());
    }

    #[test]
    fn test_register_and_lookup() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(9, no_message, |_, _| Ok(()), fixed_header, no_body)
            .unwrap();
        assert!(builder.contains(9));

        let registry = builder.build();
        assert_eq!(registry.len(), 1);
        assert_eq!((registry.get_type_handler_func(9).unwrap())(9).unwrap(), 2);
        assert_eq!((registry.get_head_handler_func(9).unwrap())(&[0; 4]).unwrap(), 0);
        assert!(matches!(
            (registry.get_unmarshal_func(9).unwrap())(&[]),
            Err(ProtocolError::NilData)
        ));
    }

    #[test]
    fn test_message_types_sorted() {
        let mut builder = RegistryBuilder::new();
        for t in [30u16, 2, 17] {
            builder
                .register(t, no_message, |_, _| Ok(()), fixed_header, no_body)
                .unwrap();
        }
        assert_eq!(builder.build().message_types(), vec![2, 17, 30]);
    }
}
