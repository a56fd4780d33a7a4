//! The `Message` capability every registered frame type implements.

use std::any::Any;
use std::fmt::Debug;

use crate::error::Result;

/// Default message number reserved for heartbeats.
pub const HEARTBEAT_MESSAGE_NUMBER: u16 = 0;

/// Width of the type discriminator that starts every frame.
pub const MESSAGE_TYPE_BYTES: usize = 2;

/// Upper bound on the body length a head handler may report (8 MB).
pub const MESSAGE_MAX_BYTES: usize = 8 * 1024 * 1024;

/// Upcast helper so `dyn Message` can be downcast to its concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Structured data that can travel as one frame.
///
/// `serialize` must produce the complete wire frame, discriminator and
/// type-specific header included. Messages are treated as immutable once built.
pub trait Message: AsAny + Debug + Send + Sync {
    /// The 16-bit discriminator this type is registered under.
    fn message_number(&self) -> u16;

    /// Encode the whole frame.
    fn serialize(&self) -> Result<Vec<u8>>;
}

impl dyn Message {
    /// Borrow the message as its concrete type, if it is one.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// True if the message is of concrete type `T`.
    pub fn is<T: Message>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Ping;

    impl Message for Ping {
        fn message_number(&self) -> u16 {
            HEARTBEAT_MESSAGE_NUMBER
        }

        fn serialize(&self) -> Result<Vec<u8>> {
            Ok(HEARTBEAT_MESSAGE_NUMBER.to_be_bytes().to_vec())
        }
    }

    #[derive(Debug)]
    struct Other;

    impl Message for Other {
        fn message_number(&self) -> u16 {
            7
        }

        fn serialize(&self) -> Result<Vec<u8>> {
            Ok(vec![0, 7])
        }
    }

    #[test]
    fn test_downcast_through_trait_object() {
        let boxed: Box<dyn Message> = Box::new(Ping);
        assert!(boxed.is::<Ping>());
        assert!(boxed.downcast_ref::<Ping>().is_some());
        assert!(boxed.downcast_ref::<Other>().is_none());
    }
}
