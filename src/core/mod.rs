//! # Core Framing Components
//!
//! The message capability and the registry-driven frame codec.
//!
//! ## Components
//! - **Message**: trait every decodable type implements, plus downcasting
//! - **Codec**: stream decoder and `tokio_util` codec for variable-header frames
//!
//! ## Wire Format
//! ```text
//! [Type(2, big-endian)] [Header remainder(N)] [Body(M)]
//! ```
//! `N` and `M` come from the functions registered for `Type`.
//!
//! ## Limits
//! - Maximum body length: 8MB by default (checked before the body is read)
//! - Unknown discriminators fail before any further byte is consumed

pub mod codec;
pub mod message;
