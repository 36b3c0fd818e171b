//! # haggle-codec
//!
//! Wire codec for the Haggle gateway protocol.
//!
//! - [`decode_text`]: raw inbound text → classified [`haggle_core::Frame`]
//!   (primary base64 path, legacy plain-JSON path, expiry stamping)
//! - [`encode_outbound`]: [`haggle_core::OutboundMessage`] → JSON text frame
//! - [`request_sign`]: deterministic signature for gateway HTTP calls
//!
//! The codec is pure: it owns no sockets and no tasks, so both directions
//! are testable with string fixtures.

#![deny(unsafe_code)]

pub mod decode;
pub mod encode;
pub mod sign;

pub use decode::decode_text;
pub use encode::{EncodeContext, encode_outbound};
pub use sign::request_sign;
