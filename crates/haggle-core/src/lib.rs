//! # haggle-core
//!
//! Foundation types for the Haggle marketplace agent.
//!
//! This crate provides the shared vocabulary the other Haggle crates
//! depend on:
//!
//! - **Branded IDs**: `SessionId`, `ItemId`, `MessageId`, `DeviceId` as
//!   newtypes for type safety
//! - **Frames**: the decoded units of gateway traffic, plus the outbound
//!   message model
//! - **Batches**: ordered groups of one session's chat frames
//! - **Errors**: the `HaggleError` hierarchy via `thiserror`
//! - **Backoff**: exponential-with-jitter delay calculation

#![deny(unsafe_code)]

pub mod backoff;
pub mod errors;
pub mod frame;
pub mod ids;

pub use backoff::{BackoffPolicy, backoff_delay};
pub use errors::{
    CredentialError, DecodeError, GenerationError, HaggleError, SessionError, TransportError,
};
pub use frame::{Batch, ChatPayload, Frame, FrameKind, OutboundMessage, now_ms};
pub use ids::{DeviceId, ItemId, MessageId, SessionId};
