//! # haggle-session
//!
//! Per-session batching of inbound chat traffic.
//!
//! [`SessionBatcher`] is an actor that groups each session's message
//! burst into one [`Batch`](haggle_core::Batch) per collecting window;
//! [`BatcherHandle`] is the cloneable way in.

#![deny(unsafe_code)]

pub mod batcher;

pub use batcher::{BatcherHandle, SessionBatcher};
