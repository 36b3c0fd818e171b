//! # haggle-auth
//!
//! Credential lifecycle management for the Haggle gateway.
//!
//! The gateway issues short-lived access tokens against the operator's
//! session cookie. [`CredentialManager`] holds the current token, renews it
//! on a fixed interval, and escalates repeated failures as
//! [`CredentialEvent::Exhausted`] so the connection supervisor can force a
//! reconnect. The HTTP call lives behind [`CredentialSource`] so tests run
//! against programmable fakes.

#![deny(unsafe_code)]

pub mod manager;
pub mod source;

pub use manager::{Credential, CredentialEvent, CredentialManager};
pub use source::{CredentialSource, GatewayCredentialSource, token_fragment};
