//! Error hierarchy for the Haggle agent.
//!
//! One `thiserror` enum per failure domain, unified under [`HaggleError`]:
//!
//! - [`TransportError`]: connection lost/refused — recoverable, drives
//!   reconnect with backoff
//! - [`DecodeError`]: malformed frame — frame dropped and logged, the
//!   connection is unaffected
//! - [`CredentialError`]: token refresh failures — retried, escalating to
//!   a forced reconnect
//! - [`GenerationError`]: downstream reply generation failed — the session
//!   gets a fallback message
//! - [`SessionError`]: isolated to one session, never propagates across
//!   sessions or into the connection

use thiserror::Error;

/// Top-level error type for the Haggle agent.
#[derive(Debug, Error)]
pub enum HaggleError {
    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Frame decode failure.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Credential refresh failure.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Reply generation failure.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Per-session processing failure.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl HaggleError {
    /// Whether recovering from this error is a retry/backoff concern
    /// (as opposed to drop-and-log or fallback).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Credential(_) => true,
            Self::Decode(_) | Self::Generation(_) | Self::Session(_) => false,
        }
    }
}

/// Connection-level failure. Always recoverable via reconnect.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connect/handshake attempt failed.
    #[error("connect to {endpoint} failed: {message}")]
    Connect {
        /// Gateway endpoint.
        endpoint: String,
        /// Underlying failure description.
        message: String,
    },

    /// A write on an established connection failed.
    #[error("send failed: {0}")]
    Send(String),

    /// The gateway closed the connection.
    #[error("connection closed{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed {
        /// Close reason, if the peer supplied one.
        reason: Option<String>,
    },
}

/// A frame could not be decoded. The frame is dropped; connection state
/// is unaffected.
#[derive(Debug, Error)]
#[error("frame decode failed ({path}): {reason}")]
pub struct DecodeError {
    /// Which decode stage rejected the frame last (e.g. `"envelope"`,
    /// `"legacy"`, `"chat"`).
    pub path: &'static str,
    /// Failure description.
    pub reason: String,
}

impl DecodeError {
    /// Create a decode error for the given path.
    #[must_use]
    pub fn new(path: &'static str, reason: impl Into<String>) -> Self {
        Self {
            path,
            reason: reason.into(),
        }
    }
}

/// Credential refresh failure.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The refresh HTTP call failed.
    #[error("credential refresh request failed: {0}")]
    Request(String),

    /// The refresh endpoint answered without a usable token.
    #[error("credential refresh rejected: {0}")]
    Rejected(String),

    /// No credential is available and one is required.
    #[error("no valid credential available")]
    Missing,
}

/// Downstream reply generation failed or timed out.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The generator call itself failed.
    #[error("generation failed ({tier}): {message}")]
    Failed {
        /// Tier that was invoked.
        tier: String,
        /// Failure description.
        message: String,
    },

    /// The generator did not answer within the configured timeout.
    #[error("generation timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout.
        timeout_ms: u64,
    },
}

/// A failure scoped to a single session's pipeline.
#[derive(Debug, Error)]
#[error("session {session_id}: {message}")]
pub struct SessionError {
    /// Session the failure belongs to.
    pub session_id: String,
    /// Failure description.
    pub message: String,
}

impl SessionError {
    /// Create a session-scoped error.
    #[must_use]
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
