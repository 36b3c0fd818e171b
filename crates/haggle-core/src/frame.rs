//! Decoded wire traffic: inbound frames, chat payloads, batches, and the
//! outbound message model.
//!
//! A [`Frame`] is immutable once decoded; it is dispatched and then
//! dropped. Chat frames carry a [`ChatPayload`]; everything the batching
//! and routing layers touch lives there, so no raw wire JSON crosses the
//! codec boundary.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, MessageId, SessionId};

/// Current wall-clock time in Unix milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound frames
// ─────────────────────────────────────────────────────────────────────────────

/// Classification of one decoded unit of gateway traffic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// A buyer/seller chat message.
    Chat,
    /// Acknowledgment of a liveness probe.
    HeartbeatAck,
    /// Gateway system traffic (registration acks, order notices, typing
    /// indicators, sync control).
    System,
    /// A chat frame older than the configured expiry window. Never
    /// dispatched to session state.
    Expired,
    /// Anything the codec could not classify.
    Unknown,
}

/// One decoded unit of wire traffic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
    /// What this frame is.
    pub kind: FrameKind,
    /// Wire message id, when the gateway supplied one (used for acks).
    pub mid: Option<MessageId>,
    /// Gateway stream id, echoed back in acks when present.
    pub sid: Option<String>,
    /// Session the frame belongs to. `None` for non-chat frames.
    pub session_id: Option<SessionId>,
    /// Decoded chat payload, present iff `kind == Chat` or `Expired`.
    pub chat: Option<ChatPayload>,
    /// When the frame was received, Unix ms.
    pub received_at: i64,
}

impl Frame {
    /// A system/control frame.
    #[must_use]
    pub fn system(mid: Option<MessageId>) -> Self {
        Self {
            kind: FrameKind::System,
            mid,
            sid: None,
            session_id: None,
            chat: None,
            received_at: now_ms(),
        }
    }

    /// A heartbeat acknowledgment frame.
    #[must_use]
    pub fn heartbeat_ack(mid: MessageId) -> Self {
        Self {
            kind: FrameKind::HeartbeatAck,
            mid: Some(mid),
            sid: None,
            session_id: None,
            chat: None,
            received_at: now_ms(),
        }
    }

    /// A chat frame carrying `payload`, stamped `Expired` when the payload
    /// is older than the expiry window.
    #[must_use]
    pub fn chat(payload: ChatPayload, expired: bool) -> Self {
        Self {
            kind: if expired {
                FrameKind::Expired
            } else {
                FrameKind::Chat
            },
            mid: None,
            sid: None,
            session_id: Some(payload.session_id.clone()),
            chat: Some(payload),
            received_at: now_ms(),
        }
    }

    /// An unclassifiable frame.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            kind: FrameKind::Unknown,
            mid: None,
            sid: None,
            session_id: None,
            chat: None,
            received_at: now_ms(),
        }
    }
}

/// The decoded content of one chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Chat session this message belongs to.
    pub session_id: SessionId,
    /// User id of the author.
    pub sender_id: String,
    /// Display name of the author.
    pub sender_name: String,
    /// Marketplace item the conversation is about, when known.
    pub item_id: Option<ItemId>,
    /// Message text.
    pub content: String,
    /// When the gateway created the message, Unix ms.
    pub sent_at: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Batches
// ─────────────────────────────────────────────────────────────────────────────

/// An ordered group of one session's chat payloads, flushed together for a
/// single routing decision. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    /// Session all messages belong to.
    pub session_id: SessionId,
    /// Messages in arrival order, `1..=max_batch_size` of them.
    pub messages: Vec<ChatPayload>,
    /// When the first message arrived, Unix ms.
    pub opened_at: i64,
}

impl Batch {
    /// Concatenated text of all messages, newest last.
    #[must_use]
    pub fn combined_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The most recent message in the batch.
    ///
    /// A batch always holds at least one message, so this only returns
    /// `None` for a batch constructed empty by hand.
    #[must_use]
    pub fn last(&self) -> Option<&ChatPayload> {
        self.messages.last()
    }

    /// Item referenced by the batch (first message that names one).
    #[must_use]
    pub fn item_id(&self) -> Option<&ItemId> {
        self.messages.iter().find_map(|m| m.item_id.as_ref())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound messages
// ─────────────────────────────────────────────────────────────────────────────

/// A message to be encoded and written to the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Registration handshake, sent once per connection.
    Register {
        /// Current credential token.
        token: String,
        /// Stable device id for this account.
        device_id: String,
    },
    /// Sync acknowledgment, sent after registration.
    SyncAck,
    /// Liveness probe.
    Heartbeat {
        /// Probe message id; the ack echoes it back.
        mid: MessageId,
    },
    /// Generic acknowledgment of an inbound frame.
    Ack {
        /// Message id being acknowledged.
        mid: MessageId,
        /// Gateway stream id, when present.
        sid: String,
    },
    /// A chat reply to a buyer.
    Chat {
        /// Session to deliver into.
        session_id: SessionId,
        /// Recipient user id.
        to_user: String,
        /// Reply text.
        text: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
