//! Branded ID newtypes for type safety.
//!
//! Every entity in the Haggle system has a distinct ID type implemented as
//! a newtype wrapper around `String`. This prevents accidentally passing a
//! marketplace item ID where a chat session ID is expected.
//!
//! Freshly minted IDs are UUID v7 (time-ordered); IDs arriving on the wire
//! keep whatever form the gateway gave them.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Stable identifier for a chat session (one buyer conversation).
    SessionId
}

branded_id! {
    /// Identifier for a marketplace item listing.
    ItemId
}

branded_id! {
    /// Identifier for a single wire message (`mid` header).
    MessageId
}

branded_id! {
    /// Identifier for the device registered with the gateway.
    DeviceId
}

impl MessageId {
    /// Mint a message ID in the gateway's `"<millis><counter> 0"` shape.
    #[must_use]
    pub fn for_wire(now_ms: i64) -> Self {
        let tail = u64::from(Uuid::now_v7().as_u128() as u32) % 1000;
        Self(format!("{now_ms}{tail:03} 0"))
    }
}

impl DeviceId {
    /// Derive a stable device ID from the operator's user id.
    ///
    /// The gateway expects the same device ID across reconnects for the
    /// same account, so this must be deterministic.
    #[must_use]
    pub fn derive(user_id: &str) -> Self {
        let ns = Uuid::NAMESPACE_OID;
        let uuid = Uuid::new_v5(&ns, user_id.as_bytes());
        Self(format!("{uuid}-{user_id}"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn id_from_str_roundtrip() {
        let id = SessionId::from("chat-42");
        assert_eq!(id.as_str(), "chat-42");
        assert_eq!(String::from(id), "chat-42");
    }

    #[test]
    fn id_display_matches_inner() {
        let id = ItemId::from("itm-9");
        assert_eq!(id.to_string(), "itm-9");
    }

    #[test]
    fn serde_is_transparent() {
        let id = SessionId::from("s1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"s1\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn distinct_types_do_not_compare() {
        // Compile-time property: SessionId and ItemId are different types.
        let s = SessionId::from("x");
        let i = ItemId::from("x");
        assert_eq!(s.as_str(), i.as_str());
    }

    #[test]
    fn device_id_is_deterministic() {
        let a = DeviceId::derive("user-1");
        let b = DeviceId::derive("user-1");
        let c = DeviceId::derive("user-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().ends_with("-user-1"));
    }

    #[test]
    fn wire_message_id_shape() {
        let mid = MessageId::for_wire(1_700_000_000_000);
        assert!(mid.as_str().starts_with("1700000000000"));
        assert!(mid.as_str().ends_with(" 0"));
    }
}
