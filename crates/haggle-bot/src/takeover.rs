//! Manual takeover: the operator can park the agent for one chat.
//!
//! Sending the toggle keyword into a chat flips it between automatic and
//! manual mode. Manual mode suppresses generated replies and expires on
//! its own after the configured timeout, so a forgotten toggle does not
//! mute a chat forever.

use std::collections::HashMap;
use std::time::Duration;

use haggle_core::SessionId;
use haggle_settings::TakeoverSettings;
use parking_lot::Mutex;
use tokio::time::Instant;

/// Tracks which chats the operator has taken over.
pub struct TakeoverRegistry {
    keyword: String,
    timeout: Duration,
    manual: Mutex<HashMap<SessionId, Instant>>,
}

impl TakeoverRegistry {
    #[must_use]
    pub fn new(settings: &TakeoverSettings) -> Self {
        Self {
            keyword: settings.toggle_keyword.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
            manual: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a seller message is the mode toggle rather than a reply.
    #[must_use]
    pub fn is_toggle(&self, text: &str) -> bool {
        text.trim() == self.keyword
    }

    /// Flip the chat's mode. Returns `true` when the chat is now manual.
    pub fn toggle(&self, session: &SessionId) -> bool {
        let mut manual = self.manual.lock();
        let active =
            matches!(manual.get(session), Some(since) if since.elapsed() < self.timeout);
        if active {
            let _ = manual.remove(session);
            false
        } else {
            let _ = manual.insert(session.clone(), Instant::now());
            true
        }
    }

    /// Whether the chat is currently under manual control. Expired
    /// takeovers are cleaned up on read.
    pub fn is_manual(&self, session: &SessionId) -> bool {
        let mut manual = self.manual.lock();
        match manual.get(session) {
            Some(since) if since.elapsed() < self.timeout => true,
            Some(_) => {
                let _ = manual.remove(session);
                false
            }
            None => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
