//! Outbound reply safety: generated text never leaves the agent if it
//! solicits off-platform contact.
//!
//! The check runs after generation and before send, on every reply
//! including fallbacks supplied by callers.

use haggle_settings::RoutingSettings;
use tracing::warn;

/// Replaces replies containing blocked terms with a compliant fallback.
pub struct SafetyFilter {
    blocked: Vec<String>,
    fallback: String,
}

impl SafetyFilter {
    #[must_use]
    pub fn new(settings: &RoutingSettings) -> Self {
        Self {
            blocked: settings
                .blocked_terms
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
            fallback: settings.fallback_reply.clone(),
        }
    }

    /// The reply to actually send: `text` itself when clean, the
    /// compliant fallback otherwise.
    #[must_use]
    pub fn apply(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        if let Some(term) = self.blocked.iter().find(|t| lowered.contains(t.as_str())) {
            warn!(term = term.as_str(), "blocked term in generated reply, substituting fallback");
            return self.fallback.clone();
        }
        text.to_owned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
