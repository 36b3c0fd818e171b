//! The generation seam: routing hands a request to whatever produces
//! reply text, with a hard timeout and a fallback so a session never goes
//! silent.

use std::time::Duration;

use async_trait::async_trait;
use haggle_core::GenerationError;
use serde_json::Value;
use tracing::warn;

use crate::engine::RoutingDecision;

/// One stored conversation turn, oldest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptTurn {
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
}

/// Everything a generator needs to produce one reply.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub decision: RoutingDecision,
    /// Prior turns, oldest first.
    pub history: Vec<PromptTurn>,
    /// The batch's combined text.
    pub content: String,
    /// Cached marketplace item snapshot, when known.
    pub item_context: Option<Value>,
}

/// Produces reply text for a routed batch.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Call the generator with a deadline. Failure or timeout yields the
/// fallback text; the caller still runs the safety filter on the result.
pub async fn generate_with_timeout(
    generator: &dyn ResponseGenerator,
    request: &GenerationRequest,
    timeout_ms: u64,
    fallback: &str,
) -> String {
    let deadline = Duration::from_millis(timeout_ms);
    match tokio::time::timeout(deadline, generator.generate(request)).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(error = %e, tier = request.decision.tier.as_str(), "generation failed, using fallback");
            fallback.to_owned()
        }
        Err(_) => {
            warn!(timeout_ms, tier = request.decision.tier.as_str(), "generation timed out, using fallback");
            fallback.to_owned()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
