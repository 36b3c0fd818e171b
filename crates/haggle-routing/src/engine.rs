//! The routing decision: what kind of message is this, how involved is
//! the conversation, and which model tier should answer.
//!
//! The decision is a pure function of the batch and its context. Intent
//! comes from keyword rules with a fixed priority (technical beats price
//! beats the small-talk classes); text the rules cannot place may be
//! handed to an optional [`IntentClassifier`] delegate before settling on
//! the default class. Complexity folds in message length, bargaining
//! rounds, and history depth. Running the same batch through twice yields
//! the same decision.

use std::sync::Arc;

use haggle_core::Batch;
use haggle_settings::RoutingSettings;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Closed set of recognized buyer intents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    Farewell,
    Confirmation,
    Price,
    Technical,
    Default,
}

/// Response-generation cost/quality level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Economy,
    Standard,
    Premium,
}

impl Tier {
    /// Stable string form, used in logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Economy => "economy",
            Self::Standard => "standard",
            Self::Premium => "premium",
        }
    }
}

/// Outcome of routing one batch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoutingDecision {
    pub tier: Tier,
    pub intent: Intent,
    /// Conversation complexity in `[0, 1]`.
    pub complexity: f64,
}

/// Conversation signals that feed the complexity score.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoutingContext {
    /// How many price-negotiation rounds this chat has seen.
    pub bargain_rounds: u32,
    /// How many stored turns the chat history holds.
    pub history_len: usize,
}

// Rule keywords, checked against the batch's combined text. Priority is
// technical > price > small talk; the first class with a hit wins.
const TECHNICAL_TERMS: &[&str] = &[
    "怎么用", "参数", "规格", "型号", "兼容", "支持", "质保", "保修", "正品", "瑕疵", "成色", "尺寸",
];
const PRICE_TERMS: &[&str] = &[
    "便宜", "优惠", "降价", "少点", "打折", "多少钱", "价格", "小刀", "大刀", "最低", "包邮",
];
const GREETING_TERMS: &[&str] = &["在吗", "在不在", "你好", "您好", "hello", "hi"];
const FAREWELL_TERMS: &[&str] = &["再见", "拜拜", "不要了", "下次再说"];
const CONFIRMATION_TERMS: &[&str] = &["好的", "可以", "没问题", "成交", "拍了", "就这样", "ok"];

// Complexity folds three signals; weights favor what the buyer just said.
const LENGTH_NORM: f64 = 100.0;
const ROUNDS_NORM: f64 = 5.0;
const HISTORY_NORM: f64 = 50.0;
const LENGTH_WEIGHT: f64 = 0.5;
const ROUNDS_WEIGHT: f64 = 0.3;
const HISTORY_WEIGHT: f64 = 0.2;

/// Last-resort intent classifier, consulted only when the keyword rules
/// are inconclusive. Returning `None` keeps [`Intent::Default`].
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Option<Intent>;
}

/// Classifies batches and maps them to a generation tier.
pub struct RoutingEngine {
    settings: RoutingSettings,
    fallback: Option<Arc<dyn IntentClassifier>>,
}

impl RoutingEngine {
    #[must_use]
    pub fn new(settings: RoutingSettings) -> Self {
        Self {
            settings,
            fallback: None,
        }
    }

    /// Install a delegate for text the keyword rules cannot place.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn IntentClassifier>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Route one batch. Pure: no state is read or written beyond the
    /// arguments.
    #[must_use]
    pub fn decide(&self, batch: &Batch, ctx: &RoutingContext) -> RoutingDecision {
        let text = batch.combined_text();
        let intent = match classify(&text) {
            Intent::Default => self
                .fallback
                .as_deref()
                .and_then(|f| f.classify(&text))
                .unwrap_or(Intent::Default),
            matched => matched,
        };
        let complexity = complexity(&text, ctx);
        let tier = self.tier_for(intent, complexity);
        debug!(
            session = %batch.session_id,
            ?intent,
            complexity,
            tier = tier.as_str(),
            "routing decision"
        );
        RoutingDecision {
            tier,
            intent,
            complexity,
        }
    }

    fn tier_for(&self, intent: Intent, complexity: f64) -> Tier {
        match intent {
            Intent::Technical => Tier::Premium,
            Intent::Price => {
                if complexity > self.settings.complexity_high {
                    Tier::Premium
                } else {
                    Tier::Standard
                }
            }
            Intent::Greeting | Intent::Farewell | Intent::Confirmation => {
                if complexity < self.settings.complexity_low {
                    Tier::Economy
                } else {
                    Tier::Standard
                }
            }
            Intent::Default => Tier::Standard,
        }
    }
}

fn classify(text: &str) -> Intent {
    let lowered = text.to_lowercase();
    let hit = |terms: &[&str]| terms.iter().any(|t| lowered.contains(t));

    if hit(TECHNICAL_TERMS) {
        Intent::Technical
    } else if hit(PRICE_TERMS) {
        Intent::Price
    } else if hit(GREETING_TERMS) {
        Intent::Greeting
    } else if hit(FAREWELL_TERMS) {
        Intent::Farewell
    } else if hit(CONFIRMATION_TERMS) {
        Intent::Confirmation
    } else {
        Intent::Default
    }
}

#[allow(clippy::cast_precision_loss)]
fn complexity(text: &str, ctx: &RoutingContext) -> f64 {
    let length = (text.chars().count() as f64 / LENGTH_NORM).min(1.0);
    let rounds = (f64::from(ctx.bargain_rounds) / ROUNDS_NORM).min(1.0);
    let history = (ctx.history_len as f64 / HISTORY_NORM).min(1.0);
    (LENGTH_WEIGHT * length + ROUNDS_WEIGHT * rounds + HISTORY_WEIGHT * history).clamp(0.0, 1.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use haggle_core::{ChatPayload, SessionId, now_ms};

    fn batch(text: &str) -> Batch {
        Batch {
            session_id: SessionId::from("s1"),
            messages: vec![ChatPayload {
                session_id: SessionId::from("s1"),
                sender_id: "buyer-1".into(),
                sender_name: "Buyer".into(),
                item_id: None,
                content: text.into(),
                sent_at: now_ms(),
            }],
            opened_at: now_ms(),
        }
    }

    fn engine() -> RoutingEngine {
        RoutingEngine::new(RoutingSettings::default())
    }

    #[test]
    fn keyword_classes() {
        assert_eq!(classify("在吗"), Intent::Greeting);
        assert_eq!(classify("拜拜"), Intent::Farewell);
        assert_eq!(classify("好的，拍了"), Intent::Confirmation);
        assert_eq!(classify("能便宜点吗"), Intent::Price);
        assert_eq!(classify("这个型号支持快充吗"), Intent::Technical);
        assert_eq!(classify("帮我看看这个"), Intent::Default);
    }

    #[test]
    fn technical_outranks_price() {
        assert_eq!(classify("这个型号能便宜点吗"), Intent::Technical);
    }

    #[test]
    fn price_outranks_small_talk() {
        assert_eq!(classify("你好，能优惠吗"), Intent::Price);
    }

    #[test]
    fn latin_keywords_match_case_insensitively() {
        assert_eq!(classify("Hello"), Intent::Greeting);
        assert_eq!(classify("OK"), Intent::Confirmation);
    }

    #[test]
    fn complexity_is_bounded_and_monotonic() {
        let short = complexity("hi", &RoutingContext::default());
        let long = complexity(&"谈".repeat(300), &RoutingContext::default());
        assert!(short < long);
        assert!((0.0..=1.0).contains(&short));
        assert!((0.0..=1.0).contains(&long));

        let quiet = RoutingContext::default();
        let heated = RoutingContext {
            bargain_rounds: 10,
            history_len: 80,
        };
        assert!(complexity("能便宜吗", &quiet) < complexity("能便宜吗", &heated));
    }

    #[test]
    fn technical_intent_always_goes_premium() {
        let e = engine();
        assert_eq!(e.tier_for(Intent::Technical, 0.0), Tier::Premium);
        assert_eq!(e.tier_for(Intent::Technical, 1.0), Tier::Premium);
    }

    #[test]
    fn price_intent_escalates_above_the_high_threshold() {
        let e = engine();
        assert_eq!(e.tier_for(Intent::Price, 0.5), Tier::Standard);
        assert_eq!(e.tier_for(Intent::Price, 0.85), Tier::Premium);
    }

    #[test]
    fn small_talk_is_economy_only_below_the_low_threshold() {
        let e = engine();
        assert_eq!(e.tier_for(Intent::Greeting, 0.1), Tier::Economy);
        assert_eq!(e.tier_for(Intent::Greeting, 0.4), Tier::Standard);
        assert_eq!(e.tier_for(Intent::Confirmation, 0.2), Tier::Economy);
    }

    #[test]
    fn default_intent_is_standard() {
        let e = engine();
        assert_eq!(e.tier_for(Intent::Default, 0.0), Tier::Standard);
        assert_eq!(e.tier_for(Intent::Default, 1.0), Tier::Standard);
    }

    #[test]
    fn fallback_runs_only_when_rules_are_inconclusive() {
        struct PriceLeaning;
        impl IntentClassifier for PriceLeaning {
            fn classify(&self, _text: &str) -> Option<Intent> {
                Some(Intent::Price)
            }
        }

        let e = engine().with_fallback(Arc::new(PriceLeaning));
        let ctx = RoutingContext::default();
        // A keyword hit never reaches the delegate.
        assert_eq!(e.decide(&batch("在吗"), &ctx).intent, Intent::Greeting);
        // Text the rules cannot place does.
        assert_eq!(e.decide(&batch("帮我看看这个"), &ctx).intent, Intent::Price);
    }

    #[test]
    fn undecided_fallback_keeps_the_default() {
        struct Undecided;
        impl IntentClassifier for Undecided {
            fn classify(&self, _text: &str) -> Option<Intent> {
                None
            }
        }

        let e = engine().with_fallback(Arc::new(Undecided));
        let decision = e.decide(&batch("帮我看看这个"), &RoutingContext::default());
        assert_eq!(decision.intent, Intent::Default);
        assert_eq!(decision.tier, Tier::Standard);
    }

    #[test]
    fn decisions_are_idempotent() {
        let e = engine();
        let b = batch("这个还能便宜点吗，包邮吗");
        let ctx = RoutingContext {
            bargain_rounds: 2,
            history_len: 12,
        };
        assert_eq!(e.decide(&b, &ctx), e.decide(&b, &ctx));
    }
}
