//! # haggle-routing
//!
//! Decides how each flushed batch gets answered.
//!
//! - [`RoutingEngine`]: pure (intent, complexity) → [`Tier`] mapping
//! - [`SafetyFilter`]: mandatory post-generation check on outbound text
//! - [`ResponseGenerator`]: the seam to the actual reply producer, wrapped
//!   by [`generate_with_timeout`] so sessions never stall past the deadline

#![deny(unsafe_code)]

pub mod engine;
pub mod generator;
pub mod safety;

pub use engine::{Intent, IntentClassifier, RoutingContext, RoutingDecision, RoutingEngine, Tier};
pub use generator::{GenerationRequest, PromptTurn, ResponseGenerator, generate_with_timeout};
pub use safety::SafetyFilter;
