//! # haggle-llm
//!
//! The production [`ResponseGenerator`](haggle_routing::ResponseGenerator):
//! an OpenAI-compatible chat-completions client with tier→model selection.

#![deny(unsafe_code)]

pub mod client;

pub use client::ChatCompletionsClient;
