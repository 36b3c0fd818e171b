//! OpenAI-compatible chat-completions client.
//!
//! One client serves all three tiers; the routing decision picks which
//! configured model name goes in the request. The seller persona and the
//! cached item snapshot ride in the system message, prior turns follow
//! oldest-first, and the batch's combined text is the final user message.

use async_trait::async_trait;
use haggle_core::GenerationError;
use haggle_routing::{GenerationRequest, ResponseGenerator, Tier};
use haggle_settings::LlmSettings;
use serde::{Deserialize, Serialize};
use tracing::debug;

const SYSTEM_PROMPT: &str = "你是一位闲置平台的卖家，回复买家消息。\
语气友好简洁，像真人卖家，不超过两句话。只在平台内沟通，绝不提供任何站外联系方式。";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: String,
}

/// Tiered [`ResponseGenerator`] backed by a chat-completions endpoint.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl ChatCompletionsClient {
    pub fn new(settings: LlmSettings) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder().build().map_err(|e| {
            GenerationError::Failed {
                tier: "all".into(),
                message: e.to_string(),
            }
        })?;
        Ok(Self { http, settings })
    }

    fn model_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::Economy => &self.settings.tiers.economy,
            Tier::Standard => &self.settings.tiers.standard,
            Tier::Premium => &self.settings.tiers.premium,
        }
    }

    fn failed(&self, tier: Tier, message: impl Into<String>) -> GenerationError {
        GenerationError::Failed {
            tier: tier.as_str().into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl ResponseGenerator for ChatCompletionsClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let tier = request.decision.tier;
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or_else(|| self.failed(tier, "api key not configured"))?;

        let model = self.model_for(tier);
        let messages = build_messages(request);
        let body = ChatRequest {
            model,
            messages: &messages,
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            max_tokens: self.settings.max_tokens,
        };

        let url = format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'));
        debug!(model, turns = messages.len(), "chat completion request");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.failed(tier, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(self.failed(tier, format!("{status}: {detail}")));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| self.failed(tier, e.to_string()))?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| self.failed(tier, "response has no choices"))?;
        Ok(reply.trim().to_owned())
    }
}

fn build_messages(request: &GenerationRequest) -> Vec<ChatMessage> {
    let mut system = SYSTEM_PROMPT.to_owned();
    if let Some(item) = &request.item_context {
        system.push_str("\n商品信息：");
        system.push_str(&item.to_string());
    }

    let mut messages = Vec::with_capacity(request.history.len() + 2);
    messages.push(ChatMessage {
        role: "system".into(),
        content: system,
    });
    for turn in &request.history {
        messages.push(ChatMessage {
            role: turn.role.clone(),
            content: turn.content.clone(),
        });
    }
    messages.push(ChatMessage {
        role: "user".into(),
        content: request.content.clone(),
    });
    messages
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
