//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file
//! format. Each type implements [`Default`] with production default values.
//! Types marked with `#[serde(default)]` allow partial JSON — missing
//! fields get their default value during deserialization.

use haggle_core::BackoffPolicy;
use serde::{Deserialize, Serialize};

/// Root settings type for the Haggle agent.
///
/// Loaded from `~/.haggle/settings.json` with defaults applied for
/// missing fields. Environment variables can override specific values.
///
/// # JSON Format
///
/// All field names are camelCase. Secrets (`cookie`, `apiKey`) are usually
/// supplied via environment variables instead of the file. Example:
///
/// ```json
/// {
///   "version": "0.1.0",
///   "heartbeat": { "intervalMs": 15000 },
///   "batching": { "windowMs": 2000 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HaggleSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Gateway connection settings.
    pub gateway: GatewaySettings,
    /// Credential refresh settings.
    pub credentials: CredentialSettings,
    /// Liveness probe settings.
    pub heartbeat: HeartbeatSettings,
    /// Per-session message batching settings.
    pub batching: BatchingSettings,
    /// Routing-tier decision settings.
    pub routing: RoutingSettings,
    /// Reply generation settings.
    pub llm: LlmSettings,
    /// Manual takeover settings.
    pub takeover: TakeoverSettings,
    /// Conversation store settings.
    pub store: StoreSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for HaggleSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "haggle".to_string(),
            gateway: GatewaySettings::default(),
            credentials: CredentialSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            batching: BatchingSettings::default(),
            routing: RoutingSettings::default(),
            llm: LlmSettings::default(),
            takeover: TakeoverSettings::default(),
            store: StoreSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Gateway connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// WebSocket endpoint of the message gateway.
    pub endpoint: String,
    /// App key sent with credential and registration requests.
    pub app_key: String,
    /// User-Agent header for the WebSocket handshake and HTTP calls.
    pub user_agent: String,
    /// Bound on the outbound write queue; past this, oldest chat replies
    /// are dropped with a warning.
    pub outbound_queue_depth: usize,
    /// Chat frames older than this are stamped expired and never batched.
    pub message_expiry_ms: i64,
    /// Reconnect backoff policy.
    pub reconnect: BackoffPolicy,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            endpoint: "wss://wss-goofish.dingtalk.com/".to_string(),
            app_key: "444e9908a51d1cb236a27862abc769c9".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36"
                .to_string(),
            outbound_queue_depth: 64,
            message_expiry_ms: 300_000,
            reconnect: BackoffPolicy::default(),
        }
    }
}

/// Credential refresh settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CredentialSettings {
    /// Session cookie string; usually supplied via `HAGGLE_COOKIES`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
    /// How often to renew the access token, in ms.
    pub refresh_interval_ms: u64,
    /// Initial delay before retrying a failed renewal, in ms. Doubles per
    /// consecutive failure, capped at `refreshIntervalMs`.
    pub retry_delay_ms: u64,
    /// Consecutive renewal failures before forcing a reconnect.
    pub max_failures: u32,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            cookie: None,
            refresh_interval_ms: 3_600_000,
            retry_delay_ms: 300_000,
            max_failures: 3,
        }
    }
}

/// Liveness probe settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Interval between probes, in ms.
    pub interval_ms: u64,
    /// How long to wait for an acknowledgment before declaring the
    /// connection degraded, in ms.
    pub timeout_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 15_000,
            timeout_ms: 5_000,
        }
    }
}

/// Per-session message batching settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchingSettings {
    /// Whether batching is enabled; when off, every message flushes as a
    /// batch of one.
    pub enabled: bool,
    /// Batch window: ms to wait after the first message before flushing.
    pub window_ms: u64,
    /// Flush immediately once a batch reaches this many messages.
    pub max_batch_size: usize,
    /// Evict a session's batch state after this long idle, in ms.
    pub idle_eviction_ms: u64,
}

impl Default for BatchingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 2000,
            max_batch_size: 3,
            idle_eviction_ms: 600_000,
        }
    }
}

/// Routing-tier decision settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingSettings {
    /// Whether tier routing is enabled; when off, everything goes to the
    /// standard tier.
    pub enabled: bool,
    /// Complexity at or below this routes down a tier.
    pub complexity_low: f64,
    /// Complexity above this routes up a tier.
    pub complexity_high: f64,
    /// Generation timeout before the fallback reply is used, in ms.
    pub generation_timeout_ms: u64,
    /// Inbound text containing any of these terms gets the compliant
    /// fallback instead of a generated reply.
    pub blocked_terms: Vec<String>,
    /// Reply used when generation fails, times out, or is blocked.
    pub fallback_reply: String,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            complexity_low: 0.3,
            complexity_high: 0.7,
            generation_timeout_ms: 10_000,
            blocked_terms: vec![
                "微信".to_string(),
                "weixin".to_string(),
                "wechat".to_string(),
                "支付宝".to_string(),
                "alipay".to_string(),
                "手机号".to_string(),
                "电话".to_string(),
                "qq".to_string(),
            ],
            fallback_reply: "亲，这个问题我需要确认一下，稍后回复您哦".to_string(),
        }
    }
}

/// Reply generation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    /// Base URL of the OpenAI-compatible chat completions API.
    pub base_url: String,
    /// API key; usually supplied via `HAGGLE_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling cutoff.
    pub top_p: f64,
    /// Maximum reply tokens.
    pub max_tokens: u32,
    /// Model per routing tier.
    pub tiers: TierModels,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            api_key: None,
            temperature: 0.4,
            top_p: 0.8,
            max_tokens: 500,
            tiers: TierModels::default(),
        }
    }
}

/// Model identifiers per routing tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TierModels {
    /// Cheapest tier (greetings, farewells, confirmations).
    pub economy: String,
    /// Default tier.
    pub standard: String,
    /// Most capable tier (technical questions, high complexity).
    pub premium: String,
}

impl Default for TierModels {
    fn default() -> Self {
        Self {
            economy: "qwen-turbo".to_string(),
            standard: "qwen-plus".to_string(),
            premium: "qwen-max".to_string(),
        }
    }
}

/// Manual takeover settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TakeoverSettings {
    /// Seller message that toggles takeover on/off for a session.
    pub toggle_keyword: String,
    /// Takeover expires after this long without seller activity, in ms.
    pub timeout_ms: u64,
}

impl Default for TakeoverSettings {
    fn default() -> Self {
        Self {
            toggle_keyword: "。".to_string(),
            timeout_ms: 3_600_000,
        }
    }
}

/// Conversation store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Path to the SQLite database (relative paths resolve against the
    /// working directory).
    pub db_path: String,
    /// Messages of history retained per session for prompting.
    pub max_history: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "data/chat_history.db".to_string(),
            max_history: 100,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
