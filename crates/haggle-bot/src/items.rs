//! Marketplace item context: cache-first lookup with API write-back.
//!
//! Routing and prompting want the item snapshot (title, price,
//! description) for the listing a chat is about. The store's item table
//! is consulted first; on a miss the snapshot is fetched through the
//! signed detail endpoint and written back.

use async_trait::async_trait;
use haggle_auth::token_fragment;
use haggle_codec::request_sign;
use haggle_core::{ItemId, now_ms};
use haggle_history::ConversationStore;
use serde_json::Value;
use tracing::warn;

/// Fetches item snapshots from the marketplace.
#[async_trait]
pub trait ItemLookup: Send + Sync {
    async fn fetch(&self, item_id: &ItemId) -> anyhow::Result<Value>;
}

const ITEM_API: &str = "mtop.taobao.idle.pc.detail";
const ITEM_URL: &str = "https://h5api.m.goofish.com/h5/mtop.taobao.idle.pc.detail/1.0/";

/// Real lookup against the signed item detail endpoint.
pub struct MtopItemClient {
    http: reqwest::Client,
    app_key: String,
    cookie: String,
    user_agent: String,
}

impl MtopItemClient {
    pub fn new(app_key: String, cookie: String, user_agent: String) -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            app_key,
            cookie,
            user_agent,
        })
    }
}

#[async_trait]
impl ItemLookup for MtopItemClient {
    async fn fetch(&self, item_id: &ItemId) -> anyhow::Result<Value> {
        let fragment = token_fragment(&self.cookie)
            .ok_or_else(|| anyhow::anyhow!("cookie missing _m_h5_tk"))?;
        let t = now_ms();
        let data = serde_json::json!({"itemId": item_id.as_str()}).to_string();
        let sign = request_sign(fragment, t, &self.app_key, &data);

        let body: Value = self
            .http
            .get(ITEM_URL)
            .query(&[
                ("jsv", "2.7.2"),
                ("appKey", self.app_key.as_str()),
                ("t", &t.to_string()),
                ("sign", &sign),
                ("v", "1.0"),
                ("type", "originaljson"),
                ("api", ITEM_API),
                ("dataType", "json"),
                ("data", &data),
            ])
            .header("Cookie", &self.cookie)
            .header("User-Agent", &self.user_agent)
            .send()
            .await?
            .json()
            .await?;

        let ret_ok = body
            .pointer("/ret/0")
            .and_then(Value::as_str)
            .is_some_and(|r| r.starts_with("SUCCESS"));
        if !ret_ok {
            anyhow::bail!(
                "item detail rejected: {}",
                body.pointer("/ret/0")
                    .and_then(Value::as_str)
                    .unwrap_or("no ret code")
            );
        }
        body.get("data")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("item detail response missing data"))
    }
}

/// Item snapshot for a listing: cache hit, or fetch and write back.
/// Lookup failures are logged and degrade to `None`; the reply pipeline
/// works without item context.
pub async fn item_context(
    store: &dyn ConversationStore,
    lookup: &dyn ItemLookup,
    item_id: &ItemId,
) -> Option<Value> {
    match store.item_info(item_id) {
        Ok(Some(info)) => return Some(info),
        Ok(None) => {}
        Err(e) => warn!(item = %item_id, error = %e, "item cache read failed"),
    }
    match lookup.fetch(item_id).await {
        Ok(info) => {
            if let Err(e) = store.save_item_info(item_id, &info) {
                warn!(item = %item_id, error = %e, "item cache write failed");
            }
            Some(info)
        }
        Err(e) => {
            warn!(item = %item_id, error = %e, "item lookup failed");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
