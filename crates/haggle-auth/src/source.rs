//! Credential sources.
//!
//! [`CredentialSource`] is the seam between the refresh loop and the
//! gateway's token HTTP API, so tests can swap in a programmable fake.

use async_trait::async_trait;
use haggle_codec::request_sign;
use haggle_core::{CredentialError, DeviceId, now_ms};
use serde_json::Value;

/// Fetches a fresh access token for a device.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Fetch a new access token.
    async fn fetch(&self, device_id: &DeviceId) -> Result<String, CredentialError>;
}

/// Token API path on the gateway's HTTP host.
const TOKEN_API: &str = "mtop.taobao.idlemessage.pc.login.token";
const TOKEN_URL: &str =
    "https://h5api.m.goofish.com/h5/mtop.taobao.idlemessage.pc.login.token/1.0/";

/// Real credential source backed by the gateway's signed token endpoint.
pub struct GatewayCredentialSource {
    http: reqwest::Client,
    app_key: String,
    cookie: String,
    user_agent: String,
}

impl GatewayCredentialSource {
    /// Build a source from the session cookie and app key.
    pub fn new(app_key: String, cookie: String, user_agent: String) -> Result<Self, CredentialError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| CredentialError::Request(e.to_string()))?;
        Ok(Self {
            http,
            app_key,
            cookie,
            user_agent,
        })
    }
}

#[async_trait]
impl CredentialSource for GatewayCredentialSource {
    async fn fetch(&self, device_id: &DeviceId) -> Result<String, CredentialError> {
        let fragment = token_fragment(&self.cookie).ok_or(CredentialError::Missing)?;
        let t = now_ms();
        let data = serde_json::json!({
            "appKey": self.app_key,
            "deviceId": device_id.as_str(),
        })
        .to_string();
        let sign = request_sign(fragment, t, &self.app_key, &data);

        let resp = self
            .http
            .get(TOKEN_URL)
            .query(&[
                ("jsv", "2.7.2"),
                ("appKey", self.app_key.as_str()),
                ("t", &t.to_string()),
                ("sign", &sign),
                ("v", "1.0"),
                ("type", "originaljson"),
                ("api", TOKEN_API),
                ("dataType", "json"),
                ("data", &data),
            ])
            .header("Cookie", &self.cookie)
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        let body: Value = resp
            .json()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        extract_token(&body)
    }
}

/// The signing fragment is the part of the `_m_h5_tk` cookie value before
/// the first `_`. Shared by every signed HTTP call that presents the
/// session cookie.
#[must_use]
pub fn token_fragment(cookie: &str) -> Option<&str> {
    let (_, rest) = cookie.split_once("_m_h5_tk=")?;
    let value = rest.split(';').next().unwrap_or(rest);
    let fragment = value.split('_').next().unwrap_or(value);
    (!fragment.is_empty()).then_some(fragment)
}

pub(crate) fn extract_token(body: &Value) -> Result<String, CredentialError> {
    let ret_ok = body
        .pointer("/ret/0")
        .and_then(Value::as_str)
        .is_some_and(|r| r.starts_with("SUCCESS"));
    if !ret_ok {
        let ret = body
            .pointer("/ret/0")
            .and_then(Value::as_str)
            .unwrap_or("no ret code");
        return Err(CredentialError::Rejected(ret.to_owned()));
    }
    body.pointer("/data/accessToken")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| CredentialError::Rejected("response missing accessToken".to_owned()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
