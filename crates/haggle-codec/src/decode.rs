//! Inbound frame decoding and classification.
//!
//! Wire traffic arrives as JSON text envelopes. Chat and system payloads
//! ride inside a sync push package, base64-wrapped on the primary path and
//! plain JSON on the legacy path. Decode failures drop the single frame;
//! they never touch connection state.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use haggle_core::{
    ChatPayload, DecodeError, Frame, ItemId, MessageId, SessionId, now_ms,
};
use serde_json::Value;
use tracing::{debug, info};

/// Decode one raw text frame from the gateway into a classified [`Frame`].
///
/// Chat frames whose gateway timestamp is more than `expiry_ms` in the
/// past are stamped [`FrameKind::Expired`](haggle_core::FrameKind::Expired)
/// rather than dropped, so the caller can still acknowledge them.
pub fn decode_text(raw: &str, expiry_ms: i64) -> Result<Frame, DecodeError> {
    let envelope: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::new("envelope", e.to_string()))?;

    let mid = envelope
        .pointer("/headers/mid")
        .and_then(Value::as_str)
        .map(MessageId::from);

    let sid = envelope
        .pointer("/headers/sid")
        .and_then(Value::as_str)
        .map(str::to_owned);

    // A code-200 response with a mid acknowledges one of our requests.
    // Liveness probes are the only requests whose acks we track.
    if envelope.get("code").and_then(Value::as_i64) == Some(200)
        && let Some(mid) = mid
    {
        return Ok(Frame::heartbeat_ack(mid));
    }

    // Sync push package: the real payload rides in data[0].
    if let Some(entry) = envelope.pointer("/body/syncPushPackage/data/0") {
        let mut frame = decode_sync_entry(entry, expiry_ms)?;
        frame.mid = mid;
        frame.sid = sid;
        return Ok(frame);
    }

    // Anything else carrying headers or an lwp path is control traffic.
    if envelope.get("headers").is_some() || envelope.get("lwp").is_some() {
        let mut frame = Frame::system(mid);
        frame.sid = sid;
        return Ok(frame);
    }

    Ok(Frame::unknown())
}

fn decode_sync_entry(entry: &Value, expiry_ms: i64) -> Result<Frame, DecodeError> {
    let data = entry
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::new("envelope", "sync entry missing data field"))?;

    let inner = decode_payload(data)?;
    classify_inner(&inner, expiry_ms)
}

/// Primary path: base64-wrapped JSON. Legacy path: plain JSON.
fn decode_payload(data: &str) -> Result<Value, DecodeError> {
    if let Ok(bytes) = BASE64.decode(data)
        && let Ok(text) = String::from_utf8(bytes)
        && let Ok(value) = serde_json::from_str::<Value>(&text)
    {
        return Ok(value);
    }
    serde_json::from_str(data).map_err(|e| DecodeError::new("legacy", e.to_string()))
}

fn classify_inner(msg: &Value, expiry_ms: i64) -> Result<Frame, DecodeError> {
    if msg
        .pointer("/1/10/reminderContent")
        .and_then(Value::as_str)
        .is_some()
    {
        return decode_chat(msg, expiry_ms);
    }

    // Order status notices carry a red reminder banner.
    if let Some(status) = msg.pointer("/3/redReminder").and_then(Value::as_str) {
        let user_id = msg
            .get("1")
            .and_then(Value::as_str)
            .map(|s| s.split('@').next().unwrap_or(s))
            .unwrap_or_default();
        info!(user_id, status, "order status notice");
        return Ok(Frame::system(None));
    }

    // Typing indicator: field 1 is an array of "<user>@goofish" refs.
    if msg
        .pointer("/1/0/1")
        .and_then(Value::as_str)
        .is_some_and(|s| s.contains("@goofish"))
    {
        debug!("buyer typing indicator");
        return Ok(Frame::system(None));
    }

    // No-push system traffic (read receipts, red dot sync).
    if msg.pointer("/3/needPush").and_then(Value::as_str) == Some("false") {
        return Ok(Frame::system(None));
    }

    Ok(Frame::unknown())
}

fn decode_chat(msg: &Value, expiry_ms: i64) -> Result<Frame, DecodeError> {
    let sent_at = msg
        .pointer("/1/5")
        .and_then(as_millis)
        .ok_or_else(|| DecodeError::new("chat", "missing create time"))?;

    let content = msg
        .pointer("/1/10/reminderContent")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::new("chat", "missing content"))?;

    let sender_name = msg
        .pointer("/1/10/reminderTitle")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let sender_id = msg
        .pointer("/1/10/senderUserId")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::new("chat", "missing sender id"))?;

    let session_id = msg
        .pointer("/1/2")
        .and_then(Value::as_str)
        .map(|s| s.split('@').next().unwrap_or(s))
        .ok_or_else(|| DecodeError::new("chat", "missing session id"))?;

    let item_id = msg
        .pointer("/1/10/reminderUrl")
        .and_then(Value::as_str)
        .and_then(item_id_from_url);

    let payload = ChatPayload {
        session_id: SessionId::from(session_id),
        sender_id: sender_id.to_owned(),
        sender_name: sender_name.to_owned(),
        item_id,
        content: content.to_owned(),
        sent_at,
    };

    let expired = now_ms() - sent_at > expiry_ms;
    Ok(Frame::chat(payload, expired))
}

/// The gateway sends timestamps as either a JSON number or a string.
fn as_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Pull `itemId=` out of a reminder URL's query string.
fn item_id_from_url(url: &str) -> Option<ItemId> {
    let (_, rest) = url.split_once("itemId=")?;
    let id = rest.split('&').next().unwrap_or(rest);
    (!id.is_empty()).then(|| ItemId::from(id))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
