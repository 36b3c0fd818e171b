//! Outbound message encoding.
//!
//! Every [`OutboundMessage`] maps to one JSON text frame in the gateway's
//! lwp dialect. Chat text is base64-wrapped the same way the primary
//! inbound path unwraps it.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use haggle_core::{MessageId, OutboundMessage, now_ms};
use serde_json::json;
use uuid::Uuid;

/// Per-connection constants the encoder needs for registration frames.
#[derive(Clone, Copy, Debug)]
pub struct EncodeContext<'a> {
    /// App key presented during registration.
    pub app_key: &'a str,
    /// User-Agent string presented during registration.
    pub user_agent: &'a str,
}

/// Encode an outbound message as a JSON text frame.
#[must_use]
pub fn encode_outbound(msg: &OutboundMessage, ctx: &EncodeContext<'_>) -> String {
    match msg {
        OutboundMessage::Register { token, device_id } => json!({
            "lwp": "/reg",
            "headers": {
                "cache-header": "app-key token ua wv",
                "app-key": ctx.app_key,
                "token": token,
                "ua": ctx.user_agent,
                "dt": "j",
                "wv": "im:3,au:3,sy:6",
                "sync": "0,0;0;0;",
                "did": device_id,
                "mid": MessageId::for_wire(now_ms()).as_str(),
            }
        }),
        OutboundMessage::SyncAck => {
            let now = now_ms();
            json!({
                "lwp": "/r/SyncStatus/ackDiff",
                "headers": {"mid": "5701741704675979 0"},
                "body": [{
                    "pipeline": "sync",
                    "tooLong2Tag": "PNM,1",
                    "channel": "sync",
                    "topic": "sync",
                    "highPts": 0,
                    "pts": now * 1000,
                    "seq": 0,
                    "timestamp": now,
                }]
            })
        }
        OutboundMessage::Heartbeat { mid } => json!({
            "lwp": "/!",
            "headers": {"mid": mid.as_str()}
        }),
        OutboundMessage::Ack { mid, sid } => json!({
            "code": 200,
            "headers": {"mid": mid.as_str(), "sid": sid}
        }),
        OutboundMessage::Chat {
            session_id,
            to_user,
            text,
        } => {
            let content = json!({"contentType": 1, "text": {"text": text}});
            let data = BASE64.encode(content.to_string());
            json!({
                "lwp": "/r/MessageSend/sendByReceiverScope",
                "headers": {"mid": MessageId::for_wire(now_ms()).as_str()},
                "body": [
                    {
                        "uuid": Uuid::now_v7().simple().to_string(),
                        "cid": format!("{session_id}@goofish"),
                        "conversationType": 1,
                        "content": {
                            "contentType": 101,
                            "custom": {"type": 1, "data": data}
                        },
                        "redPointPolicy": 0,
                        "extension": {"extJson": "{}"},
                        "ctx": {"appVersion": "1.0", "platform": "web"},
                        "mtags": {},
                        "msgReadStatusSetting": 1
                    },
                    {"actualReceivers": [format!("{to_user}@goofish")]}
                ]
            })
        }
    }
    .to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use haggle_core::SessionId;
    use serde_json::Value;

    const CTX: EncodeContext<'static> = EncodeContext {
        app_key: "test-app-key",
        user_agent: "test-ua",
    };

    fn parse(msg: &OutboundMessage) -> Value {
        serde_json::from_str(&encode_outbound(msg, &CTX)).unwrap()
    }

    #[test]
    fn register_frame_shape() {
        let v = parse(&OutboundMessage::Register {
            token: "tok-1".into(),
            device_id: "dev-1".into(),
        });
        assert_eq!(v["lwp"], "/reg");
        assert_eq!(v["headers"]["app-key"], "test-app-key");
        assert_eq!(v["headers"]["token"], "tok-1");
        assert_eq!(v["headers"]["ua"], "test-ua");
        assert_eq!(v["headers"]["did"], "dev-1");
        assert!(v["headers"]["mid"].as_str().unwrap().ends_with(" 0"));
    }

    #[test]
    fn sync_ack_frame_shape() {
        let v = parse(&OutboundMessage::SyncAck);
        assert_eq!(v["lwp"], "/r/SyncStatus/ackDiff");
        let entry = &v["body"][0];
        assert_eq!(entry["pipeline"], "sync");
        assert_eq!(entry["seq"], 0);
        let pts = entry["pts"].as_i64().unwrap();
        let ts = entry["timestamp"].as_i64().unwrap();
        assert_eq!(pts, ts * 1000);
    }

    #[test]
    fn heartbeat_frame_echoes_mid() {
        let mid = MessageId::from("hb-mid");
        let v = parse(&OutboundMessage::Heartbeat { mid });
        assert_eq!(v["lwp"], "/!");
        assert_eq!(v["headers"]["mid"], "hb-mid");
    }

    #[test]
    fn ack_frame_echoes_mid_and_sid() {
        let v = parse(&OutboundMessage::Ack {
            mid: MessageId::from("m-1"),
            sid: "s-1".into(),
        });
        assert_eq!(v["code"], 200);
        assert_eq!(v["headers"]["mid"], "m-1");
        assert_eq!(v["headers"]["sid"], "s-1");
    }

    #[test]
    fn chat_frame_wraps_text_in_base64() {
        let v = parse(&OutboundMessage::Chat {
            session_id: SessionId::from("chat-1"),
            to_user: "buyer-9".into(),
            text: "可以小刀".into(),
        });
        assert_eq!(v["lwp"], "/r/MessageSend/sendByReceiverScope");
        assert_eq!(v["body"][0]["cid"], "chat-1@goofish");
        assert_eq!(v["body"][1]["actualReceivers"][0], "buyer-9@goofish");

        let data = v["body"][0]["content"]["custom"]["data"].as_str().unwrap();
        let inner: Value =
            serde_json::from_slice(&BASE64.decode(data).unwrap()).unwrap();
        assert_eq!(inner["contentType"], 1);
        assert_eq!(inner["text"]["text"], "可以小刀");
    }
}
