use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use wabridge_pipeline::dispatcher::InboundEvent;

type HmacSha256 = Hmac<Sha256>;

/// Delivery-status callback, deserialized straight off a `statuses[]` entry
/// (Cloud API's actual snake_case field names — `id`, `recipient_id`,
/// `status`, `timestamp`, and an optional `conversation` object). Forwarded
/// to observability only; never enters the batching pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageStatusEvent {
    pub id: String,
    pub recipient_id: String,
    #[serde(default = "default_status", deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: String,
    #[serde(default)]
    pub conversation: Option<Conversation>,
}

fn default_status() -> String {
    "unknown".to_string()
}

/// Accepts a missing or non-string `status`/`timestamp` without failing the
/// whole event — the Cloud API always sends both as strings, but a
/// malformed delivery-status callback shouldn't make an otherwise-valid
/// event vanish.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct Conversation {
    pub id: String,
}

impl MessageStatusEvent {
    fn into_inbound_event(self) -> InboundEvent {
        let timestamp = self.timestamp.parse::<i64>().unwrap_or(0) * 1000;
        InboundEvent::Status {
            message_id: self.id,
            recipient_id: self.recipient_id,
            status: self.status,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Contact,
    Reaction,
    ButtonReply,
    ListReply,
}

/// An inbound message. Non-text payloads already carry a best-effort
/// textual `content` (e.g. a caption
/// or a `[image]` placeholder) — transcription/description of raw media is
/// out of scope for this gateway and left to the agent's own tools, if any.
///
/// This is the typed shape of a Cloud API `messages[]` entry; the core
/// pipeline never sees it directly, only the `InboundEvent::Message` it
/// reduces to via [`IncomingMessageEvent::into_inbound_event`] — `sender_name`
/// and `message_type` exist for logging/observability, not for the batching
/// decision itself.
#[derive(Debug, Clone)]
pub struct IncomingMessageEvent {
    pub message_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub message_type: MessageType,
    pub content: String,
    pub timestamp: i64,
}

impl IncomingMessageEvent {
    fn into_inbound_event(self) -> InboundEvent {
        tracing::trace!(
            sender_name = self.sender_name.as_deref().unwrap_or(""),
            message_type = ?self.message_type,
            "reducing incoming message to the pipeline's inbound event"
        );
        InboundEvent::Message {
            user_id: self.sender_id,
            message_id: self.message_id,
            text: self.content,
            received_at: self.timestamp,
        }
    }
}

fn parse_message_type(raw: &str) -> MessageType {
    match raw {
        "image" => MessageType::Image,
        "video" => MessageType::Video,
        "audio" | "voice" => MessageType::Audio,
        "document" => MessageType::Document,
        "sticker" => MessageType::Sticker,
        "location" => MessageType::Location,
        "contacts" => MessageType::Contact,
        "reaction" => MessageType::Reaction,
        "button" => MessageType::ButtonReply,
        "interactive" => MessageType::ListReply,
        _ => MessageType::Text,
    }
}

/// Looks up the display name the Cloud API attaches to the sender's phone
/// number in the payload's sibling `contacts[]` array, keyed by `wa_id`.
fn sender_name_from_contacts(contacts: &[Value], sender_id: &str) -> Option<String> {
    contacts.iter().find(|c| c["wa_id"].as_str() == Some(sender_id)).and_then(|c| {
        c["profile"]["name"].as_str().map(str::to_string)
    })
}

/// Parses a raw WhatsApp Cloud API webhook POST body into the core's
/// reduced event shape. A single payload can carry several `messages[]`
/// and/or `statuses[]` entries; all of them are returned.
pub fn parse_webhook_events(body: &[u8]) -> Result<Vec<InboundEvent>, serde_json::Error> {
    let payload: Value = serde_json::from_slice(body)?;
    let mut events = Vec::new();

    let entries = payload["entry"].as_array().cloned().unwrap_or_default();
    for entry in entries {
        let changes = entry["changes"].as_array().cloned().unwrap_or_default();
        for change in changes {
            let value = &change["value"];

            if let Some(messages) = value["messages"].as_array() {
                let contacts = value["contacts"].as_array().cloned().unwrap_or_default();
                for message in messages {
                    if let Some(event) = parse_incoming_message(message, &contacts) {
                        events.push(event.into_inbound_event());
                    }
                }
            }

            if let Some(statuses) = value["statuses"].as_array() {
                for status in statuses {
                    if let Some(event) = status_to_inbound_event(status) {
                        events.push(event);
                    }
                }
            }
        }
    }

    Ok(events)
}

fn parse_incoming_message(message: &Value, contacts: &[Value]) -> Option<IncomingMessageEvent> {
    let message_id = message["id"].as_str()?.to_string();
    let sender_id = message["from"].as_str()?.to_string();
    let timestamp = message["timestamp"]
        .as_str()
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0)
        * 1000;

    let raw_type = message["type"].as_str().unwrap_or("text");
    let content = match raw_type {
        "text" => message["text"]["body"].as_str().unwrap_or_default().to_string(),
        "button" => message["button"]["text"].as_str().unwrap_or_default().to_string(),
        "interactive" => message["interactive"]["button_reply"]["title"]
            .as_str()
            .or_else(|| message["interactive"]["list_reply"]["title"].as_str())
            .unwrap_or_default()
            .to_string(),
        other => format!("[{other}]"),
    };

    Some(IncomingMessageEvent {
        sender_name: sender_name_from_contacts(contacts, &sender_id),
        message_type: parse_message_type(raw_type),
        message_id,
        sender_id,
        content,
        timestamp,
    })
}

fn status_to_inbound_event(status: &Value) -> Option<InboundEvent> {
    let event: MessageStatusEvent = serde_json::from_value(status.clone()).ok()?;
    Some(event.into_inbound_event())
}

/// Verifies the `X-Hub-Signature-256` header against `app_secret` over the
/// raw request body. Meta's webhooks sign the body before any JSON parsing,
/// so this must run on the bytes exactly as received.
pub fn verify_signature(app_secret: &str, body: &[u8], header_value: &str) -> bool {
    let expected_hex = header_value.strip_prefix("sha256=").unwrap_or(header_value);

    let mut mac = match HmacSha256::new_from_slice(app_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();
    let computed_hex = hex_encode(&computed);

    constant_time_eq(computed_hex.as_bytes(), expected_hex.as_bytes())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Handles the Cloud API's subscription-verification GET request: echoes
/// `hub.challenge` back only if `hub.mode == "subscribe"` and the verify
/// token matches.
pub fn verify_subscription(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    expected_token: &str,
) -> Option<String> {
    if mode == Some("subscribe") && token == Some(expected_token) {
        challenge.map(str::to_string)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_text_message() {
        let body = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "id": "wamid.1",
                            "from": "15551234567",
                            "timestamp": "1700000000",
                            "type": "text",
                            "text": { "body": "hello" },
                        }],
                    },
                }],
            }],
        });
        let events = parse_webhook_events(body.to_string().as_bytes()).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            InboundEvent::Message { user_id, text, .. } => {
                assert_eq!(user_id, "15551234567");
                assert_eq!(text, "hello");
            }
            _ => panic!("expected a message event"),
        }
    }

    #[test]
    fn parses_a_status_update() {
        let body = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "statuses": [{
                            "id": "wamid.2",
                            "recipient_id": "15551234567",
                            "status": "delivered",
                            "timestamp": "1700000000",
                        }],
                    },
                }],
            }],
        });
        let events = parse_webhook_events(body.to_string().as_bytes()).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], InboundEvent::Status { .. }));
    }

    #[test]
    fn message_status_event_deserializes_cloud_api_shape() {
        let raw = serde_json::json!({
            "id": "wamid.3",
            "recipient_id": "15551234567",
            "status": "read",
            "timestamp": "1700000000",
            "conversation": { "id": "conv-1" },
        });
        let event: MessageStatusEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.id, "wamid.3");
        assert_eq!(event.conversation.unwrap().id, "conv-1");
        match event.clone().into_inbound_event() {
            InboundEvent::Status { message_id, timestamp, .. } => {
                assert_eq!(message_id, "wamid.3");
                assert_eq!(timestamp, 1_700_000_000_000);
            }
            _ => panic!("expected a status event"),
        }
    }

    #[test]
    fn signature_round_trips() {
        let secret = "shh";
        let body = b"{\"hello\":\"world\"}";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let digest = hex_encode(&mac.finalize().into_bytes());
        let header = format!("sha256={digest}");
        assert!(verify_signature(secret, body, &header));
        assert!(!verify_signature("wrong", body, &header));
    }

    #[test]
    fn subscription_verification_requires_matching_token() {
        assert_eq!(
            verify_subscription(Some("subscribe"), Some("tok"), Some("echo"), "tok"),
            Some("echo".to_string())
        );
        assert_eq!(verify_subscription(Some("subscribe"), Some("bad"), Some("echo"), "tok"), None);
    }
}
