use serde_json::{json, Value};
use wabridge_pipeline::message::{Recipient, RecipientKind};

#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("invalid outbound message: {0}")]
    Validation(String),
    #[error("whatsapp api request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("whatsapp api returned an error: {0}")]
    Api(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MediaKind {
    fn wire_name(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
            MediaKind::Sticker => "sticker",
        }
    }
}

#[derive(Debug, Clone)]
pub enum InteractiveMessage {
    Button { body: String, buttons: Vec<(String, String)> },
    List { body: String, button_text: String, sections: Vec<(String, Vec<(String, String)>)> },
    CtaUrl { body: String, display_text: String, url: String },
}

/// The outbound WhatsApp message sum type. Each variant is validated on
/// construction rather than at send time, so a malformed outbound message
/// never reaches the wire.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Text { body: String },
    Media { kind: MediaKind, link: String, caption: Option<String> },
    /// Media already uploaded to the Cloud API via `WhatsAppClient::upload_media`,
    /// referenced by its returned media id rather than a public link.
    MediaById { kind: MediaKind, media_id: String, caption: Option<String> },
    Template { name: String, language: String, components: Value },
    Interactive(InteractiveMessage),
    Location { latitude: f64, longitude: f64, name: Option<String>, address: Option<String> },
    Contact { formatted_name: String, phone: String },
    Reaction { message_id: String, emoji: String },
}

const MAX_TEXT_BODY: usize = 4096;
const MAX_CAPTION: usize = 1024;

impl OutboundMessage {
    pub fn text(body: impl Into<String>) -> Result<Self, OutboundError> {
        let body = body.into();
        if body.is_empty() || body.chars().count() > MAX_TEXT_BODY {
            return Err(OutboundError::Validation(format!(
                "text body must be 1-{MAX_TEXT_BODY} characters, got {}",
                body.chars().count()
            )));
        }
        Ok(Self::Text { body })
    }

    pub fn media(kind: MediaKind, link: impl Into<String>, caption: Option<String>) -> Result<Self, OutboundError> {
        let link = link.into();
        if link.is_empty() {
            return Err(OutboundError::Validation("media link must not be empty".into()));
        }
        if let Some(c) = &caption {
            if c.chars().count() > MAX_CAPTION {
                return Err(OutboundError::Validation(format!(
                    "media caption must be <= {MAX_CAPTION} characters, got {}",
                    c.chars().count()
                )));
            }
        }
        Ok(Self::Media { kind, link, caption })
    }

    pub fn media_by_id(kind: MediaKind, media_id: impl Into<String>, caption: Option<String>) -> Result<Self, OutboundError> {
        let media_id = media_id.into();
        if media_id.is_empty() {
            return Err(OutboundError::Validation("media id must not be empty".into()));
        }
        if let Some(c) = &caption {
            if c.chars().count() > MAX_CAPTION {
                return Err(OutboundError::Validation(format!(
                    "media caption must be <= {MAX_CAPTION} characters, got {}",
                    c.chars().count()
                )));
            }
        }
        Ok(Self::MediaById { kind, media_id, caption })
    }

    /// The JSON payload body for `POST {api_base}/{phone_number_id}/messages`,
    /// everything except `messaging_product`/`recipient_type`/`to`.
    fn to_wire(&self) -> Value {
        match self {
            OutboundMessage::Text { body } => json!({ "type": "text", "text": { "body": body } }),
            OutboundMessage::Media { kind, link, caption } => {
                let mut inner = json!({ "link": link });
                if let Some(caption) = caption {
                    inner["caption"] = json!(caption);
                }
                json!({ "type": kind.wire_name(), kind.wire_name(): inner })
            }
            OutboundMessage::MediaById { kind, media_id, caption } => {
                let mut inner = json!({ "id": media_id });
                if let Some(caption) = caption {
                    inner["caption"] = json!(caption);
                }
                json!({ "type": kind.wire_name(), kind.wire_name(): inner })
            }
            OutboundMessage::Template { name, language, components } => json!({
                "type": "template",
                "template": { "name": name, "language": { "code": language }, "components": components },
            }),
            OutboundMessage::Interactive(InteractiveMessage::Button { body, buttons }) => json!({
                "type": "interactive",
                "interactive": {
                    "type": "button",
                    "body": { "text": body },
                    "action": {
                        "buttons": buttons.iter().map(|(id, title)| json!({
                            "type": "reply",
                            "reply": { "id": id, "title": title },
                        })).collect::<Vec<_>>(),
                    },
                },
            }),
            OutboundMessage::Interactive(InteractiveMessage::List { body, button_text, sections }) => json!({
                "type": "interactive",
                "interactive": {
                    "type": "list",
                    "body": { "text": body },
                    "action": {
                        "button": button_text,
                        "sections": sections.iter().map(|(title, rows)| json!({
                            "title": title,
                            "rows": rows.iter().map(|(id, row_title)| json!({ "id": id, "title": row_title })).collect::<Vec<_>>(),
                        })).collect::<Vec<_>>(),
                    },
                },
            }),
            OutboundMessage::Interactive(InteractiveMessage::CtaUrl { body, display_text, url }) => json!({
                "type": "interactive",
                "interactive": {
                    "type": "cta_url",
                    "body": { "text": body },
                    "action": {
                        "name": "cta_url",
                        "parameters": { "display_text": display_text, "url": url },
                    },
                },
            }),
            OutboundMessage::Location { latitude, longitude, name, address } => {
                let mut inner = json!({ "latitude": latitude, "longitude": longitude });
                if let Some(name) = name {
                    inner["name"] = json!(name);
                }
                if let Some(address) = address {
                    inner["address"] = json!(address);
                }
                json!({ "type": "location", "location": inner })
            }
            OutboundMessage::Contact { formatted_name, phone } => json!({
                "type": "contacts",
                "contacts": [{
                    "name": { "formatted_name": formatted_name },
                    "phones": [{ "phone": phone }],
                }],
            }),
            OutboundMessage::Reaction { message_id, emoji } => json!({
                "type": "reaction",
                "reaction": { "message_id": message_id, "emoji": emoji },
            }),
        }
    }
}

/// A thin wrapper over the WhatsApp Cloud API send endpoint. Building the
/// wire payload is `OutboundMessage::to_wire`'s job; this client only owns
/// the HTTP transport and auth.
pub struct WhatsAppClient {
    client: reqwest::Client,
    token: String,
    api_base: String,
    phone_number_id: String,
}

impl WhatsAppClient {
    pub fn new(token: String, phone_number_id: String, api_base: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            api_base: api_base.unwrap_or_else(|| "https://graph.facebook.com/v20.0".to_string()),
            phone_number_id,
        }
    }

    /// Sends `message` to `recipient`, returning the provider-assigned
    /// message id (`wamid...`) on success.
    pub async fn send(&self, recipient: &Recipient, message: &OutboundMessage) -> Result<String, OutboundError> {
        if recipient.kind != RecipientKind::PhoneE164 {
            return Err(OutboundError::Validation(
                "whatsapp outbound requires a PHONE_E164 recipient".into(),
            ));
        }

        let mut payload = message.to_wire();
        payload["messaging_product"] = json!("whatsapp");
        payload["to"] = json!(recipient.identifier);

        let url = format!("{}/{}/messages", self.api_base, self.phone_number_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OutboundError::Api(format!("{status}: {body}")));
        }

        let body: Value = response.json().await?;
        let message_id = body["messages"][0]["id"].as_str().unwrap_or_default().to_string();
        Ok(message_id)
    }

    /// Uploads raw bytes (e.g. synthesised speech) to `POST /{phone_number_id}/media`,
    /// returning the media id to reference from `OutboundMessage::MediaById`.
    pub async fn upload_media(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String, OutboundError> {
        let url = format!("{}/{}/media", self.api_base, self.phone_number_id);

        let part = reqwest::multipart::Part::bytes(bytes).mime_str(mime_type)?;
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .part("file", part);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OutboundError::Api(format!("{status}: {body}")));
        }

        let body: Value = response.json().await?;
        let media_id = body["id"].as_str().unwrap_or_default().to_string();
        if media_id.is_empty() {
            return Err(OutboundError::Api("media upload response missing id".into()));
        }
        Ok(media_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_text_body() {
        assert!(OutboundMessage::text("").is_err());
    }

    #[test]
    fn rejects_oversized_text_body() {
        assert!(OutboundMessage::text("a".repeat(4097)).is_err());
    }

    #[test]
    fn accepts_text_at_the_boundary() {
        assert!(OutboundMessage::text("a".repeat(4096)).is_ok());
    }

    #[test]
    fn rejects_oversized_media_caption() {
        let caption = Some("a".repeat(1025));
        assert!(OutboundMessage::media(MediaKind::Image, "https://x/y.png", caption).is_err());
    }

    #[test]
    fn text_wire_shape() {
        let msg = OutboundMessage::text("hi").unwrap();
        let wire = msg.to_wire();
        assert_eq!(wire["type"], "text");
        assert_eq!(wire["text"]["body"], "hi");
    }
}
