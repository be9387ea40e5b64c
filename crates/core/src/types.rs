use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A single turn in an LLM conversation (the agent's working memory). Not to
/// be confused with `wabridge_pipeline::Message`, the ingested-but-not-yet-
/// batched WhatsApp message the core pipeline moves through its stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub channel: String,
    pub session_key: String,
    /// ID of the sender (e.g. user ID, tool name, or "system")
    #[serde(default)]
    pub sender_id: String,
    pub content: String,
    pub role: Role,
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub metadata: HashMap<String, String>,
}

fn default_timestamp() -> DateTime<Utc> {
    Utc::now()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub kind: AttachmentKind,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
    Audio,
    Video,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl ChatMessage {
    pub fn new(channel: &str, session_key: &str, role: Role, content: &str) -> Self {
        let sender_id = match role {
            Role::System => "system".to_string(),
            Role::Assistant => "assistant".to_string(),
            Role::Tool => "tool".to_string(),
            Role::User => "user".to_string(),
        };

        Self {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            session_key: session_key.to_string(),
            sender_id,
            content: content.to_string(),
            role,
            created_at: Utc::now(),
            reply_to: None,
            attachments: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_sender(mut self, sender_id: &str) -> Self {
        self.sender_id = sender_id.to_string();
        self
    }

    pub fn reply_to(mut self, msg_id: Uuid) -> Self {
        self.reply_to = Some(msg_id);
        self
    }

    pub fn add_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}
