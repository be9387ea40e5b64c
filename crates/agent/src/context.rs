use wabridge_core::types::{ChatMessage, Role};
use std::path::PathBuf;

/// Maximum number of conversation history messages to include in context.
/// This prevents exceeding LLM token limits as conversations grow.
const MAX_HISTORY_MESSAGES: usize = 20;

/// Assembles the message list sent to the LLM provider for one batch: a
/// system prompt built from workspace context files, an optional running
/// summary, a sliding window of prior history, and the current batch text.
pub struct ContextBuilder {
    workspace: PathBuf,
}

impl ContextBuilder {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }

    pub fn build(
        &self,
        history: &[ChatMessage],
        summary: Option<&str>,
        current_message: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::new();

        let system_prompt = self.build_system_prompt();
        messages.push(ChatMessage::new("whatsapp", "global", Role::System, &system_prompt));

        if let Some(s) = summary {
            messages.push(ChatMessage::new(
                "whatsapp",
                "global",
                Role::System,
                &format!("Previous conversation summary: {}", s),
            ));
        }

        let history_window = if history.len() > MAX_HISTORY_MESSAGES {
            messages.push(ChatMessage::new(
                "whatsapp",
                "global",
                Role::System,
                &format!(
                    "[{} older messages omitted — see summary above for context]",
                    history.len() - MAX_HISTORY_MESSAGES
                ),
            ));
            &history[history.len() - MAX_HISTORY_MESSAGES..]
        } else {
            history
        };
        messages.extend_from_slice(history_window);

        messages.push(ChatMessage::new("whatsapp", "current", Role::User, current_message));

        messages
    }

    fn build_system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You are a WhatsApp assistant. Replies are delivered as WhatsApp \
             messages, so keep them short and conversational. Answer the \
             user's request accurately and concisely.\n",
        );

        let context_files = ["AGENTS.md", "SOUL.md", "USER.md", "IDENTITY.md"];
        for filename in &context_files {
            let path = self.workspace.join(filename);
            if let Ok(content) = std::fs::read_to_string(&path) {
                prompt.push_str(&format!("\n--- {} ---\n{}\n", filename, content));
            }
        }

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_system_summary_and_current_message() {
        let builder = ContextBuilder::new(PathBuf::from("/nonexistent"));
        let history = vec![ChatMessage::new("whatsapp", "s", Role::User, "hi")];
        let messages = builder.build(&history, Some("we talked about pizza"), "what now?");

        assert_eq!(messages[0].role, Role::System);
        assert!(messages[1].content.contains("pizza"));
        assert_eq!(messages.last().unwrap().content, "what now?");
        assert_eq!(messages.last().unwrap().role, Role::User);
    }

    #[test]
    fn trims_history_beyond_the_window() {
        let builder = ContextBuilder::new(PathBuf::from("/nonexistent"));
        let history: Vec<ChatMessage> = (0..30)
            .map(|i| ChatMessage::new("whatsapp", "s", Role::User, &format!("msg {i}")))
            .collect();
        let messages = builder.build(&history, None, "latest");
        // system prompt + trim-notice + 20 history + current
        assert_eq!(messages.len(), 1 + 1 + MAX_HISTORY_MESSAGES + 1);
    }
}
