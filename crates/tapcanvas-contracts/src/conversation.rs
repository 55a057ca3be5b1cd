use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            text: text.into(),
        }
    }
}

/// Ordered message history for one turn. Read-only to the engine; the caller
/// owns it and appends between turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(Message::assistant(text));
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Text of the most recent user message, or empty.
    pub fn latest_user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
            .map(|message| message.text.as_str())
            .unwrap_or("")
    }

    /// Topic context for prompts: a single message is used verbatim,
    /// otherwise the history is concatenated with role prefixes.
    pub fn research_topic(&self) -> String {
        if self.messages.len() == 1 {
            return self.messages[0].text.clone();
        }
        self.format_for_prompt()
    }

    pub fn format_for_prompt(&self) -> String {
        let mut lines = Vec::with_capacity(self.messages.len());
        for message in &self.messages {
            let prefix = match message.role {
                MessageRole::User => "User",
                MessageRole::Assistant => "Assistant",
            };
            lines.push(format!("{}: {}", prefix, message.text));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_user_text_skips_assistant_messages() {
        let mut conversation = Conversation::default();
        conversation.push_user("画一只狐狸");
        conversation.push_assistant("已创建节点。");
        assert_eq!(conversation.latest_user_text(), "画一只狐狸");

        conversation.push_user("再来一只兔子");
        assert_eq!(conversation.latest_user_text(), "再来一只兔子");
    }

    #[test]
    fn latest_user_text_empty_when_no_user_message() {
        let conversation = Conversation::new(vec![Message::assistant("hi")]);
        assert_eq!(conversation.latest_user_text(), "");
    }

    #[test]
    fn research_topic_single_message_is_verbatim() {
        let conversation = Conversation::new(vec![Message::user("做一个15s视频")]);
        assert_eq!(conversation.research_topic(), "做一个15s视频");
    }

    #[test]
    fn research_topic_multi_message_uses_role_prefixes() {
        let mut conversation = Conversation::default();
        conversation.push_user("a");
        conversation.push_assistant("b");
        assert_eq!(conversation.research_topic(), "User: a\nAssistant: b");
    }
}
