use serde::{ Serialize, Deserialize };

pub const USER_ROLE: &str = "user";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: role.into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(USER_ROLE, content)
    }

    pub fn is_user(&self) -> bool {
        self.role == USER_ROLE
    }
}

fn default_stream() -> bool {
    true
}

/// Inbound body of `POST /api/conversation`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

/// Outbound body for the agent's responses endpoint.
#[derive(Debug, Serialize)]
pub struct ResponsesRequest<'a> {
    pub input: &'a str,
    pub stream: bool,
}

/// Content of the most recent user message. Earlier turns are not forwarded.
pub fn last_user_message(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.is_user())
        .map(|m| m.content.as_str())
}
