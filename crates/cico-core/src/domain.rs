use std::fmt;

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a sent message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Where outbound reports go: a user's own chat or a configured dump channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    Chat(ChatId),
    /// Public channel username, stored with its leading `@`.
    Channel(String),
}

impl Destination {
    /// Parse a `/dump` argument: a numeric chat id (`-1001234567890`) or `@channel`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(id) = raw.parse::<i64>() {
            return Some(Self::Chat(ChatId(id)));
        }
        let name = raw.strip_prefix('@').unwrap_or(raw);
        let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        valid.then(|| Self::Channel(format!("@{name}")))
    }
}

impl From<ChatId> for Destination {
    fn from(chat_id: ChatId) -> Self {
        Self::Chat(chat_id)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat(id) => write!(f, "{}", id.0),
            Self::Channel(name) => f.write_str(name),
        }
    }
}
