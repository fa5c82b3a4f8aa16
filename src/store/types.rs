use crate::error::PersonaChatError;
use crate::persona::PersonaId;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a chat, unique and monotonically assigned by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub u64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChatId {
    type Err = PersonaChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(ChatId)
            .map_err(|_| PersonaChatError::InvalidInput(format!("not a chat id: {}", s)))
    }
}

/// Identifier of a message, unique within its chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The local user
    User,
    /// The persona-driven assistant
    Assistant,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry of a chat transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Store-assigned id, unique within the chat
    pub id: MessageId,
    /// Who wrote the message
    pub sender: Sender,
    /// Message text; grows while `streaming` is true
    pub text: String,
    /// When the message was appended
    pub created_at: DateTime<Utc>,
    /// True while the assistant has not produced any content yet
    #[serde(default)]
    pub streaming: bool,
}

/// A message that has not been appended yet
///
/// Constructors enforce the fields each kind of message needs; the store
/// assigns the id and timestamp on append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub(crate) sender: Sender,
    pub(crate) text: String,
    pub(crate) streaming: bool,
}

impl NewMessage {
    /// A user message. The text is trimmed and must not be empty.
    ///
    /// # Errors
    ///
    /// Returns `PersonaChatError::InvalidInput` for blank text.
    ///
    /// # Examples
    ///
    /// ```
    /// use personachat::store::NewMessage;
    ///
    /// assert!(NewMessage::user("  hi  ").is_ok());
    /// assert!(NewMessage::user("   ").is_err());
    /// ```
    pub fn user(text: impl AsRef<str>) -> Result<Self, PersonaChatError> {
        let trimmed = text.as_ref().trim();
        if trimmed.is_empty() {
            return Err(PersonaChatError::InvalidInput(
                "user message cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            sender: Sender::User,
            text: trimmed.to_string(),
            streaming: false,
        })
    }

    /// An empty assistant message that is still waiting for content
    pub fn assistant_placeholder() -> Self {
        Self {
            sender: Sender::Assistant,
            text: String::new(),
            streaming: true,
        }
    }

    /// A complete assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Assistant,
            text: text.into(),
            streaming: false,
        }
    }

    /// Sender of the pending message
    pub fn sender(&self) -> Sender {
        self.sender
    }

    /// Whether the message will be appended in the streaming state
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }
}

/// One conversation thread owned by a persona
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    /// Unique chat id
    pub id: ChatId,
    /// Persona the chat belongs to
    pub persona_id: PersonaId,
    /// Display title
    pub title: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Transcript in insertion order
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Chat {
    pub(crate) fn new(id: ChatId, persona_id: PersonaId, created_at: DateTime<Utc>) -> Self {
        let title = format!(
            "Chat {}",
            created_at.with_timezone(&Local).format("%H:%M:%S")
        );
        Self {
            id,
            persona_id,
            title,
            created_at,
            messages: Vec::new(),
        }
    }

    /// Finds a message by id
    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// The message currently marked as streaming, if any
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.streaming)
    }

    /// Number of messages that are marked as streaming
    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.streaming).count()
    }

    /// The most recent message
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub(crate) fn next_message_id(&self) -> MessageId {
        MessageId(self.messages.last().map(|m| m.id.0 + 1).unwrap_or(1))
    }
}
