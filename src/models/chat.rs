use chrono::Utc;
use serde::Serialize;

use super::image::ImageAttachment;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached_image: Option<ImageAttachment>,
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, attached_image: Option<ImageAttachment>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            attached_image,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            attached_image: None,
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Append-only record of a session's exchanges, in display order.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChatMessage> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// One unit of input for the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Prompt {
    Text(String),
    Image {
        image: ImageAttachment,
        text: String,
    },
}

impl Prompt {
    pub fn text(&self) -> &str {
        match self {
            Prompt::Text(text) => text,
            Prompt::Image { text, .. } => text,
        }
    }

    pub fn image(&self) -> Option<&ImageAttachment> {
        match self {
            Prompt::Text(_) => None,
            Prompt::Image { image, .. } => Some(image),
        }
    }
}
