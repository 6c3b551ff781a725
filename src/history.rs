use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TITLE: &str = "New Chat";
pub const UNTITLED_SOURCE: &str = "Untitled Source";
const TITLE_WORDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    pub alt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub uri: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<GeneratedImage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_loading: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ChatMessage {
    pub fn user(id: String, text: impl Into<String>) -> Self {
        ChatMessage {
            id,
            role: Role::User,
            text: text.into(),
            images: None,
            sources: None,
            is_loading: false,
            is_error: false,
        }
    }

    pub fn model(id: String, text: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Model,
            ..ChatMessage::user(id, text)
        }
    }

    pub fn placeholder(id: String) -> Self {
        ChatMessage {
            is_loading: true,
            ..ChatMessage::model(id, "...")
        }
    }

    pub fn error(id: String, description: &str) -> Self {
        ChatMessage {
            is_error: true,
            ..ChatMessage::model(id, format!("Error: {}", description))
        }
    }

    /// Whether the message can be replayed into a fresh conversation context.
    pub fn is_replayable(&self) -> bool {
        !self.is_loading && !self.is_error
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub title: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub metadata: SessionMetadata,
    pub messages: Vec<ChatMessage>,
}

impl Session {
    pub fn new(title: impl Into<String>, created_at: i64) -> Self {
        Session {
            metadata: SessionMetadata {
                title: title.into(),
                created_at,
            },
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct History {
    pub active_chat_id: Option<String>,
    pub sessions: BTreeMap<String, Session>,
}

impl History {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.active_chat_id
            .as_ref()
            .and_then(|id| self.sessions.get(id))
    }

    pub fn active_session_mut(&mut self) -> Option<&mut Session> {
        match self.active_chat_id.as_ref() {
            Some(id) => self.sessions.get_mut(id),
            None => None,
        }
    }

    /// The most recently created session, if any.
    pub fn newest_session_id(&self) -> Option<String> {
        self.sessions
            .iter()
            .max_by_key(|(_, session)| session.metadata.created_at)
            .map(|(id, _)| id.clone())
    }
}

/// One prior exchange handed to a conversation context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Rebuilds the prior turns of a conversation from its stored log.
pub fn replay_turns(messages: &[ChatMessage]) -> Vec<Turn> {
    messages
        .iter()
        .filter(|m| m.is_replayable())
        .map(|m| Turn {
            role: m.role,
            text: m.text.clone(),
        })
        .collect()
}

/// Session title from the first words of a prompt.
pub fn derive_title(prompt: &str) -> String {
    let title = prompt
        .split_whitespace()
        .take(TITLE_WORDS)
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        title
    }
}
