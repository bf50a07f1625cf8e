use serde::{Deserialize, Serialize};

/// A payload sent by a client, tagged by its `type` field.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum InboundEvent {
    #[serde(rename = "login")]
    Login {
        username: String,
    },
    #[serde(rename = "chat_message")]
    ChatMessage {
        #[serde(rename = "message")]
        text: String,
    },
}

/// An event pushed to clients. The wire shapes are fixed by existing clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "announcement")]
    Announcement {
        #[serde(rename = "message")]
        text: String,
    },
    #[serde(rename = "chat_message")]
    ChatMessage {
        sender: String,
        #[serde(rename = "message")]
        text: String,
    },
    #[serde(rename = "user_list")]
    UserList {
        #[serde(rename = "users")]
        names: Vec<String>,
    },
    /// Only ever sent to the connection whose payload was rejected.
    #[serde(rename = "error")]
    Error {
        #[serde(rename = "message")]
        text: String,
    },
}

impl OutboundEvent {
    pub fn joined(name: &str) -> Self {
        OutboundEvent::Announcement {
            text: format!("{name} joined"),
        }
    }

    pub fn left(name: &str) -> Self {
        OutboundEvent::Announcement {
            text: format!("{name} left"),
        }
    }

    pub fn chat(sender: impl Into<String>, text: impl Into<String>) -> Self {
        OutboundEvent::ChatMessage {
            sender: sender.into(),
            text: text.into(),
        }
    }

    pub fn user_list(names: Vec<String>) -> Self {
        OutboundEvent::UserList { names }
    }

    pub fn error(text: impl Into<String>) -> Self {
        OutboundEvent::Error { text: text.into() }
    }
}
