// Conversation and SFT message types

use serde::{Deserialize, Serialize};

/// Speaker label carried by corpus and history messages.
///
/// Unrecognized labels deserialize to `Unknown` instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Patient,
    Doctor,
    User,
    Assistant,
    #[serde(other)]
    Unknown,
}

/// The two-sided schema chat templates understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

impl Role {
    /// Parse a free-form label (case-insensitive).
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "system" => Role::System,
            "patient" => Role::Patient,
            "doctor" => Role::Doctor,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => Role::Unknown,
        }
    }

    /// Map onto the chat schema. Unknown speakers land on the user side.
    pub fn chat_role(&self) -> ChatRole {
        match self {
            Role::System => ChatRole::System,
            Role::Patient | Role::User => ChatRole::User,
            Role::Doctor | Role::Assistant => ChatRole::Assistant,
            Role::Unknown => {
                tracing::warn!("Unrecognized message role mapped to user");
                ChatRole::User
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn patient(content: impl Into<String>) -> Self {
        Self::new(Role::Patient, content)
    }

    pub fn doctor(content: impl Into<String>) -> Self {
        Self::new(Role::Doctor, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// One (patient, doctor) row of a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationTurn {
    pub patient: Option<String>,
    pub doctor: Option<String>,
}

impl ConversationTurn {
    /// Build from raw cells; blank cells become `None`.
    pub fn new(patient: &str, doctor: &str) -> Self {
        fn non_empty(s: &str) -> Option<String> {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }

        Self {
            patient: non_empty(patient),
            doctor: non_empty(doctor),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patient.is_none() && self.doctor.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub turns: Vec<ConversationTurn>,
}

/// A training record: system message, trailing context, assistant target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SftExample {
    pub messages: Vec<Message>,
}

impl SftExample {
    /// Everything before the target.
    pub fn prompt_messages(&self) -> &[Message] {
        match self.messages.split_last() {
            Some((_, prompt)) => prompt,
            None => &[],
        }
    }

    /// The assistant target, if the record is well formed.
    pub fn target(&self) -> Option<&Message> {
        self.messages
            .last()
            .filter(|m| m.role.chat_role() == ChatRole::Assistant)
    }
}
