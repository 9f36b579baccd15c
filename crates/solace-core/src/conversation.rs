//! Conversation payload passed to LLM providers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::DomainError;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message for LLM completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Structured payload for one generation: the dialogue so far plus an
/// optional system instruction.
///
/// Providers decide how to place the system instruction (Gemini has a
/// dedicated field, OpenAI takes a leading system message).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<ChatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
}

impl Conversation {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            system_instruction: None,
        }
    }

    /// Single user turn.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::user(prompt)])
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// True when no message carries any non-whitespace text.
    pub fn is_blank(&self) -> bool {
        self.messages.iter().all(|m| m.content.trim().is_empty())
    }

    /// Reject payloads that would only waste an upstream call.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.is_blank() {
            return Err(DomainError::EmptyConversation);
        }
        Ok(())
    }

    /// `role: content` lines, the flattened form used for summaries.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Total characters across all messages and the system instruction.
    pub fn char_len(&self) -> usize {
        let body: usize = self.messages.iter().map(|m| m.content.chars().count()).sum();
        body + self
            .system_instruction
            .as_deref()
            .map(|s| s.chars().count())
            .unwrap_or(0)
    }
}
