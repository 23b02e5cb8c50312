use serde::{Deserialize, Serialize};
use std::fmt;

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation
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

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Ordered message history that produced a program
///
/// A conversation is treated as a value: extending it returns a new
/// conversation and leaves the original untouched, so a program's stored
/// history never changes after the program is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Build the conversation for a fresh tree root.
    ///
    /// The environment's observation of the initial state is presented as if
    /// the assistant had run `probe` and the user had replied with `output`.
    pub fn root(system_prompt: &str, probe: &str, output: &str) -> Self {
        Self::new(vec![
            Message::system(system_prompt),
            Message::assistant(probe),
            Message::user(output),
        ])
    }

    /// Return a copy extended by one assistant turn and the environment's reply.
    #[must_use]
    pub fn with_turn(&self, code: &str, output: &str) -> Self {
        let mut messages = self.messages.clone();
        messages.push(Message::assistant(code));
        messages.push(Message::user(output));
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }
}
