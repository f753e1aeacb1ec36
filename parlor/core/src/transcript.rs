//! Conversation Transcript
//!
//! Ordered, role-tagged conversation history owned by one controller.
//!
//! # Shape
//!
//! The transcript starts with zero or one `system` message. After that, user
//! and assistant entries alternate: a user entry is only ever followed by the
//! assistant reply for the same turn. A turn that is cancelled or fails is
//! unwound with [`Transcript::pop_last_if_role`], so no unanswered prompt is
//! left behind.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::messages::{MessageId, MessageRole};

/// Display format for message timestamps
pub const DATE_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// A message in the conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Message content (trimmed)
    pub content: String,
    /// When the message was created
    pub timestamp: DateTime<Local>,
}

impl Message {
    /// Create a new message stamped with the current wall-clock time
    pub fn new(role: MessageRole, content: impl AsRef<str>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.as_ref().trim().to_string(),
            timestamp: Local::now(),
        }
    }

    /// Timestamp formatted for display
    #[must_use]
    pub fn date(&self) -> String {
        self.timestamp.format(DATE_FORMAT).to_string()
    }
}

/// A message as handed to the inference backend (no id, no timestamp)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Who said it
    pub role: MessageRole,
    /// What was said
    pub content: String,
}

impl ChatTurn {
    /// Create a rendered turn
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Ordered conversation history
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    /// Maximum complete turns to keep (0 = unlimited)
    max_turns: usize,
}

impl Transcript {
    /// Create a transcript, seeded with a system prompt if one is given
    #[must_use]
    pub fn new(system_prompt: Option<&str>) -> Self {
        let mut transcript = Self::default();
        transcript.reset(system_prompt);
        transcript
    }

    /// Keep at most `max_turns` complete turns (0 = unlimited)
    #[must_use]
    pub fn with_limit(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Append a message and return its ID
    pub fn append(&mut self, role: MessageRole, content: impl AsRef<str>) -> MessageId {
        let msg = Message::new(role, content);
        let id = msg.id.clone();
        self.messages.push(msg);
        id
    }

    /// Owned copy of the history, optionally without the system message
    #[must_use]
    pub fn snapshot(&self, exclude_system: bool) -> Vec<Message> {
        let start = if exclude_system && self.has_system_prompt() {
            1
        } else {
            0
        };
        self.messages[start..].to_vec()
    }

    /// Remove the final entry iff it has the given role
    pub fn pop_last_if_role(&mut self, role: MessageRole) -> Option<Message> {
        if self.messages.last().is_some_and(|m| m.role == role) {
            self.messages.pop()
        } else {
            None
        }
    }

    /// Replace the history with just the system message (or nothing)
    pub fn reset(&mut self, system_prompt: Option<&str>) {
        self.messages.clear();
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            self.messages.push(Message::new(MessageRole::System, prompt));
        }
    }

    /// The history as chat-template input for a backend
    #[must_use]
    pub fn render(&self) -> Vec<ChatTurn> {
        self.messages
            .iter()
            .map(|m| ChatTurn::new(m.role, m.content.clone()))
            .collect()
    }

    /// Most recent entry
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of entries, system message included
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the transcript holds no entries at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the first entry is a system message
    #[must_use]
    pub fn has_system_prompt(&self) -> bool {
        self.messages
            .first()
            .is_some_and(|m| m.role == MessageRole::System)
    }

    /// Number of answered turns
    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .count()
    }

    /// Configured turn limit (0 = unlimited)
    #[must_use]
    pub fn limit(&self) -> usize {
        self.max_turns
    }

    /// Drop the oldest complete turns until within the limit
    ///
    /// The system message is never removed. Returns the number of entries
    /// dropped.
    pub fn prune_if_needed(&mut self) -> usize {
        if self.max_turns == 0 {
            return 0;
        }

        let first = usize::from(self.has_system_prompt());
        let mut removed = 0;

        while self.turn_count() > self.max_turns {
            let Some(end) = self.messages[first..]
                .iter()
                .position(|m| m.role == MessageRole::Assistant)
            else {
                break;
            };
            removed += self.messages.drain(first..=first + end).count();
        }

        if removed > 0 {
            tracing::debug!(
                removed = removed,
                remaining = self.messages.len(),
                "Pruned oldest transcript turns"
            );
        }

        removed
    }
}
