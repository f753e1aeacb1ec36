//! Message Primitives
//!
//! Identifiers, roles and controller states shared by the transcript, the
//! controller and whatever surface renders them (REPL, web layer, tests).

use serde::{Deserialize, Serialize};

/// Message identifier
///
/// Process-unique. The controller uses it to make sure a rollback only ever
/// removes the user entry that belongs to the turn being unwound.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("msg_{id}"))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sent a message
///
/// Serialized lowercase, which is also what chat-template backends expect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt (at most one, always first)
    System,
    /// User input
    User,
    /// Model output
    Assistant,
}

impl MessageRole {
    /// Wire name of the role
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller operational states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    /// No turn in flight; `generate` is accepted
    Idle,
    /// A turn is running on the background task
    Generating,
}

impl ControllerState {
    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Idle => "Ready",
            Self::Generating => "Generating...",
        }
    }
}
