//! Session State and Display Snapshots
//!
//! [`SessionState`] is what a polling surface needs to draw the in-flight
//! turn. [`DisplaySnapshot`] pairs it with the visible transcript, captured
//! under the same lock so the two never disagree.

use serde::{Deserialize, Serialize};

use crate::messages::ControllerState;
use crate::transcript::Message;

/// Status of the current (or most recent) turn
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Whether a turn is in flight
    pub is_generating: bool,
    /// Prompt of the current or most recent turn
    pub current_prompt: String,
    /// Fragments received so far, or the final text once completed
    pub current_response: String,
    /// Why the most recent turn failed, if it did
    pub last_error: Option<String>,
}

impl SessionState {
    /// Reset for a new turn
    pub(crate) fn begin_turn(&mut self, prompt: &str) {
        self.is_generating = true;
        self.current_prompt = prompt.to_string();
        self.current_response.clear();
        self.last_error = None;
    }

    /// Controller state derived from the flag
    #[must_use]
    pub fn status(&self) -> ControllerState {
        if self.is_generating {
            ControllerState::Generating
        } else {
            ControllerState::Idle
        }
    }
}

/// Consistent view for a polling client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplaySnapshot {
    /// Whether a turn is in flight
    pub is_generating: bool,
    /// Prompt of the current or most recent turn
    pub current_prompt: String,
    /// Partial or final response text
    pub current_response: String,
    /// Transcript without the system message
    pub messages: Vec<Message>,
    /// Why the most recent turn failed, if it did
    pub last_error: Option<String>,
}

impl DisplaySnapshot {
    pub(crate) fn capture(state: &SessionState, messages: Vec<Message>) -> Self {
        Self {
            is_generating: state.is_generating,
            current_prompt: state.current_prompt.clone(),
            current_response: state.current_response.clone(),
            messages,
            last_error: state.last_error.clone(),
        }
    }

    /// Controller state at capture time
    #[must_use]
    pub fn state(&self) -> ControllerState {
        if self.is_generating {
            ControllerState::Generating
        } else {
            ControllerState::Idle
        }
    }
}
