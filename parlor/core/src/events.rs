//! Turn Events
//!
//! Pushed to subscribers as a turn progresses, so a surface can render
//! fragments as they arrive instead of polling. Events are advisory: a slow
//! subscriber may lag and miss some, and the display snapshot stays the
//! source of truth.

use serde::{Deserialize, Serialize};

use crate::error::GenerateError;

/// Something that happened to the current turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A turn was accepted and the backend is being invoked
    Started {
        /// The trimmed prompt
        prompt: String,
    },
    /// A piece of generated text
    Fragment {
        /// The fragment text
        text: String,
    },
    /// The assistant reply was committed to the transcript
    Completed {
        /// The full reply
        response: String,
    },
    /// The turn was stopped and rolled back
    Cancelled {
        /// Text received before the stop
        partial: String,
    },
    /// The turn failed and was rolled back
    Failed {
        /// Error description
        error: String,
    },
    /// The transcript was cleared
    Reset,
}

/// How a turn ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Reply committed
    Completed {
        /// The full reply
        response: String,
    },
    /// Stopped before completion; nothing committed
    Cancelled {
        /// Text received before the stop
        partial: String,
    },
    /// Backend failure; nothing committed
    Failed(GenerateError),
}

impl TurnOutcome {
    /// Whether the reply was committed
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

impl From<&TurnOutcome> for TurnEvent {
    fn from(outcome: &TurnOutcome) -> Self {
        match outcome {
            TurnOutcome::Completed { response } => Self::Completed {
                response: response.clone(),
            },
            TurnOutcome::Cancelled { partial } => Self::Cancelled {
                partial: partial.clone(),
            },
            TurnOutcome::Failed(error) => Self::Failed {
                error: error.to_string(),
            },
        }
    }
}
