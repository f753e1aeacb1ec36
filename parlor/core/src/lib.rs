//! Parlor Core - Generation Session Controller
//!
//! The part of a single-user chat front end that sits between the surface
//! (REPL, web layer, tests) and the language model. It owns the conversation,
//! runs at most one generation at a time in the background, lets the user stop
//! it at any point, and hands out consistent snapshots for display.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Surfaces                             │
//! │     ┌─────────┐        ┌─────────┐        ┌──────────────┐   │
//! │     │  REPL   │        │   Web   │        │    Tests     │   │
//! │     └────┬────┘        └────┬────┘        └──────┬───────┘   │
//! │          └──────────────────┴────────────────────┘           │
//! │       generate / stop / reset (down)   snapshot, TurnEvent (up)
//! └──────────────────────────────┼───────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┼───────────────────────────────┐
//! │                      PARLOR CORE                             │
//! │  ┌───────────────────────────┴────────────────────────────┐  │
//! │  │                 GenerationController                   │  │
//! │  │  ┌────────────┐  ┌──────────────┐  ┌────────────────┐  │  │
//! │  │  │ Transcript │  │ SessionState │  │   StopSignal   │  │  │
//! │  │  └────────────┘  └──────────────┘  └────────────────┘  │  │
//! │  └───────────────────────────┬────────────────────────────┘  │
//! │                              │  worker task                  │
//! │  ┌───────────────────────────┴────────────────────────────┐  │
//! │  │        InferenceBackend (Ollama, Dev, your own)        │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`GenerationController`]: Drives turns for one conversation
//! - [`Transcript`]: Ordered, role-tagged history
//! - [`StopSignal`]: Cooperative cancellation shared with the backend
//! - [`DisplaySnapshot`]: Consistent view for a polling surface
//! - [`TurnEvent`]: Push notifications as a turn progresses
//! - [`InferenceBackend`]: What produces the text
//!
//! # Quick Start
//!
//! ```ignore
//! use parlor_core::{
//!     backend::{build_backend, BackendConfig},
//!     ControllerConfig, GenerationController,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = build_backend(&BackendConfig::dev()).unwrap();
//!     let controller = GenerationController::new(backend, ControllerConfig::default());
//!
//!     let outcome = controller.generate_and_wait("What is an apple tree?").await.unwrap();
//!     println!("{outcome:?}");
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Inference backend abstraction (Ollama, dev)
//! - [`config`]: TOML + environment configuration
//! - [`controller`]: The generation state machine
//! - [`error`]: Error types
//! - [`events`]: Turn events and outcomes
//! - [`messages`]: Message ids, roles, controller states
//! - [`state`]: Session state and display snapshots
//! - [`stop_signal`]: Cooperative cancellation flag
//! - [`transcript`]: Conversation history

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod messages;
pub mod state;
pub mod stop_signal;
pub mod transcript;

// Re-exports for convenience
pub use backend::{
    build_backend, BackendConfig, DevBackend, GenerationOptions, InferenceBackend,
    InferenceRequest, InferenceResponse, OllamaBackend, StreamingToken,
};
pub use config::{
    default_config_path, load_config, load_config_from_path, BackendKind, ConfigError,
    ConfigOverrides, ConfigSource, ParlorConfig,
};
pub use controller::{ControllerConfig, GenerationController, GenerationMode};
pub use error::{BackendError, GenerateError};
pub use events::{TurnEvent, TurnOutcome};
pub use messages::{ControllerState, MessageId, MessageRole};
pub use state::{DisplaySnapshot, SessionState};
pub use stop_signal::StopSignal;
pub use transcript::{ChatTurn, Message, Transcript};
