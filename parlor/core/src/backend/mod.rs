//! Inference Backend Integration
//!
//! Abstracted access to whatever produces the text, through a common trait.
//!
//! # Available Backends
//!
//! - **Ollama**: Local LLM server (default)
//! - **Dev**: Waits and echoes the prompt; for working on surfaces without a model
//!
//! # Usage
//!
//! ```ignore
//! use parlor_core::backend::{build_backend, BackendConfig};
//!
//! let backend = build_backend(&BackendConfig::dev())?;
//! ```

mod dev;
mod ollama;
mod traits;

pub use dev::{DevBackend, DEV_MODEL_NAME};
pub use ollama::OllamaBackend;
pub use traits::{
    BackendConfig, GenerationOptions, InferenceBackend, InferenceRequest, InferenceResponse,
    StreamingToken,
};

use crate::error::BackendError;

/// Construct the backend described by `config`
pub fn build_backend(config: &BackendConfig) -> Result<Box<dyn InferenceBackend>, BackendError> {
    match config {
        BackendConfig::Ollama { host, port } => {
            Ok(Box::new(OllamaBackend::new(host.clone(), *port)?))
        }
        BackendConfig::Dev { ticks, tick } => Ok(Box::new(DevBackend::new(*ticks, *tick))),
    }
}
