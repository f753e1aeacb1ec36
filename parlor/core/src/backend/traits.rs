//! Inference Backend Traits
//!
//! The controller treats inference as an opaque, possibly long-running
//! operation. A backend receives the rendered transcript and either returns
//! one completed string or pushes fragments into a channel as they are
//! produced. Either way it is handed the session's [`StopSignal`] and is
//! expected to stop at its next checkpoint once the signal is set.
//!
//! Backends must not spawn work that outlives the call: the controller joins
//! the task that awaits `infer`/`infer_streaming`, and relies on that join to
//! mean the backend has fully stopped.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BackendError;
use crate::messages::MessageRole;
use crate::stop_signal::StopSignal;
use crate::transcript::ChatTurn;

/// Fragment stream events from a streaming backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// One piece of generated text
    Token(String),
    /// Production finished normally
    Complete {
        /// The complete message as the backend saw it
        message: String,
    },
}

/// Sampling parameters for one generation
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationOptions {
    /// Maximum new tokens to produce
    pub max_new_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Top-k cutoff
    pub top_k: u32,
    /// Nucleus sampling cutoff
    pub top_p: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.9,
            top_k: 50,
            top_p: 1.0,
        }
    }
}

/// One inference request: the full rendered conversation
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceRequest {
    /// Model to use (backend-specific identifier)
    pub model: String,
    /// System prompt, prior turns and the new user message, in order
    pub messages: Vec<ChatTurn>,
    /// Sampling parameters
    pub options: GenerationOptions,
}

impl InferenceRequest {
    /// Create a request with default sampling options
    pub fn new(model: impl Into<String>, messages: Vec<ChatTurn>) -> Self {
        Self {
            model: model.into(),
            messages,
            options: GenerationOptions::default(),
        }
    }

    /// Set sampling options
    #[must_use]
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set max new tokens
    #[must_use]
    pub fn with_max_new_tokens(mut self, max_new_tokens: u32) -> Self {
        self.options.max_new_tokens = max_new_tokens;
        self
    }

    /// Content of the most recent user message
    #[must_use]
    pub fn last_user_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }
}

/// Result of a blocking-complete inference
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InferenceResponse {
    /// The response text (empty if halted before producing anything)
    pub content: String,
    /// Model that generated the response
    pub model: String,
    /// Tokens produced (if reported)
    pub tokens_used: Option<u32>,
    /// Generation time in milliseconds
    pub duration_ms: Option<u64>,
}

/// Inference backend trait
///
/// Implement this to plug a model server or a local engine into the
/// controller.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Backend name (e.g. "Ollama")
    fn name(&self) -> &str;

    /// Whether the backend is reachable
    async fn health_check(&self) -> bool;

    /// Fail fast before a turn starts if the backend cannot serve it
    async fn ensure_ready(&self) -> Result<(), BackendError> {
        if self.health_check().await {
            Ok(())
        } else {
            Err(BackendError::Unavailable(format!(
                "{} is not reachable",
                self.name()
            )))
        }
    }

    /// Generate the complete response
    ///
    /// Returns early, with whatever was produced so far, once `stop` is set.
    async fn infer(
        &self,
        request: &InferenceRequest,
        stop: &StopSignal,
    ) -> Result<InferenceResponse, BackendError>;

    /// Generate the response as a sequence of fragments
    ///
    /// Fragments are sent on `tx` in order. Returns when production is
    /// finished, when `stop` is set, or when the receiver is dropped. The
    /// default implementation forwards the result of [`infer`](Self::infer)
    /// as a single fragment.
    async fn infer_streaming(
        &self,
        request: &InferenceRequest,
        stop: &StopSignal,
        tx: mpsc::Sender<StreamingToken>,
    ) -> Result<(), BackendError> {
        let response = self.infer(request, stop).await?;
        if stop.is_signaled() {
            return Ok(());
        }
        if !response.content.is_empty()
            && tx
                .send(StreamingToken::Token(response.content.clone()))
                .await
                .is_err()
        {
            // Receiver dropped, the consumer has stopped
            return Ok(());
        }
        let _ = tx
            .send(StreamingToken::Complete {
                message: response.content,
            })
            .await;
        Ok(())
    }
}

#[async_trait]
impl InferenceBackend for Box<dyn InferenceBackend> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn health_check(&self) -> bool {
        (**self).health_check().await
    }

    async fn ensure_ready(&self) -> Result<(), BackendError> {
        (**self).ensure_ready().await
    }

    async fn infer(
        &self,
        request: &InferenceRequest,
        stop: &StopSignal,
    ) -> Result<InferenceResponse, BackendError> {
        (**self).infer(request, stop).await
    }

    async fn infer_streaming(
        &self,
        request: &InferenceRequest,
        stop: &StopSignal,
        tx: mpsc::Sender<StreamingToken>,
    ) -> Result<(), BackendError> {
        (**self).infer_streaming(request, stop, tx).await
    }
}

/// Backend connection configuration
#[derive(Clone, Debug, PartialEq)]
pub enum BackendConfig {
    /// Local Ollama server
    Ollama {
        /// Ollama host address
        host: String,
        /// Ollama port number
        port: u16,
    },
    /// Developer backend: waits, then echoes the prompt
    Dev {
        /// Number of ticks before answering
        ticks: u32,
        /// Length of one tick
        tick: Duration,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Ollama {
            host: "localhost".to_string(),
            port: 11434,
        }
    }
}

impl BackendConfig {
    /// Create Ollama configuration
    pub fn ollama(host: impl Into<String>, port: u16) -> Self {
        Self::Ollama {
            host: host.into(),
            port,
        }
    }

    /// Developer backend with the stock 7 x 1 second wait
    #[must_use]
    pub fn dev() -> Self {
        Self::Dev {
            ticks: 7,
            tick: Duration::from_secs(1),
        }
    }

    /// Short name for logs and the REPL banner
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ollama { .. } => "ollama",
            Self::Dev { .. } => "dev",
        }
    }
}
