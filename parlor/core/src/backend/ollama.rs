//! Ollama Backend Implementation
//!
//! Inference backend for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completions with role-tagged message history,
//!   newline-delimited JSON when streaming
//! - `/api/tags` - List available models (used as the health probe)
//!
//! Cancellation: every read from the response body races against the stop
//! signal. Returning drops the response, which aborts the HTTP request and
//! makes the server stop generating.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::traits::{InferenceBackend, InferenceRequest, InferenceResponse, StreamingToken};
use crate::error::BackendError;
use crate::stop_signal::StopSignal;

/// One NDJSON object from `/api/chat`
#[derive(Debug, Default, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

impl ChatChunk {
    fn content(&self) -> &str {
        self.message.as_ref().map_or("", |m| m.content.as_str())
    }
}

/// Ollama backend client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// Only the connect phase has a timeout; a streamed generation may run
    /// for as long as the model needs.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| BackendError::Unavailable(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            host: host.into(),
            port,
            http_client,
        })
    }

    /// Create from `OLLAMA_HOST` / `OLLAMA_PORT`
    pub fn from_env() -> Result<Self, BackendError> {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port: u16 = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(11434);

        Self::new(host, port)
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get chat endpoint URL
    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url())
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the `/api/chat` request body
    fn build_body(request: &InferenceRequest, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
            "options": {
                "temperature": request.options.temperature,
                "top_k": request.options.top_k,
                "top_p": request.options.top_p,
                "num_predict": request.options.max_new_tokens,
            },
        })
    }

    /// Parse one NDJSON line; blank lines yield `None`
    fn parse_line(line: &[u8]) -> Result<Option<ChatChunk>, BackendError> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let chunk: ChatChunk = serde_json::from_slice(line)
            .map_err(|e| BackendError::Failed(format!("malformed Ollama chunk: {e}")))?;

        if let Some(error) = chunk.error {
            return Err(BackendError::Failed(error));
        }
        Ok(Some(chunk))
    }

    /// POST to `/api/chat` and check the status
    async fn post_chat(
        &self,
        request: &InferenceRequest,
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let response = self
            .http_client
            .post(self.chat_url())
            .json(&Self::build_body(request, stream))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            // Ollama answers 404 for a model that is not pulled
            Err(BackendError::Unavailable(format!(
                "model {} not available: {body}",
                request.model
            )))
        } else {
            Err(BackendError::Failed(format!("Ollama returned {status}: {body}")))
        }
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn ensure_ready(&self) -> Result<(), BackendError> {
        if self.health_check().await {
            Ok(())
        } else {
            Err(BackendError::Unavailable(format!(
                "Ollama is not reachable at {}",
                self.base_url()
            )))
        }
    }

    async fn infer(
        &self,
        request: &InferenceRequest,
        stop: &StopSignal,
    ) -> Result<InferenceResponse, BackendError> {
        let start = Instant::now();
        let halted = InferenceResponse {
            model: request.model.clone(),
            ..Default::default()
        };

        let response = tokio::select! {
            biased;
            () = stop.cancelled() => return Ok(halted),
            response = self.post_chat(request, false) => response?,
        };

        let chunk: ChatChunk = tokio::select! {
            biased;
            () = stop.cancelled() => return Ok(halted),
            chunk = response.json() => chunk?,
        };

        if let Some(error) = chunk.error {
            return Err(BackendError::Failed(error));
        }

        Ok(InferenceResponse {
            content: chunk.content().to_string(),
            model: request.model.clone(),
            tokens_used: chunk.eval_count.map(|c| c as u32),
            duration_ms: Some(start.elapsed().as_millis() as u64),
        })
    }

    async fn infer_streaming(
        &self,
        request: &InferenceRequest,
        stop: &StopSignal,
        tx: mpsc::Sender<StreamingToken>,
    ) -> Result<(), BackendError> {
        let response = tokio::select! {
            biased;
            () = stop.cancelled() => return Ok(()),
            response = self.post_chat(request, true) => response?,
        };

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut full_response = String::new();

        loop {
            let next = tokio::select! {
                biased;
                () = stop.cancelled() => {
                    tracing::debug!(received = full_response.len(), "Ollama stream stopped");
                    return Ok(());
                }
                next = stream.next() => next,
            };

            let Some(chunk) = next else { break };
            buffer.extend_from_slice(&chunk?);

            // Parse newline-delimited JSON; split on bytes so a multi-byte
            // character spanning two chunks is never cut
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let Some(data) = Self::parse_line(&line)? else {
                    continue;
                };

                let token = data.content();
                if !token.is_empty() {
                    full_response.push_str(token);
                    if tx
                        .send(StreamingToken::Token(token.to_string()))
                        .await
                        .is_err()
                    {
                        // Receiver dropped, stop streaming
                        return Ok(());
                    }
                }

                if data.done {
                    let _ = tx
                        .send(StreamingToken::Complete {
                            message: full_response,
                        })
                        .await;
                    return Ok(());
                }
            }
        }

        // Stream ended without done signal
        if !full_response.is_empty() {
            let _ = tx
                .send(StreamingToken::Complete {
                    message: full_response,
                })
                .await;
        }
        Ok(())
    }
}
