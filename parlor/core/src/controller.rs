//! Generation Controller - The Session Core
//!
//! Owns one conversation and drives at most one inference at a time.
//!
//! # Turn lifecycle
//!
//! ```text
//!   generate(prompt)
//!        │  validate, ensure_ready, join previous worker
//!        ▼
//!   user entry appended ──► worker task spawned
//!                               │
//!            ┌──────────────────┴──────────────────┐
//!            │ join!(backend producer, consumer)   │
//!            │   fragments ─► current_response     │
//!            └──────────────────┬──────────────────┘
//!                               ▼
//!        commit (assistant entry + idle, one lock)  or  rollback (user entry popped)
//! ```
//!
//! # Locking
//!
//! Transcript and session state share one `parking_lot` mutex that is only
//! held for a single logical update and never across an `.await`. The worker
//! handle sits behind a `tokio` mutex, which serializes `generate`,
//! `stop_generating` and `reset_messages` against each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::backend::{GenerationOptions, InferenceBackend, InferenceRequest, StreamingToken};
use crate::error::{BackendError, GenerateError};
use crate::events::{TurnEvent, TurnOutcome};
use crate::messages::{ControllerState, MessageId, MessageRole};
use crate::state::{DisplaySnapshot, SessionState};
use crate::stop_signal::StopSignal;
use crate::transcript::Transcript;

/// System prompt used when none is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = "Always Remember: You're a technical AI assistant, a senior programmer and you know a lot about Python. You respond in a very short answer, straight to the point and answer truthfully, do not explain yourself just simply give a short answer.";

/// How the backend is driven
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Fragments are appended to the response as they arrive
    #[default]
    Streaming,
    /// One completed string per turn
    Complete,
}

impl GenerationMode {
    /// Config/CLI name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "streaming" | "stream" => Ok(Self::Streaming),
            "complete" | "blocking" => Ok(Self::Complete),
            other => Err(format!(
                "unknown generation mode '{other}' (expected 'streaming' or 'complete')"
            )),
        }
    }
}

/// Controller configuration
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Model identifier passed to the backend
    pub model: String,
    /// System prompt seeded at the start of the transcript
    pub system_prompt: Option<String>,
    /// Streaming or complete
    pub mode: GenerationMode,
    /// Sampling parameters
    pub options: GenerationOptions,
    /// Complete turns kept in the transcript (0 = unlimited)
    pub max_turns: usize,
    /// Largest accepted prompt in bytes (0 = unlimited)
    pub max_prompt_bytes: usize,
    /// Buffered turn events per subscriber
    pub event_capacity: usize,
    /// Buffered fragments between backend and consumer
    pub fragment_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            model: "zephyr".to_string(),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            mode: GenerationMode::Streaming,
            options: GenerationOptions::default(),
            max_turns: 0,
            max_prompt_bytes: 100 * 1024,
            event_capacity: 256,
            fragment_buffer: 100,
        }
    }
}

/// The turn currently owning the session
#[derive(Debug)]
struct ActiveTurn {
    id: u64,
    user_message: MessageId,
}

/// Everything guarded by the state lock
#[derive(Debug)]
struct Shared {
    transcript: Transcript,
    state: SessionState,
    turn: Option<ActiveTurn>,
}

impl Shared {
    fn is_current(&self, turn_id: u64) -> bool {
        self.turn.as_ref().is_some_and(|t| t.id == turn_id)
    }

    /// Assistant append and the idle transition, as one update
    fn commit(&mut self, response: &str) {
        self.transcript.append(MessageRole::Assistant, response);
        self.transcript.prune_if_needed();
        self.state.is_generating = false;
        self.turn = None;
    }

    /// Unwind the active turn; true if its user entry was removed
    fn rollback(&mut self) -> bool {
        self.state.is_generating = false;
        let Some(turn) = self.turn.take() else {
            return false;
        };
        if self
            .transcript
            .last()
            .is_some_and(|m| m.id == turn.user_message)
        {
            self.transcript.pop_last_if_role(MessageRole::User);
            true
        } else {
            false
        }
    }
}

/// Drives generation for one conversation
pub struct GenerationController<B: InferenceBackend + 'static> {
    config: ControllerConfig,
    backend: Arc<B>,
    shared: Arc<Mutex<Shared>>,
    stop: StopSignal,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<TurnEvent>,
    next_turn: AtomicU64,
}

impl<B: InferenceBackend + 'static> GenerationController<B> {
    /// Create a controller in `Idle` with a fresh transcript
    pub fn new(backend: B, config: ControllerConfig) -> Self {
        let transcript =
            Transcript::new(config.system_prompt.as_deref()).with_limit(config.max_turns);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            backend: Arc::new(backend),
            shared: Arc::new(Mutex::new(Shared {
                transcript,
                state: SessionState::default(),
                turn: None,
            })),
            stop: StopSignal::new(),
            worker: tokio::sync::Mutex::new(None),
            events,
            next_turn: AtomicU64::new(1),
            config,
        }
    }

    /// Start a turn; returns once the backend has been started
    ///
    /// # Errors
    ///
    /// `EmptyPrompt`, `PromptTooLong` and `AlreadyGenerating` leave the
    /// session untouched. `BackendUnavailable` means the readiness probe
    /// failed and nothing was appended.
    pub async fn generate(&self, prompt_text: &str) -> Result<(), GenerateError> {
        self.start_turn(prompt_text).await.map(|_| ())
    }

    /// Start a turn and wait for it to end
    ///
    /// # Errors
    ///
    /// Same as [`generate`](Self::generate). How the turn itself ended is
    /// reported in the returned [`TurnOutcome`].
    pub async fn generate_and_wait(&self, prompt_text: &str) -> Result<TurnOutcome, GenerateError> {
        let done = self.start_turn(prompt_text).await?;
        match done.await {
            Ok(outcome) => Ok(outcome),
            Err(_) => {
                // Worker died before finalizing; join it and unwind the turn
                self.stop_generating().await;
                Ok(TurnOutcome::Failed(GenerateError::BackendFailure(
                    "generation task ended without reporting".to_string(),
                )))
            }
        }
    }

    /// Stop the active turn and wait for the backend to wind down
    ///
    /// No-op when idle. After this returns no background task is left and
    /// an unanswered user entry has been removed.
    pub async fn stop_generating(&self) {
        let mut worker = self.worker.lock().await;
        self.stop_locked(&mut worker).await;
    }

    /// Stop, then clear the transcript back to the system prompt
    pub async fn reset_messages(&self) {
        let mut worker = self.worker.lock().await;
        self.stop_locked(&mut worker).await;

        {
            let mut shared = self.shared.lock();
            shared
                .transcript
                .reset(self.config.system_prompt.as_deref());
            shared.state = SessionState::default();
        }
        tracing::info!("Transcript reset");
        self.emit(TurnEvent::Reset);
    }

    /// Final stop before the controller goes away
    pub async fn shutdown(&self) {
        tracing::debug!("Shutting down generation controller");
        self.stop_generating().await;
    }

    /// Consistent view of state and transcript
    #[must_use]
    pub fn snapshot_for_display(&self) -> DisplaySnapshot {
        let shared = self.shared.lock();
        DisplaySnapshot::capture(&shared.state, shared.transcript.snapshot(true))
    }

    /// Current controller state
    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.shared.lock().state.status()
    }

    /// Receive turn events from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.events.subscribe()
    }

    /// Name of the backend in use
    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Model identifier
    #[must_use]
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    fn emit(&self, event: TurnEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn validate(&self, prompt_text: &str) -> Result<String, GenerateError> {
        let prompt = prompt_text.trim();
        if prompt.is_empty() {
            tracing::debug!("Rejected empty prompt");
            return Err(GenerateError::EmptyPrompt);
        }
        let max = self.config.max_prompt_bytes;
        if max > 0 && prompt.len() > max {
            tracing::warn!(len = prompt.len(), max = max, "Rejected oversized prompt");
            return Err(GenerateError::PromptTooLong {
                len: prompt.len(),
                max,
            });
        }
        Ok(prompt.to_string())
    }

    async fn start_turn(
        &self,
        prompt_text: &str,
    ) -> Result<oneshot::Receiver<TurnOutcome>, GenerateError> {
        let prompt = self.validate(prompt_text)?;

        let mut worker = self.worker.lock().await;
        self.reap_worker(&mut worker).await?;

        if let Err(e) = self.backend.ensure_ready().await {
            let reason = match e {
                BackendError::Unavailable(reason) | BackendError::Failed(reason) => reason,
            };
            tracing::warn!(backend = self.backend.name(), reason = %reason, "Backend not ready");
            let error = GenerateError::BackendUnavailable(reason);
            self.shared.lock().state.last_error = Some(error.to_string());
            return Err(error);
        }

        self.stop.reset();
        let turn_id = self.next_turn.fetch_add(1, Ordering::Relaxed);
        let request = {
            let mut shared = self.shared.lock();
            let user_message = shared.transcript.append(MessageRole::User, &prompt);
            shared.state.begin_turn(&prompt);
            shared.turn = Some(ActiveTurn {
                id: turn_id,
                user_message,
            });
            InferenceRequest::new(&self.config.model, shared.transcript.render())
                .with_options(self.config.options.clone())
        };

        tracing::debug!(
            turn = turn_id,
            mode = %self.config.mode,
            messages = request.messages.len(),
            "Turn started"
        );
        self.emit(TurnEvent::Started {
            prompt: prompt.clone(),
        });

        let (done_tx, done_rx) = oneshot::channel();
        let task = TurnTask {
            backend: Arc::clone(&self.backend),
            shared: Arc::clone(&self.shared),
            stop: self.stop.clone(),
            events: self.events.clone(),
            mode: self.config.mode,
            fragment_buffer: self.config.fragment_buffer.max(1),
            turn_id,
        };
        *worker = Some(tokio::spawn(task.run(request, done_tx)));

        Ok(done_rx)
    }

    /// Join the previous worker before a new turn may start
    async fn reap_worker(&self, worker: &mut Option<JoinHandle<()>>) -> Result<(), GenerateError> {
        let generating = self.shared.lock().state.is_generating;
        if generating && worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(GenerateError::AlreadyGenerating);
        }

        if let Some(handle) = worker.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Generation task panicked");
            }
        }

        // Worker ended without finalizing its turn
        self.recover_abandoned_turn();
        Ok(())
    }

    async fn stop_locked(&self, worker: &mut Option<JoinHandle<()>>) {
        let was_generating = {
            let mut shared = self.shared.lock();
            std::mem::replace(&mut shared.state.is_generating, false)
        };
        if was_generating {
            tracing::info!("Stopping generation");
            self.stop.signal();
        }

        if let Some(handle) = worker.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Generation task panicked");
            }
        }

        self.recover_abandoned_turn();
    }

    fn recover_abandoned_turn(&self) {
        let (removed, partial) = {
            let mut shared = self.shared.lock();
            if shared.turn.is_none() {
                return;
            }
            (shared.rollback(), shared.state.current_response.clone())
        };
        tracing::warn!(removed_user_entry = removed, "Rolled back abandoned turn");
        self.emit(TurnEvent::Cancelled { partial });
    }
}

impl<B: InferenceBackend + 'static> Drop for GenerationController<B> {
    fn drop(&mut self) {
        // A detached worker stops at its next checkpoint
        self.stop.signal();
    }
}

impl<B: InferenceBackend + 'static> std::fmt::Debug for GenerationController<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationController")
            .field("backend", &self.backend.name())
            .field("model", &self.config.model)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// What the worker task owns for one turn
struct TurnTask<B: InferenceBackend + 'static> {
    backend: Arc<B>,
    shared: Arc<Mutex<Shared>>,
    stop: StopSignal,
    events: broadcast::Sender<TurnEvent>,
    mode: GenerationMode,
    fragment_buffer: usize,
    turn_id: u64,
}

impl<B: InferenceBackend + 'static> TurnTask<B> {
    async fn run(self, request: InferenceRequest, done: oneshot::Sender<TurnOutcome>) {
        let result = match self.mode {
            GenerationMode::Streaming => self.stream(&request).await,
            GenerationMode::Complete => self.complete(&request).await,
        };

        let outcome = self.finish(result);
        let _ = self.events.send(TurnEvent::from(&outcome));
        let _ = done.send(outcome);
    }

    /// Drive a streaming backend and its consumer to completion
    async fn stream(&self, request: &InferenceRequest) -> Result<(), BackendError> {
        let (tx, rx) = mpsc::channel(self.fragment_buffer);

        let produce = self.backend.infer_streaming(request, &self.stop, tx);
        let consume = async {
            let mut rx = rx;
            while let Some(token) = rx.recv().await {
                match token {
                    StreamingToken::Token(text) => {
                        if !self.append_fragment(&text) {
                            // Dropping rx unblocks a producer waiting on send
                            break;
                        }
                        let _ = self.events.send(TurnEvent::Fragment { text });
                    }
                    StreamingToken::Complete { message } => {
                        tracing::trace!(len = message.len(), "Stream complete");
                    }
                }
            }
        };

        let (produced, ()) = tokio::join!(produce, consume);
        produced
    }

    async fn complete(&self, request: &InferenceRequest) -> Result<(), BackendError> {
        let response = self.backend.infer(request, &self.stop).await?;
        tracing::debug!(
            tokens = ?response.tokens_used,
            duration_ms = ?response.duration_ms,
            "Backend returned"
        );
        if !response.content.is_empty() && self.append_fragment(&response.content) {
            let _ = self.events.send(TurnEvent::Fragment {
                text: response.content,
            });
        }
        Ok(())
    }

    /// Append to the live response; false once the turn is no longer live
    fn append_fragment(&self, text: &str) -> bool {
        let mut shared = self.shared.lock();
        if !shared.state.is_generating
            || !shared.is_current(self.turn_id)
            || self.stop.is_signaled()
        {
            return false;
        }
        shared.state.current_response.push_str(text);
        true
    }

    fn finish(&self, result: Result<(), BackendError>) -> TurnOutcome {
        let mut shared = self.shared.lock();
        let partial = shared.state.current_response.clone();

        if !shared.is_current(self.turn_id) {
            return TurnOutcome::Cancelled { partial };
        }

        let stopped = !shared.state.is_generating || self.stop.is_signaled();
        let outcome = if stopped {
            TurnOutcome::Cancelled { partial }
        } else {
            match result {
                Err(e) => TurnOutcome::Failed(e.into()),
                Ok(()) if partial.trim().is_empty() => {
                    TurnOutcome::Failed(GenerateError::EmptyResponse)
                }
                Ok(()) => TurnOutcome::Completed { response: partial },
            }
        };

        match &outcome {
            TurnOutcome::Completed { response } => {
                shared.commit(response);
                tracing::debug!(
                    turn = self.turn_id,
                    len = response.len(),
                    "Turn completed"
                );
            }
            TurnOutcome::Cancelled { partial } => {
                let removed = shared.rollback();
                tracing::debug!(
                    turn = self.turn_id,
                    received = partial.len(),
                    removed_user_entry = removed,
                    "Turn cancelled"
                );
            }
            TurnOutcome::Failed(error) => {
                let removed = shared.rollback();
                shared.state.last_error = Some(error.to_string());
                tracing::warn!(
                    turn = self.turn_id,
                    error = %error,
                    removed_user_entry = removed,
                    "Turn failed"
                );
            }
        }

        outcome
    }
}
