//! Controller behavior through the public API
//!
//! Each test drives a `GenerationController` the way a surface would and
//! checks the transcript and session state it leaves behind.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use parlor_core::{
    BackendError, ControllerConfig, ControllerState, DevBackend, DisplaySnapshot, GenerateError,
    GenerationController, GenerationMode, InferenceBackend, InferenceRequest, InferenceResponse,
    MessageRole, StopSignal, StreamingToken, TurnEvent, TurnOutcome,
};

// =============================================================================
// Test Backends
// =============================================================================

/// Streams its fragments, then waits for the stop signal
struct HeldOpenBackend {
    fragments: Vec<&'static str>,
}

#[async_trait]
impl InferenceBackend for HeldOpenBackend {
    fn name(&self) -> &str {
        "HeldOpen"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn infer(
        &self,
        _request: &InferenceRequest,
        stop: &StopSignal,
    ) -> Result<InferenceResponse, BackendError> {
        stop.cancelled().await;
        Ok(InferenceResponse::default())
    }

    async fn infer_streaming(
        &self,
        _request: &InferenceRequest,
        stop: &StopSignal,
        tx: mpsc::Sender<StreamingToken>,
    ) -> Result<(), BackendError> {
        for fragment in &self.fragments {
            if tx
                .send(StreamingToken::Token((*fragment).to_string()))
                .await
                .is_err()
            {
                return Ok(());
            }
        }
        stop.cancelled().await;
        Ok(())
    }
}

/// Fails the first `failures` turns with the given error, then echoes
struct FlakyBackend {
    failures: usize,
    error: BackendError,
    calls: AtomicUsize,
}

impl FlakyBackend {
    fn new(failures: usize, error: BackendError) -> Self {
        Self {
            failures,
            error,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl InferenceBackend for FlakyBackend {
    fn name(&self) -> &str {
        "Flaky"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn infer(
        &self,
        request: &InferenceRequest,
        _stop: &StopSignal,
    ) -> Result<InferenceResponse, BackendError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(self.error.clone());
        }
        Ok(InferenceResponse {
            content: format!("echo: {}", request.last_user_prompt().unwrap_or_default()),
            ..Default::default()
        })
    }
}

/// Panics as soon as it is asked to generate
struct PanickingBackend;

#[async_trait]
impl InferenceBackend for PanickingBackend {
    fn name(&self) -> &str {
        "Panicking"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn infer(
        &self,
        _request: &InferenceRequest,
        _stop: &StopSignal,
    ) -> Result<InferenceResponse, BackendError> {
        panic!("backend exploded");
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn config() -> ControllerConfig {
    ControllerConfig {
        system_prompt: Some("You are terse.".to_string()),
        ..Default::default()
    }
}

fn fast_dev() -> DevBackend {
    DevBackend::new(2, Duration::from_millis(5))
}

fn roles(snapshot: &DisplaySnapshot) -> Vec<(MessageRole, String)> {
    snapshot
        .messages
        .iter()
        .map(|m| (m.role, m.content.clone()))
        .collect()
}

async fn wait_for_response<B: InferenceBackend + 'static>(
    controller: &GenerationController<B>,
    expected: &str,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while controller.snapshot_for_display().current_response != expected {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("response never reached expected text");
}

// =============================================================================
// Turn Lifecycle
// =============================================================================

#[tokio::test]
async fn test_completed_turn_appends_user_and_assistant() {
    let controller = GenerationController::new(fast_dev(), config());

    let outcome = assert_ok!(controller.generate_and_wait("P").await);
    let expected = "Done generating, prompt: \"P\" (0 seconds)";
    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            response: expected.to_string()
        }
    );

    let snapshot = controller.snapshot_for_display();
    assert!(!snapshot.is_generating);
    assert_eq!(snapshot.current_response, expected);
    assert_eq!(
        roles(&snapshot),
        vec![
            (MessageRole::User, "P".to_string()),
            (MessageRole::Assistant, expected.to_string()),
        ]
    );
}

#[tokio::test]
async fn test_generate_returns_before_turn_finishes() {
    let controller = GenerationController::new(
        HeldOpenBackend {
            fragments: vec![],
        },
        config(),
    );

    assert_ok!(controller.generate("P").await);
    assert_eq!(controller.state(), ControllerState::Generating);

    let snapshot = controller.snapshot_for_display();
    assert!(snapshot.is_generating);
    assert_eq!(snapshot.current_prompt, "P");
    assert_eq!(roles(&snapshot), vec![(MessageRole::User, "P".to_string())]);

    controller.stop_generating().await;
}

#[tokio::test]
async fn test_stop_mid_stream_discards_turn() {
    let controller = GenerationController::new(
        HeldOpenBackend {
            fragments: vec!["Hel", "lo"],
        },
        config(),
    );

    assert_ok!(controller.generate("P").await);
    wait_for_response(&controller, "Hello").await;
    controller.stop_generating().await;

    let snapshot = controller.snapshot_for_display();
    assert!(!snapshot.is_generating);
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.current_response, "Hello");
}

#[tokio::test]
async fn test_stop_keeps_earlier_turns() {
    let controller = GenerationController::new(fast_dev(), config());
    assert_ok!(controller.generate_and_wait("first").await);

    let controller_ref = &controller;
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(2)).await;
        controller_ref.stop_generating().await;
    };
    let (outcome, ()) = tokio::join!(controller.generate_and_wait("second"), stopper);

    let snapshot = controller.snapshot_for_display();
    match assert_ok!(outcome) {
        TurnOutcome::Cancelled { .. } => assert_eq!(snapshot.messages.len(), 2),
        TurnOutcome::Completed { .. } => assert_eq!(snapshot.messages.len(), 4),
        TurnOutcome::Failed(e) => panic!("unexpected failure: {e}"),
    }
    assert_eq!(snapshot.messages[0].content, "first");
}

#[tokio::test]
async fn test_generate_immediately_after_stop() {
    let controller = GenerationController::new(
        HeldOpenBackend {
            fragments: vec!["x"],
        },
        config(),
    );

    assert_ok!(controller.generate("one").await);
    controller.stop_generating().await;
    assert_eq!(controller.state(), ControllerState::Idle);

    assert_ok!(controller.generate("two").await);
    assert_eq!(
        roles(&controller.snapshot_for_display()),
        vec![(MessageRole::User, "two".to_string())]
    );
    controller.stop_generating().await;
}

#[tokio::test]
async fn test_complete_mode_stop() {
    let controller = GenerationController::new(
        DevBackend::new(1000, Duration::from_millis(10)),
        ControllerConfig {
            mode: GenerationMode::Complete,
            ..config()
        },
    );

    assert_ok!(controller.generate("P").await);
    tokio::time::timeout(Duration::from_secs(2), controller.stop_generating())
        .await
        .expect("dev backend should stop within one tick");

    let snapshot = controller.snapshot_for_display();
    assert!(!snapshot.is_generating);
    assert!(snapshot.messages.is_empty());
    assert!(snapshot.current_response.is_empty());
}

// =============================================================================
// Rejections
// =============================================================================

#[tokio::test]
async fn test_blank_prompts_change_nothing() {
    let controller = GenerationController::new(fast_dev(), config());
    assert_ok!(controller.generate_and_wait("P").await);
    let before = controller.snapshot_for_display();

    for blank in ["", "   ", "\n\t"] {
        assert_eq!(
            assert_err!(controller.generate(blank).await),
            GenerateError::EmptyPrompt
        );
    }

    assert_eq!(controller.snapshot_for_display(), before);
}

#[tokio::test]
async fn test_second_generate_is_rejected() {
    let controller = GenerationController::new(
        HeldOpenBackend {
            fragments: vec![],
        },
        config(),
    );

    assert_ok!(controller.generate("first").await);
    assert_eq!(
        assert_err!(controller.generate("second").await),
        GenerateError::AlreadyGenerating
    );

    let snapshot = controller.snapshot_for_display();
    assert_eq!(snapshot.current_prompt, "first");
    assert_eq!(snapshot.messages.len(), 1);

    controller.stop_generating().await;
}

#[tokio::test]
async fn test_stop_while_idle_is_noop() {
    let controller = GenerationController::new(fast_dev(), config());
    let before = controller.snapshot_for_display();

    controller.stop_generating().await;

    assert_eq!(controller.snapshot_for_display(), before);
    assert_eq!(controller.state(), ControllerState::Idle);
}

// =============================================================================
// Backend Errors
// =============================================================================

#[tokio::test]
async fn test_failure_rolls_back_and_recovers() {
    let controller = GenerationController::new(
        FlakyBackend::new(1, BackendError::Failed("CUDA out of memory".to_string())),
        config(),
    );

    let outcome = assert_ok!(controller.generate_and_wait("P").await);
    assert_eq!(
        outcome,
        TurnOutcome::Failed(GenerateError::BackendFailure(
            "CUDA out of memory".to_string()
        ))
    );
    let snapshot = controller.snapshot_for_display();
    assert!(snapshot.messages.is_empty());
    assert!(snapshot.last_error.is_some());
    assert_eq!(controller.state(), ControllerState::Idle);

    let outcome = assert_ok!(controller.generate_and_wait("P").await);
    assert!(outcome.is_completed());
    let snapshot = controller.snapshot_for_display();
    assert_eq!(snapshot.messages.len(), 2);
    assert!(snapshot.last_error.is_none());
}

#[tokio::test]
async fn test_mid_turn_unavailability_rolls_back() {
    let controller = GenerationController::new(
        FlakyBackend::new(1, BackendError::Unavailable("model unloaded".to_string())),
        config(),
    );

    let outcome = assert_ok!(controller.generate_and_wait("P").await);
    assert_eq!(
        outcome,
        TurnOutcome::Failed(GenerateError::BackendUnavailable(
            "model unloaded".to_string()
        ))
    );
    assert!(controller.snapshot_for_display().messages.is_empty());
}

#[tokio::test]
async fn test_panicking_backend_is_recovered() {
    let controller = GenerationController::new(PanickingBackend, config());

    let outcome = assert_ok!(controller.generate_and_wait("P").await);
    assert!(matches!(
        outcome,
        TurnOutcome::Failed(GenerateError::BackendFailure(_))
    ));

    let snapshot = controller.snapshot_for_display();
    assert!(!snapshot.is_generating);
    assert!(snapshot.messages.is_empty());
}

// =============================================================================
// Reset, Pruning, Events
// =============================================================================

#[tokio::test]
async fn test_reset_returns_to_system_prompt_only() {
    let controller = GenerationController::new(fast_dev(), config());
    assert_ok!(controller.generate_and_wait("one").await);
    assert_ok!(controller.generate("two").await);

    controller.reset_messages().await;

    let snapshot = controller.snapshot_for_display();
    assert!(!snapshot.is_generating);
    assert!(snapshot.messages.is_empty());
    assert!(snapshot.current_prompt.is_empty());
    assert!(snapshot.current_response.is_empty());

    assert_ok!(controller.generate_and_wait("three").await);
    assert_eq!(controller.snapshot_for_display().messages.len(), 2);
}

#[tokio::test]
async fn test_pruning_keeps_recent_turns() {
    let controller = GenerationController::new(
        FlakyBackend::new(0, BackendError::Failed(String::new())),
        ControllerConfig {
            max_turns: 2,
            ..config()
        },
    );

    for prompt in ["a", "b", "c", "d"] {
        assert_ok!(controller.generate_and_wait(prompt).await);
    }

    let snapshot = controller.snapshot_for_display();
    assert_eq!(
        roles(&snapshot),
        vec![
            (MessageRole::User, "c".to_string()),
            (MessageRole::Assistant, "echo: c".to_string()),
            (MessageRole::User, "d".to_string()),
            (MessageRole::Assistant, "echo: d".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_fragment_events_rebuild_response() {
    let controller = GenerationController::new(fast_dev(), config());
    let mut events = controller.subscribe();

    let outcome = assert_ok!(controller.generate_and_wait("P").await);
    let TurnOutcome::Completed { response } = outcome else {
        panic!("turn should complete");
    };

    let mut streamed = String::new();
    let mut completed = None;
    while let Ok(event) = events.try_recv() {
        match event {
            TurnEvent::Fragment { text } => streamed.push_str(&text),
            TurnEvent::Completed { response } => completed = Some(response),
            _ => {}
        }
    }
    assert_eq!(streamed, response);
    assert_eq!(completed.as_deref(), Some(response.as_str()));
}

#[tokio::test]
async fn test_cancelled_event_carries_partial() {
    let controller = GenerationController::new(
        HeldOpenBackend {
            fragments: vec!["par", "tial"],
        },
        config(),
    );
    let mut events = controller.subscribe();

    assert_ok!(controller.generate("P").await);
    wait_for_response(&controller, "partial").await;
    controller.stop_generating().await;

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    assert_eq!(
        last,
        Some(TurnEvent::Cancelled {
            partial: "partial".to_string()
        })
    );
}
