//! Developer Backend
//!
//! Stand-in for a real model while working on the surfaces: waits a fixed
//! number of ticks, checking the stop signal on every tick, then answers with
//! a line echoing the prompt. The streaming form emits that line one word per
//! tick.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};

use super::traits::{InferenceBackend, InferenceRequest, InferenceResponse, StreamingToken};
use crate::error::BackendError;
use crate::stop_signal::StopSignal;

/// Model name reported by the developer backend
pub const DEV_MODEL_NAME: &str = "Testing-LLM";

/// Developer backend
#[derive(Clone, Debug)]
pub struct DevBackend {
    ticks: u32,
    tick: Duration,
}

impl Default for DevBackend {
    fn default() -> Self {
        Self::new(7, Duration::from_secs(1))
    }
}

impl DevBackend {
    /// Answer after `ticks` ticks of length `tick`
    #[must_use]
    pub fn new(ticks: u32, tick: Duration) -> Self {
        Self { ticks, tick }
    }

    /// The answer for a prompt
    fn answer(&self, prompt: &str) -> String {
        let total = self.tick * self.ticks;
        format!(
            "Done generating, prompt: \"{prompt}\" ({} seconds)",
            total.as_secs()
        )
    }

    fn ticker(&self) -> Interval {
        let mut ticker = interval(self.tick.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Wait one tick; false if stopped first
    async fn wait_tick(ticker: &mut Interval, stop: &StopSignal) -> bool {
        tokio::select! {
            biased;
            () = stop.cancelled() => false,
            _ = ticker.tick() => true,
        }
    }
}

#[async_trait]
impl InferenceBackend for DevBackend {
    fn name(&self) -> &'static str {
        "Dev"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn infer(
        &self,
        request: &InferenceRequest,
        stop: &StopSignal,
    ) -> Result<InferenceResponse, BackendError> {
        let prompt = request.last_user_prompt().unwrap_or_default();
        let mut ticker = self.ticker();
        // First tick of an interval completes immediately
        ticker.tick().await;

        for elapsed in 0..self.ticks {
            if !Self::wait_tick(&mut ticker, stop).await {
                tracing::debug!(elapsed = elapsed, "Dev backend stopped");
                return Ok(InferenceResponse {
                    model: DEV_MODEL_NAME.to_string(),
                    ..Default::default()
                });
            }
        }

        Ok(InferenceResponse {
            content: self.answer(prompt),
            model: DEV_MODEL_NAME.to_string(),
            tokens_used: None,
            duration_ms: Some((self.tick * self.ticks).as_millis() as u64),
        })
    }

    async fn infer_streaming(
        &self,
        request: &InferenceRequest,
        stop: &StopSignal,
        tx: mpsc::Sender<StreamingToken>,
    ) -> Result<(), BackendError> {
        let answer = self.answer(request.last_user_prompt().unwrap_or_default());
        let mut ticker = self.ticker();
        ticker.tick().await;

        for word in answer.split_inclusive(' ') {
            if !Self::wait_tick(&mut ticker, stop).await {
                return Ok(());
            }
            if tx.send(StreamingToken::Token(word.to_string())).await.is_err() {
                return Ok(());
            }
        }

        let _ = tx.send(StreamingToken::Complete { message: answer }).await;
        Ok(())
    }
}
