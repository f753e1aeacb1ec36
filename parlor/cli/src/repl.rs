//! Read-eval-print loop
//!
//! Reads `> Prompt: ` lines, runs one turn per line and streams the reply as
//! fragments arrive. Slash commands manage the conversation.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use parlor_core::{
    DisplaySnapshot, GenerationController, InferenceBackend, MessageRole, TurnEvent, TurnOutcome,
};

const PROMPT: &str = "> Prompt: ";

const HELP: &str = "\
Commands:
  /help     Show this help
  /reset    Clear the conversation
  /history  Show the conversation so far
  /quit     Exit (an empty line or Ctrl-D also exits)
Ctrl-C stops a reply in progress; at the prompt it exits.";

/// One line of user input
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Send to the model
    Prompt(String),
    /// Print the command list
    Help,
    /// Clear the transcript
    Reset,
    /// Print the transcript
    History,
    /// Leave the REPL
    Quit,
    /// Unrecognized slash command
    Unknown(String),
}

impl Command {
    /// Interpret a line read from the terminal
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Quit;
        }

        let Some(command) = line.strip_prefix('/') else {
            return Self::Prompt(line.to_string());
        };
        match command.split_whitespace().next().unwrap_or_default() {
            "help" | "?" => Self::Help,
            "reset" | "clear" => Self::Reset,
            "history" => Self::History,
            "quit" | "exit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Label shown in front of a message
pub fn display_name<'a>(role: MessageRole, assistant: &'a str) -> &'a str {
    match role {
        MessageRole::User => "You",
        MessageRole::Assistant => assistant,
        MessageRole::System => "System",
    }
}

/// Transcript formatted for `/history`
pub fn format_history(snapshot: &DisplaySnapshot, assistant: &str) -> String {
    if snapshot.messages.is_empty() {
        return "> (no messages yet)\n".to_string();
    }
    snapshot
        .messages
        .iter()
        .map(|m| {
            format!(
                "[{}] {}: {}\n",
                m.date(),
                display_name(m.role, assistant),
                m.content
            )
        })
        .collect()
}

/// Interactive session bound to one controller
pub struct Repl<B: InferenceBackend + 'static> {
    controller: Arc<GenerationController<B>>,
    assistant: String,
}

impl<B: InferenceBackend + 'static> Repl<B> {
    /// Create a REPL; `assistant` labels the model's replies
    pub fn new(controller: Arc<GenerationController<B>>, assistant: &str) -> Self {
        Self {
            controller,
            assistant: assistant.to_string(),
        }
    }

    /// Run until `/quit`, an empty line, EOF or Ctrl-C at the prompt
    pub async fn run(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut out = tokio::io::stdout();
        let mut events = self.controller.subscribe();

        loop {
            write_flush(&mut out, PROMPT).await?;

            let line = tokio::select! {
                line = lines.next_line() => line.context("Failed to read from stdin")?,
                _ = tokio::signal::ctrl_c() => {
                    write_flush(&mut out, "\n> Interrupted: Ctrl-C\n").await?;
                    break;
                }
            };
            let Some(line) = line else {
                // EOF
                write_flush(&mut out, "\n").await?;
                break;
            };

            match Command::parse(&line) {
                Command::Quit => break,
                Command::Help => write_flush(&mut out, &format!("{HELP}\n")).await?,
                Command::Reset => {
                    self.controller.reset_messages().await;
                    // Drop anything left over from the cleared conversation
                    events = events.resubscribe();
                    write_flush(&mut out, "> Conversation cleared\n").await?;
                }
                Command::History => {
                    let history =
                        format_history(&self.controller.snapshot_for_display(), &self.assistant);
                    write_flush(&mut out, &history).await?;
                }
                Command::Unknown(command) => {
                    write_flush(&mut out, &format!("> Unknown command: /{command}\n")).await?;
                }
                Command::Prompt(prompt) => self.turn(&prompt, &mut events, &mut out).await?,
            }
        }

        Ok(())
    }

    /// Run one turn, printing fragments until it ends
    async fn turn(
        &self,
        prompt: &str,
        events: &mut broadcast::Receiver<TurnEvent>,
        out: &mut Stdout,
    ) -> Result<()> {
        let turn = self.controller.generate_and_wait(prompt);
        tokio::pin!(turn);
        let mut interrupted = false;

        let result = loop {
            tokio::select! {
                result = &mut turn => break result,
                event = events.recv() => self.render(event, out).await?,
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    interrupted = true;
                    // The turn future must keep being polled while the stop runs
                    let controller = Arc::clone(&self.controller);
                    tokio::spawn(async move { controller.stop_generating().await });
                }
            }
        };

        // Fragments sent just before the outcome
        loop {
            match events.try_recv() {
                Ok(event) => self.render(Ok(event), out).await?,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Display fell behind the stream");
                }
                Err(_) => break,
            }
        }

        let tail = match result {
            Ok(TurnOutcome::Completed { .. }) => "\n".to_string(),
            Ok(TurnOutcome::Cancelled { .. }) => "\n> Stopped\n".to_string(),
            Ok(TurnOutcome::Failed(e)) => format!("\n> Error: {e}\n"),
            Err(e) => format!("> {e}\n"),
        };
        write_flush(out, &tail).await
    }

    async fn render(
        &self,
        event: Result<TurnEvent, RecvError>,
        out: &mut Stdout,
    ) -> Result<()> {
        match event {
            Ok(TurnEvent::Started { .. }) => {
                write_flush(out, &format!("{}: ", self.assistant)).await
            }
            Ok(TurnEvent::Fragment { text }) => write_flush(out, &text).await,
            Ok(_) | Err(RecvError::Closed) => Ok(()),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Display fell behind the stream");
                Ok(())
            }
        }
    }
}

async fn write_flush(out: &mut Stdout, text: &str) -> Result<()> {
    out.write_all(text.as_bytes())
        .await
        .context("Failed to write to stdout")?;
    out.flush().await.context("Failed to flush stdout")
}
