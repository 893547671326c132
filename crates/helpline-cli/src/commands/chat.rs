//! Interactive chat session
//!
//! Prints the selected conversation as the engine's snapshot changes and
//! sends every stdin line as a message. Lines starting with `/` are commands.
//! Each sent line is announced as typing first, so the agent sees a brief
//! typing signal that the send itself ends.

use std::collections::HashSet;

use anyhow::{bail, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use helpline_core::dedup::signature;
use helpline_core::{CloseRequest, ConnectionState, EngineSnapshot, SyncEngine, SyncError};

use crate::output::{format_message, Output, OutputFormat};

const HELP: &str = "Commands: /close  /retry  /refresh  /help  /quit";

/// A line typed by the user
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send(String),
    Close,
    Confirm,
    Retry,
    Refresh,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

impl Input {
    fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Input::Empty;
        }
        let Some(command) = trimmed.strip_prefix('/') else {
            return Input::Send(trimmed.to_string());
        };
        match command.to_lowercase().as_str() {
            "close" => Input::Close,
            "yes" => Input::Confirm,
            "retry" => Input::Retry,
            "refresh" => Input::Refresh,
            "help" | "?" => Input::Help,
            "quit" | "exit" | "q" => Input::Quit,
            _ => Input::Unknown(trimmed.to_string()),
        }
    }
}

/// Turns successive snapshots into transcript lines, each printed once
#[derive(Default)]
struct ChatView {
    thread_id: Option<String>,
    printed: HashSet<String>,
    connection: Option<ConnectionState>,
    admin_typing: bool,
    closed: bool,
    error: Option<String>,
}

impl ChatView {
    fn update(&mut self, snapshot: &EngineSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if self.connection != Some(snapshot.connection_state) {
            self.connection = Some(snapshot.connection_state);
            lines.push(connection_line(snapshot.connection_state).to_string());
        }

        if snapshot.selected_thread_id != self.thread_id {
            self.thread_id = snapshot.selected_thread_id.clone();
            self.printed.clear();
            self.closed = false;
            if let Some(thread) = snapshot.selected_thread() {
                lines.push(format!("── {} ({}) ──", thread.subject, thread.id));
            }
        }

        for message in &snapshot.messages {
            let key = match (message.pending, message.local_id) {
                (true, Some(local_id)) => local_id.to_string(),
                _ => signature(message),
            };
            if self.printed.insert(key) {
                lines.push(format_message(message));
            }
        }

        if snapshot.admin_is_typing && !self.admin_typing {
            lines.push("· agent is typing…".to_string());
        }
        self.admin_typing = snapshot.admin_is_typing;

        let closed = snapshot.selected_thread().is_some_and(|t| t.is_closed());
        if closed && !self.closed {
            lines.push("· this conversation is closed".to_string());
        }
        self.closed = closed;

        if snapshot.error != self.error {
            if let Some(error) = &snapshot.error {
                lines.push(format!("! {}", error));
            }
            self.error = snapshot.error.clone();
        }

        lines
    }
}

fn connection_line(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "· offline",
        ConnectionState::Connecting => "· connecting…",
        ConnectionState::Connected => "· live",
        ConnectionState::Error => "· could not connect (type /retry)",
    }
}

/// Run the interactive session until /quit or end of input
pub async fn run(engine: &SyncEngine, thread_id: Option<String>, output: &Output) -> Result<()> {
    if let Err(e) = engine.start().await {
        output.warn(&e.to_string());
    }

    let Some(thread_id) = thread_id.or_else(|| engine.snapshot().selected_thread_id) else {
        bail!(
            "No conversation to open. Pass an ID or start one with:\n  \
             helpline new \"<subject>\""
        );
    };
    if let Err(e) = engine.select_thread(&thread_id).await {
        debug!("Initial fetch failed: {}", e);
    }
    if output.should_prompt() {
        output.message(HELP);
    }

    let mut view = ChatView::default();
    let mut updates = engine.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut close_request: Option<CloseRequest> = None;

    let first = updates.borrow_and_update().clone();
    print_lines(&view.update(&first));

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                print_lines(&view.update(&snapshot));
                if snapshot.error.is_some() {
                    engine.clear_error();
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let input = Input::parse(&line);
                if input != Input::Confirm {
                    close_request = None;
                }
                match input {
                    Input::Empty => {}
                    Input::Quit => break,
                    Input::Help => output.message(HELP),
                    Input::Retry => engine.retry_connection(),
                    Input::Refresh => {
                        if let Err(e) = engine.refresh().await {
                            debug!("Refresh failed: {}", e);
                        }
                    }
                    Input::Close => match engine.request_close(&thread_id) {
                        Ok(request) => {
                            close_request = Some(request);
                            output.message("Close this conversation? It cannot be reopened. Type /yes to confirm.");
                        }
                        Err(e) => output.warn(&e.to_string()),
                    },
                    Input::Confirm => match close_request.take() {
                        Some(request) => {
                            if let Err(e) = engine.close_thread(request).await {
                                debug!("Close failed: {}", e);
                            }
                        }
                        None => output.warn("Nothing to confirm"),
                    },
                    Input::Unknown(command) => {
                        output.warn(&format!("Unknown command {}. {}", command, HELP));
                    }
                    Input::Send(text) => {
                        // Stopped by the send, or by the idle timer if it is rejected
                        engine.on_local_input(&thread_id, &text);
                        send_in_background(engine, &thread_id, text, output.format);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Send without blocking the transcript; remote failures show up as snapshot errors
fn send_in_background(engine: &SyncEngine, thread_id: &str, text: String, format: OutputFormat) {
    let engine = engine.clone();
    let thread_id = thread_id.to_string();
    tokio::spawn(async move {
        match engine.send_message(&thread_id, &text).await {
            Ok(_) | Err(SyncError::Remote { .. }) => {}
            Err(e) => Output::new(format).warn(&e.to_string()),
        }
    });
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}
