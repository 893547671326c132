//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use helpline_core::{Message, Sender, Thread};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single thread
    pub fn print_thread(&self, thread: &Thread) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", thread.id);
                println!("Subject:  {}", thread.subject);
                println!("Status:   {}", thread.status);
                println!("Updated:  {}", local_time(&thread.last_updated, "%Y-%m-%d %H:%M"));
                if thread.unread_count > 0 {
                    println!("Unread:   {}", thread.unread_count);
                }
            }
            OutputFormat::Json => print_json(thread),
            OutputFormat::Quiet => println!("{}", thread.id),
        }
    }

    /// Print the thread list
    pub fn print_threads(&self, threads: &[Thread]) {
        match self.format {
            OutputFormat::Human => {
                if threads.is_empty() {
                    println!("No conversations yet.");
                    return;
                }
                for thread in threads {
                    let unread = if thread.unread_count > 0 {
                        format!(" ({} new)", thread.unread_count)
                    } else {
                        String::new()
                    };
                    println!(
                        "{} | {:<8} | {}{} | {}",
                        truncate(&thread.id, 12),
                        thread.status,
                        truncate(&thread.subject, 40),
                        unread,
                        local_time(&thread.last_updated, "%Y-%m-%d %H:%M")
                    );
                }
                println!("\n{} conversation(s)", threads.len());
            }
            OutputFormat::Json => print_json(&threads),
            OutputFormat::Quiet => {
                for thread in threads {
                    println!("{}", thread.id);
                }
            }
        }
    }

    /// Print a single chat message
    pub fn print_message(&self, message: &Message) {
        match self.format {
            OutputFormat::Human => println!("{}", format_message(message)),
            OutputFormat::Json => match serde_json::to_string(message) {
                Ok(line) => println!("{}", line),
                Err(e) => eprintln!("⚠ Could not encode message: {}", e),
            },
            OutputFormat::Quiet => println!("{}", message.content),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning to stderr (suppressed in quiet mode)
    pub fn warn(&self, msg: &str) {
        if !self.is_quiet() {
            eprintln!("⚠ {}", msg);
        }
    }
}

/// One transcript line: `[HH:MM] agent: text`
pub fn format_message(message: &Message) -> String {
    let who = match message.sender {
        Sender::User => "you",
        Sender::Agent => "agent",
        Sender::System => "system",
    };
    let suffix = if message.pending { " (sending…)" } else { "" };
    format!(
        "[{}] {}: {}{}",
        local_time(&message.timestamp, "%H:%M"),
        who,
        message.content,
        suffix
    )
}

fn local_time(at: &DateTime<Utc>, fmt: &str) -> String {
    at.with_timezone(&Local).format(fmt).to_string()
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("⚠ Could not encode output: {}", e),
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ünïcödé subject", 8), "ünïcö...");
    }

    #[test]
    fn test_format_message() {
        let mut message = Message::optimistic("t-1", "Hi there");
        assert!(format_message(&message).ends_with("you: Hi there (sending…)"));

        message.pending = false;
        message.sender = Sender::Agent;
        assert!(format_message(&message).ends_with("agent: Hi there"));
    }
}
