//! Close command handler

use std::io::{self, Write};

use anyhow::{Context, Result};

use helpline_core::SyncEngine;

use crate::output::Output;

/// Close a conversation after confirmation
pub async fn close(engine: &SyncEngine, thread_id: &str, yes: bool, output: &Output) -> Result<()> {
    // The thread must be known before it can be closed
    if let Err(e) = engine.load_thread_list().await {
        output.warn(&e.to_string());
    }
    let request = engine.request_close(thread_id)?;

    if !yes && output.should_prompt() && !confirm(thread_id)? {
        output.message("Cancelled.");
        return Ok(());
    }

    engine.close_thread(request).await?;
    output.success(&format!("Closed conversation {}", thread_id));
    Ok(())
}

fn confirm(thread_id: &str) -> Result<bool> {
    print!("Close conversation {}? It cannot be reopened. [y/N] ", thread_id);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .context("Failed to read confirmation")?;
    Ok(is_yes(&input))
}

fn is_yes(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}
