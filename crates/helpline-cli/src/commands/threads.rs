//! Conversation list and creation

use anyhow::Result;

use helpline_core::SyncEngine;

use crate::output::Output;

/// List conversations
///
/// Falls back to the cached list when the server cannot be reached.
pub async fn list(engine: &SyncEngine, output: &Output) -> Result<()> {
    let threads = match engine.load_thread_list().await {
        Ok(threads) => threads,
        Err(e) => {
            let cached = engine.snapshot().threads;
            if cached.is_empty() {
                return Err(e.into());
            }
            output.warn(&format!("{} (showing cached conversations)", e));
            cached
        }
    };

    output.print_threads(&threads);
    Ok(())
}

/// Start a conversation, optionally with a first message
pub async fn create(
    engine: &SyncEngine,
    subject: &str,
    message: Option<&str>,
    output: &Output,
) -> Result<()> {
    let thread = engine.create_thread(subject).await?;

    if let Some(text) = message {
        engine.send_message(&thread.id, text).await?;
    }

    if output.is_quiet() || output.is_json() {
        output.print_thread(&thread);
    } else {
        output.success(&format!("Started conversation {}", thread.id));
        output.message(&format!("Continue with: helpline chat {}", thread.id));
    }
    Ok(())
}
