//! Helpline CLI
//!
//! Command-line client for support conversations.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use helpline_core::{
    Config, ConnectionManager, HttpSupportApi, LocalStore, MemoryStore, SqliteStore, SyncEngine,
    WebSocketTransport,
};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "helpline")]
#[command(about = "Helpline - real-time support chat")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use a specific config file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List conversations
    #[command(alias = "ls")]
    Threads,
    /// Start a new conversation
    New {
        /// What the conversation is about
        subject: String,
        /// First message to send
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Open a conversation and chat interactively
    Chat {
        /// Conversation ID (defaults to the last one opened)
        thread_id: Option<String>,
    },
    /// Close a conversation
    Close {
        /// Conversation ID
        thread_id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (api_url, socket_url, user_id, auth_token, ...)
        key: String,
        /// Configuration value ("none" clears optional keys)
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.unwrap_or_else(Config::config_file_path);

    // Config commands work without a server
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(&config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(&config_path, key, value, &output)
            }
        };
    }

    let config = Config::load_from_path(&config_path).context("Failed to load configuration")?;
    init_logging(&config);

    let engine = open_engine(&config, &output)?;

    let result = match cli.command {
        Commands::Threads => commands::threads::list(&engine, &output).await,
        Commands::New { subject, message } => {
            commands::threads::create(&engine, &subject, message.as_deref(), &output).await
        }
        Commands::Chat { thread_id } => commands::chat::run(&engine, thread_id, &output).await,
        Commands::Close { thread_id, yes } => {
            commands::close::close(&engine, &thread_id, yes, &output).await
        }
        Commands::Config { .. } => unreachable!(), // Handled above
    };

    engine.shutdown();
    result
}

/// Wire the engine to SQLite, the REST API and the push connection
fn open_engine(config: &Config, output: &Output) -> Result<SyncEngine> {
    let api_url = config.api_url.as_deref().context(
        "API URL not configured. Set it with:\n  \
         helpline config set api_url https://support.example.com/api",
    )?;
    let socket_url = config.socket_url.as_deref().context(
        "Push URL not configured. Set it with:\n  \
         helpline config set socket_url wss://support.example.com/ws",
    )?;

    let store: Arc<dyn LocalStore> = match SqliteStore::open(config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            // The cache is best-effort; run without it
            warn!("Local cache unavailable: {}", e);
            let mut notice = format!("Local cache unavailable: {}", e);
            if let Some(hint) = e.recovery_suggestion() {
                notice.push_str(&format!("\n  {}", hint));
            }
            output.warn(&notice);
            Arc::new(MemoryStore::new())
        }
    };

    let api = Arc::new(HttpSupportApi::new(api_url, config.auth_token.clone()));
    let transport = Arc::new(WebSocketTransport::new(
        socket_url,
        config.auth_token.clone(),
    ));
    let connection = ConnectionManager::new(transport, config.connection_config());

    Ok(SyncEngine::new(
        api,
        store,
        connection,
        config.typing_idle(),
    ))
}

/// Initialize file logging
///
/// Level comes from HELPLINE_LOG (default "info"). Logs go to
/// config.log_file or {data_dir}/helpline.log so they never mix with chat output.
fn init_logging(config: &Config) {
    let log_level = std::env::var("HELPLINE_LOG").unwrap_or_else(|_| "info".to_string());
    let log_path = config.log_path();

    let log_file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            return;
        }
    };

    let env_filter = if log_level.contains('=') {
        EnvFilter::new(log_level)
    } else {
        EnvFilter::new(format!(
            "helpline_core={},helpline_cli={}",
            log_level, log_level
        ))
    };

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Arc::new(log_file))
        .try_init();

    info!("Logging initialized to {:?}", log_path);
}
