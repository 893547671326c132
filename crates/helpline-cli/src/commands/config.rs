//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use helpline_core::Config;

use crate::output::{Output, OutputFormat};

const KEYS: &str = "data_dir, api_url, socket_url, user_id, auth_token, \
                    reconnect_attempts, reconnect_delay_ms, typing_idle_ms, log_file";

/// Show current configuration
pub fn show(config_path: &PathBuf, output: &Output) -> Result<()> {
    let config = Config::load_from_path(config_path).context("Failed to load configuration")?;
    let token = config.auth_token.as_ref().map(|_| "********");

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "api_url": config.api_url,
                    "socket_url": config.socket_url,
                    "user_id": config.user_id,
                    "auth_token": token,
                    "reconnect_attempts": config.reconnect_attempts,
                    "reconnect_delay_ms": config.reconnect_delay_ms,
                    "typing_idle_ms": config.typing_idle_ms,
                    "log_file": config.log_path()
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:           {}", config.data_dir.display());
            println!("  api_url:            {}", or_unset(config.api_url.as_deref()));
            println!("  socket_url:         {}", or_unset(config.socket_url.as_deref()));
            println!("  user_id:            {}", or_unset(config.user_id.as_deref()));
            println!("  auth_token:         {}", or_unset(token));
            println!("  reconnect_attempts: {}", config.reconnect_attempts);
            println!("  reconnect_delay_ms: {}", config.reconnect_delay_ms);
            println!("  typing_idle_ms:     {}", config.typing_idle_ms);
            println!("  log_file:           {}", config.log_path().display());
            println!();
            println!("Config file: {}", config_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(config_path: &PathBuf, key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load_from_path(config_path).context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;

    config
        .save_to_path(config_path)
        .context("Failed to save configuration")?;

    let shown = if key == "auth_token" { "********" } else { value.as_str() };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "api_url" => config.api_url = optional(value),
        "socket_url" => config.socket_url = optional(value),
        "user_id" => config.user_id = optional(value),
        "auth_token" => config.auth_token = optional(value),
        "reconnect_attempts" => {
            config.reconnect_attempts = value
                .parse()
                .context("Invalid value for reconnect_attempts. Use a whole number.")?;
        }
        "reconnect_delay_ms" => {
            config.reconnect_delay_ms = value
                .parse()
                .context("Invalid value for reconnect_delay_ms. Use milliseconds.")?;
        }
        "typing_idle_ms" => {
            config.typing_idle_ms = value
                .parse()
                .context("Invalid value for typing_idle_ms. Use milliseconds.")?;
        }
        "log_file" => config.log_file = optional(value).map(PathBuf::from),
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                KEYS
            );
        }
    }
    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(not set)")
}
