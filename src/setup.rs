//! First-run setup.
//!
//! Writes a minimal config holding the access token and proves the token
//! works with an empty check-in.

use crate::api::{Checkin, ControlPlane, HttpControlPlane};
use crate::config::Config;
use crate::error::{AgentError, Result};
use dialoguer::Password;
use std::path::Path;
use tracing::info;

/// Creates the config file if needed, then verifies the token.
pub async fn configure(
    path: &Path,
    access_token: Option<String>,
    server_url: Option<String>,
) -> Result<()> {
    let config = if path.exists() {
        info!("Using existing config at {}", path.display());
        Config::load_from_file(path)?
    } else {
        let token = match access_token {
            Some(token) => token,
            None => prompt_token()?,
        };
        let config = initial_config(&token, server_url)?;
        config.save_to_file(path)?;
        println!("Wrote config to {}", path.display());
        config
    };

    let control_plane = HttpControlPlane::new(&config)?;
    verify_token(&control_plane).await?;
    println!("Access token accepted by {}", config.server_url);
    Ok(())
}

/// Builds a config with no databases yet.
pub fn initial_config(token: &str, server_url: Option<String>) -> Result<Config> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AgentError::config("The access token must not be empty"));
    }
    let mut config = Config::new(token);
    if let Some(url) = server_url {
        config.server_url = url;
    }
    config.server_base()?;
    Ok(config)
}

/// Sends an empty check-in, turning a rejected token into setup advice.
pub async fn verify_token(control_plane: &dyn ControlPlane) -> Result<()> {
    match control_plane.checkin(&Checkin::new(Vec::new())).await {
        Err(AgentError::Unauthorized(_)) => Err(AgentError::unauthorized(
            "The access token is invalid. Create a new token and run `grant-agent configure` again.",
        )),
        other => other,
    }
}

fn prompt_token() -> Result<String> {
    Password::new()
        .with_prompt("Access token")
        .interact()
        .map_err(|e| AgentError::config(format!("Could not read access token: {e}")))
}
