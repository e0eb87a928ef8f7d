//! Logging configuration for the grant agent.
//!
//! Logs go to stderr by default. The long-running server can append to a
//! log file instead, which is how service managers usually collect them.

use crate::error::{AgentError, Result};
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Builds the filter: `RUST_LOG` wins, then the config's `debug` flag.
pub fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(debug)))
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "info,grant_agent=debug"
    } else {
        "info"
    }
}

/// Initializes logging to stderr. Does nothing if logging is already set up.
pub fn init_stderr_logging(debug: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(std::io::stderr)
        .try_init();
}

/// Initializes logging that appends to `path`.
pub fn init_file_logging(path: &Path, debug: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            AgentError::config(format!(
                "Could not create log directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            AgentError::config(format!("Could not open log file {}: {e}", path.display()))
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(Mutex::new(log_file))
        .with_ansi(false) // No ANSI colors in file output
        .try_init()
        .map_err(|e| AgentError::internal(format!("Logging already initialized: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "info");
        assert!(default_directive(true).contains("grant_agent=debug"));
    }
}
