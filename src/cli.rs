//! Command-line argument parsing for the grant agent.

use crate::server::DEFAULT_INTERVAL_SECS;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Keeps database users and privileges in line with the control plane.
#[derive(Parser, Debug)]
#[command(name = "grant-agent")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short = 'c', long, value_name = "PATH", env = "GRANT_AGENT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Register the configured databases with the control plane
    UpsertDatabases,

    /// Run a single reconciliation cycle
    Run,

    /// Run reconciliation cycles until interrupted
    Server {
        /// Seconds to wait between cycles
        #[arg(long, value_name = "SECS", default_value_t = DEFAULT_INTERVAL_SECS)]
        interval_secs: u64,

        /// Write the process id here while running
        #[arg(long, value_name = "PATH")]
        pidfile: Option<PathBuf>,

        /// Append logs here instead of stderr
        #[arg(long, value_name = "PATH")]
        logfile: Option<PathBuf>,
    },

    /// Remove a user from a configured database
    DropUser {
        /// Configured database name
        #[arg(long)]
        database: String,

        /// User to drop
        #[arg(long)]
        username: String,
    },

    /// Create the config file and verify the access token
    Configure {
        /// Access token; prompted for when omitted
        #[arg(long, env = "GRANT_AGENT_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,

        /// Control plane URL
        #[arg(long, value_name = "URL")]
        server_url: Option<String>,
    },

    /// Print the agent version
    Version,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::Config::default_path)
    }
}
