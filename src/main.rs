//! grant-agent - reconciles database users and privileges with a control plane.

use grant_agent::agent::Agent;
use grant_agent::api::{HttpControlPlane, AGENT_VERSION};
use grant_agent::cli::{Cli, Command};
use grant_agent::config::Config;
use grant_agent::db::DriverConnector;
use grant_agent::error::Result;
use grant_agent::ledger::Ledger;
use grant_agent::{logging, server, setup};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

fn main() {
    let cli = Cli::parse_args();

    if let Err(e) = run(cli) {
        logging::init_stderr_logging(false);
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config_path();

    match cli.command {
        Command::Version => {
            println!("grant-agent {AGENT_VERSION}");
            Ok(())
        }
        Command::Configure {
            access_token,
            server_url,
        } => {
            logging::init_stderr_logging(false);
            setup::configure(&config_path, access_token, server_url).await
        }
        Command::UpsertDatabases => {
            load_agent(&config_path, None)
                .await?
                .upsert_databases()
                .await
        }
        Command::Run => load_agent(&config_path, None).await?.run_once().await,
        Command::Server {
            interval_secs,
            pidfile,
            logfile,
        } => {
            let agent = load_agent(&config_path, logfile.as_deref()).await?;
            server::serve(&agent, Duration::from_secs(interval_secs), pidfile.as_deref()).await
        }
        Command::DropUser { database, username } => {
            load_agent(&config_path, None)
                .await?
                .drop_user(&database, &username)
                .await
        }
    }
}

/// Loads the config, starts logging and wires up the agent.
async fn load_agent(config_path: &Path, logfile: Option<&Path>) -> Result<Agent> {
    let config = Config::load_from_file(config_path)?;

    match logfile {
        Some(path) => logging::init_file_logging(path, config.debug)?,
        None => logging::init_stderr_logging(config.debug),
    }
    info!("Loaded config from {}", config_path.display());

    let control_plane = HttpControlPlane::new(&config)?;
    let state_path = config.state_path();
    let agent = Agent::new(config, Arc::new(control_plane), Arc::new(DriverConnector));

    match Ledger::open(&state_path).await {
        Ok(ledger) => Ok(agent.with_ledger(ledger)),
        Err(e) => {
            warn!("Running without a ledger: {e}");
            Ok(agent)
        }
    }
}
