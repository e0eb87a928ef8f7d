//! Long-running server mode.
//!
//! Runs reconciliation cycles on a fixed interval in the foreground until
//! interrupted. Daemonizing is left to the service manager.

use crate::agent::Agent;
use crate::error::{AgentError, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Default pause between cycles.
pub const DEFAULT_INTERVAL_SECS: u64 = 30;

/// A pidfile removed when dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Writes the current process id to `path`.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AgentError::config(format!(
                    "Could not create pidfile directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        std::fs::write(path, format!("{}\n", std::process::id())).map_err(|e| {
            AgentError::config(format!("Could not write pidfile {}: {e}", path.display()))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Could not remove pidfile {}: {e}", self.path.display());
        }
    }
}

/// Runs cycles until Ctrl-C.
pub async fn serve(agent: &Agent, interval: Duration, pidfile: Option<&Path>) -> Result<()> {
    let _pidfile = pidfile.map(PidFile::create).transpose()?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };
    serve_until(agent, interval, shutdown).await
}

/// Runs cycles until `shutdown` completes or the token is rejected.
///
/// A shutdown that arrives mid-cycle lets the cycle finish, so grants already
/// applied are still checked in.
pub async fn serve_until<F>(agent: &Agent, interval: Duration, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    info!("Starting server, cycle interval {:?}", interval);

    loop {
        let cycle = agent.run_once();
        tokio::pin!(cycle);

        let finished = tokio::select! {
            result = &mut cycle => Some(result),
            _ = &mut shutdown => None,
        };
        match finished {
            Some(result) => result?,
            None => {
                info!("Shutdown requested, finishing the current cycle");
                cycle.await?;
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut shutdown => break,
        }
    }

    info!("Shutting down");
    Ok(())
}
