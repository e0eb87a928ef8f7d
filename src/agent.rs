//! Grant reconciliation loop.
//!
//! One cycle registers the configured databases, fetches grant intents,
//! applies each one against its target database and reports the outcomes.
//! Failures are contained per grant and per phase; only an invalid access
//! token ends a cycle early.

use crate::api::{Checkin, ControlPlane, DatabaseRegistration};
use crate::config::{Config, DatabaseConfig};
use crate::db::{Connector, DatabaseClient};
use crate::error::{AgentError, Result};
use crate::grants::{AppliedGrant, Grant, GrantResult};
use crate::ledger::Ledger;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Everything one reconciliation needs, passed explicitly.
pub struct Agent {
    config: Config,
    control_plane: Arc<dyn ControlPlane>,
    connector: Arc<dyn Connector>,
    ledger: Option<Ledger>,
}

impl Agent {
    pub fn new(
        config: Config,
        control_plane: Arc<dyn ControlPlane>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            control_plane,
            connector,
            ledger: None,
        }
    }

    /// Remembers applied versions so unchanged grants are skipped.
    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs one full cycle.
    ///
    /// Registration and grant application fail independently. Only
    /// `Unauthorized` is returned, since retrying a rejected token is futile.
    pub async fn run_once(&self) -> Result<()> {
        match self.upsert_databases().await {
            Ok(()) => {}
            Err(e @ AgentError::Unauthorized(_)) => return Err(e),
            Err(e) => error!("Failed to upsert databases: {}: {}", e.category(), e),
        }

        match self.apply_grants().await {
            Ok(applied) => {
                info!("Cycle complete, reported {} result(s)", applied.len());
                Ok(())
            }
            Err(e @ AgentError::Unauthorized(_)) => Err(e),
            Err(e) => {
                error!("Failed to apply grants: {}: {}", e.category(), e);
                Ok(())
            }
        }
    }

    /// Announces every configured database to the control plane.
    pub async fn upsert_databases(&self) -> Result<()> {
        let databases = DatabaseRegistration::from_config(&self.config);
        info!("Registering {} database(s)", databases.len());
        self.control_plane.upsert_databases(&databases).await
    }

    /// Fetches, applies and reports all grants, returning what was reported.
    pub async fn apply_grants(&self) -> Result<Vec<AppliedGrant>> {
        let intents = self.control_plane.fetch_grants().await?;
        info!("Fetched {} grant(s)", intents.len());

        let mut applied = Vec::new();
        for intent in intents {
            let grant = match Grant::parse(intent) {
                Ok(grant) => grant,
                Err(e) => {
                    warn!("Skipping grant: {e}");
                    continue;
                }
            };

            let result = self.apply_grant(&grant).await;
            if result.is_reported() {
                applied.push(grant.outcome(result));
            }
        }

        self.control_plane
            .checkin(&Checkin::new(applied.clone()))
            .await?;
        Ok(applied)
    }

    /// Reconciles one grant. Never fails; errors become `UnknownError`.
    pub async fn apply_grant(&self, grant: &Grant) -> GrantResult {
        let span = info_span!(
            "grant",
            id = %grant.id,
            database = %grant.database,
            username = %grant.username,
        );

        async {
            let database = match self.config.find_database(&grant.database) {
                Ok(database) => database,
                Err(e) => {
                    warn!("{e}");
                    return GrantResult::UnknownDatabase;
                }
            };

            if self.is_current(grant).await {
                debug!("Version {} already applied", grant.version);
                return GrantResult::NoChange;
            }

            let result = match self.reconcile(database, grant).await {
                Ok(result) => result,
                Err(e) => {
                    error!("{}: {}", e.category(), e);
                    GrantResult::UnknownError
                }
            };
            info!("Result: {result}");

            if let Some(ledger) = &self.ledger {
                if let Err(e) = ledger.record(grant, result).await {
                    warn!("Failed to record grant in ledger: {e}");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn is_current(&self, grant: &Grant) -> bool {
        let Some(ledger) = &self.ledger else {
            return false;
        };
        ledger.is_current(grant).await.unwrap_or_else(|e| {
            warn!("Ledger lookup failed, applying anyway: {e}");
            false
        })
    }

    async fn reconcile(&self, database: &DatabaseConfig, grant: &Grant) -> Result<GrantResult> {
        let mut client = self.connector.connect(database).await?;
        let result = reconcile_with(client.as_mut(), grant).await;
        if let Err(e) = client.close().await {
            warn!("{e}");
        }
        result
    }

    /// Removes a user from a configured database and forgets its grants, so
    /// the next cycle provisions it from scratch.
    pub async fn drop_user(&self, database: &str, username: &str) -> Result<()> {
        let config = self.config.find_database(database)?;
        let mut client = self.connector.connect(config).await?;

        let result = async {
            if client.find_user(username).await? {
                client.drop_user(username).await?;
                info!("Dropped user {username} from {database}");
            } else {
                warn!("User {username} does not exist in {database}");
            }
            Ok::<_, AgentError>(())
        }
        .await;

        if let Err(e) = client.close().await {
            warn!("{e}");
        }
        result?;

        if let Some(ledger) = &self.ledger {
            let forgotten = ledger.forget_user(database, username).await?;
            debug!("Forgot {forgotten} ledger entries for {username}");
        }
        Ok(())
    }
}

async fn reconcile_with(client: &mut dyn DatabaseClient, grant: &Grant) -> Result<GrantResult> {
    let username = grant.username.as_str();

    if grant.revoke {
        if client.find_user(username).await? {
            client.drop_user(username).await?;
        } else {
            debug!("User does not exist, nothing to revoke");
        }
        return Ok(GrantResult::Revoked);
    }

    match grant.password.as_deref() {
        Some(password) => {
            let change = client.apply_password(username, password).await?;
            debug!("Password: {change:?}");
        }
        None => {
            if !client.find_user(username).await? {
                warn!("User does not exist and no password was provided");
                return Ok(GrantResult::NoPassword);
            }
        }
    }

    // Without templates the grant only manages the login.
    if grant.statements.is_empty() {
        return Ok(GrantResult::Applied);
    }

    client
        .apply_statements(username, grant.password.as_deref(), &grant.statements)
        .await?;
    debug!("Applied {} statement template(s)", grant.statements.len());
    Ok(GrantResult::Applied)
}
