//! Database abstraction layer for the grant agent.
//!
//! Provides a trait-based interface over the engines the agent manages, so
//! the reconciliation loop can provision users and apply privileges without
//! knowing which SQL dialect sits behind a configured database.

pub mod catalog;
mod mock;
mod mysql;
mod postgres;

pub use catalog::Catalog;
pub use mock::{MockConnector, MockDatabaseClient, MockState};
pub use mysql::MysqlClient;
pub use postgres::{PgFlavor, PostgresClient};

use crate::config::DatabaseConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Supported database backends, selected by the `type` tag in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseBackend {
    #[serde(rename = "postgresql", alias = "postgres")]
    Postgres,
    #[serde(rename = "redshift")]
    Redshift,
    #[serde(rename = "mysql")]
    Mysql,
}

impl DatabaseBackend {
    /// Returns the tag reported to the control plane.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgresql",
            Self::Redshift => "redshift",
            Self::Mysql => "mysql",
        }
    }

    /// Parses a backend from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "redshift" => Some(Self::Redshift),
            "mysql" => Some(Self::Mysql),
            _ => None,
        }
    }

    /// Returns the default port for this backend.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Redshift => 5439,
            Self::Mysql => 3306,
        }
    }

    /// Whether a connection must name a database.
    pub fn requires_database(&self) -> bool {
        !matches!(self, Self::Mysql)
    }
}

/// What `apply_password` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordChange {
    Created,
    Updated,
    Unchanged,
}

/// Creates a database client for the given configuration.
///
/// This is the central factory function for target database connections.
pub async fn connect(config: &DatabaseConfig) -> Result<Box<dyn DatabaseClient>> {
    match config.backend {
        DatabaseBackend::Postgres => {
            let client = PostgresClient::connect(config, PgFlavor::Native).await?;
            Ok(Box::new(client))
        }
        DatabaseBackend::Redshift => {
            let client = PostgresClient::connect(config, PgFlavor::Redshift).await?;
            Ok(Box::new(client))
        }
        DatabaseBackend::Mysql => {
            let client = MysqlClient::connect(config).await?;
            Ok(Box::new(client))
        }
    }
}

/// Capabilities every managed engine provides.
///
/// A client owns one connection to the target database. Operations that
/// change state run in their own transaction and either commit fully or
/// leave the database untouched.
///
/// Method futures are not `Send`: sqlx executors over a borrowed connection
/// cannot satisfy the higher-ranked bound a boxed `Send` future needs. The
/// agent drives clients on the task that opened them.
#[async_trait(?Send)]
pub trait DatabaseClient: Send {
    /// Returns the engine behind this client.
    fn backend(&self) -> DatabaseBackend;

    /// Checks whether the user exists.
    async fn find_user(&mut self, username: &str) -> Result<bool>;

    /// Creates the user. Fails if it already exists.
    async fn create_user(&mut self, username: &str, password: &str) -> Result<()>;

    /// Changes the user's password. Fails if the user does not exist.
    async fn update_password(&mut self, username: &str, password: &str) -> Result<()>;

    /// Checks whether `password` already logs the user in.
    async fn password_matches(&mut self, username: &str, password: &str) -> Result<bool>;

    /// Renders and executes the statement templates for the user in one
    /// transaction, after revoking whatever the user held before.
    async fn apply_statements(
        &mut self,
        username: &str,
        password: Option<&str>,
        statements: &[String],
    ) -> Result<()>;

    /// Removes every privilege `apply_statements` could have granted, keeping
    /// the login itself.
    async fn revoke_everything(&mut self, username: &str) -> Result<()>;

    /// Removes the user entirely.
    async fn drop_user(&mut self, username: &str) -> Result<()>;

    /// Closes the connection.
    async fn close(self: Box<Self>) -> Result<()>;

    /// Creates the user if absent, otherwise rotates its password, skipping
    /// the write when the password is already current.
    async fn apply_password(&mut self, username: &str, password: &str) -> Result<PasswordChange> {
        if !self.find_user(username).await? {
            self.create_user(username, password).await?;
            return Ok(PasswordChange::Created);
        }
        if self.password_matches(username, password).await? {
            return Ok(PasswordChange::Unchanged);
        }
        self.update_password(username, password).await?;
        Ok(PasswordChange::Updated)
    }
}

/// Opens clients for configured databases.
///
/// The reconciliation loop goes through this seam so tests can substitute an
/// in-memory engine.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn DatabaseClient>>;
}

/// Connector that opens real driver connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverConnector;

#[async_trait]
impl Connector for DriverConnector {
    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn DatabaseClient>> {
        connect(config).await
    }
}

/// Rejects passwords that cannot be embedded in a SQL literal.
pub(crate) fn check_password(password: &str) -> Result<()> {
    if password.contains('\0') {
        return Err(crate::error::AgentError::query(
            "Passwords may not contain NUL characters",
        ));
    }
    Ok(())
}
