//! PostgreSQL-family database client implementation.
//!
//! Provides the `PostgresClient` struct that implements the `DatabaseClient` trait
//! for PostgreSQL and Redshift using sqlx.

use crate::config::DatabaseConfig;
use crate::db::{check_password, Catalog, DatabaseBackend, DatabaseClient};
use crate::error::{AgentError, Result};
use crate::templates::{self, TemplateContext};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Differences between Postgres-family engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgFlavor {
    Native,
    Redshift,
}

impl PgFlavor {
    pub fn backend(&self) -> DatabaseBackend {
        match self {
            Self::Native => DatabaseBackend::Postgres,
            Self::Redshift => DatabaseBackend::Redshift,
        }
    }

    /// Whether `REVOKE ALL (columns) ON TABLE` is available.
    pub fn supports_column_privileges(&self) -> bool {
        matches!(self, Self::Native)
    }

    fn user_exists_query(&self) -> &'static str {
        match self {
            Self::Native => {
                "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_roles WHERE rolname = $1)"
            }
            Self::Redshift => {
                "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_user WHERE usename = $1)"
            }
        }
    }

    fn create_user_sql(&self, username: &str, password: &str) -> String {
        format!(
            "CREATE USER {} PASSWORD {}",
            quote_ident(username),
            quote_literal(password)
        )
    }

    fn update_password_sql(&self, username: &str, password: &str) -> String {
        match self {
            Self::Native => format!(
                "ALTER USER {} WITH ENCRYPTED PASSWORD {}",
                quote_ident(username),
                quote_literal(password)
            ),
            Self::Redshift => format!(
                "ALTER USER {} PASSWORD {}",
                quote_ident(username),
                quote_literal(password)
            ),
        }
    }
}

/// Quotes an identifier, doubling embedded double quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quotes a string literal the way `quote_literal()` does server-side.
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    if value.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{escaped}'")
    }
}

/// PostgreSQL-family database client.
#[derive(Debug)]
pub struct PostgresClient {
    conn: PgConnection,
    config: DatabaseConfig,
    flavor: PgFlavor,
}

impl PostgresClient {
    /// Opens a connection as the configured master user.
    pub async fn connect(config: &DatabaseConfig, flavor: PgFlavor) -> Result<Self> {
        let options = connect_options(config);

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            match options.connect().await {
                Ok(conn) => {
                    debug!("Connected to {}", config.display_string());
                    return Ok(Self {
                        conn,
                        config: config.clone(),
                        flavor,
                    });
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    } else {
                        break;
                    }
                }
            }
        }

        Err(match last_error {
            Some(e) => map_connection_error(e, config),
            None => AgentError::connection("No connection attempt was made"),
        })
    }
}

#[async_trait(?Send)]
impl DatabaseClient for PostgresClient {
    fn backend(&self) -> DatabaseBackend {
        self.flavor.backend()
    }

    async fn find_user(&mut self, username: &str) -> Result<bool> {
        sqlx::query_scalar(self.flavor.user_exists_query())
            .bind(username)
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| AgentError::query(format!("Failed to look up user {username}: {e}")))
    }

    async fn create_user(&mut self, username: &str, password: &str) -> Result<()> {
        check_password(password)?;
        let sql = self.flavor.create_user_sql(username, password);
        execute(&mut self.conn, &sql)
            .await
            .map_err(|e| AgentError::query(format!("Failed to create user {username}: {e}")))
    }

    async fn update_password(&mut self, username: &str, password: &str) -> Result<()> {
        check_password(password)?;
        let sql = self.flavor.update_password_sql(username, password);
        execute(&mut self.conn, &sql).await.map_err(|e| {
            AgentError::query(format!("Failed to update password for {username}: {e}"))
        })
    }

    async fn password_matches(&mut self, username: &str, password: &str) -> Result<bool> {
        let options = connect_options(&self.config.with_login(username, password));
        match options.connect().await {
            Ok(conn) => {
                let _ = conn.close().await;
                Ok(true)
            }
            Err(e) => {
                debug!("Login probe for {username} failed: {e}");
                Ok(false)
            }
        }
    }

    async fn apply_statements(
        &mut self,
        username: &str,
        password: Option<&str>,
        statements: &[String],
    ) -> Result<()> {
        let flavor = self.flavor;
        let mut tx = self.conn.begin().await.map_err(|e| {
            AgentError::query(format!("Failed to begin transaction: {e}"))
        })?;

        let catalog = Catalog::discover(&mut tx).await?;
        for sql in catalog.revoke_statements(username, flavor) {
            debug!("SQL: {sql}");
            execute(&mut tx, &sql).await?;
        }

        let ctx = template_context(flavor, &catalog, username, password);
        for template in statements {
            for sql in templates::expand(template, &ctx)? {
                debug!("SQL: {sql}");
                execute(&mut tx, &sql).await?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| AgentError::query(format!("Failed to commit grant: {e}")))
    }

    async fn revoke_everything(&mut self, username: &str) -> Result<()> {
        let flavor = self.flavor;
        let mut tx = self.conn.begin().await.map_err(|e| {
            AgentError::query(format!("Failed to begin transaction: {e}"))
        })?;

        let catalog = Catalog::discover(&mut tx).await?;
        for sql in catalog.revoke_statements(username, flavor) {
            debug!("SQL: {sql}");
            execute(&mut tx, &sql).await?;
        }

        tx.commit()
            .await
            .map_err(|e| AgentError::query(format!("Failed to commit revoke: {e}")))
    }

    async fn drop_user(&mut self, username: &str) -> Result<()> {
        // DROP USER refuses while privileges remain. The revoke commits on its
        // own so a refused drop (owned objects) still leaves no access behind.
        self.revoke_everything(username).await?;

        let sql = format!("DROP USER {}", quote_ident(username));
        debug!("SQL: {sql}");
        execute(&mut self.conn, &sql)
            .await
            .map_err(|e| AgentError::query(format!("Failed to drop user {username}: {e}")))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|e| AgentError::connection(format!("Failed to close connection: {e}")))
    }
}

fn template_context(
    flavor: PgFlavor,
    catalog: &Catalog,
    username: &str,
    password: Option<&str>,
) -> TemplateContext {
    let ctx = TemplateContext::new(flavor.backend().as_str(), quote_ident(username))
        .with_database(quote_ident(catalog.database()))
        .with_catalog(catalog.to_template_schemas());
    match password {
        Some(password) => ctx.with_password(quote_literal(password)),
        None => ctx,
    }
}

fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    // Statement logging would leak passwords from CREATE USER.
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port())
        .username(&config.user)
        .disable_statement_logging();
    if let Some(password) = &config.password {
        options = options.password(password);
    }
    if let Some(database) = &config.database {
        options = options.database(database);
    }
    options
}

/// Runs one statement over the simple query protocol.
async fn execute(conn: &mut PgConnection, sql: &str) -> Result<()> {
    sqlx::raw_sql(sql)
        .execute(&mut *conn)
        .await
        .map(|_| ())
        .map_err(|e| AgentError::query(format_query_error(e)))
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

/// Maps sqlx connection errors to messages naming the target.
fn map_connection_error(error: sqlx::Error, config: &DatabaseConfig) -> AgentError {
    let host = &config.host;
    let port = config.port();
    let user = &config.user;
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        AgentError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        AgentError::connection(format!(
            "Authentication failed for user '{user}'. Check the configured credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        AgentError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        AgentError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        AgentError::connection(error.to_string())
    }
}

/// Formats a query error with detail and hint when the server sent them.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }

    result
}
