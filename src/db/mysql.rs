//! MySQL database client implementation.
//!
//! MySQL identities are `user@host` pairs; the host part comes from the
//! database's `user_host` setting. Privileges are coarse, so revoking a user
//! is a single `REVOKE ALL PRIVILEGES, GRANT OPTION`.

use crate::config::DatabaseConfig;
use crate::db::{check_password, DatabaseBackend, DatabaseClient};
use crate::error::{AgentError, Result};
use crate::templates::{self, TemplateContext};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection};
use tracing::debug;

/// Quotes an identifier with backticks, doubling embedded backticks.
pub fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Quotes a string literal for the default `sql_mode`, where backslash escapes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// MySQL database client.
#[derive(Debug)]
pub struct MysqlClient {
    conn: MySqlConnection,
    config: DatabaseConfig,
}

impl MysqlClient {
    /// Opens a connection as the configured master user.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let conn = connect_options(config)
            .connect()
            .await
            .map_err(|e| map_connection_error(e, config))?;
        debug!("Connected to {}", config.display_string());
        Ok(Self {
            conn,
            config: config.clone(),
        })
    }

    /// Returns the quoted `user@host` identity for a managed user.
    pub fn identity(&self, username: &str) -> String {
        format!(
            "{}@{}",
            quote_ident(username),
            quote_ident(self.config.user_host())
        )
    }

    fn template_context(&self, username: &str, password: Option<&str>) -> TemplateContext {
        let mut ctx = TemplateContext::new(DatabaseBackend::Mysql.as_str(), self.identity(username));
        if let Some(database) = &self.config.database {
            ctx = ctx.with_database(quote_ident(database));
        }
        match password {
            Some(password) => ctx.with_password(quote_literal(password)),
            None => ctx,
        }
    }
}

#[async_trait(?Send)]
impl DatabaseClient for MysqlClient {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Mysql
    }

    async fn find_user(&mut self, username: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM mysql.user WHERE user = ? AND host = ?")
                .bind(username)
                .bind(self.config.user_host())
                .fetch_one(&mut self.conn)
                .await
                .map_err(|e| {
                    AgentError::query(format!("Failed to look up user {username}: {e}"))
                })?;
        Ok(count > 0)
    }

    async fn create_user(&mut self, username: &str, password: &str) -> Result<()> {
        check_password(password)?;
        let sql = format!(
            "CREATE USER {} IDENTIFIED BY {}",
            self.identity(username),
            quote_literal(password)
        );
        execute(&mut self.conn, &sql)
            .await
            .map_err(|e| AgentError::query(format!("Failed to create user {username}: {e}")))
    }

    async fn update_password(&mut self, username: &str, password: &str) -> Result<()> {
        check_password(password)?;
        let sql = format!(
            "ALTER USER {} IDENTIFIED BY {}",
            self.identity(username),
            quote_literal(password)
        );
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
        let ctx = self.template_context(username, password);
        let mut rendered = Vec::new();
        for template in statements {
            rendered.extend(templates::expand(template, &ctx)?);
        }

        let revoke = revoke_sql(&self.identity(username));
        let mut tx = self.conn.begin().await.map_err(|e| {
            AgentError::query(format!("Failed to begin transaction: {e}"))
        })?;

        debug!("SQL: {revoke}");
        execute(&mut tx, &revoke).await?;
        for sql in &rendered {
            debug!("SQL: {sql}");
            execute(&mut tx, sql).await?;
        }

        tx.commit()
            .await
            .map_err(|e| AgentError::query(format!("Failed to commit grant: {e}")))
    }

    async fn revoke_everything(&mut self, username: &str) -> Result<()> {
        let sql = revoke_sql(&self.identity(username));
        execute(&mut self.conn, &sql).await
    }

    async fn drop_user(&mut self, username: &str) -> Result<()> {
        let sql = format!("DROP USER {}", self.identity(username));
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

fn revoke_sql(identity: &str) -> String {
    format!("REVOKE ALL PRIVILEGES, GRANT OPTION FROM {identity}")
}

fn connect_options(config: &DatabaseConfig) -> MySqlConnectOptions {
    // Statement logging would leak passwords from CREATE USER.
    let mut options = MySqlConnectOptions::new()
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

async fn execute(conn: &mut MySqlConnection, sql: &str) -> Result<()> {
    sqlx::raw_sql(sql)
        .execute(&mut *conn)
        .await
        .map(|_| ())
        .map_err(|e| match e.as_database_error() {
            Some(db_error) => AgentError::query(format!("ERROR: {}", db_error.message())),
            None => AgentError::query(e.to_string()),
        })
}

fn map_connection_error(error: sqlx::Error, config: &DatabaseConfig) -> AgentError {
    let error_str = error.to_string().to_lowercase();
    if error_str.contains("access denied") {
        AgentError::connection(format!(
            "Authentication failed for user '{}'. Check the configured credentials.",
            config.user
        ))
    } else if error_str.contains("connection refused") {
        AgentError::connection(format!(
            "Cannot connect to {}:{}. Check that the server is running.",
            config.host,
            config.port()
        ))
    } else {
        AgentError::connection(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("alice"), "`alice`");
        assert_eq!(quote_ident("a`b"), "`a``b`");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("PasW';drop table `foo`"), "'PasW'';drop table `foo`'");
        assert_eq!(quote_literal("a\\'"), "'a\\\\'''");
    }

    #[test]
    fn test_revoke_sql() {
        assert_eq!(
            revoke_sql("`alice`@`%`"),
            "REVOKE ALL PRIVILEGES, GRANT OPTION FROM `alice`@`%`"
        );
    }
}
