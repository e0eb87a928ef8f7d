//! Mock database client for testing.
//!
//! Provides an in-memory engine for headless testing of the reconciliation
//! loop. All clients opened by one `MockConnector` share a single
//! `MockState`, so tests can inspect what the agent did after it closed its
//! connections.

use super::postgres::{quote_ident, quote_literal};
use super::{check_password, Connector, DatabaseBackend, DatabaseClient};
use crate::config::DatabaseConfig;
use crate::error::{AgentError, Result};
use crate::templates::{self, SchemaContext, TemplateContext};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Everything the mock engine remembers.
#[derive(Debug, Clone, Default)]
pub struct MockState {
    /// Username -> current password.
    pub users: BTreeMap<String, String>,
    /// Username -> rendered statements currently in effect.
    pub grants: BTreeMap<String, Vec<String>>,
    /// Schemas visible to templates.
    pub schemas: Vec<String>,
    /// Every statement committed, in order.
    pub executed: Vec<String>,
    /// Number of create or alter password writes.
    pub password_writes: usize,
    /// Number of connections opened.
    pub connects: usize,
    /// Any rendered statement containing this text fails.
    pub fail_on: Option<String>,
    /// Refuse every new connection.
    pub refuse_connections: bool,
}

/// Connector handing out clients over a shared `MockState`.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an existing user.
    pub fn with_user(self, username: &str, password: &str) -> Self {
        self.state()
            .users
            .insert(username.to_string(), password.to_string());
        self
    }

    /// Sets the schemas templates can loop over.
    pub fn with_schemas(self, schemas: &[&str]) -> Self {
        self.state().schemas = schemas.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Locks the shared state.
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns a copy of the shared state.
    pub fn snapshot(&self) -> MockState {
        self.state().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn DatabaseClient>> {
        let mut state = self.state();
        if state.refuse_connections {
            return Err(AgentError::connection(format!(
                "Cannot connect to {}:{}",
                config.host,
                config.port()
            )));
        }
        state.connects += 1;
        Ok(Box::new(MockDatabaseClient {
            state: Arc::clone(&self.state),
            backend: config.backend,
            database: config.database.clone().unwrap_or_else(|| "mock".into()),
        }))
    }
}

/// A client over the shared mock state.
#[derive(Debug)]
pub struct MockDatabaseClient {
    state: Arc<Mutex<MockState>>,
    backend: DatabaseBackend,
    database: String,
}

impl MockDatabaseClient {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn template_context(&self, username: &str, password: Option<&str>) -> TemplateContext {
        let schemas = self
            .state()
            .schemas
            .iter()
            .map(|name| SchemaContext {
                name: quote_ident(name),
                tables: Vec::new(),
            })
            .collect();
        let ctx = TemplateContext::new(self.backend.as_str(), quote_ident(username))
            .with_database(quote_ident(&self.database))
            .with_catalog(schemas);
        match password {
            Some(password) => ctx.with_password(quote_literal(password)),
            None => ctx,
        }
    }
}

#[async_trait(?Send)]
impl DatabaseClient for MockDatabaseClient {
    fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    async fn find_user(&mut self, username: &str) -> Result<bool> {
        Ok(self.state().users.contains_key(username))
    }

    async fn create_user(&mut self, username: &str, password: &str) -> Result<()> {
        check_password(password)?;
        let mut state = self.state();
        if state.users.contains_key(username) {
            return Err(AgentError::query(format!("role \"{username}\" already exists")));
        }
        state.users.insert(username.to_string(), password.to_string());
        state.password_writes += 1;
        Ok(())
    }

    async fn update_password(&mut self, username: &str, password: &str) -> Result<()> {
        check_password(password)?;
        let mut state = self.state();
        match state.users.get_mut(username) {
            Some(current) => *current = password.to_string(),
            None => {
                return Err(AgentError::query(format!("role \"{username}\" does not exist")))
            }
        }
        state.password_writes += 1;
        Ok(())
    }

    async fn password_matches(&mut self, username: &str, password: &str) -> Result<bool> {
        Ok(self.state().users.get(username).is_some_and(|p| p == password))
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

        let mut state = self.state();
        if let Some(needle) = state.fail_on.as_deref() {
            if let Some(bad) = rendered.iter().find(|sql| sql.contains(needle)) {
                return Err(AgentError::query(format!("ERROR: mock failure in {bad}")));
            }
        }
        state.executed.extend(rendered.iter().cloned());
        state.grants.insert(username.to_string(), rendered);
        Ok(())
    }

    async fn revoke_everything(&mut self, username: &str) -> Result<()> {
        self.state().grants.remove(username);
        Ok(())
    }

    async fn drop_user(&mut self, username: &str) -> Result<()> {
        let mut state = self.state();
        state.grants.remove(username);
        if state.users.remove(username).is_none() {
            return Err(AgentError::query(format!("role \"{username}\" does not exist")));
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
