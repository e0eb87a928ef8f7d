//! In-memory control plane for testing.
//!
//! Serves a fixed list of grant intents and records everything the agent
//! sends back.

use super::{Checkin, ControlPlane, DatabaseRegistration};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Recorded {
    grants: Vec<serde_json::Value>,
    registrations: Vec<Vec<DatabaseRegistration>>,
    checkins: Vec<Checkin>,
    fail_upsert: bool,
    fail_fetch: bool,
    reject_token: bool,
}

/// Control plane that lives in memory.
#[derive(Debug, Default)]
pub struct MemoryControlPlane {
    inner: Mutex<Recorded>,
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves these intents on every fetch.
    pub fn with_grants(self, grants: Vec<serde_json::Value>) -> Self {
        self.lock().grants = grants;
        self
    }

    /// Makes database registration fail.
    pub fn failing_upsert(self) -> Self {
        self.lock().fail_upsert = true;
        self
    }

    /// Makes grant fetching fail.
    pub fn failing_fetch(self) -> Self {
        self.lock().fail_fetch = true;
        self
    }

    /// Answers every call as if the token were invalid.
    pub fn rejecting_token(self) -> Self {
        self.lock().reject_token = true;
        self
    }

    /// Replaces the served intents.
    pub fn set_grants(&self, grants: Vec<serde_json::Value>) {
        self.lock().grants = grants;
    }

    /// Every check-in received so far.
    pub fn checkins(&self) -> Vec<Checkin> {
        self.lock().checkins.clone()
    }

    /// Every registration received so far.
    pub fn registrations(&self) -> Vec<Vec<DatabaseRegistration>> {
        self.lock().registrations.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_token(&self) -> Result<()> {
        if self.lock().reject_token {
            return Err(AgentError::unauthorized("access token rejected"));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn upsert_databases(&self, databases: &[DatabaseRegistration]) -> Result<()> {
        self.check_token()?;
        let mut inner = self.lock();
        if inner.fail_upsert {
            return Err(AgentError::api("Control plane returned 503 Service Unavailable"));
        }
        inner.registrations.push(databases.to_vec());
        Ok(())
    }

    async fn fetch_grants(&self) -> Result<Vec<serde_json::Value>> {
        self.check_token()?;
        let inner = self.lock();
        if inner.fail_fetch {
            return Err(AgentError::api("Control plane returned 503 Service Unavailable"));
        }
        Ok(inner.grants.clone())
    }

    async fn checkin(&self, checkin: &Checkin) -> Result<()> {
        self.check_token()?;
        self.lock().checkins.push(checkin.clone());
        Ok(())
    }
}
