//! Control plane integration.
//!
//! The agent registers its databases, pulls grant intents and reports
//! outcomes through the `ControlPlane` trait.

pub mod http;
pub mod mock;

pub use http::HttpControlPlane;
pub use mock::MemoryControlPlane;

use crate::config::Config;
use crate::error::Result;
use crate::grants::AppliedGrant;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Version reported in every check-in.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A configured database as announced to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseRegistration {
    pub name: String,
    pub dbtype: String,
}

impl DatabaseRegistration {
    /// Lists every database in the config.
    pub fn from_config(config: &Config) -> Vec<Self> {
        config
            .databases
            .values()
            .map(|db| Self {
                name: db.name.clone(),
                dbtype: db.backend.as_str().to_string(),
            })
            .collect()
    }
}

/// Body of `GET /grants`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrantsResponse {
    #[serde(default)]
    pub grants: Vec<serde_json::Value>,
}

/// Body of `POST /agents/checkin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkin {
    pub applied_grants: Vec<AppliedGrant>,
    pub agent_version: String,
}

impl Checkin {
    pub fn new(applied_grants: Vec<AppliedGrant>) -> Self {
        Self {
            applied_grants,
            agent_version: AGENT_VERSION.to_string(),
        }
    }
}

/// Operations the agent needs from the control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Replaces the set of databases this agent manages.
    async fn upsert_databases(&self, databases: &[DatabaseRegistration]) -> Result<()>;

    /// Fetches the current grant intents, unparsed.
    async fn fetch_grants(&self) -> Result<Vec<serde_json::Value>>;

    /// Reports reconciliation outcomes.
    async fn checkin(&self, checkin: &Checkin) -> Result<()>;
}
