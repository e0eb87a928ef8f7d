//! HTTP control plane client.

use super::{Checkin, ControlPlane, DatabaseRegistration, GrantsResponse, AGENT_VERSION};
use crate::config::Config;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Control plane reached over HTTPS with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Client,
    base_url: String,
    access_token: String,
}

impl HttpControlPlane {
    /// Creates a client from the agent configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config.server_base()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(format!("grant-agent/{AGENT_VERSION}"))
            .build()
            .map_err(|e| AgentError::api(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    /// Returns the full URL of an API path.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.endpoint(path);
        debug!("{method} {url}");
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
    }

    /// Sends a request and returns the response body on success.
    async fn send(&self, request: RequestBuilder) -> Result<String> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::api("Request to the control plane timed out")
            } else if e.is_connect() {
                AgentError::api(format!("Failed to connect to the control plane: {e}"))
            } else {
                AgentError::api(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::api(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Self::parse_error(status, &body));
        }
        Ok(body)
    }

    fn parse_error(status: StatusCode, body: &str) -> AgentError {
        if status == StatusCode::UNAUTHORIZED {
            return AgentError::unauthorized(
                "The control plane rejected the access token. Check 'access_token' in the config.",
            );
        }
        AgentError::api(format!("Control plane returned {status}: {body}"))
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn upsert_databases(&self, databases: &[DatabaseRegistration]) -> Result<()> {
        let request = self.request(Method::PUT, "databases").json(databases);
        self.send(request).await?;
        Ok(())
    }

    async fn fetch_grants(&self) -> Result<Vec<serde_json::Value>> {
        let body = self.send(self.request(Method::GET, "grants")).await?;
        let response: GrantsResponse = serde_json::from_str(&body)
            .map_err(|e| AgentError::api(format!("Failed to parse grants response: {e}")))?;
        Ok(response.grants)
    }

    async fn checkin(&self, checkin: &Checkin) -> Result<()> {
        let request = self.request(Method::POST, "agents/checkin").json(checkin);
        self.send(request).await?;
        Ok(())
    }
}
