//! Grant intents and reconciliation outcomes.
//!
//! The control plane sends intents as loosely-typed JSON. Each one is parsed
//! and validated on its own so a malformed entry can be skipped without
//! affecting the rest of the batch.

use crate::error::{AgentError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static USERNAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+$").expect("valid regex"));

/// An identifier or version number echoed back to the control plane exactly
/// as it was received.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Opaque {
    Int(i64),
    Text(String),
}

impl fmt::Display for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Opaque {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for Opaque {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A privilege intent for one user on one configured database.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Grant {
    pub id: Opaque,
    pub database: String,
    pub username: String,
    pub version: Opaque,
    #[serde(default)]
    pub statements: Vec<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub revoke: bool,
}

// Hand-written so passwords never reach a log line.
impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grant")
            .field("id", &self.id)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("version", &self.version)
            .field("statements", &self.statements.len())
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("revoke", &self.revoke)
            .finish()
    }
}

impl Grant {
    /// Parses and validates one raw intent.
    pub fn parse(value: serde_json::Value) -> Result<Self> {
        let grant: Self = serde_json::from_value(value)
            .map_err(|e| AgentError::invalid_grant(format!("Malformed grant: {e}")))?;
        grant.validate()?;
        Ok(grant)
    }

    fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(AgentError::invalid_grant(format!(
                "Grant {} has an empty database name",
                self.id
            )));
        }
        if !USERNAME_PATTERN.is_match(&self.username) {
            return Err(AgentError::invalid_grant(format!(
                "Grant {} has an invalid username {:?}",
                self.id, self.username
            )));
        }
        Ok(())
    }

    /// Pairs this grant with an outcome for reporting.
    pub fn outcome(&self, result: GrantResult) -> AppliedGrant {
        AppliedGrant {
            id: self.id.clone(),
            version: self.version.clone(),
            result,
        }
    }
}

/// Outcome of reconciling one grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantResult {
    NoChange,
    Applied,
    #[serde(rename = "no_user_password")]
    NoPassword,
    UnknownError,
    Revoked,
    UnknownDatabase,
}

impl GrantResult {
    /// Returns the wire name of the result.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoChange => "no_change",
            Self::Applied => "applied",
            Self::NoPassword => "no_user_password",
            Self::UnknownError => "unknown_error",
            Self::Revoked => "revoked",
            Self::UnknownDatabase => "unknown_database",
        }
    }

    /// Parses a wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "no_change" => Some(Self::NoChange),
            "applied" => Some(Self::Applied),
            "no_user_password" => Some(Self::NoPassword),
            "unknown_error" => Some(Self::UnknownError),
            "revoked" => Some(Self::Revoked),
            "unknown_database" => Some(Self::UnknownDatabase),
            _ => None,
        }
    }

    /// Whether the control plane hears about this result.
    pub fn is_reported(&self) -> bool {
        !matches!(self, Self::NoChange)
    }

    /// Whether the ledger remembers this result.
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Applied | Self::Revoked)
    }
}

impl fmt::Display for GrantResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a check-in report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedGrant {
    pub id: Opaque,
    pub version: Opaque,
    pub result: GrantResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_grant() {
        let grant = Grant::parse(json!({
            "id": 7,
            "database": "warehouse",
            "username": "alice",
            "version": 3,
            "statements": ["GRANT CONNECT ON DATABASE {{database}} TO {{username}}"],
            "password": "pw",
            "revoke": false
        }))
        .unwrap();

        assert_eq!(grant.id, Opaque::Int(7));
        assert_eq!(grant.version, Opaque::Int(3));
        assert_eq!(grant.statements.len(), 1);
        assert_eq!(grant.password.as_deref(), Some("pw"));
        assert!(!grant.revoke);
    }

    #[test]
    fn test_parse_defaults_optional_fields() {
        let grant = Grant::parse(json!({
            "id": "g-1",
            "database": "warehouse",
            "username": "bob",
            "version": "2024-01"
        }))
        .unwrap();

        assert_eq!(grant.id, Opaque::Text("g-1".into()));
        assert!(grant.statements.is_empty());
        assert!(grant.password.is_none());
        assert!(!grant.revoke);
    }

    #[test]
    fn test_parse_missing_field_is_invalid_grant() {
        let err = Grant::parse(json!({"id": 1, "database": "db", "version": 1})).unwrap_err();
        assert!(matches!(err, AgentError::InvalidGrant(_)));
        assert!(err.to_string().contains("username"), "{err}");
    }

    #[test]
    fn test_parse_rejects_bad_usernames() {
        for username in ["", "bob; drop", "a-b", "x\"y"] {
            let result = Grant::parse(json!({
                "id": 1, "database": "db", "username": username, "version": 1
            }));
            assert!(
                matches!(result, Err(AgentError::InvalidGrant(_))),
                "{username:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_debug_redacts_password() {
        let grant = Grant::parse(json!({
            "id": 1, "database": "db", "username": "u", "version": 1, "password": "hunter2"
        }))
        .unwrap();
        let debug = format!("{grant:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_result_wire_names() {
        for result in [
            GrantResult::NoChange,
            GrantResult::Applied,
            GrantResult::NoPassword,
            GrantResult::UnknownError,
            GrantResult::Revoked,
            GrantResult::UnknownDatabase,
        ] {
            let json = serde_json::to_string(&result).unwrap();
            assert_eq!(json, format!("\"{}\"", result.as_str()));
            assert_eq!(GrantResult::parse(result.as_str()), Some(result));
        }
    }

    #[test]
    fn test_outcome_echoes_identifiers() {
        let grant = Grant::parse(json!({
            "id": "abc", "database": "db", "username": "u", "version": 12
        }))
        .unwrap();
        let applied = grant.outcome(GrantResult::Applied);
        assert_eq!(
            serde_json::to_value(&applied).unwrap(),
            json!({"id": "abc", "version": 12, "result": "applied"})
        );
    }

    #[test]
    fn test_only_no_change_is_unreported() {
        assert!(!GrantResult::NoChange.is_reported());
        assert!(GrantResult::UnknownDatabase.is_reported());
        assert!(GrantResult::Applied.is_durable());
        assert!(!GrantResult::UnknownError.is_durable());
    }
}
