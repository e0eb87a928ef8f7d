//! Error types for the grant agent.
//!
//! Defines the main error enum used throughout the application.

use thiserror::Error;

/// Main error type for agent operations.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// SQL execution errors against a target database.
    #[error("Query error: {0}")]
    Query(String),

    /// Statement template errors (syntax errors, undefined variables).
    #[error("Template error: {0}")]
    Template(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A grant referenced a database that is not configured on this agent.
    #[error("Unknown database: {0}")]
    UnknownDatabase(String),

    /// A grant intent from the control plane failed validation.
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    /// Control plane transport or response errors.
    #[error("API error: {0}")]
    Api(String),

    /// The control plane rejected the access token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Local ledger errors.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a template error with the given message.
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an unknown-database error for the given name.
    pub fn unknown_database(name: impl Into<String>) -> Self {
        Self::UnknownDatabase(name.into())
    }

    /// Creates an invalid-grant error with the given message.
    pub fn invalid_grant(msg: impl Into<String>) -> Self {
        Self::InvalidGrant(msg.into())
    }

    /// Creates an API error with the given message.
    pub fn api(msg: impl Into<String>) -> Self {
        Self::Api(msg.into())
    }

    /// Creates an unauthorized error with the given message.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Creates a persistence error with the given message.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Template(_) => "Template Error",
            Self::Config(_) => "Configuration Error",
            Self::UnknownDatabase(_) => "Configuration Error",
            Self::InvalidGrant(_) => "Invalid Grant",
            Self::Api(_) => "API Error",
            Self::Unauthorized(_) => "Authentication Error",
            Self::Persistence(_) => "Persistence Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using AgentError.
pub type Result<T> = std::result::Result<T, AgentError>;
