//! Ledger table layout.
//!
//! The schema version lives in SQLite's `user_version` header field. A fresh
//! file reads 0 and gets the table created in one transaction.

use crate::error::{AgentError, Result};
use sqlx::sqlite::SqlitePool;
use tracing::info;

pub const SCHEMA_VERSION: i64 = 1;

const CREATE_V1: &str = r#"
CREATE TABLE applied_grants (
    grant_id TEXT PRIMARY KEY,
    version TEXT NOT NULL,
    database TEXT NOT NULL,
    username TEXT NOT NULL,
    result TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX idx_applied_grants_user ON applied_grants(database, username);
PRAGMA user_version = 1;
"#;

/// Creates the table on a fresh ledger and checks the version otherwise.
pub async fn prepare(pool: &SqlitePool) -> Result<()> {
    let version = user_version(pool).await?;

    if version > SCHEMA_VERSION {
        return Err(AgentError::persistence(format!(
            "Ledger schema version ({version}) is newer than supported version \
             ({SCHEMA_VERSION}). Please upgrade grant-agent to the latest version."
        )));
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AgentError::persistence(format!("Failed to begin ledger setup: {e}")))?;
    sqlx::raw_sql(CREATE_V1)
        .execute(&mut *tx)
        .await
        .map_err(|e| AgentError::persistence(format!("Failed to create ledger table: {e}")))?;
    tx.commit()
        .await
        .map_err(|e| AgentError::persistence(format!("Failed to commit ledger setup: {e}")))?;

    info!("Created ledger schema v{SCHEMA_VERSION}");
    Ok(())
}

pub async fn user_version(pool: &SqlitePool) -> Result<i64> {
    sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await
        .map_err(|e| AgentError::persistence(format!("Failed to read ledger version: {e}")))
}
