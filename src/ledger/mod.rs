//! Local ledger of applied grants.
//!
//! Remembers which version of each grant was last applied or revoked, so a
//! re-delivered intent with an unchanged version can be skipped without
//! touching the target database. Identifiers are stored as their JSON text,
//! keeping `7` and `"7"` distinct.

mod schema;

use crate::error::{AgentError, Result};
use crate::grants::{Grant, GrantResult, Opaque};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// A recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub grant_id: Opaque,
    pub version: Opaque,
    pub database: String,
    pub username: String,
    pub result: GrantResult,
    pub applied_at: String,
}

type EntryRow = (String, String, String, String, String, String);

impl LedgerEntry {
    fn from_row(row: EntryRow) -> Result<Self> {
        let (grant_id, version, database, username, result, applied_at) = row;
        Ok(Self {
            grant_id: decode_opaque(&grant_id)?,
            version: decode_opaque(&version)?,
            database,
            username,
            result: GrantResult::parse(&result).ok_or_else(|| {
                AgentError::persistence(format!("Unknown result in ledger: {result}"))
            })?,
            applied_at,
        })
    }
}

/// SQLite-backed grant ledger.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl Ledger {
    /// Opens or creates the ledger at the specified path.
    ///
    /// A file SQLite cannot read is moved to `<name>.db.bak` and replaced by
    /// an empty ledger; losing it only costs one redundant apply per grant.
    /// A ledger written by a newer agent is left alone and reported.
    pub async fn open(path: &Path) -> Result<Self> {
        ensure_parent_dirs(path)?;

        let pool = match connect(path).await {
            Ok(pool) => pool,
            Err(e) if is_corrupt(&e) => {
                warn!("Ledger at {} is unreadable: {e}", path.display());
                set_aside(path)?;
                connect(path).await.map_err(|e| {
                    AgentError::persistence(format!("Failed to recreate ledger: {e}"))
                })?
            }
            Err(e) => {
                return Err(AgentError::persistence(format!(
                    "Failed to open ledger at {}: {e}",
                    path.display()
                )))
            }
        };

        if let Err(e) = schema::prepare(&pool).await {
            pool.close().await;
            return Err(e);
        }
        info!("Ledger opened at {}", path.display());
        Ok(Self {
            pool,
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens a ledger that lives only as long as this value.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| AgentError::persistence(format!("Failed to open in-memory ledger: {e}")))?;
        schema::prepare(&pool).await?;
        Ok(Self { pool, path: None })
    }

    /// Returns the ledger file, if it has one.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Looks up the last recorded outcome for a grant id.
    pub async fn get(&self, grant_id: &Opaque) -> Result<Option<LedgerEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(
            "SELECT grant_id, version, database, username, result, applied_at \
             FROM applied_grants WHERE grant_id = ?",
        )
        .bind(encode_opaque(grant_id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AgentError::persistence(format!("Failed to read ledger: {e}")))?;

        row.map(LedgerEntry::from_row).transpose()
    }

    /// Whether this exact grant version was already applied or revoked.
    pub async fn is_current(&self, grant: &Grant) -> Result<bool> {
        Ok(self
            .get(&grant.id)
            .await?
            .is_some_and(|entry| entry.version == grant.version))
    }

    /// Records a durable outcome, replacing any earlier entry for the grant.
    pub async fn record(&self, grant: &Grant, result: GrantResult) -> Result<()> {
        if !result.is_durable() {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO applied_grants (grant_id, version, database, username, result, applied_at)
            VALUES (?, ?, ?, ?, ?, datetime('now'))
            ON CONFLICT(grant_id) DO UPDATE SET
                version = excluded.version,
                database = excluded.database,
                username = excluded.username,
                result = excluded.result,
                applied_at = excluded.applied_at
            "#,
        )
        .bind(encode_opaque(&grant.id)?)
        .bind(encode_opaque(&grant.version)?)
        .bind(&grant.database)
        .bind(&grant.username)
        .bind(result.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AgentError::persistence(format!("Failed to record grant: {e}")))?;

        Ok(())
    }

    /// Forgets every entry for a user, returning how many were removed.
    pub async fn forget_user(&self, database: &str, username: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM applied_grants WHERE database = ? AND username = ?")
            .bind(database)
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(|e| AgentError::persistence(format!("Failed to update ledger: {e}")))?;

        Ok(result.rows_affected())
    }

    /// Lists all entries, oldest first.
    pub async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            "SELECT grant_id, version, database, username, result, applied_at \
             FROM applied_grants ORDER BY applied_at, grant_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AgentError::persistence(format!("Failed to read ledger: {e}")))?;

        rows.into_iter().map(LedgerEntry::from_row).collect()
    }

    /// Closes the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn encode_opaque(value: &Opaque) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| AgentError::persistence(format!("Failed to encode {value}: {e}")))
}

fn decode_opaque(text: &str) -> Result<Opaque> {
    serde_json::from_str(text)
        .map_err(|e| AgentError::persistence(format!("Corrupt ledger value {text}: {e}")))
}

async fn connect(path: &Path) -> std::result::Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
}

/// SQLITE_NOTADB and SQLITE_CORRUPT, the errors a damaged file produces.
fn is_corrupt(error: &sqlx::Error) -> bool {
    let message = error.to_string().to_lowercase();
    message.contains("not a database") || message.contains("malformed")
}

fn set_aside(path: &Path) -> Result<()> {
    let backup_path = path.with_extension("db.bak");
    std::fs::rename(path, &backup_path).map_err(|e| {
        AgentError::persistence(format!(
            "Failed to move unreadable ledger to {}: {e}",
            backup_path.display()
        ))
    })?;
    warn!("Moved unreadable ledger to {}", backup_path.display());
    Ok(())
}

fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            AgentError::persistence(format!(
                "Failed to create ledger directory {}: {e}",
                parent.display()
            ))
        })?;
    }
    Ok(())
}
