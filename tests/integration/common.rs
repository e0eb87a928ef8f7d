//! Shared helpers for integration tests.

use grant_agent::config::DatabaseConfig;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Reads a live-database URL from the environment.
pub fn database_config(var: &str, name: &str) -> Option<DatabaseConfig> {
    let url = std::env::var(var).ok()?;
    Some(DatabaseConfig::from_url(name, &url).expect("valid database URL"))
}

/// Returns a name unlikely to collide with other test runs.
pub fn unique_name(prefix: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!(
        "{prefix}_{}_{}_{}",
        std::process::id(),
        nanos,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
