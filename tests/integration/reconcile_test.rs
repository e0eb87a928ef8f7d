//! Reconciliation loop integration tests.
//!
//! Drives whole cycles through the public API: a config file on disk, an
//! in-memory control plane, and either the mock engine or a live database.

use super::common::{database_config, unique_name};
use grant_agent::agent::Agent;
use grant_agent::api::MemoryControlPlane;
use grant_agent::config::Config;
use grant_agent::db::{DriverConnector, MockConnector};
use grant_agent::grants::{GrantResult, Opaque};
use grant_agent::ledger::Ledger;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

const CONFIG: &str = r#"
access_token = "test-token"
server_url = "http://localhost:9"

[databases.warehouse]
type = "postgresql"
user = "admin"
password = "admin"
database = "analytics"

[databases.shop]
type = "mysql"
user = "root"
"#;

fn write_config(dir: &Path) -> Config {
    let path = dir.join("config.toml");
    std::fs::write(&path, CONFIG).unwrap();
    Config::load_from_file(&path).unwrap()
}

#[tokio::test]
async fn test_cycle_reports_only_changes() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let connector = MockConnector::new()
        .with_user("existing", "pw")
        .with_schemas(&["public", "sales"]);
    let control_plane = Arc::new(MemoryControlPlane::new().with_grants(vec![
        json!({
            "id": 1, "database": "warehouse", "username": "analyst", "version": 1,
            "password": "s3cret",
            "statements": [
                "-- read everything\n{% for s in all_schemas %}GRANT USAGE ON SCHEMA {{s}} TO {{username}};\n{% endfor %}"
            ]
        }),
        json!({"id": 2, "database": "missing", "username": "analyst", "version": 1}),
        json!({"id": 3, "username": "no_database"}),
        json!({"id": 4, "database": "shop", "username": "existing", "version": 7, "revoke": true}),
    ]));
    let ledger = Ledger::open(&dir.path().join("ledger.db")).await.unwrap();

    let agent = Agent::new(config, control_plane.clone(), Arc::new(connector.clone()))
        .with_ledger(ledger);
    agent.run_once().await.unwrap();

    let registrations = control_plane.registrations();
    assert_eq!(registrations.len(), 1);
    let names: Vec<_> = registrations[0].iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["shop", "warehouse"]);

    let checkins = control_plane.checkins();
    assert_eq!(checkins.len(), 1);
    let results: Vec<_> = checkins[0]
        .applied_grants
        .iter()
        .map(|g| (g.id.clone(), g.result))
        .collect();
    assert_eq!(
        results,
        vec![
            (Opaque::Int(1), GrantResult::Applied),
            (Opaque::Int(2), GrantResult::UnknownDatabase),
            (Opaque::Int(4), GrantResult::Revoked),
        ]
    );

    let state = connector.snapshot();
    assert_eq!(
        state.grants["analyst"],
        vec![
            "GRANT USAGE ON SCHEMA \"public\" TO \"analyst\";",
            "GRANT USAGE ON SCHEMA \"sales\" TO \"analyst\";",
        ]
    );
    assert!(!state.users.contains_key("existing"));
}

#[tokio::test]
async fn test_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("state").join("ledger.db");
    let connector = MockConnector::new();
    let grants = vec![json!({
        "id": "grant-a", "database": "warehouse", "username": "analyst", "version": 3,
        "password": "pw", "statements": ["GRANT CONNECT ON DATABASE {{database}} TO {{username}}"]
    })];

    for _ in 0..2 {
        let control_plane = Arc::new(MemoryControlPlane::new().with_grants(grants.clone()));
        let agent = Agent::new(
            write_config(dir.path()),
            control_plane,
            Arc::new(connector.clone()),
        )
        .with_ledger(Ledger::open(&ledger_path).await.unwrap());
        agent.run_once().await.unwrap();
    }

    assert_eq!(connector.snapshot().connects, 1);

    let ledger = Ledger::open(&ledger_path).await.unwrap();
    let entry = ledger.get(&Opaque::Text("grant-a".into())).await.unwrap().unwrap();
    assert_eq!(entry.version, Opaque::Int(3));
    assert_eq!(entry.result, GrantResult::Applied);
    assert_eq!(entry.database, "warehouse");
}

#[tokio::test]
async fn test_live_postgres_cycle() {
    let Some(database) = database_config("DATABASE_URL", "live") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let mut config = Config::new("test-token");
    config.databases.insert("live".into(), database);

    let user = unique_name("ga_user");
    let grant = |version: i64, revoke: bool| {
        json!({
            "id": 1, "database": "live", "username": user, "version": version,
            "password": "pw", "revoke": revoke,
            "statements": ["GRANT CONNECT ON DATABASE {{database}} TO {{username}};"]
        })
    };

    let control_plane = Arc::new(MemoryControlPlane::new().with_grants(vec![grant(1, false)]));
    let agent = Agent::new(config, control_plane.clone(), Arc::new(DriverConnector))
        .with_ledger(Ledger::open_in_memory().await.unwrap());

    agent.run_once().await.unwrap();
    control_plane.set_grants(vec![grant(2, true)]);
    agent.run_once().await.unwrap();

    let results: Vec<_> = control_plane
        .checkins()
        .iter()
        .map(|c| c.applied_grants[0].result)
        .collect();
    assert_eq!(results, vec![GrantResult::Applied, GrantResult::Revoked]);
}
