//! MySQL adapter integration tests.

use super::common::{database_config, unique_name};
use grant_agent::config::DatabaseConfig;
use grant_agent::db::{DatabaseClient, MysqlClient, PasswordChange};
use sqlx::{Connection, MySqlConnection};

async fn get_test_setup() -> Option<(DatabaseConfig, MySqlConnection)> {
    let config = database_config("MYSQL_URL", "my")?;
    let url = std::env::var("MYSQL_URL").ok()?;
    let conn = MySqlConnection::connect(&url).await.expect("admin connection");
    Some((config, conn))
}

async fn grants_for(conn: &mut MySqlConnection, user: &str) -> Vec<String> {
    let sql = format!("SHOW GRANTS FOR `{user}`@`%`");
    sqlx::query_scalar(&sql).fetch_all(&mut *conn).await.unwrap()
}

#[tokio::test]
async fn test_user_lifecycle() {
    let Some((config, _admin)) = get_test_setup().await else {
        eprintln!("Skipping test: MYSQL_URL not set");
        return;
    };
    let mut client = MysqlClient::connect(&config).await.unwrap();
    let user = unique_name("ga_user");

    assert!(!client.find_user(&user).await.unwrap());
    assert_eq!(
        client.apply_password(&user, "PasW';drop table `foo`").await.unwrap(),
        PasswordChange::Created
    );
    assert_eq!(
        client.apply_password(&user, "PasW';drop table `foo`").await.unwrap(),
        PasswordChange::Unchanged
    );
    assert_eq!(
        client.apply_password(&user, "rotated").await.unwrap(),
        PasswordChange::Updated
    );

    client.drop_user(&user).await.unwrap();
    assert!(!client.find_user(&user).await.unwrap());
    Box::new(client).close().await.unwrap();
}

#[tokio::test]
async fn test_apply_statements_replaces_and_revokes() {
    let Some((config, mut admin)) = get_test_setup().await else {
        eprintln!("Skipping test: MYSQL_URL not set");
        return;
    };
    let mut client = MysqlClient::connect(&config).await.unwrap();
    let user = unique_name("ga_user");
    client.apply_password(&user, "pw").await.unwrap();

    client
        .apply_statements(
            &user,
            Some("pw"),
            &["GRANT SELECT, INSERT ON mysql.* TO {{username}};".to_string()],
        )
        .await
        .unwrap();
    let grants = grants_for(&mut admin, &user).await.join("\n");
    assert!(grants.contains("INSERT"), "{grants}");

    client
        .apply_statements(&user, None, &["GRANT SELECT ON mysql.* TO {{username}}".to_string()])
        .await
        .unwrap();
    let grants = grants_for(&mut admin, &user).await.join("\n");
    assert!(grants.contains("SELECT"), "{grants}");
    assert!(!grants.contains("INSERT"), "{grants}");

    client.revoke_everything(&user).await.unwrap();
    let grants = grants_for(&mut admin, &user).await.join("\n");
    assert!(!grants.contains("SELECT"), "{grants}");

    client.drop_user(&user).await.unwrap();
    Box::new(client).close().await.unwrap();
}
