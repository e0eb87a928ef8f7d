//! Point-in-time inventory of a Postgres-family database.
//!
//! Statement templates are free-form, so the agent cannot know which
//! privileges it granted. Revocation instead walks every schema, table and
//! column that exists right now and revokes at each level.

use super::postgres::{quote_ident, PgFlavor};
use crate::error::{AgentError, Result};
use crate::templates::{SchemaContext, TableContext};
use sqlx::PgConnection;
use std::collections::{BTreeMap, BTreeSet};

/// Relation kinds that can carry table and column privileges: ordinary,
/// views, materialized views, foreign and partitioned tables.
const DISCOVERY_QUERY: &str = r#"
    SELECT
        n.nspname::text AS schema_name,
        c.relname::text AS table_name,
        a.attname::text AS column_name
    FROM pg_catalog.pg_namespace n
    LEFT JOIN pg_catalog.pg_class c
        ON c.relnamespace = n.oid
        AND c.relkind IN ('r', 'v', 'm', 'f', 'p')
    LEFT JOIN pg_catalog.pg_attribute a
        ON a.attrelid = c.oid
        AND a.attnum > 0
        AND NOT a.attisdropped
    WHERE n.nspname NOT LIKE 'pg\_%'
        AND n.nspname <> 'information_schema'
    ORDER BY 1, 2, 3
"#;

/// Schema name -> table name -> column names.
pub type SchemaMap = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

/// Immutable snapshot of the objects in one database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    database: String,
    schemas: SchemaMap,
}

impl Catalog {
    /// Queries the system catalog for every schema, table and column.
    pub async fn discover(conn: &mut PgConnection) -> Result<Self> {
        let database: String = sqlx::query_scalar("SELECT current_database()::text")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| AgentError::query(format!("Failed to read current database: {e}")))?;

        let rows: Vec<(String, Option<String>, Option<String>)> = sqlx::query_as(DISCOVERY_QUERY)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| AgentError::query(format!("Failed to discover catalog: {e}")))?;

        Ok(Self::from_rows(database, rows))
    }

    /// Builds a catalog from `(schema, table, column)` rows; schemas without
    /// tables and tables without columns carry `None` in the later fields.
    pub fn from_rows<I>(database: impl Into<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = (String, Option<String>, Option<String>)>,
    {
        let mut schemas = SchemaMap::new();
        for (schema, table, column) in rows {
            let tables = schemas.entry(schema).or_default();
            if let Some(table) = table {
                let columns = tables.entry(table).or_default();
                if let Some(column) = column {
                    columns.insert(column);
                }
            }
        }
        Self {
            database: database.into(),
            schemas,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn schemas(&self) -> &SchemaMap {
        &self.schemas
    }

    pub fn schema_names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Converts the snapshot into quoted template variables.
    pub fn to_template_schemas(&self) -> Vec<SchemaContext> {
        self.schemas
            .iter()
            .map(|(schema, tables)| SchemaContext {
                name: quote_ident(schema),
                tables: tables
                    .iter()
                    .map(|(table, columns)| TableContext {
                        name: quote_ident(table),
                        qualified: format!("{}.{}", quote_ident(schema), quote_ident(table)),
                        columns: columns.iter().map(|c| quote_ident(c)).collect(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Lists the statements that strip `username` of every privilege on
    /// every object in the snapshot.
    pub fn revoke_statements(&self, username: &str, flavor: PgFlavor) -> Vec<String> {
        let user = quote_ident(username);
        let mut statements = vec![format!(
            "REVOKE ALL ON DATABASE {} FROM {user}",
            quote_ident(&self.database)
        )];

        for schema in self.schemas.keys() {
            let schema = quote_ident(schema);
            statements.push(format!("REVOKE ALL ON SCHEMA {schema} FROM {user}"));
            statements.push(format!(
                "REVOKE ALL ON ALL TABLES IN SCHEMA {schema} FROM {user}"
            ));
            statements.push(format!(
                "REVOKE ALL ON ALL SEQUENCES IN SCHEMA {schema} FROM {user}"
            ));
            statements.push(format!(
                "REVOKE ALL ON ALL FUNCTIONS IN SCHEMA {schema} FROM {user}"
            ));
        }

        for (schema, tables) in &self.schemas {
            for (table, columns) in tables {
                let qualified = format!("{}.{}", quote_ident(schema), quote_ident(table));
                statements.push(format!("REVOKE ALL ON TABLE {qualified} FROM {user}"));

                if flavor.supports_column_privileges() && !columns.is_empty() {
                    let columns = columns
                        .iter()
                        .map(|c| quote_ident(c))
                        .collect::<Vec<_>>()
                        .join(", ");
                    statements.push(format!(
                        "REVOKE ALL ({columns}) ON TABLE {qualified} FROM {user}"
                    ));
                }
            }
        }

        statements
    }
}
