//! Integration tests for grant-agent.

pub mod common;
pub mod mysql_test;
pub mod postgres_test;
pub mod reconcile_test;
