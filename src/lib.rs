//! grant-agent - keeps database users and privileges in line with a control plane.
//!
//! This library exposes the core modules for the binary and for integration tests.

pub mod agent;
pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod grants;
pub mod ledger;
pub mod logging;
pub mod server;
pub mod setup;
pub mod templates;
