//! Statement templates.
//!
//! Administrators hand the agent SQL blobs that may hold several statements,
//! `--` comments and tera placeholders (`{{ username }}`, `{% for %}` loops,
//! `{% if %}` blocks). This module turns such a blob into discrete, rendered
//! statements ready to execute.

use crate::error::{AgentError, Result};
use serde::Serialize;
use tera::Tera;

const COMMENT_MARKER: &str = "--";
const STATEMENT_TERMINATOR: char = ';';

/// Variables available to a statement template.
///
/// Identifiers are stored already quoted for the target engine, so templates
/// can interpolate them without further escaping.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateContext {
    /// Engine tag (`postgresql`, `redshift`, `mysql`).
    pub dbtype: String,
    /// The managed user's identity as the engine spells it.
    pub username: String,
    /// The connected database, when the engine has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// The user's password as an escaped SQL string literal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Every discovered schema.
    pub all_schemas: Vec<String>,
    /// Alias of `all_schemas`.
    pub schemas: Vec<String>,
    /// Schemas with their tables and columns.
    pub catalog: Vec<SchemaContext>,
}

/// A schema as seen by templates.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaContext {
    pub name: String,
    pub tables: Vec<TableContext>,
}

/// A table as seen by templates.
#[derive(Debug, Clone, Serialize)]
pub struct TableContext {
    pub name: String,
    /// `schema.table`, both parts quoted.
    pub qualified: String,
    pub columns: Vec<String>,
}

impl TemplateContext {
    /// Creates a context for the given engine tag and quoted username.
    pub fn new(dbtype: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            dbtype: dbtype.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_password(mut self, password_literal: impl Into<String>) -> Self {
        self.password = Some(password_literal.into());
        self
    }

    /// Sets the schema inventory, keeping `all_schemas` and `schemas` in step.
    pub fn with_catalog(mut self, catalog: Vec<SchemaContext>) -> Self {
        self.all_schemas = catalog.iter().map(|s| s.name.clone()).collect();
        self.schemas = self.all_schemas.clone();
        self.catalog = catalog;
        self
    }
}

/// Splits a SQL blob into individual statements.
///
/// Input is read line by line. A `--` comment is cut from its line together
/// with the newline, so the next line (minus its indentation) continues right
/// where the comment began. Lines holding only a comment contribute nothing.
/// Each statement keeps its terminating `;` and is trimmed as a whole; a
/// trailing fragment without `;` is kept when it has content.
pub fn split(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut joining = false;
    let mut lines = sql.split('\n').peekable();

    while let Some(line) = lines.next() {
        let (code, commented) = match line.find(COMMENT_MARKER) {
            Some(idx) => (&line[..idx], true),
            None => (line, false),
        };
        if commented && code.trim().is_empty() {
            continue;
        }

        let code = if joining { code.trim_start() } else { code };
        for c in code.chars() {
            current.push(c);
            if c == STATEMENT_TERMINATOR {
                push_statement(&mut statements, &current);
                current.clear();
            }
        }

        joining = commented;
        if !commented && lines.peek().is_some() {
            current.push('\n');
        }
    }

    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let statement = raw.trim();
    if statement.is_empty() || statement == ";" {
        return;
    }
    statements.push(statement.to_string());
}

/// Renders a single template against the context.
///
/// Undefined variables fail the render instead of producing partial SQL.
pub fn render(template: &str, context: &TemplateContext) -> Result<String> {
    let value = serde_json::to_value(context).map_err(|e| AgentError::template(e.to_string()))?;
    render_value(template, value)
}

fn render_value(template: &str, value: serde_json::Value) -> Result<String> {
    let ctx = tera::Context::from_value(value).map_err(|e| AgentError::template(describe(&e)))?;
    Tera::one_off(template, &ctx, false).map_err(|e| AgentError::template(describe(&e)))
}

/// Renders a template and splits the output into statements.
///
/// Loops may emit several statements, so splitting happens on rendered text.
/// Context values the splitter would cut (`;`, `-`, newlines) are rendered as
/// inert tokens and put back into each statement afterwards.
pub fn expand(template: &str, context: &TemplateContext) -> Result<Vec<String>> {
    let mut value =
        serde_json::to_value(context).map_err(|e| AgentError::template(e.to_string()))?;
    let mut masked = Vec::new();
    mask(&mut value, &mut masked);

    let rendered = render_value(template, value)?;
    Ok(split(&rendered)
        .into_iter()
        .map(|statement| unmask(&statement, &masked))
        .collect())
}

const MASK_OPEN: char = '\u{E000}';
const MASK_CLOSE: char = '\u{E001}';

fn mask(value: &mut serde_json::Value, masked: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) if s.contains([';', '-', '\n', '\r']) => {
            let token = format!("{MASK_OPEN}{}{MASK_CLOSE}", masked.len());
            masked.push(std::mem::replace(s, token));
        }
        serde_json::Value::Array(items) => {
            for item in items {
                mask(item, masked);
            }
        }
        serde_json::Value::Object(fields) => {
            for field in fields.values_mut() {
                mask(field, masked);
            }
        }
        _ => {}
    }
}

fn unmask(statement: &str, masked: &[String]) -> String {
    let mut out = String::with_capacity(statement.len());
    let mut rest = statement;

    while let Some(start) = rest.find(MASK_OPEN) {
        out.push_str(&rest[..start]);
        let body = &rest[start + MASK_OPEN.len_utf8()..];
        let original = body.find(MASK_CLOSE).and_then(|end| {
            let value = body[..end].parse::<usize>().ok().and_then(|i| masked.get(i))?;
            Some((value, end))
        });
        match original {
            Some((value, end)) => {
                out.push_str(value);
                rest = &body[end + MASK_CLOSE.len_utf8()..];
            }
            None => {
                out.push(MASK_OPEN);
                rest = body;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Flattens a tera error and its sources into one line.
fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
