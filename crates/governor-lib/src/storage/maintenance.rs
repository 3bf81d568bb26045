//! Table maintenance between test runs
//!
//! Builds per-engine statement plans to toggle constraints, delete rows
//! and reset identity counters, then executes them through the retry
//! executor.

use super::{RetryExecutor, StorageHandle};
use crate::error::{GovernorError, Result};
use crate::models::StorageEngine;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a cleanup run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub tables: Vec<String>,
    pub rows_deleted: u64,
    pub statements_executed: usize,
}

/// Reject anything that is not a plain SQL identifier
pub fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(GovernorError::InvalidIdentifier(name.to_string()))
    }
}

fn disable_constraints(engine: StorageEngine) -> &'static str {
    match engine {
        StorageEngine::Sqlite => "PRAGMA foreign_keys = OFF",
        StorageEngine::Postgres => "SET session_replication_role = 'replica'",
        StorageEngine::Mysql => "SET FOREIGN_KEY_CHECKS = 0",
    }
}

fn enable_constraints(engine: StorageEngine) -> &'static str {
    match engine {
        StorageEngine::Sqlite => "PRAGMA foreign_keys = ON",
        StorageEngine::Postgres => "SET session_replication_role = 'origin'",
        StorageEngine::Mysql => "SET FOREIGN_KEY_CHECKS = 1",
    }
}

fn reset_identity_statement(engine: StorageEngine, table: &str) -> String {
    match engine {
        StorageEngine::Sqlite => format!("DELETE FROM sqlite_sequence WHERE name = '{}'", table),
        StorageEngine::Postgres => {
            format!("ALTER SEQUENCE IF EXISTS {}_id_seq RESTART WITH 1", table)
        }
        StorageEngine::Mysql => format!("ALTER TABLE {} AUTO_INCREMENT = 1", table),
    }
}

/// Clears tables through a storage handle
pub struct TableCleaner {
    storage: Arc<dyn StorageHandle>,
    executor: Arc<RetryExecutor>,
}

impl TableCleaner {
    pub fn new(storage: Arc<dyn StorageHandle>, executor: Arc<RetryExecutor>) -> Self {
        Self { storage, executor }
    }

    /// Statement plan for clearing `tables`, constraints toggled around it
    pub fn plan(engine: StorageEngine, tables: &[&str]) -> Result<Vec<String>> {
        for table in tables {
            validate_identifier(table)?;
        }

        let mut statements = Vec::with_capacity(tables.len() * 2 + 2);
        statements.push(disable_constraints(engine).to_string());
        for table in tables {
            statements.push(format!("DELETE FROM {}", table));
            statements.push(reset_identity_statement(engine, table));
        }
        statements.push(enable_constraints(engine).to_string());
        Ok(statements)
    }

    /// Delete every row of `tables` and reset their identity counters
    ///
    /// Constraints are re-enabled even when a deletion fails; the first
    /// error is returned afterwards.
    pub async fn clean(&self, tables: &[&str]) -> Result<CleanupReport> {
        let engine = self.storage.engine();
        for table in tables {
            validate_identifier(table)?;
        }

        let storage = self.storage.as_ref();
        let mut report = CleanupReport {
            tables: tables.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        };

        self.executor
            .execute_statement(storage, disable_constraints(engine))
            .await?;
        report.statements_executed += 1;

        let mut failure = None;
        for table in tables {
            let delete = format!("DELETE FROM {}", table);
            match self.executor.execute_statement(storage, &delete).await {
                Ok(rows) => {
                    report.rows_deleted += rows;
                    report.statements_executed += 1;
                }
                Err(e) => {
                    warn!(table = %table, error = %e, "Failed to clear table");
                    failure = Some(e);
                    break;
                }
            }

            let reset = reset_identity_statement(engine, table);
            if let Err(e) = self.executor.execute_statement(storage, &reset).await {
                warn!(table = %table, error = %e, "Failed to reset identity");
                failure = Some(e);
                break;
            }
            report.statements_executed += 1;
        }

        let restore = self
            .executor
            .execute_statement(storage, enable_constraints(engine))
            .await;

        if let Some(e) = failure {
            return Err(e);
        }
        restore?;
        report.statements_executed += 1;

        info!(
            engine = %engine,
            tables = report.tables.len(),
            rows_deleted = report.rows_deleted,
            "Cleaned tables"
        );
        Ok(report)
    }
}
