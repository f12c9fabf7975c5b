// ABOUTME: SQLite destination adapter executing DDL and batched inserts in transactions
// ABOUTME: Classifies SQLite failures as rejected statements or a lost database

use super::converter::to_sqlite;
use super::reader::describe_table;
use super::SqliteConnection;
use crate::connection::{DestinationConnection, WriteError};
use crate::model::{ColumnDescriptor, RowRecord};
use crate::utils::quote_ident;
use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection, ErrorCode};

/// Sort a rusqlite failure into "statement refused" or "database gone"
pub fn classify(err: rusqlite::Error) -> WriteError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::CannotOpen
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::DiskFull
            | ErrorCode::SystemIoFailure
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::NotADatabase
            | ErrorCode::ReadOnly
            | ErrorCode::PermissionDenied
            | ErrorCode::OutOfMemory => WriteError::Unavailable(err.to_string()),
            _ => WriteError::Rejected(err.to_string()),
        },
        _ => WriteError::Rejected(err.to_string()),
    }
}

pub fn insert_statement(table: &str, columns: &[ColumnDescriptor]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
    let params: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.join(", "),
        params.join(", ")
    )
}

fn insert_rows(
    conn: &mut Connection,
    table: &str,
    columns: &[ColumnDescriptor],
    rows: &[RowRecord],
) -> Result<(), WriteError> {
    let tx = conn.transaction().map_err(classify)?;
    {
        let mut stmt = tx
            .prepare_cached(&insert_statement(table, columns))
            .map_err(classify)?;
        for row in rows {
            stmt.execute(params_from_iter(row.cells().iter().map(to_sqlite)))
                .map_err(classify)?;
        }
    }
    // dropping an uncommitted transaction rolls it back
    tx.commit().map_err(classify)
}

fn execute_all(conn: &mut Connection, statements: &[String]) -> Result<(), WriteError> {
    let tx = conn.transaction().map_err(classify)?;
    for statement in statements {
        tx.execute_batch(statement).map_err(classify)?;
    }
    tx.commit().map_err(classify)
}

impl SqliteConnection {
    fn write<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, WriteError>,
    ) -> Result<T, WriteError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| WriteError::Unavailable(format!("SQLite connection to {} is poisoned", self.label)))?;
        f(&mut guard)
    }
}

#[async_trait]
impl DestinationConnection for SqliteConnection {
    async fn describe(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        self.with_conn(|conn| describe_table(conn, None, table))
    }

    async fn execute_statements(&mut self, statements: &[String]) -> Result<(), WriteError> {
        self.write(|conn| execute_all(conn, statements))
    }

    async fn insert_batch(
        &mut self,
        table: &str,
        columns: &[ColumnDescriptor],
        rows: &[RowRecord],
    ) -> Result<(), WriteError> {
        self.write(|conn| insert_rows(conn, table, columns, rows))
    }
}
