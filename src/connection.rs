// ABOUTME: Connection collaborator traits the engine reads from and writes to
// ABOUTME: Adapters for SQLite and PostgreSQL implement these; tests use in-memory fakes

use crate::model::{ColumnDescriptor, RowRecord, TableSource};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

/// Forward-only cursor over an open query
#[async_trait]
pub trait RowCursor: Send {
    /// Fetch up to `max` rows; fewer than `max` means the cursor is exhausted
    async fn fetch(&mut self, max: usize) -> Result<Vec<RowRecord>>;
}

/// Live, already-authenticated connection that rows are read from
#[async_trait]
pub trait SourceConnection: Send {
    /// Column descriptors for a table or query, in result order
    async fn describe(&mut self, source: &TableSource) -> Result<Vec<ColumnDescriptor>>;

    /// Cheap row count if the source can report one
    async fn estimate_rows(&mut self, source: &TableSource) -> Result<Option<u64>>;

    /// Open a cursor yielding rows that match `columns` positionally
    async fn open_cursor<'a>(
        &'a mut self,
        source: &TableSource,
        columns: &[ColumnDescriptor],
    ) -> Result<Box<dyn RowCursor + 'a>>;

    /// Table names available for dumping, with row estimates where cheap
    async fn list_tables(&mut self) -> Result<Vec<(String, Option<u64>)>> {
        Ok(Vec::new())
    }
}

/// Failure of a transactional write against a destination
#[derive(Debug, Error)]
pub enum WriteError {
    /// The statement or batch was refused and rolled back; the connection is still usable
    #[error("{0}")]
    Rejected(String),

    /// The connection is gone; nothing more can be written
    #[error("{0}")]
    Unavailable(String),
}

/// Live connection that rows are written to
#[async_trait]
pub trait DestinationConnection: Send {
    /// Columns of an existing table; an empty list when the table does not exist
    async fn describe(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Execute statements in one transaction
    async fn execute_statements(&mut self, statements: &[String]) -> Result<(), WriteError>;

    /// Insert rows in one transaction; either all rows commit or none do
    async fn insert_batch(
        &mut self,
        table: &str,
        columns: &[ColumnDescriptor],
        rows: &[RowRecord],
    ) -> Result<(), WriteError>;
}
