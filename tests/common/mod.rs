// ABOUTME: In-process fake connections shared by the integration tests
// ABOUTME: Inject connection loss, row rejection and cancellation at chosen points

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use seren_transfer::connection::{DestinationConnection, RowCursor, SourceConnection, WriteError};
use seren_transfer::error::TransferError;
use seren_transfer::job::ProgressState;
use seren_transfer::model::{ColumnDescriptor, ColumnType, RowRecord, TableSource, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// `id INTEGER NOT NULL, name TEXT`
pub fn people_columns() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor::new("id", 0, ColumnType::Integer).not_null(),
        ColumnDescriptor::new("name", 1, ColumnType::Text),
    ]
}

/// Rows `(1, "person 1") ..= (n, "person n")`
pub fn people_rows(n: i64) -> Vec<RowRecord> {
    (1..=n)
        .map(|id| {
            RowRecord::new(vec![
                Value::Integer(id),
                Value::Text(format!("person {}", id)),
            ])
        })
        .collect()
}

/// Source serving fixed rows from memory
pub struct MemorySource {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<RowRecord>,
    /// Fail every fetch after this many pages, as if the connection dropped
    fail_after_pages: Option<usize>,
    /// Request cancellation while serving this page
    cancel_after_pages: Option<(usize, Arc<ProgressState>)>,
    pub cursors_opened: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<RowRecord>) -> Self {
        Self {
            columns,
            rows,
            fail_after_pages: None,
            cancel_after_pages: None,
            cursors_opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn people(n: i64) -> Self {
        Self::new(people_columns(), people_rows(n))
    }

    pub fn fail_after_pages(mut self, pages: usize) -> Self {
        self.fail_after_pages = Some(pages);
        self
    }

    pub fn cancel_after_pages(mut self, pages: usize, progress: Arc<ProgressState>) -> Self {
        self.cancel_after_pages = Some((pages, progress));
        self
    }
}

struct MemoryCursor {
    rows: VecDeque<RowRecord>,
    pages: usize,
    fail_after_pages: Option<usize>,
    cancel_after_pages: Option<(usize, Arc<ProgressState>)>,
}

#[async_trait]
impl RowCursor for MemoryCursor {
    async fn fetch(&mut self, max: usize) -> Result<Vec<RowRecord>> {
        if self.fail_after_pages == Some(self.pages) {
            return Err(anyhow::Error::new(TransferError::SourceUnavailable(
                "connection reset by peer".into(),
            )));
        }
        let take = max.min(self.rows.len());
        let page: Vec<RowRecord> = self.rows.drain(..take).collect();
        self.pages += 1;
        if let Some((pages, progress)) = &self.cancel_after_pages {
            if *pages == self.pages {
                progress.request_cancel();
            }
        }
        Ok(page)
    }
}

#[async_trait]
impl SourceConnection for MemorySource {
    async fn describe(&mut self, _source: &TableSource) -> Result<Vec<ColumnDescriptor>> {
        Ok(self.columns.clone())
    }

    async fn estimate_rows(&mut self, _source: &TableSource) -> Result<Option<u64>> {
        Ok(Some(self.rows.len() as u64))
    }

    async fn open_cursor<'a>(
        &'a mut self,
        _source: &TableSource,
        _columns: &[ColumnDescriptor],
    ) -> Result<Box<dyn RowCursor + 'a>> {
        self.cursors_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryCursor {
            rows: self.rows.iter().cloned().collect(),
            pages: 0,
            fail_after_pages: self.fail_after_pages,
            cancel_after_pages: self.cancel_after_pages.clone(),
        }))
    }
}

type Tables = Arc<Mutex<HashMap<String, (Vec<ColumnDescriptor>, Vec<RowRecord>)>>>;

/// Destination keeping committed rows per table in memory
#[derive(Clone, Default)]
pub struct MemoryDestination {
    tables: Tables,
    reject: Option<fn(&RowRecord) -> bool>,
    fail_after_batches: Option<usize>,
    batches: Arc<AtomicUsize>,
    pub statements: Arc<Mutex<Vec<String>>>,
}

impl MemoryDestination {
    pub fn with_table(self, name: &str, columns: Vec<ColumnDescriptor>) -> Self {
        self.tables
            .lock()
            .unwrap()
            .insert(name.to_string(), (columns, Vec::new()));
        self
    }

    /// Refuse any batch holding a row matching `predicate`
    pub fn rejecting(mut self, predicate: fn(&RowRecord) -> bool) -> Self {
        self.reject = Some(predicate);
        self
    }

    /// Lose the connection once this many batches have been attempted
    pub fn fail_after_batches(mut self, batches: usize) -> Self {
        self.fail_after_batches = Some(batches);
        self
    }

    pub fn rows(&self, table: &str) -> Vec<RowRecord> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DestinationConnection for MemoryDestination {
    async fn describe(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .map(|(columns, _)| columns.clone())
            .unwrap_or_default())
    }

    async fn execute_statements(&mut self, statements: &[String]) -> Result<(), WriteError> {
        self.statements
            .lock()
            .unwrap()
            .extend(statements.iter().cloned());
        Ok(())
    }

    async fn insert_batch(
        &mut self,
        table: &str,
        _columns: &[ColumnDescriptor],
        rows: &[RowRecord],
    ) -> Result<(), WriteError> {
        let attempt = self.batches.fetch_add(1, Ordering::SeqCst);
        if self.fail_after_batches.is_some_and(|n| attempt >= n) {
            return Err(WriteError::Unavailable("server closed the connection".into()));
        }
        if let Some(reject) = self.reject {
            if rows.iter().any(reject) {
                return Err(WriteError::Rejected("duplicate key value".into()));
            }
        }
        let mut tables = self.tables.lock().unwrap();
        let entry = tables
            .entry(table.to_string())
            .or_insert_with(|| (Vec::new(), Vec::new()));
        entry.1.extend(rows.iter().cloned());
        Ok(())
    }
}
