// ABOUTME: Row Stream Reader pulling rows from a source connection in fixed-size pages
// ABOUTME: Forward-only; a fresh reader must be opened to re-scan a table or query

use crate::connection::{RowCursor, SourceConnection};
use crate::error::{classify_or, TransferError};
use crate::model::{ColumnDescriptor, RowRecord, TableSource};
use crate::utils::sanitize_identifier;
use anyhow::{Context, Result};

/// Describe a source, failing with `SOURCE_UNAVAILABLE` when it cannot be reached
pub async fn describe_source(
    conn: &mut dyn SourceConnection,
    source: &TableSource,
) -> Result<Vec<ColumnDescriptor>> {
    let columns = conn
        .describe(source)
        .await
        .map_err(|e| classify_or(e, TransferError::SourceUnavailable))
        .with_context(|| {
            format!(
                "Failed to describe {}",
                sanitize_identifier(&source.to_string())
            )
        })?;
    if columns.is_empty() {
        return Err(anyhow::Error::new(TransferError::SchemaMismatch(format!(
            "{} has no columns",
            sanitize_identifier(&source.to_string())
        ))));
    }
    Ok(columns)
}

pub struct RowStreamReader<'a> {
    cursor: Box<dyn RowCursor + 'a>,
    columns: Vec<ColumnDescriptor>,
    page_size: usize,
    estimated_total: Option<u64>,
    rows_read: u64,
    exhausted: bool,
}

impl<'a> RowStreamReader<'a> {
    /// Describe the source and open a cursor over it
    ///
    /// A failing row estimate only degrades progress reporting, so it is
    /// logged and treated as unknown.
    pub async fn open(
        conn: &'a mut dyn SourceConnection,
        source: &TableSource,
        page_size: usize,
    ) -> Result<RowStreamReader<'a>> {
        let columns = describe_source(conn, source).await?;

        let estimated_total = match conn.estimate_rows(source).await {
            Ok(estimate) => estimate,
            Err(e) => {
                tracing::warn!(
                    "Row estimate for {} unavailable: {:#}",
                    sanitize_identifier(&source.to_string()),
                    e
                );
                None
            }
        };

        let cursor = conn
            .open_cursor(source, &columns)
            .await
            .map_err(|e| classify_or(e, TransferError::SourceUnavailable))
            .with_context(|| {
                format!(
                    "Failed to open cursor over {}",
                    sanitize_identifier(&source.to_string())
                )
            })?;

        Ok(RowStreamReader {
            cursor,
            columns,
            page_size: page_size.max(1),
            estimated_total,
            rows_read: 0,
            exhausted: false,
        })
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn estimated_total(&self) -> Option<u64> {
        self.estimated_total
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Next page of at most `page_size` rows; `None` once the source is exhausted
    ///
    /// Every returned row has exactly one cell per column. A row of another
    /// width is a fatal schema mismatch.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RowRecord>>> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .cursor
            .fetch(self.page_size)
            .await
            .map_err(|e| classify_or(e, TransferError::SourceUnavailable))
            .with_context(|| format!("Failed to read rows after row {}", self.rows_read))?;

        if page.len() < self.page_size {
            self.exhausted = true;
        }

        for (idx, row) in page.iter().enumerate() {
            row.check_arity(&self.columns).with_context(|| {
                format!("Source row {}", self.rows_read + idx as u64 + 1)
            })?;
        }

        self.rows_read += page.len() as u64;
        tracing::debug!("Read page of {} rows ({} total)", page.len(), self.rows_read);

        if page.is_empty() {
            Ok(None)
        } else {
            Ok(Some(page))
        }
    }
}
