// ABOUTME: Insert Batcher accumulating rows into bounded transactional writes
// ABOUTME: Applies abort-on-first-error or continue-on-error policy to rejected batches

use crate::connection::{DestinationConnection, WriteError};
use crate::error::{ErrorKind, RowDiagnostic, TransferError};
use crate::job::ProgressState;
use crate::model::{ColumnDescriptor, RowRecord};
use crate::utils::sanitize_identifier;
use anyhow::{Context, Result};
use serde::Deserialize;

/// What to do when the destination rejects a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    #[default]
    AbortOnFirstError,
    /// Retry the rejected batch row by row, recording each refused row
    ContinueOnError,
}

pub struct InsertBatcher<'a> {
    destination: &'a mut dyn DestinationConnection,
    progress: &'a ProgressState,
    table: String,
    columns: Vec<ColumnDescriptor>,
    batch_size: usize,
    policy: ErrorPolicy,
    pending: Vec<RowRecord>,
    /// Input position of each pending row, parallel to `pending`
    row_numbers: Vec<u64>,
    committed: u64,
    diagnostics: Vec<RowDiagnostic>,
}

impl<'a> InsertBatcher<'a> {
    pub fn new(
        destination: &'a mut dyn DestinationConnection,
        progress: &'a ProgressState,
        table: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
        batch_size: usize,
        policy: ErrorPolicy,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            destination,
            progress,
            table: table.into(),
            columns,
            batch_size,
            policy,
            pending: Vec::with_capacity(batch_size),
            row_numbers: Vec::with_capacity(batch_size),
            committed: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Rows committed so far
    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// True when no rows are waiting, i.e. the batcher sits on a batch boundary
    pub fn is_at_boundary(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue a row, submitting the batch once it is full
    ///
    /// `row_number` is the row's one-based position in the job's input and is
    /// only used for diagnostics.
    pub async fn push(&mut self, row_number: u64, row: RowRecord) -> Result<()> {
        row.check_arity(&self.columns)
            .with_context(|| format!("Row {}", row_number))?;
        self.pending.push(row);
        self.row_numbers.push(row_number);
        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Submit pending rows as one transaction
    pub async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let first_row = self.row_numbers[0];
        let outcome = self
            .destination
            .insert_batch(&self.table, &self.columns, &self.pending)
            .await;
        let rows = std::mem::take(&mut self.pending);
        let row_numbers = std::mem::take(&mut self.row_numbers);

        match outcome {
            Ok(()) => {
                self.commit(rows.len() as u64);
                tracing::debug!(
                    "Committed batch of {} rows into {} ({} total)",
                    rows.len(),
                    sanitize_identifier(&self.table),
                    self.committed
                );
                Ok(())
            }
            Err(WriteError::Unavailable(message)) => {
                Err(anyhow::Error::new(TransferError::SinkUnavailable(message)))
                    .with_context(|| format!("Batch starting at row {}", first_row))
            }
            Err(WriteError::Rejected(message)) => match self.policy {
                ErrorPolicy::AbortOnFirstError => {
                    Err(anyhow::Error::new(TransferError::RowRejected(message)))
                        .with_context(|| format!("Batch starting at row {}", first_row))
                }
                ErrorPolicy::ContinueOnError => {
                    tracing::warn!(
                        "Batch starting at row {} rejected ({}); retrying rows individually",
                        first_row,
                        message
                    );
                    self.retry_individually(row_numbers, rows).await
                }
            },
        }
    }

    async fn retry_individually(&mut self, row_numbers: Vec<u64>, rows: Vec<RowRecord>) -> Result<()> {
        for (row_number, row) in row_numbers.into_iter().zip(rows) {
            let single = [row];
            match self
                .destination
                .insert_batch(&self.table, &self.columns, &single)
                .await
            {
                Ok(()) => self.commit(1),
                Err(WriteError::Rejected(message)) => {
                    let diagnostic = RowDiagnostic::new(row_number, ErrorKind::RowRejected, message);
                    tracing::warn!("Skipping {}", diagnostic);
                    self.diagnostics.push(diagnostic);
                }
                Err(WriteError::Unavailable(message)) => {
                    return Err(anyhow::Error::new(TransferError::SinkUnavailable(message)))
                        .with_context(|| format!("Row {}", row_number));
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self, rows: u64) {
        self.committed += rows;
        self.progress.add_rows(rows);
    }

    /// Flush the final partial batch, returning the total rows committed
    pub async fn finish(&mut self) -> Result<u64> {
        self.flush().await?;
        Ok(self.committed)
    }

    /// Rows refused by the destination under continue-on-error
    pub fn into_diagnostics(self) -> Vec<RowDiagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_kind;
    use crate::model::{ColumnType, Value};
    use async_trait::async_trait;

    #[derive(Default)]
    struct Recorder {
        committed: Vec<i64>,
        batches: Vec<usize>,
        reject_id: Option<i64>,
        unavailable: bool,
    }

    #[async_trait]
    impl DestinationConnection for Recorder {
        async fn describe(&mut self, _table: &str) -> Result<Vec<ColumnDescriptor>> {
            Ok(Vec::new())
        }

        async fn execute_statements(&mut self, _statements: &[String]) -> Result<(), WriteError> {
            Ok(())
        }

        async fn insert_batch(
            &mut self,
            _table: &str,
            _columns: &[ColumnDescriptor],
            rows: &[RowRecord],
        ) -> Result<(), WriteError> {
            if self.unavailable {
                return Err(WriteError::Unavailable("connection closed".into()));
            }
            let ids: Vec<i64> = rows
                .iter()
                .map(|r| match r.get(0) {
                    Some(Value::Integer(i)) => *i,
                    _ => -1,
                })
                .collect();
            if ids.iter().any(|id| Some(*id) == self.reject_id) {
                return Err(WriteError::Rejected("duplicate key".into()));
            }
            self.batches.push(rows.len());
            self.committed.extend(ids);
            Ok(())
        }
    }

    fn columns() -> Vec<ColumnDescriptor> {
        vec![ColumnDescriptor::new("id", 0, ColumnType::Integer)]
    }

    fn row(id: i64) -> RowRecord {
        RowRecord::new(vec![Value::Integer(id)])
    }

    #[tokio::test]
    async fn test_batches_in_order_with_partial_tail() {
        let mut dest = Recorder::default();
        let progress = ProgressState::new();
        let mut batcher = InsertBatcher::new(
            &mut dest,
            &progress,
            "t",
            columns(),
            3,
            ErrorPolicy::AbortOnFirstError,
        );
        for id in 1..=7 {
            batcher.push(id as u64, row(id)).await.unwrap();
        }
        let committed = batcher.finish().await.unwrap();
        assert_eq!(committed, 7);
        assert!(batcher.into_diagnostics().is_empty());
        assert_eq!(progress.rows_processed(), 7);
        assert_eq!(dest.batches, vec![3, 3, 1]);
        assert_eq!(dest.committed, (1..=7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_abort_policy_fails_on_rejection() {
        let mut dest = Recorder {
            reject_id: Some(5),
            ..Default::default()
        };
        let progress = ProgressState::new();
        let mut batcher = InsertBatcher::new(
            &mut dest,
            &progress,
            "t",
            columns(),
            2,
            ErrorPolicy::AbortOnFirstError,
        );
        let mut failure = None;
        for id in 1..=6 {
            if let Err(e) = batcher.push(id as u64, row(id)).await {
                failure = Some(e);
                break;
            }
        }
        let err = failure.unwrap();
        assert_eq!(error_kind(&err), ErrorKind::RowRejected);
        assert_eq!(batcher.committed(), 4);
        assert_eq!(dest.committed, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_continue_policy_isolates_bad_row() {
        let mut dest = Recorder {
            reject_id: Some(5),
            ..Default::default()
        };
        let progress = ProgressState::new();
        let mut batcher = InsertBatcher::new(
            &mut dest,
            &progress,
            "t",
            columns(),
            4,
            ErrorPolicy::ContinueOnError,
        );
        for id in 1..=10 {
            batcher.push(id as u64, row(id)).await.unwrap();
        }
        let committed = batcher.finish().await.unwrap();
        let diagnostics = batcher.into_diagnostics();
        assert_eq!(committed, 9);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].row, 5);
        assert_eq!(diagnostics[0].kind, ErrorKind::RowRejected);
        assert!(!dest.committed.contains(&5));
        // no row submitted twice
        let mut seen = dest.committed.clone();
        seen.dedup();
        assert_eq!(seen.len(), dest.committed.len());
    }

    #[tokio::test]
    async fn test_rejected_batch_is_retried_then_batching_resumes() {
        let mut dest = Recorder {
            reject_id: Some(2),
            ..Default::default()
        };
        let progress = ProgressState::new();
        let mut batcher = InsertBatcher::new(
            &mut dest,
            &progress,
            "t",
            columns(),
            3,
            ErrorPolicy::ContinueOnError,
        );
        for id in 1..=3 {
            batcher.push(id as u64, row(id)).await.unwrap();
        }
        assert!(batcher.is_at_boundary());
        assert_eq!(batcher.committed(), 2);
        for id in 4..=6 {
            batcher.push(id as u64, row(id)).await.unwrap();
        }
        assert_eq!(batcher.finish().await.unwrap(), 5);
        let diagnostics = batcher.into_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].row, 2);
        assert_eq!(dest.batches, vec![1, 1, 3]);
        assert_eq!(dest.committed, vec![1, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_lost_connection_is_fatal_under_any_policy() {
        let mut dest = Recorder {
            unavailable: true,
            ..Default::default()
        };
        let progress = ProgressState::new();
        let mut batcher = InsertBatcher::new(
            &mut dest,
            &progress,
            "t",
            columns(),
            1,
            ErrorPolicy::ContinueOnError,
        );
        let err = batcher.push(1, row(1)).await.unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::SinkUnavailable);
        assert_eq!(progress.rows_processed(), 0);
    }

    #[tokio::test]
    async fn test_wrong_width_row_is_schema_mismatch() {
        let mut dest = Recorder::default();
        let progress = ProgressState::new();
        let mut batcher = InsertBatcher::new(
            &mut dest,
            &progress,
            "t",
            columns(),
            10,
            ErrorPolicy::ContinueOnError,
        );
        let err = batcher
            .push(1, RowRecord::new(vec![Value::Integer(1), Value::Null]))
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::SchemaMismatch);
    }
}
