// ABOUTME: Integration tests for whole jobs under failure, rejection and cancellation
// ABOUTME: Drives dump, import and migration workers against in-process fake connections

mod common;

use common::{people_columns, MemoryDestination, MemorySource};
use seren_transfer::batcher::ErrorPolicy;
use seren_transfer::config::{DataFormat, JobConfig};
use seren_transfer::dump::dump_to_writer;
use seren_transfer::error::ErrorKind;
use seren_transfer::import::{import_from_reader, run_import, ParseMode};
use seren_transfer::job::{Job, JobController, JobStatus, ProgressState};
use seren_transfer::migration::run_migration;
use seren_transfer::model::{RowRecord, Value};
use std::io::Cursor;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn migrate_config(batch_size: usize) -> JobConfig {
    let mut config = JobConfig::for_table("people", DataFormat::Delimited);
    config.batch_size = batch_size;
    config
}

fn people_csv(bad_row: Option<usize>) -> String {
    let mut text = String::from("id,name\n");
    for id in 1..=10 {
        if Some(id) == bad_row {
            text.push_str("five,broken\n");
        } else {
            text.push_str(&format!("{},person {}\n", id, id));
        }
    }
    text
}

#[tokio::test]
async fn test_cancellation_leaves_whole_batches() {
    let progress = Arc::new(ProgressState::new());
    let mut source = MemorySource::people(100).cancel_after_pages(3, Arc::clone(&progress));
    let mut destination = MemoryDestination::default().with_table("people", people_columns());

    let result = run_migration(&mut source, &mut destination, &migrate_config(10), &progress).await;

    assert_eq!(result.status, JobStatus::Cancelled);
    assert_eq!(result.rows, 30);
    assert_eq!(destination.rows("people").len(), 30);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_source_connection_drop_fails_the_job() {
    let progress = ProgressState::new();
    let mut source = MemorySource::people(100).fail_after_pages(2);
    let mut destination = MemoryDestination::default().with_table("people", people_columns());

    let result = run_migration(&mut source, &mut destination, &migrate_config(10), &progress).await;

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.error.unwrap().kind, ErrorKind::SourceUnavailable);
    assert_eq!(result.rows, 20);
    assert_eq!(destination.rows("people").len(), 20);
}

#[tokio::test]
async fn test_destination_loss_fails_the_job() {
    let progress = ProgressState::new();
    let mut source = MemorySource::people(50);
    let mut destination = MemoryDestination::default()
        .with_table("people", people_columns())
        .fail_after_batches(3);

    let result = run_migration(&mut source, &mut destination, &migrate_config(10), &progress).await;

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.error.unwrap().kind, ErrorKind::SinkUnavailable);
    assert_eq!(result.rows, 30);
}

fn rejects_seven(row: &RowRecord) -> bool {
    row.get(0) == Some(&Value::Integer(7))
}

#[tokio::test]
async fn test_rejected_row_is_recorded_under_continue_policy() {
    let progress = ProgressState::new();
    let mut source = MemorySource::people(12);
    let mut destination = MemoryDestination::default()
        .with_table("people", people_columns())
        .rejecting(rejects_seven);
    let mut config = migrate_config(5);
    config.error_policy = ErrorPolicy::ContinueOnError;

    let result = run_migration(&mut source, &mut destination, &config, &progress).await;

    assert_eq!(result.status, JobStatus::Completed);
    assert!(result.is_partial());
    assert_eq!(result.rows, 11);
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(result.diagnostics[0].row, 7);
    assert_eq!(result.diagnostics[0].kind, ErrorKind::RowRejected);
}

#[tokio::test]
async fn test_rejected_batch_aborts_by_default() {
    let progress = ProgressState::new();
    let mut source = MemorySource::people(12);
    let mut destination = MemoryDestination::default()
        .with_table("people", people_columns())
        .rejecting(rejects_seven);

    let result = run_migration(&mut source, &mut destination, &migrate_config(5), &progress).await;

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.error.unwrap().kind, ErrorKind::RowRejected);
    assert_eq!(result.rows, 5);
    assert_eq!(destination.rows("people").len(), 5);
}

#[tokio::test]
async fn test_permissive_import_skips_malformed_row() {
    let progress = ProgressState::new();
    let mut destination = MemoryDestination::default().with_table("people", people_columns());
    let mut config = JobConfig::for_table("people", DataFormat::Delimited);
    config.parse_mode = ParseMode::Permissive;

    let text = people_csv(Some(5));
    let result =
        import_from_reader(&mut destination, &config, Cursor::new(text.into_bytes()), &progress)
            .await;

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.rows, 9);
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(result.diagnostics[0].row, 5);
    assert_eq!(result.diagnostics[0].kind, ErrorKind::MalformedValue);
    assert_eq!(destination.rows("people").len(), 9);
}

#[tokio::test(flavor = "current_thread")]
async fn test_file_import_runs_on_single_threaded_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.csv");
    std::fs::write(&path, people_csv(Some(3))).unwrap();

    let progress = ProgressState::new();
    let mut destination = MemoryDestination::default().with_table("people", people_columns());
    let mut config = JobConfig::for_table("people", DataFormat::Delimited);
    config.location = Some(path);
    config.parse_mode = ParseMode::Permissive;
    config.batch_size = 4;

    let result = run_import(&mut destination, &config, &progress).await;

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.rows, 9);
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(result.diagnostics[0].row, 3);
    let ids: Vec<Value> = destination
        .rows("people")
        .iter()
        .map(|row| row.get(0).cloned().unwrap())
        .collect();
    let expected: Vec<Value> = [1, 2, 4, 5, 6, 7, 8, 9, 10]
        .into_iter()
        .map(Value::Integer)
        .collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_strict_import_fails_on_malformed_row() {
    let progress = ProgressState::new();
    let mut destination = MemoryDestination::default().with_table("people", people_columns());
    let config = JobConfig::for_table("people", DataFormat::Delimited);

    let text = people_csv(Some(5));
    let result =
        import_from_reader(&mut destination, &config, Cursor::new(text.into_bytes()), &progress)
            .await;

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.error.unwrap().kind, ErrorKind::MalformedValue);
}

#[tokio::test]
async fn test_schema_only_dump_never_opens_a_cursor() {
    let progress = ProgressState::new();
    let mut source = MemorySource::people(10);
    let opened = Arc::clone(&source.cursors_opened);
    let config = JobConfig::for_table("people", DataFormat::SchemaOnly);
    let mut sink = Vec::new();

    let result = dump_to_writer(&mut source, &config, &mut sink, &progress).await;

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.rows, 0);
    assert_eq!(opened.load(Ordering::SeqCst), 0);
    assert!(String::from_utf8(sink).unwrap().contains("CREATE TABLE \"people\""));
}

#[tokio::test]
async fn test_controller_runs_jobs_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let mut handles = Vec::new();
    for (name, rows) in [("small", 25), ("large", 40)] {
        let mut config = JobConfig::for_table(name, DataFormat::Delimited);
        config.batch_size = 7;
        config.location = Some(dir.path().join(format!("{}.csv", name)));
        let job = Job::Dump {
            source: Box::new(MemorySource::people(rows)),
            config,
        };
        handles.push(JobController::start(job).unwrap());
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.wait().await);
    }
    assert_eq!(results[0].rows, 25);
    assert_eq!(results[1].rows, 40);
    assert!(results.iter().all(|r| r.status == JobStatus::Completed));

    let large = std::fs::read_to_string(dir.path().join("large.csv")).unwrap();
    // header plus one line per row
    assert_eq!(large.lines().count(), 41);
}

#[tokio::test]
async fn test_controller_refuses_invalid_config() {
    let mut config = JobConfig::for_table("people", DataFormat::Delimited);
    config.batch_size = 0;
    config.location = Some("people.csv".into());
    let job = Job::Dump {
        source: Box::new(MemorySource::people(1)),
        config,
    };

    let err = JobController::start(job).err().unwrap();
    assert_eq!(
        seren_transfer::error::error_kind(&err),
        ErrorKind::InvalidConfig
    );
}
