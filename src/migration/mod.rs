// ABOUTME: DB-to-DB Migrator streaming source pages straight into destination batches
// ABOUTME: Optionally creates the destination table from the source's column descriptors first

use crate::batcher::InsertBatcher;
use crate::config::JobConfig;
use crate::connection::{DestinationConnection, SourceConnection};
use crate::error::TransferError;
use crate::import::{create_target, describe_target, map_names};
use crate::job::{JobResult, Phase, ProgressState};
use crate::model::{ColumnDescriptor, TableSchema};
use crate::reader::RowStreamReader;
use crate::utils::sanitize_identifier;
use anyhow::{Context, Result};

/// Copy the configured source into the destination table in a single pass
///
/// Each page read from the source becomes one destination batch, so a
/// cancellation observed between pages leaves exactly the committed batches.
pub async fn run_migration(
    source: &mut dyn SourceConnection,
    destination: &mut dyn DestinationConnection,
    config: &JobConfig,
    progress: &ProgressState,
) -> JobResult {
    let mut diagnostics = Vec::new();
    let outcome = migrate(source, destination, config, progress, &mut diagnostics).await;
    progress.finish(outcome, diagnostics)
}

async fn migrate(
    source: &mut dyn SourceConnection,
    destination: &mut dyn DestinationConnection,
    config: &JobConfig,
    progress: &ProgressState,
    diagnostics: &mut Vec<crate::error::RowDiagnostic>,
) -> Result<()> {
    progress.set_phase(Phase::ReadingSchema);
    let table = config.target_table();
    tracing::info!(
        "Migrating {} into {}",
        sanitize_identifier(&config.source.to_string()),
        sanitize_identifier(table)
    );

    let mut reader = RowStreamReader::open(source, &config.source, config.batch_size).await?;
    progress.set_total(reader.estimated_total());

    let columns = if config.create_target {
        let schema = TableSchema::new(table, reader.columns().to_vec())
            .with_constraints(config.constraints.clone());
        create_target(destination, &schema, config).await?;
        schema.columns
    } else {
        let existing = describe_target(destination, table).await?;
        align_columns(reader.columns(), &existing)
            .with_context(|| format!("Target table {}", sanitize_identifier(table)))?
    };

    progress.set_phase(Phase::Transferring);
    let mut batcher = InsertBatcher::new(
        destination,
        progress,
        table,
        columns,
        config.batch_size,
        config.error_policy,
    );

    let outcome: Result<()> = async {
        let mut row_number = 0u64;
        loop {
            progress.check_cancelled()?;
            let Some(page) = reader.next_page().await? else {
                break;
            };
            for row in page {
                row_number += 1;
                batcher.push(row_number, row).await?;
            }
            batcher.flush().await?;
        }
        progress.set_phase(Phase::Finalizing);
        let committed = batcher.finish().await?;
        tracing::info!(
            "Migration into {} complete: {} rows committed",
            sanitize_identifier(table),
            committed
        );
        Ok(())
    }
    .await;

    diagnostics.extend(batcher.into_diagnostics());
    outcome
}

/// Match source columns onto an existing target table by name
///
/// The result keeps the source's order and types under the target's column
/// names, so source rows can be inserted unchanged.
fn align_columns(
    source: &[ColumnDescriptor],
    target: &[ColumnDescriptor],
) -> Result<Vec<ColumnDescriptor>> {
    if source.len() > target.len() {
        return Err(anyhow::Error::new(TransferError::SchemaMismatch(format!(
            "source has {} columns but the target only {}",
            source.len(),
            target.len()
        ))));
    }
    let names: Vec<String> = source.iter().map(|c| c.name.clone()).collect();
    let mapping = map_names(&names, target)?;
    Ok(source
        .iter()
        .zip(mapping)
        .map(|(column, idx)| ColumnDescriptor {
            name: target[idx].name.clone(),
            ..column.clone()
        })
        .collect())
}
