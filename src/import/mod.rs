// ABOUTME: Import Parser family and the import worker feeding parsed rows to the batcher
// ABOUTME: Row-scoped parse errors are skipped in permissive mode and fatal in strict mode

pub mod delimited;
pub mod script;

use crate::batcher::InsertBatcher;
use crate::config::{DataFormat, JobConfig};
use crate::codec::Codec;
use crate::connection::{DestinationConnection, WriteError};
use crate::error::{RowDiagnostic, TransferError};
use crate::io::{open_source, TextEncoding};
use crate::job::{JobResult, Phase, ProgressState};
use crate::model::{ColumnDescriptor, RowRecord, TableSchema, Value};
use crate::schema::create_table_statement;
use crate::utils::sanitize_identifier;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::BufRead;
use tokio::sync::mpsc;

pub use delimited::DelimitedParser;
pub use script::ScriptParser;

/// Parsed rows buffered between the parser thread and the batcher
const CHANNEL_CAPACITY: usize = 1024;

/// How row-scoped parse errors are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// The first bad row fails the job
    #[default]
    Strict,
    /// Bad rows are recorded as diagnostics and skipped
    Permissive,
}

/// One logical input row, or the reason it could not be read
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    /// One-based data row number (headers and schema statements excluded)
    pub row_number: u64,
    pub outcome: Result<RowRecord, RowDiagnostic>,
}

/// Reads decoded lines, keeping their terminators
pub(crate) struct LineReader<R> {
    input: R,
    encoding: TextEncoding,
    buf: Vec<u8>,
    first: bool,
}

impl<R: BufRead> LineReader<R> {
    pub(crate) fn new(input: R, encoding: TextEncoding) -> Self {
        Self {
            input,
            encoding,
            buf: Vec::new(),
            first: true,
        }
    }

    pub(crate) fn next_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let read = self
            .input
            .read_until(b'\n', &mut self.buf)
            .map_err(|e| anyhow::Error::new(TransferError::SourceUnavailable(e.to_string())))
            .context("Failed to read import input")?;
        if read == 0 {
            return Ok(None);
        }
        let mut line = self.encoding.decode(&self.buf)?;
        if self.first {
            self.first = false;
            if let Some(stripped) = line.strip_prefix('\u{feff}') {
                line = stripped.to_string();
            }
        }
        Ok(Some(line))
    }
}

/// Map input column names onto target columns
///
/// Names match exactly first, then case-insensitively. Unknown or repeated
/// names, and NOT NULL targets the input never supplies, are fatal.
pub(crate) fn map_names(names: &[String], columns: &[ColumnDescriptor]) -> Result<Vec<usize>> {
    let mut map = Vec::with_capacity(names.len());
    for name in names {
        let idx = columns
            .iter()
            .position(|c| c.name == *name)
            .or_else(|| {
                columns
                    .iter()
                    .position(|c| c.name.to_lowercase() == name.to_lowercase())
            })
            .ok_or_else(|| {
                anyhow::Error::new(TransferError::SchemaMismatch(format!(
                    "input column '{}' does not exist in the target table",
                    sanitize_identifier(name)
                )))
            })?;
        if map.contains(&idx) {
            return Err(anyhow::Error::new(TransferError::SchemaMismatch(format!(
                "input column '{}' appears more than once",
                sanitize_identifier(name)
            ))));
        }
        map.push(idx);
    }

    if let Some(missing) = columns
        .iter()
        .enumerate()
        .find(|(idx, c)| !c.nullable && !map.contains(idx))
    {
        return Err(anyhow::Error::new(TransferError::SchemaMismatch(format!(
            "NOT NULL column '{}' is missing from the input",
            sanitize_identifier(&missing.1.name)
        ))));
    }
    Ok(map)
}

/// Decode raw fields into a row ordered like `columns`
///
/// Target columns the input does not supply are null.
pub(crate) fn decode_fields(
    codec: &Codec,
    columns: &[ColumnDescriptor],
    field_map: &[usize],
    fields: &[String],
) -> Result<RowRecord, TransferError> {
    if fields.len() != field_map.len() {
        return Err(TransferError::SchemaMismatch(format!(
            "expected {} fields, found {}",
            field_map.len(),
            fields.len()
        )));
    }
    let mut cells = vec![Value::Null; columns.len()];
    for (raw, &target) in fields.iter().zip(field_map) {
        let column = &columns[target];
        let value = codec.decode(raw, column.column_type).map_err(|e| {
            TransferError::MalformedValue(format!(
                "column '{}': {}",
                sanitize_identifier(&column.name),
                e
            ))
        })?;
        if value.is_null() && !column.nullable {
            return Err(TransferError::MalformedValue(format!(
                "column '{}' is NOT NULL",
                sanitize_identifier(&column.name)
            )));
        }
        cells[target] = value;
    }
    Ok(RowRecord::new(cells))
}

/// Parser for one importable format
pub enum ImportParser<R: BufRead> {
    Script(ScriptParser<R>),
    Delimited(DelimitedParser<R>),
}

impl<R: BufRead> Iterator for ImportParser<R> {
    type Item = Result<ParsedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ImportParser::Script(p) => p.next(),
            ImportParser::Delimited(p) => p.next(),
        }
    }
}

/// Import the file named by the job's location into the destination
pub async fn run_import(
    destination: &mut dyn DestinationConnection,
    config: &JobConfig,
    progress: &ProgressState,
) -> JobResult {
    let mut diagnostics = Vec::new();
    let outcome: Result<()> = async {
        let path = config.location.as_deref().ok_or_else(|| {
            anyhow::Error::new(TransferError::InvalidConfig(
                "an import needs an input location".into(),
            ))
        })?;
        let input = open_source(path)?;
        tracing::info!(
            "Importing {} into {}",
            path.display(),
            sanitize_identifier(config.target_table())
        );
        import_rows(destination, config, input, progress, &mut diagnostics).await
    }
    .await;
    progress.finish(outcome, diagnostics)
}

/// Import from any reader, such as an in-memory buffer
pub async fn import_from_reader<R: BufRead + Send + 'static>(
    destination: &mut dyn DestinationConnection,
    config: &JobConfig,
    input: R,
    progress: &ProgressState,
) -> JobResult {
    let mut diagnostics = Vec::new();
    let outcome = import_rows(destination, config, input, progress, &mut diagnostics).await;
    progress.finish(outcome, diagnostics)
}

pub(crate) async fn create_target(
    destination: &mut dyn DestinationConnection,
    schema: &TableSchema,
    config: &JobConfig,
) -> Result<()> {
    let statement = create_table_statement(schema, &config.type_mapping);
    tracing::info!(
        "Creating target table {}",
        sanitize_identifier(&schema.name)
    );
    destination
        .execute_statements(&[statement])
        .await
        .map_err(|e| match e {
            WriteError::Unavailable(m) => anyhow::Error::new(TransferError::SinkUnavailable(m)),
            WriteError::Rejected(m) => anyhow::Error::new(TransferError::SchemaMismatch(m)),
        })
        .with_context(|| {
            format!(
                "Failed to create target table {}",
                sanitize_identifier(&schema.name)
            )
        })
}

/// Columns of the existing target table; a missing table is fatal
pub(crate) async fn describe_target(
    destination: &mut dyn DestinationConnection,
    table: &str,
) -> Result<Vec<ColumnDescriptor>> {
    let columns = destination
        .describe(table)
        .await
        .map_err(|e| crate::error::classify_or(e, TransferError::SinkUnavailable))
        .with_context(|| format!("Failed to describe {}", sanitize_identifier(table)))?;
    if columns.is_empty() {
        return Err(anyhow::Error::new(TransferError::SchemaMismatch(format!(
            "target table {} does not exist",
            sanitize_identifier(table)
        ))));
    }
    Ok(columns)
}

/// Run a blocking parser step on the blocking pool
async fn off_worker<T, F>(step: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(step)
        .await
        .map_err(|e| anyhow::Error::new(TransferError::SourceUnavailable(e.to_string())))
        .context("Import parser task failed")?
}

/// Drive the parser on the blocking pool, handing rows over a bounded channel
fn spawn_parser<R: BufRead + Send + 'static>(
    parser: ImportParser<R>,
) -> mpsc::Receiver<Result<ParsedRow>> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        for item in parser {
            let fatal = item.is_err();
            // a dropped receiver means the import stopped early
            if tx.blocking_send(item).is_err() || fatal {
                return;
            }
        }
    });
    rx
}

async fn import_rows<R: BufRead + Send + 'static>(
    destination: &mut dyn DestinationConnection,
    config: &JobConfig,
    input: R,
    progress: &ProgressState,
    diagnostics: &mut Vec<RowDiagnostic>,
) -> Result<()> {
    progress.set_phase(Phase::ReadingSchema);
    let table = config.target_table();
    let encoding = config.encoding;

    match config.format {
        DataFormat::Script => {
            let terminator = config.script.terminator.clone();
            let embedded_schema = config.create_target && config.columns.is_none();
            let (mut parser, embedded) = off_worker(move || {
                let mut parser = ScriptParser::new(input, encoding, &terminator);
                let embedded = if embedded_schema {
                    parser.read_schema()?
                } else {
                    None
                };
                Ok((parser, embedded))
            })
            .await?;
            let columns = target_columns(destination, config, table, embedded).await?;
            parser.bind(columns.clone());
            transfer(
                destination,
                config,
                table,
                columns,
                ImportParser::Script(parser),
                progress,
                diagnostics,
            )
            .await
        }
        DataFormat::Delimited => {
            let columns = target_columns(destination, config, table, None).await?;
            let options = config.delimited.clone();
            let bound = columns.clone();
            let parser =
                off_worker(move || DelimitedParser::open(input, encoding, &options, bound)).await?;
            transfer(
                destination,
                config,
                table,
                columns,
                ImportParser::Delimited(parser),
                progress,
                diagnostics,
            )
            .await
        }
        other => Err(anyhow::Error::new(TransferError::InvalidConfig(format!(
            "{} output cannot be imported",
            other
        )))),
    }
}

/// Resolve the columns rows are decoded into, creating the table when asked
///
/// Explicit columns win, then an embedded table definition, then the
/// destination's own description of the table.
async fn target_columns(
    destination: &mut dyn DestinationConnection,
    config: &JobConfig,
    table: &str,
    embedded: Option<TableSchema>,
) -> Result<Vec<ColumnDescriptor>> {
    match (&config.columns, embedded) {
        (Some(columns), _) => {
            let mut columns = columns.clone();
            crate::model::renumber(&mut columns);
            if config.create_target {
                let schema = TableSchema::new(table, columns.clone())
                    .with_constraints(config.constraints.clone());
                create_target(destination, &schema, config).await?;
            }
            Ok(columns)
        }
        (None, Some(mut schema)) => {
            schema.name = table.to_string();
            if !config.constraints.is_empty() {
                schema.constraints = config.constraints.clone();
            }
            create_target(destination, &schema, config).await?;
            Ok(schema.columns)
        }
        (None, None) if config.create_target => {
            Err(anyhow::Error::new(TransferError::SchemaMismatch(
                "creating the target table needs explicit columns or an embedded CREATE TABLE"
                    .into(),
            )))
        }
        (None, None) => describe_target(destination, table).await,
    }
}

async fn transfer<R: BufRead + Send + 'static>(
    destination: &mut dyn DestinationConnection,
    config: &JobConfig,
    table: &str,
    columns: Vec<ColumnDescriptor>,
    parser: ImportParser<R>,
    progress: &ProgressState,
    diagnostics: &mut Vec<RowDiagnostic>,
) -> Result<()> {
    progress.set_phase(Phase::Transferring);
    let mut batcher = InsertBatcher::new(
        destination,
        progress,
        table,
        columns,
        config.batch_size,
        config.error_policy,
    );

    let outcome = match feed(&mut batcher, parser, config, progress, diagnostics).await {
        Ok(()) => {
            progress.set_phase(Phase::Finalizing);
            batcher.finish().await.map(|committed| {
                tracing::info!(
                    "Import into {} complete: {} rows committed",
                    sanitize_identifier(table),
                    committed
                );
            })
        }
        Err(e) => Err(e),
    };
    diagnostics.extend(batcher.into_diagnostics());
    diagnostics.sort_by_key(|d| d.row);
    outcome
}

async fn feed<R: BufRead + Send + 'static>(
    batcher: &mut InsertBatcher<'_>,
    parser: ImportParser<R>,
    config: &JobConfig,
    progress: &ProgressState,
    diagnostics: &mut Vec<RowDiagnostic>,
) -> Result<()> {
    let mut rows = spawn_parser(parser);
    while let Some(item) = rows.recv().await {
        if batcher.is_at_boundary() {
            progress.check_cancelled()?;
        }
        let parsed = item?;
        match parsed.outcome {
            Ok(row) => batcher.push(parsed.row_number, row).await?,
            Err(diagnostic) => match config.parse_mode {
                ParseMode::Strict => return Err(diagnostic.into_error()),
                ParseMode::Permissive => {
                    tracing::warn!("Skipping {}", diagnostic);
                    diagnostics.push(diagnostic);
                }
            },
        }
    }
    Ok(())
}
