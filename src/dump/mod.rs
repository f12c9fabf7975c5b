// ABOUTME: Dump Writer family and the dump worker streaming source rows to a sink
// ABOUTME: Writers render into a buffer that is flushed to the sink once per batch

pub mod delimited;
pub mod report;
pub mod schema;
pub mod script;

use crate::codec::Codec;
use crate::config::{DataFormat, JobConfig};
use crate::connection::SourceConnection;
use crate::error::TransferError;
use crate::io::{open_sink, TextEncoding};
use crate::job::{JobResult, Phase, ProgressState};
use crate::model::{ColumnDescriptor, RowRecord, TableSchema};
use crate::reader::{describe_source, RowStreamReader};
use crate::utils::sanitize_identifier;
use anyhow::{Context, Result};
use std::io::Write;

pub use delimited::DelimitedWriter;
pub use report::ReportWriter;
pub use schema::SchemaWriter;
pub use script::ScriptWriter;

/// One writer per output format, selected by the job's format
pub enum DumpWriter {
    Script(ScriptWriter),
    Delimited(DelimitedWriter),
    Report(ReportWriter),
    SchemaOnly(SchemaWriter),
}

impl DumpWriter {
    pub fn for_config(config: &JobConfig, schema: TableSchema) -> Self {
        let newline = config.line_ending.as_str();
        match config.format {
            DataFormat::Script => DumpWriter::Script(ScriptWriter::new(
                schema,
                config.type_mapping.clone(),
                config.include_schema,
                config.script.terminator.clone(),
                config.script.rows_per_statement,
                newline,
            )),
            DataFormat::Delimited => DumpWriter::Delimited(DelimitedWriter::new(
                schema.columns,
                config.delimited.codec(),
                config.delimited.header,
                newline,
            )),
            DataFormat::Report => DumpWriter::Report(ReportWriter::new(
                schema.name,
                schema.columns,
                config.report.layout,
                config.report.page_rows,
                config.report.max_column_width,
                newline,
            )),
            DataFormat::SchemaOnly => DumpWriter::SchemaOnly(SchemaWriter::new(
                schema,
                config.type_mapping.clone(),
                config.script.terminator.clone(),
                newline,
            )),
        }
    }

    /// Whether this writer needs rows at all; schema-only never opens a cursor
    pub fn consumes_rows(&self) -> bool {
        !matches!(self, DumpWriter::SchemaOnly(_))
    }

    pub fn begin(&mut self, out: &mut String) -> Result<()> {
        match self {
            DumpWriter::Script(w) => w.begin(out),
            DumpWriter::Delimited(w) => w.begin(out),
            DumpWriter::Report(w) => w.begin(out),
            DumpWriter::SchemaOnly(w) => w.begin(out),
        }
    }

    /// Render one batch; `first_row` is the one-based number of its first row
    pub fn write_batch(&mut self, rows: &[RowRecord], first_row: u64, out: &mut String) -> Result<()> {
        match self {
            DumpWriter::Script(w) => w.write_batch(rows, first_row, out),
            DumpWriter::Delimited(w) => w.write_batch(rows, first_row, out),
            DumpWriter::Report(w) => w.write_batch(rows, first_row, out),
            DumpWriter::SchemaOnly(_) => Ok(()),
        }
    }

    pub fn finish(&mut self, out: &mut String) -> Result<()> {
        match self {
            DumpWriter::Report(w) => w.finish(out),
            _ => Ok(()),
        }
    }
}

/// Encode every cell of a row; a value that does not fit its column is fatal
pub(crate) fn encode_row(
    codec: &Codec,
    columns: &[ColumnDescriptor],
    row: &RowRecord,
    row_number: u64,
) -> Result<Vec<String>> {
    row.check_arity(columns)
        .with_context(|| format!("Row {}", row_number))?;
    row.cells()
        .iter()
        .zip(columns)
        .map(|(value, column)| {
            codec
                .encode(value, column.column_type)
                .map_err(|e| {
                    anyhow::Error::new(TransferError::SchemaMismatch(format!(
                        "column '{}': {}",
                        sanitize_identifier(&column.name),
                        e
                    )))
                })
                .with_context(|| format!("Row {}", row_number))
        })
        .collect()
}

/// Append a possibly multi-line statement using the configured line ending
pub(crate) fn push_statement(out: &mut String, statement: &str, terminator: &str, newline: &str) {
    let mut lines = statement.lines().peekable();
    while let Some(line) = lines.next() {
        out.push_str(line);
        if lines.peek().is_some() {
            out.push_str(newline);
        }
    }
    out.push_str(terminator);
    out.push_str(newline);
}

fn emit(sink: &mut (dyn Write + Send), out: &mut String, encoding: TextEncoding) -> Result<()> {
    if out.is_empty() {
        return Ok(());
    }
    let bytes = encoding.encode(out)?;
    sink.write_all(&bytes)
        .and_then(|_| sink.flush())
        .map_err(|e| anyhow::Error::new(TransferError::SinkUnavailable(e.to_string())))
        .context("Failed to write dump output")?;
    out.clear();
    Ok(())
}

/// Dump to the file named by the job's location
///
/// The file is created at job start and closed on every exit path.
pub async fn run_dump(
    source: &mut dyn SourceConnection,
    config: &JobConfig,
    progress: &ProgressState,
) -> JobResult {
    let outcome: Result<()> = async {
        let path = config.location.as_deref().ok_or_else(|| {
            anyhow::Error::new(TransferError::InvalidConfig(
                "a dump needs an output location".into(),
            ))
        })?;
        let mut sink = open_sink(path)?;
        tracing::info!("Dumping {} to {}", config.source, path.display());
        dump_rows(source, config, &mut sink, progress).await
    }
    .await;
    progress.finish(outcome, Vec::new())
}

/// Dump into any sink, such as an in-memory buffer
pub async fn dump_to_writer(
    source: &mut dyn SourceConnection,
    config: &JobConfig,
    sink: &mut (dyn Write + Send),
    progress: &ProgressState,
) -> JobResult {
    let outcome = dump_rows(source, config, sink, progress).await;
    progress.finish(outcome, Vec::new())
}

async fn dump_rows(
    source: &mut dyn SourceConnection,
    config: &JobConfig,
    sink: &mut (dyn Write + Send),
    progress: &ProgressState,
) -> Result<()> {
    progress.set_phase(Phase::ReadingSchema);

    let mut reader = None;
    let columns = if config.format == DataFormat::SchemaOnly {
        describe_source(source, &config.source).await?
    } else {
        let opened = RowStreamReader::open(source, &config.source, config.batch_size).await?;
        progress.set_total(opened.estimated_total());
        let columns = opened.columns().to_vec();
        reader = Some(opened);
        columns
    };

    let schema = TableSchema::new(config.target_table(), columns)
        .with_constraints(config.constraints.clone());
    let mut writer = DumpWriter::for_config(config, schema);
    let mut out = String::new();

    writer.begin(&mut out)?;
    emit(sink, &mut out, config.encoding)?;

    if let Some(reader) = reader.as_mut() {
        progress.set_phase(Phase::Transferring);
        loop {
            if progress.is_cancel_requested() {
                // close out the document so what was written stays well-formed
                writer.finish(&mut out)?;
                emit(sink, &mut out, config.encoding)?;
                return progress.check_cancelled();
            }

            let Some(page) = reader.next_page().await? else {
                break;
            };
            writer.write_batch(&page, progress.rows_processed() + 1, &mut out)?;
            emit(sink, &mut out, config.encoding)?;
            progress.add_rows(page.len() as u64);
            tracing::debug!(
                "Wrote batch of {} rows ({} total)",
                page.len(),
                progress.rows_processed()
            );
        }
    }

    progress.set_phase(Phase::Finalizing);
    writer.finish(&mut out)?;
    emit(sink, &mut out, config.encoding)?;
    tracing::info!(
        "Dump of {} complete: {} rows",
        sanitize_identifier(&config.source.to_string()),
        progress.rows_processed()
    );
    Ok(())
}
