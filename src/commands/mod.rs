// ABOUTME: Command implementations behind the CLI: dump, import, migrate and tables
// ABOUTME: Opens connections from URLs, builds job configs and drives jobs with progress bars

pub mod dump;
pub mod import;
pub mod migrate;
pub mod tables;

pub use dump::dump;
pub use import::import;
pub use migrate::migrate;
pub use tables::tables;

use crate::config::{load_job_config, DataFormat, JobConfig};
use crate::connection::{DestinationConnection, SourceConnection};
use crate::error::TransferError;
use crate::job::{Job, JobController, JobResult, JobStatus};
use crate::model::TableSource;
use crate::postgres::{reader::table_source, PostgresConnection};
use crate::sqlite::SqliteConnection;
use crate::utils::{is_postgres_url, sanitize_identifier, sqlite_path};
use anyhow::{bail, Context, Result};
use futures::future::join_all;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Job options shared by every command; each one overrides the job file
#[derive(Debug, Clone, Default, clap::Args)]
pub struct JobOptions {
    /// TOML job file supplying defaults for every other option
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Artifact format: script, delimited, report or schema-only
    #[arg(long)]
    pub format: Option<DataFormat>,
    /// Rows per page and per destination transaction
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Field delimiter for delimited text
    #[arg(long)]
    pub delimiter: Option<char>,
    /// Text standing for NULL in delimited text
    #[arg(long)]
    pub null_marker: Option<String>,
    /// Delimited text has no header record
    #[arg(long)]
    pub no_header: bool,
    /// Rows per INSERT statement in script output
    #[arg(long)]
    pub rows_per_statement: Option<usize>,
    /// Write the table's CREATE TABLE ahead of script output
    #[arg(long)]
    pub include_schema: bool,
    /// Create the destination table before inserting
    #[arg(long)]
    pub create_target: bool,
    /// Skip malformed input rows instead of failing
    #[arg(long)]
    pub permissive: bool,
    /// Record rejected rows and keep going
    #[arg(long)]
    pub continue_on_error: bool,
}

impl JobOptions {
    /// Job config for one source, starting from the job file when given
    pub fn build(&self, source: Option<TableSource>) -> Result<JobConfig> {
        let mut config = match &self.config {
            Some(path) => load_job_config(path)?,
            None => match &source {
                Some(source) => JobConfig::for_table(source.name(), DataFormat::default()),
                None => {
                    return Err(anyhow::Error::new(TransferError::InvalidConfig(
                        "either --table or --config is required".into(),
                    )))
                }
            },
        };
        if let Some(source) = source {
            config.source = source;
        }
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut JobConfig) {
        if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(delimiter) = self.delimiter {
            config.delimited.delimiter = delimiter;
        }
        if let Some(marker) = &self.null_marker {
            config.delimited.null_marker = marker.clone();
        }
        if self.no_header {
            config.delimited.header = false;
        }
        if let Some(rows) = self.rows_per_statement {
            config.script.rows_per_statement = rows;
        }
        config.include_schema |= self.include_schema;
        config.create_target |= self.create_target;
        if self.permissive {
            config.parse_mode = crate::import::ParseMode::Permissive;
        }
        if self.continue_on_error {
            config.error_policy = crate::batcher::ErrorPolicy::ContinueOnError;
        }
    }
}

/// Table source for a CLI table name, honouring `schema.table` on PostgreSQL
pub fn source_for(url: &str, table: &str) -> TableSource {
    if is_postgres_url(url) {
        table_source(table)
    } else {
        TableSource::table(table)
    }
}

/// Open a connection to read from; SQLite files are opened read-only
pub async fn open_source(url: &str) -> Result<Box<dyn SourceConnection>> {
    if is_postgres_url(url) {
        Ok(Box::new(PostgresConnection::open(url).await?))
    } else {
        Ok(Box::new(SqliteConnection::open_read_only(sqlite_path(url))?))
    }
}

/// Open a connection to write to; a missing SQLite file is created
pub async fn open_destination(url: &str) -> Result<Box<dyn DestinationConnection>> {
    if is_postgres_url(url) {
        Ok(Box::new(PostgresConnection::open(url).await?))
    } else {
        Ok(Box::new(SqliteConnection::open_writable(sqlite_path(url))?))
    }
}

#[derive(Serialize)]
struct NamedResult {
    job: String,
    #[serde(flatten)]
    result: JobResult,
}

fn bar_style(known_total: bool) -> Result<ProgressStyle> {
    let template = if known_total {
        "{prefix:.bold} [{bar:30}] {pos}/{len} rows {msg}"
    } else {
        "{prefix:.bold} {spinner} {pos} rows {msg}"
    };
    Ok(ProgressStyle::with_template(template)
        .context("Invalid progress bar template")?
        .progress_chars("=> "))
}

/// Run jobs concurrently, showing progress until every one has finished
///
/// Ctrl-C requests cancellation of all jobs; each stops at its next batch
/// boundary. Fails when any job did not complete.
pub async fn run_jobs(jobs: Vec<Job>, json: bool) -> Result<()> {
    let multi = MultiProgress::with_draw_target(if json {
        ProgressDrawTarget::hidden()
    } else {
        ProgressDrawTarget::stderr()
    });

    let mut running = Vec::with_capacity(jobs.len());
    for job in jobs {
        let label = sanitize_identifier(&job.config().source.to_string());
        let handle = JobController::start(job)
            .with_context(|| format!("Job for {} was not started", label))?;
        let bar = multi.add(ProgressBar::new_spinner());
        bar.set_style(bar_style(false)?);
        bar.set_prefix(label.clone());
        running.push((label, handle, bar));
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelled = false;
    let mut ticker = tokio::time::interval(Duration::from_millis(200));

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !cancelled => {
                tracing::warn!("Interrupt received, cancelling {} job(s) at the next batch boundary", running.len());
                cancelled = true;
                for (_, handle, _) in &running {
                    handle.cancel();
                }
            }
            _ = ticker.tick() => {}
        }

        for (_, handle, bar) in &running {
            let snapshot = handle.progress().snapshot();
            if let Some(total) = snapshot.total_rows {
                if bar.length() != Some(total) {
                    bar.set_style(bar_style(true)?);
                    bar.set_length(total);
                }
            }
            bar.set_position(snapshot.rows_processed);
            bar.set_message(format!("{:?}", snapshot.phase).to_lowercase());
        }

        if running.iter().all(|(_, handle, _)| handle.is_finished()) {
            break;
        }
    }

    let results = join_all(running.into_iter().map(|(label, handle, bar)| async move {
        let result = handle.wait().await;
        bar.finish_with_message(result.status.to_string());
        NamedResult { job: label, result }
    }))
    .await;

    report(&results, json)?;

    let failed = results
        .iter()
        .filter(|r| r.result.status != JobStatus::Completed)
        .count();
    if failed > 0 {
        bail!("{} of {} job(s) did not complete", failed, results.len());
    }
    Ok(())
}

fn report(results: &[NamedResult], json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(results).context("Failed to serialize job results")?;
        println!("{}", text);
        return Ok(());
    }

    for named in results {
        let result = &named.result;
        match result.first_error() {
            Some(error) if result.status != JobStatus::Completed => {
                tracing::error!("{}: {} after {} rows: {}", named.job, result.status, result.rows, error)
            }
            _ => tracing::info!("{}: {} ({} rows)", named.job, result.status, result.rows),
        }
        for diagnostic in &result.diagnostics {
            tracing::warn!("{}: {}", named.job, diagnostic);
        }
    }
    Ok(())
}
