// ABOUTME: Import command: loads one script or delimited file into a destination table
// ABOUTME: The destination file or database is opened for writing and created if missing

use super::{open_destination, run_jobs, JobOptions};
use crate::job::Job;
use crate::model::TableSource;
use anyhow::{Context, Result};
use std::path::Path;

pub async fn import(
    target_url: &str,
    table: Option<&str>,
    input: &Path,
    options: &JobOptions,
    json: bool,
) -> Result<()> {
    let mut config = options.build(table.map(TableSource::table))?;
    config.location = Some(input.to_path_buf());

    let destination = open_destination(target_url)
        .await
        .context("Failed to open target database")?;

    tracing::info!("Importing {} into {}", input.display(), config.target_table());
    run_jobs(vec![Job::Import { destination, config }], json).await
}
