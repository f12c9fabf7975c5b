// ABOUTME: Dump command: one concurrent dump job per requested table
// ABOUTME: Several tables write into a directory as <table>.<ext> files

use super::{open_source, run_jobs, source_for, JobOptions};
use crate::config::JobConfig;
use crate::job::Job;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// File a dump job writes to: `output` itself, or `<table>.<ext>` inside it
pub fn output_path(output: &Path, config: &JobConfig, into_directory: bool) -> PathBuf {
    if into_directory {
        output.join(format!(
            "{}.{}",
            config.source.name(),
            config.format.extension()
        ))
    } else {
        output.to_path_buf()
    }
}

pub async fn dump(
    source_url: &str,
    tables: &[String],
    output: &Path,
    options: &JobOptions,
    json: bool,
) -> Result<()> {
    let sources = if tables.is_empty() {
        vec![None]
    } else {
        tables
            .iter()
            .map(|t| Some(source_for(source_url, t)))
            .collect()
    };

    let into_directory = sources.len() > 1 || output.is_dir();
    if into_directory {
        fs::create_dir_all(output)
            .with_context(|| format!("Failed to create output directory {}", output.display()))?;
    }

    let mut jobs = Vec::with_capacity(sources.len());
    for source in sources {
        let mut config = options.build(source)?;
        config.location = Some(output_path(output, &config, into_directory));
        let connection = open_source(source_url)
            .await
            .context("Failed to open source database")?;
        jobs.push(Job::Dump {
            source: connection,
            config,
        });
    }

    tracing::info!("Starting {} dump job(s)", jobs.len());
    run_jobs(jobs, json).await
}
