// ABOUTME: Migrate command: copies tables between two live databases
// ABOUTME: Refuses a migration whose target table is its own source table

use super::{open_destination, open_source, run_jobs, source_for, JobOptions};
use crate::config::JobConfig;
use crate::error::TransferError;
use crate::job::Job;
use crate::utils::{same_database, sanitize_identifier};
use anyhow::{Context, Result};

fn check_distinct(source_url: &str, target_url: &str, config: &JobConfig) -> Result<()> {
    if same_database(source_url, target_url)
        && config.target_table().eq_ignore_ascii_case(config.source.name())
    {
        return Err(anyhow::Error::new(TransferError::InvalidConfig(format!(
            "source and target are the same table '{}'",
            sanitize_identifier(config.target_table())
        ))));
    }
    Ok(())
}

pub async fn migrate(
    source_url: &str,
    target_url: &str,
    tables: &[String],
    target_table: Option<&str>,
    options: &JobOptions,
    json: bool,
) -> Result<()> {
    if tables.len() > 1 && target_table.is_some() {
        return Err(anyhow::Error::new(TransferError::InvalidConfig(
            "--target-table applies to a single --table".into(),
        )));
    }

    let sources = if tables.is_empty() {
        vec![None]
    } else {
        tables
            .iter()
            .map(|t| Some(source_for(source_url, t)))
            .collect()
    };

    let mut jobs = Vec::with_capacity(sources.len());
    for source in sources {
        let mut config = options.build(source)?;
        if let Some(target) = target_table {
            config.target_table = Some(target.to_string());
        }
        check_distinct(source_url, target_url, &config)?;

        let source = open_source(source_url)
            .await
            .context("Failed to open source database")?;
        let destination = open_destination(target_url)
            .await
            .context("Failed to open target database")?;
        jobs.push(Job::Migrate {
            source,
            destination,
            config,
        });
    }

    tracing::info!("Starting {} migration job(s)", jobs.len());
    run_jobs(jobs, json).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataFormat;
    use crate::error::{error_kind, ErrorKind};

    #[test]
    fn test_same_table_in_same_database_is_refused() {
        let config = JobConfig::for_table("users", DataFormat::Delimited);
        let err = check_distinct("app.db", "app.db", &config).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::InvalidConfig);

        let mut renamed = config.clone();
        renamed.target_table = Some("users_copy".into());
        assert!(check_distinct("app.db", "app.db", &renamed).is_ok());
        assert!(check_distinct("app.db", "other.db", &config).is_ok());
    }
}
