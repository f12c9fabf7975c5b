// ABOUTME: Tables command listing the tables a source offers for dumping
// ABOUTME: Row counts are estimates where the database keeps them cheaply

use super::open_source;
use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Serialize)]
struct TableEntry {
    name: String,
    estimated_rows: Option<u64>,
}

pub async fn tables(source_url: &str, json: bool) -> Result<()> {
    let mut source = open_source(source_url)
        .await
        .context("Failed to open source database")?;
    let entries: Vec<TableEntry> = source
        .list_tables()
        .await
        .context("Failed to list tables")?
        .into_iter()
        .map(|(name, estimated_rows)| TableEntry {
            name,
            estimated_rows,
        })
        .collect();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("Failed to serialize table list")?
        );
        return Ok(());
    }

    if entries.is_empty() {
        println!("No tables found");
    }
    for entry in &entries {
        match entry.estimated_rows {
            Some(rows) => println!("{:<40} ~{} rows", entry.name, rows),
            None => println!("{:<40} (no estimate)", entry.name),
        }
    }
    Ok(())
}
