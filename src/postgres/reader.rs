// ABOUTME: PostgreSQL source adapter: catalog description, row estimates and portal cursors
// ABOUTME: A cursor lives inside a read-only transaction and fetches one page per round trip

use super::converter::{column_type_for, row_values, select_list};
use super::{split_qualified, PostgresConnection};
use crate::connection::{RowCursor, SourceConnection};
use crate::error::TransferError;
use crate::model::{ColumnDescriptor, ColumnType, RowRecord, TableSource};
use crate::utils::{quote_qualified, sanitize_identifier};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, Portal, Transaction};

const VARHDRSZ: i32 = 4;

fn unavailable(err: tokio_postgres::Error) -> anyhow::Error {
    anyhow::Error::new(TransferError::SourceUnavailable(err.to_string()))
}

/// Length of `varchar(n)`/`char(n)` or precision and scale of `numeric(p,s)` from a type modifier
fn size_from_typmod(pg_type: &Type, typmod: i32) -> (Option<u32>, Option<u32>) {
    if typmod < VARHDRSZ {
        return (None, None);
    }
    match *pg_type {
        Type::VARCHAR | Type::BPCHAR => (Some((typmod - VARHDRSZ) as u32), None),
        Type::NUMERIC => {
            let packed = typmod - VARHDRSZ;
            (Some(((packed >> 16) & 0xffff) as u32), Some((packed & 0xffff) as u32))
        }
        _ => (None, None),
    }
}

/// Columns of a table from the catalog; empty when the table does not exist
pub async fn describe_table(client: &Client, qualified: &str) -> Result<Vec<ColumnDescriptor>> {
    let rows = client
        .query(
            "SELECT a.attname, a.atttypid, a.atttypmod, a.attnotnull \
             FROM pg_attribute a \
             WHERE a.attrelid = to_regclass($1) AND a.attnum > 0 AND NOT a.attisdropped \
             ORDER BY a.attnum",
            &[&qualified],
        )
        .await
        .map_err(unavailable)?;

    rows.iter()
        .enumerate()
        .map(|(ordinal, row)| -> Result<ColumnDescriptor> {
            let name: String = row.try_get(0)?;
            let oid: u32 = row.try_get(1)?;
            let typmod: i32 = row.try_get(2)?;
            let not_null: bool = row.try_get(3)?;

            let pg_type = Type::from_oid(oid).unwrap_or(Type::TEXT);
            let column_type = column_type_for(&pg_type);
            let (size, scale) = size_from_typmod(&pg_type, typmod);
            let mut column = ColumnDescriptor::new(name, ordinal, column_type);
            column.nullable = !not_null;
            column.size = size;
            column.scale = if column_type == ColumnType::Decimal {
                scale
            } else {
                None
            };
            Ok(column)
        })
        .collect()
}

fn query_from(query: &str) -> String {
    format!("({}) AS src", query.trim().trim_end_matches(';'))
}

async fn describe_query(client: &Client, query: &str) -> Result<Vec<ColumnDescriptor>> {
    let statement = client
        .prepare(&format!("SELECT * FROM {}", query_from(query)))
        .await
        .map_err(|e| match e.code() {
            Some(_) => anyhow::Error::new(TransferError::SchemaMismatch(e.to_string())),
            None => unavailable(e),
        })
        .context("Failed to prepare source query")?;
    Ok(statement
        .columns()
        .iter()
        .enumerate()
        .map(|(ordinal, column)| {
            ColumnDescriptor::new(column.name(), ordinal, column_type_for(column.type_()))
        })
        .collect())
}

fn qualified_name(schema: Option<&str>, table: &str) -> String {
    quote_qualified(schema, table)
}

/// Forward-only portal over one query, inside its own read-only transaction
pub struct PostgresCursor<'a> {
    transaction: Transaction<'a>,
    portal: Portal,
    columns: Vec<ColumnDescriptor>,
    rows_read: u64,
}

#[async_trait]
impl RowCursor for PostgresCursor<'_> {
    async fn fetch(&mut self, max: usize) -> Result<Vec<RowRecord>> {
        let max = i32::try_from(max).unwrap_or(i32::MAX);
        let rows = self
            .transaction
            .query_portal(&self.portal, max)
            .await
            .map_err(unavailable)?;

        let mut page = Vec::with_capacity(rows.len());
        for row in &rows {
            self.rows_read += 1;
            let cells = row_values(row, &self.columns).map_err(|reason| {
                anyhow::Error::new(TransferError::MalformedValue(format!(
                    "source row {}, {}",
                    self.rows_read, reason
                )))
            })?;
            page.push(RowRecord::new(cells));
        }
        Ok(page)
    }
}

#[async_trait]
impl SourceConnection for PostgresConnection {
    async fn describe(&mut self, source: &TableSource) -> Result<Vec<ColumnDescriptor>> {
        match source {
            TableSource::Table { schema, table } => {
                describe_table(&self.client, &qualified_name(schema.as_deref(), table)).await
            }
            TableSource::Query { query, .. } => describe_query(&self.client, query).await,
        }
    }

    async fn estimate_rows(&mut self, source: &TableSource) -> Result<Option<u64>> {
        let TableSource::Table { schema, table } = source else {
            return Ok(None);
        };
        let row = self
            .client
            .query_opt(
                "SELECT c.reltuples::bigint FROM pg_class c WHERE c.oid = to_regclass($1)",
                &[&qualified_name(schema.as_deref(), table)],
            )
            .await
            .map_err(unavailable)?;
        // reltuples is -1 (or 0 on old servers) until the table is first analyzed
        Ok(row
            .map(|r| r.try_get::<_, i64>(0))
            .transpose()?
            .filter(|n| *n > 0)
            .map(|n| n as u64))
    }

    async fn open_cursor<'a>(
        &'a mut self,
        source: &TableSource,
        columns: &[ColumnDescriptor],
    ) -> Result<Box<dyn RowCursor + 'a>> {
        let from = match source {
            TableSource::Table { schema, table } => qualified_name(schema.as_deref(), table),
            TableSource::Query { query, .. } => query_from(query),
        };
        let sql = format!("SELECT {} FROM {}", select_list(columns), from);

        let transaction = self
            .client
            .build_transaction()
            .read_only(true)
            .start()
            .await
            .map_err(unavailable)?;
        let portal = transaction.bind(sql.as_str(), &[]).await.map_err(unavailable)?;
        tracing::debug!("Opened portal for {}", sanitize_identifier(&source.to_string()));

        Ok(Box::new(PostgresCursor {
            transaction,
            portal,
            columns: columns.to_vec(),
            rows_read: 0,
        }))
    }

    async fn list_tables(&mut self) -> Result<Vec<(String, Option<u64>)>> {
        let rows = self
            .client
            .query(
                "SELECT n.nspname, c.relname, c.reltuples::bigint \
                 FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
                 WHERE c.relkind IN ('r', 'p') \
                 AND n.nspname NOT IN ('pg_catalog', 'information_schema') \
                 AND n.nspname NOT LIKE 'pg_toast%' \
                 ORDER BY n.nspname, c.relname",
                &[],
            )
            .await
            .map_err(unavailable)?;

        rows.iter()
            .map(|row| -> Result<(String, Option<u64>)> {
                let schema: String = row.try_get(0)?;
                let table: String = row.try_get(1)?;
                let estimate: i64 = row.try_get(2)?;
                let name = if schema == "public" {
                    table
                } else {
                    format!("{}.{}", schema, table)
                };
                Ok((name, (estimate > 0).then_some(estimate as u64)))
            })
            .collect()
    }
}

/// Table source for a possibly schema-qualified name such as `app.users`
pub fn table_source(name: &str) -> TableSource {
    let (schema, table) = split_qualified(name);
    TableSource::Table {
        schema: schema.map(str::to_string),
        table: table.to_string(),
    }
}
