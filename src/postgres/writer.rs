// ABOUTME: PostgreSQL destination adapter: DDL in one transaction and multi-row parameterised inserts
// ABOUTME: Parameters are bound as text and cast to each column's declared type on the server

use super::converter::{classify, param_text};
use super::reader::describe_table;
use super::{split_qualified, PostgresConnection};
use crate::connection::{DestinationConnection, WriteError};
use crate::model::{ColumnDescriptor, RowRecord};
use crate::utils::{quote_ident, quote_qualified};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

/// Bind parameter limit of the extended query protocol
const MAX_PARAMETERS: usize = 65535;

fn qualified_table(table: &str) -> String {
    let (schema, name) = split_qualified(table);
    quote_qualified(schema, name)
}

/// Rows per INSERT statement so one statement stays under the parameter limit
pub fn rows_per_statement(column_count: usize) -> usize {
    (MAX_PARAMETERS / column_count.max(1)).max(1)
}

/// `INSERT ... VALUES ($1::text::t1, $2::text::t2), (...)` for `row_count` rows
pub fn insert_statement(table: &str, columns: &[ColumnDescriptor], types: &[&str], row_count: usize) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
    let tuples: Vec<String> = (0..row_count)
        .map(|row| {
            let params: Vec<String> = types
                .iter()
                .enumerate()
                .map(|(col, ty)| format!("${}::text::{}", row * types.len() + col + 1, ty))
                .collect();
            format!("({})", params.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified_table(table),
        names.join(", "),
        tuples.join(", ")
    )
}

async fn load_column_types(client: &Client, table: &str) -> Result<HashMap<String, String>, WriteError> {
    let rows = client
        .query(
            "SELECT a.attname, format_type(a.atttypid, a.atttypmod) \
             FROM pg_attribute a \
             WHERE a.attrelid = to_regclass($1) AND a.attnum > 0 AND NOT a.attisdropped",
            &[&qualified_table(table)],
        )
        .await
        .map_err(classify)?;
    rows.iter()
        .map(|row| Ok((row.try_get(0).map_err(classify)?, row.try_get(1).map_err(classify)?)))
        .collect()
}

impl PostgresConnection {
    async fn declared_types(
        &mut self,
        table: &str,
        columns: &[ColumnDescriptor],
    ) -> Result<Vec<String>, WriteError> {
        if !self.column_types.contains_key(table) {
            let loaded = load_column_types(&self.client, table).await?;
            self.column_types.insert(table.to_string(), loaded);
        }
        let known = self.column_types.get(table);
        columns
            .iter()
            .map(|c| {
                known
                    .and_then(|types| types.get(&c.name))
                    .cloned()
                    .ok_or_else(|| {
                        WriteError::Rejected(format!(
                            "column \"{}\" of relation \"{}\" does not exist",
                            c.name, table
                        ))
                    })
            })
            .collect()
    }
}

#[async_trait]
impl DestinationConnection for PostgresConnection {
    async fn describe(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        describe_table(&self.client, &qualified_table(table)).await
    }

    async fn execute_statements(&mut self, statements: &[String]) -> Result<(), WriteError> {
        // DDL can change column types under the cache
        self.column_types.clear();
        let tx = self.client.transaction().await.map_err(classify)?;
        for statement in statements {
            tx.batch_execute(statement).await.map_err(classify)?;
        }
        tx.commit().await.map_err(classify)
    }

    async fn insert_batch(
        &mut self,
        table: &str,
        columns: &[ColumnDescriptor],
        rows: &[RowRecord],
    ) -> Result<(), WriteError> {
        if rows.is_empty() {
            return Ok(());
        }
        let types = self.declared_types(table, columns).await?;
        let types: Vec<&str> = types.iter().map(String::as_str).collect();

        let tx = self.client.transaction().await.map_err(classify)?;
        for chunk in rows.chunks(rows_per_statement(columns.len())) {
            let sql = insert_statement(table, columns, &types, chunk.len());
            let params: Vec<Option<String>> = chunk
                .iter()
                .flat_map(|row| row.cells().iter().map(param_text))
                .collect();
            let refs: Vec<&(dyn ToSql + Sync)> =
                params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
            tx.execute(sql.as_str(), &refs).await.map_err(classify)?;
        }
        tx.commit().await.map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnType, Value};

    #[test]
    fn test_rows_per_statement_respects_parameter_limit() {
        assert_eq!(rows_per_statement(1), 65535);
        assert_eq!(rows_per_statement(7), 9362);
        assert_eq!(rows_per_statement(70000), 1);
        assert!(rows_per_statement(3) * 3 <= MAX_PARAMETERS);
    }

    #[test]
    fn test_insert_statement_numbers_parameters_across_rows() {
        let columns = vec![
            ColumnDescriptor::new("id", 0, ColumnType::Integer),
            ColumnDescriptor::new("name", 1, ColumnType::Text),
        ];
        assert_eq!(
            insert_statement("app.people", &columns, &["integer", "character varying(40)"], 2),
            "INSERT INTO \"app\".\"people\" (\"id\", \"name\") VALUES \
             ($1::text::integer, $2::text::character varying(40)), \
             ($3::text::integer, $4::text::character varying(40))"
        );
    }

    #[tokio::test]
    #[ignore]
    async fn test_insert_batch_against_live_database() {
        let url = std::env::var("TEST_TARGET_URL")
            .expect("TEST_TARGET_URL must be set for integration tests");
        let mut conn = PostgresConnection::open(&url).await.unwrap();
        conn.execute_statements(&[
            "DROP TABLE IF EXISTS transfer_writer_test".to_string(),
            "CREATE TABLE transfer_writer_test (id bigint PRIMARY KEY, payload bytea, at timestamp)"
                .to_string(),
        ])
        .await
        .unwrap();

        let columns = DestinationConnection::describe(&mut conn, "transfer_writer_test")
            .await
            .unwrap();
        let at = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let rows = vec![
            RowRecord::new(vec![Value::Integer(1), Value::Binary(vec![1, 2]), Value::Timestamp(at)]),
            RowRecord::new(vec![Value::Integer(2), Value::Null, Value::Null]),
        ];
        conn.insert_batch("transfer_writer_test", &columns, &rows)
            .await
            .unwrap();

        // duplicate key rejects the whole batch
        let err = conn
            .insert_batch("transfer_writer_test", &columns, &rows[1..])
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Rejected(_)));

        let count: i64 = conn
            .client()
            .query_one("SELECT COUNT(*) FROM transfer_writer_test", &[])
            .await
            .unwrap()
            .get(0);
        assert_eq!(count, 2);
    }
}
