// ABOUTME: SQLite source adapter: table introspection, row estimates and streaming cursors
// ABOUTME: Rows are read on a blocking thread and handed over through a bounded channel

use super::converter::from_sqlite;
use super::SqliteConnection;
use crate::connection::{RowCursor, SourceConnection};
use crate::error::TransferError;
use crate::model::{ColumnDescriptor, RowRecord, TableSource, Value};
use crate::schema::column_type_from_declared;
use crate::utils::{quote_ident, quote_qualified, sanitize_identifier};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::mpsc;

/// Rows buffered between the reading thread and the cursor
const CHANNEL_CAPACITY: usize = 1024;

/// List all user tables, excluding `sqlite_*` internals, sorted by name
pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master \
             WHERE type='table' \
             AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .context("Failed to prepare statement to list tables")?;

    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("Failed to query table list")?
        .collect::<Result<Vec<String>, _>>()
        .context("Failed to collect table names")?;

    tracing::debug!("Found {} user tables in SQLite database", tables.len());
    Ok(tables)
}

/// Exact row count of a table
pub fn count_rows(conn: &Connection, schema: Option<&str>, table: &str) -> Result<u64> {
    let query = format!("SELECT COUNT(*) FROM {}", quote_qualified(schema, table));
    let count: i64 = conn
        .query_row(&query, [], |row| row.get(0))
        .with_context(|| format!("Failed to count rows in '{}'", sanitize_identifier(table)))?;
    Ok(count.max(0) as u64)
}

/// Columns of a table from `PRAGMA table_info`; empty when the table does not exist
pub fn describe_table(
    conn: &Connection,
    schema: Option<&str>,
    table: &str,
) -> Result<Vec<ColumnDescriptor>> {
    let pragma = match schema {
        Some(schema) => format!("PRAGMA {}.table_info({})", quote_ident(schema), quote_ident(table)),
        None => format!("PRAGMA table_info({})", quote_ident(table)),
    };
    let mut stmt = conn
        .prepare(&pragma)
        .with_context(|| format!("Failed to describe '{}'", sanitize_identifier(table)))?;

    let columns = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let declared: String = row.get::<_, Option<String>>(2)?.unwrap_or_default();
            let not_null: bool = row.get(3)?;
            let pk: i64 = row.get(5)?;
            let rowid_key = pk > 0 && is_integer_key(&declared);
            Ok((name, declared, not_null || rowid_key))
        })
        .with_context(|| format!("Failed to read columns of '{}'", sanitize_identifier(table)))?
        .enumerate()
        .map(|(ordinal, row)| {
            let (name, declared, not_null) = row?;
            Ok(descriptor(name, ordinal, &declared, not_null))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(columns)
}

/// An `INTEGER PRIMARY KEY` column aliases the rowid and can never hold NULL
fn is_integer_key(declared: &str) -> bool {
    declared.eq_ignore_ascii_case("INTEGER")
}

fn descriptor(name: String, ordinal: usize, declared: &str, not_null: bool) -> ColumnDescriptor {
    let declared = column_type_from_declared(declared);
    let mut column = ColumnDescriptor::new(name, ordinal, declared.column_type);
    column.nullable = !not_null;
    column.size = declared.size;
    column.scale = declared.scale;
    column
}

/// Columns of a query result, typed from the declared types of their origin columns
///
/// Expression columns have no declared type and are described as text.
pub fn describe_query(conn: &Connection, sql: &str) -> Result<Vec<ColumnDescriptor>> {
    let stmt = conn
        .prepare(sql)
        .map_err(|e| anyhow::Error::new(TransferError::SchemaMismatch(e.to_string())))
        .context("Failed to prepare source query")?;
    Ok(stmt
        .columns()
        .iter()
        .enumerate()
        .map(|(ordinal, column)| {
            descriptor(
                column.name().to_string(),
                ordinal,
                column.decl_type().unwrap_or(""),
                false,
            )
        })
        .collect())
}

fn select_sql(source: &TableSource, columns: &[ColumnDescriptor]) -> String {
    match source {
        TableSource::Query { query, .. } => query.clone(),
        TableSource::Table { schema, table } => {
            let list: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
            format!(
                "SELECT {} FROM {} ORDER BY rowid",
                list.join(", "),
                quote_qualified(schema.as_deref(), table)
            )
        }
    }
}

/// Cursor fed by a blocking thread that owns the statement for the whole scan
pub struct SqliteCursor {
    rows: mpsc::Receiver<Result<RowRecord>>,
}

#[async_trait]
impl RowCursor for SqliteCursor {
    async fn fetch(&mut self, max: usize) -> Result<Vec<RowRecord>> {
        let mut page = Vec::with_capacity(max.min(CHANNEL_CAPACITY));
        while page.len() < max {
            match self.rows.recv().await {
                Some(row) => page.push(row?),
                None => break,
            }
        }
        Ok(page)
    }
}

fn scan(
    conn: &Connection,
    sql: &str,
    columns: &[ColumnDescriptor],
    tx: &mpsc::Sender<Result<RowRecord>>,
) -> Result<()> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| anyhow::Error::new(TransferError::SourceUnavailable(e.to_string())))?;
    let mut rows = stmt
        .query([])
        .map_err(|e| anyhow::Error::new(TransferError::SourceUnavailable(e.to_string())))?;

    let mut row_number = 0u64;
    while let Some(row) = rows
        .next()
        .map_err(|e| anyhow::Error::new(TransferError::SourceUnavailable(e.to_string())))?
    {
        row_number += 1;
        let mut cells = Vec::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            let raw = row
                .get_ref(idx)
                .map_err(|e| anyhow::Error::new(TransferError::SchemaMismatch(e.to_string())))?;
            let value: Value = from_sqlite(raw, column.column_type).map_err(|reason| {
                anyhow::Error::new(TransferError::MalformedValue(format!(
                    "source row {}, column '{}': {}",
                    row_number,
                    sanitize_identifier(&column.name),
                    reason
                )))
            })?;
            cells.push(value);
        }
        if tx.blocking_send(Ok(RowRecord::new(cells))).is_err() {
            // cursor dropped, e.g. after cancellation
            return Ok(());
        }
    }
    Ok(())
}

#[async_trait]
impl SourceConnection for SqliteConnection {
    async fn describe(&mut self, source: &TableSource) -> Result<Vec<ColumnDescriptor>> {
        self.with_conn(|conn| match source {
            TableSource::Table { schema, table } => describe_table(conn, schema.as_deref(), table),
            TableSource::Query { query, .. } => describe_query(conn, query),
        })
    }

    async fn estimate_rows(&mut self, source: &TableSource) -> Result<Option<u64>> {
        match source {
            TableSource::Table { schema, table } => self
                .with_conn(|conn| count_rows(conn, schema.as_deref(), table))
                .map(Some),
            TableSource::Query { .. } => Ok(None),
        }
    }

    async fn open_cursor<'a>(
        &'a mut self,
        source: &TableSource,
        columns: &[ColumnDescriptor],
    ) -> Result<Box<dyn RowCursor + 'a>> {
        let sql = select_sql(source, columns);
        let columns = columns.to_vec();
        let shared = self.shared();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::task::spawn_blocking(move || {
            let outcome = match shared.lock() {
                Ok(conn) => scan(&conn, &sql, &columns, &tx),
                Err(_) => Err(anyhow::Error::new(TransferError::SourceUnavailable(
                    "SQLite connection is poisoned".into(),
                ))),
            };
            if let Err(e) = outcome {
                let _ = tx.blocking_send(Err(e));
            }
        });

        Ok(Box::new(SqliteCursor { rows: rx }))
    }

    async fn list_tables(&mut self) -> Result<Vec<(String, Option<u64>)>> {
        self.with_conn(|conn| {
            list_tables(conn)?
                .into_iter()
                .map(|table| {
                    let count = count_rows(conn, None, &table)?;
                    Ok((table, Some(count)))
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ColumnType;
    use crate::reader::RowStreamReader;

    fn sample() -> SqliteConnection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                balance NUMERIC(10,2),
                active BOOLEAN,
                joined TIMESTAMP
            );
            INSERT INTO users VALUES (1, 'Alice', 10.5, 1, '2024-01-02 03:04:05');
            INSERT INTO users VALUES (2, 'Bob', NULL, 0, NULL);
            INSERT INTO users VALUES (3, 'Charlie', 7, 1, '2024-02-03T00:00:00');
            CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT);
            CREATE TABLE seq (id INTEGER PRIMARY KEY AUTOINCREMENT);",
        )
        .unwrap();
        SqliteConnection::from_connection(conn, ":memory:")
    }

    #[tokio::test]
    async fn test_describe_table() {
        let mut conn = sample();
        let columns = conn.describe(&TableSource::table("users")).await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "balance", "active", "joined"]);
        assert_eq!(columns[0].column_type, ColumnType::Integer);
        assert!(!columns[0].nullable);
        assert!(!columns[1].nullable);
        assert_eq!(columns[2].column_type, ColumnType::Decimal);
        assert_eq!(columns[2].scale, Some(2));
        assert_eq!(columns[3].column_type, ColumnType::Boolean);
        assert_eq!(columns[4].column_type, ColumnType::Timestamp);
    }

    #[test]
    fn test_only_integer_primary_key_is_implicitly_not_null() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE codes (code TEXT PRIMARY KEY, n INTEGER);
             CREATE TABLE ids (id INTEGER PRIMARY KEY, n INTEGER);",
        )
        .unwrap();
        let codes = describe_table(&conn, None, "codes").unwrap();
        assert!(codes[0].nullable);
        let ids = describe_table(&conn, None, "ids").unwrap();
        assert!(!ids[0].nullable);
        assert!(ids[1].nullable);
    }

    #[tokio::test]
    async fn test_missing_table_describes_as_empty() {
        let mut conn = sample();
        let columns = conn.describe(&TableSource::table("nope")).await.unwrap();
        assert!(columns.is_empty());
    }

    #[tokio::test]
    async fn test_list_tables_excludes_internal_tables() {
        let mut conn = sample();
        let tables = SourceConnection::list_tables(&mut conn).await.unwrap();
        assert_eq!(
            tables,
            vec![
                ("posts".to_string(), Some(0)),
                ("seq".to_string(), Some(0)),
                ("users".to_string(), Some(3)),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_rows_in_pages() {
        let mut conn = sample();
        let source = TableSource::table("users");
        let mut reader = RowStreamReader::open(&mut conn, &source, 2).await.unwrap();
        assert_eq!(reader.estimated_total(), Some(3));

        let first = reader.next_page().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].get(1), Some(&Value::Text("Alice".into())));
        assert_eq!(first[0].get(2), Some(&Value::Decimal("10.5".into())));
        assert_eq!(first[0].get(3), Some(&Value::Boolean(true)));
        assert_eq!(first[1].get(2), Some(&Value::Null));

        let second = reader.next_page().await.unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].get(2), Some(&Value::Decimal("7".into())));
        assert!(reader.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_source() {
        let mut conn = sample();
        let source = TableSource::query("rich", "SELECT id, name FROM users WHERE id > 1");
        let columns = conn.describe(&source).await.unwrap();
        assert_eq!(columns[0].column_type, ColumnType::Integer);
        assert!(columns[0].nullable);

        let mut reader = RowStreamReader::open(&mut conn, &source, 10).await.unwrap();
        assert_eq!(reader.estimated_total(), None);
        let page = reader.next_page().await.unwrap().unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn test_unconvertible_value_fails_the_read() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES ('abc');")
            .unwrap();
        let mut conn = SqliteConnection::from_connection(conn, ":memory:");
        let mut reader = RowStreamReader::open(&mut conn, &TableSource::table("t"), 10)
            .await
            .unwrap();
        let err = reader.next_page().await.unwrap_err();
        assert_eq!(
            crate::error::error_kind(&err),
            crate::error::ErrorKind::MalformedValue
        );
    }
}
