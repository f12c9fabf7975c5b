// ABOUTME: PostgreSQL type mapping between server types and cell values
// ABOUTME: Reads use fixed per-tag casts; writes bind text parameters cast to the column type

use crate::codec::{canonical, is_decimal};
use crate::connection::WriteError;
use crate::model::{ColumnDescriptor, ColumnType, Value};
use crate::utils::quote_ident;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::Type;
use tokio_postgres::Row;

/// Type tag for a server type; anything without a native mapping is read as text
pub fn column_type_for(pg_type: &Type) -> ColumnType {
    match *pg_type {
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => ColumnType::Integer,
        Type::NUMERIC => ColumnType::Decimal,
        Type::FLOAT4 | Type::FLOAT8 => ColumnType::Float,
        Type::BOOL => ColumnType::Boolean,
        Type::BYTEA => ColumnType::Binary,
        Type::DATE => ColumnType::Date,
        Type::TIME => ColumnType::Time,
        Type::TIMESTAMP | Type::TIMESTAMPTZ => ColumnType::Timestamp,
        _ => ColumnType::Text,
    }
}

/// Cast applied when selecting a column so every tag is read through one Rust type
///
/// `timestamptz` is cast to a naive timestamp in the session time zone.
fn read_cast(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer => "bigint",
        ColumnType::Decimal | ColumnType::Text => "text",
        ColumnType::Float => "double precision",
        ColumnType::Binary => "bytea",
        ColumnType::Date => "date",
        ColumnType::Time => "time",
        ColumnType::Timestamp => "timestamp",
        ColumnType::Boolean => "boolean",
    }
}

/// Select list reading each column with its cast, keeping the column names
pub fn select_list(columns: &[ColumnDescriptor]) -> String {
    columns
        .iter()
        .map(|c| {
            let name = quote_ident(&c.name);
            format!("{}::{} AS {}", name, read_cast(c.column_type), name)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convert one result row selected with [`select_list`]
pub fn row_values(row: &Row, columns: &[ColumnDescriptor]) -> Result<Vec<Value>, String> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            cell(row, idx, column.column_type)
                .map_err(|reason| format!("column '{}': {}", column.name, reason))
        })
        .collect()
}

fn cell(row: &Row, idx: usize, column_type: ColumnType) -> Result<Value, String> {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
        row: &'a Row,
        idx: usize,
    ) -> Result<Option<T>, String> {
        row.try_get::<_, Option<T>>(idx).map_err(|e| e.to_string())
    }

    let value = match column_type {
        ColumnType::Integer => get::<i64>(row, idx)?.map(Value::Integer),
        ColumnType::Decimal => match get::<String>(row, idx)? {
            Some(text) if is_decimal(&text) => Some(Value::Decimal(text)),
            Some(text) => return Err(format!("'{}' has no decimal representation", text)),
            None => None,
        },
        ColumnType::Float => get::<f64>(row, idx)?.map(Value::Float),
        ColumnType::Text => get::<String>(row, idx)?.map(Value::Text),
        ColumnType::Binary => get::<Vec<u8>>(row, idx)?.map(Value::Binary),
        ColumnType::Date => get::<NaiveDate>(row, idx)?.map(Value::Date),
        ColumnType::Time => get::<NaiveTime>(row, idx)?.map(Value::Time),
        ColumnType::Timestamp => get::<NaiveDateTime>(row, idx)?.map(Value::Timestamp),
        ColumnType::Boolean => get::<bool>(row, idx)?.map(Value::Boolean),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Text form of a value in PostgreSQL's input syntax, `None` for NULL
pub fn param_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Binary(bytes) => {
            let mut text = String::with_capacity(2 + bytes.len() * 2);
            text.push_str("\\x");
            for b in bytes {
                text.push_str(&format!("{:02x}", b));
            }
            Some(text)
        }
        Value::Float(f) if f.is_infinite() => Some(
            if *f > 0.0 { "Infinity" } else { "-Infinity" }.to_string(),
        ),
        other => Some(canonical(other)),
    }
}

/// Sort a driver failure into "statement refused" or "connection gone"
pub fn classify(err: tokio_postgres::Error) -> WriteError {
    if err.is_closed() {
        return WriteError::Unavailable(err.to_string());
    }
    match err.code() {
        Some(code) if is_connection_state(code) => WriteError::Unavailable(err.to_string()),
        Some(_) => WriteError::Rejected(err.to_string()),
        // no SQLSTATE means the failure happened below the protocol layer
        None => WriteError::Unavailable(err.to_string()),
    }
}

fn is_connection_state(code: &SqlState) -> bool {
    let class = &code.code()[..2];
    // 08 connection exception, 53 insufficient resources, 57 operator intervention, 58 system error
    matches!(class, "08" | "53" | "57" | "58")
}
