// ABOUTME: SQLite value conversion between rusqlite storage classes and typed cell values
// ABOUTME: Coerces SQLite's dynamic typing into the declared column type of each column

use crate::codec::{canonical, parse_canonical};
use crate::model::{ColumnType, Value};
use rusqlite::types::{Value as SqlValue, ValueRef};

/// Convert one stored SQLite value into a cell of the given column type
///
/// SQLite keeps whatever storage class a value was written with, so this
/// coerces where the conversion is lossless:
/// - INTEGER into integer, decimal, float and boolean (non-zero is true) columns
/// - REAL into float and decimal columns, and into integer columns when whole
/// - TEXT parsed as the column's canonical text (timestamps may use a space
///   instead of `T`; booleans may be `0`/`1`)
/// - BLOB into binary columns, or text columns when it is valid UTF-8
///
/// Anything else is an error describing the mismatch.
pub fn from_sqlite(value: ValueRef<'_>, column_type: ColumnType) -> Result<Value, String> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(i) => match column_type {
            ColumnType::Integer => Ok(Value::Integer(i)),
            ColumnType::Decimal => Ok(Value::Decimal(i.to_string())),
            ColumnType::Float => Ok(Value::Float(i as f64)),
            ColumnType::Boolean => Ok(Value::Boolean(i != 0)),
            ColumnType::Text => Ok(Value::Text(i.to_string())),
            other => Err(format!("INTEGER {} stored in a {} column", i, other)),
        },
        ValueRef::Real(f) => match column_type {
            ColumnType::Float => Ok(Value::Float(f)),
            ColumnType::Decimal if f.is_finite() => Ok(Value::Decimal(f.to_string())),
            ColumnType::Integer if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Ok(Value::Integer(f as i64))
            }
            ColumnType::Text => Ok(Value::Text(crate::codec::format_float(f))),
            other => Err(format!("REAL {} stored in a {} column", f, other)),
        },
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| format!("TEXT value is not valid UTF-8: {}", e))?;
            text_to_value(text, column_type)
        }
        ValueRef::Blob(bytes) => match column_type {
            ColumnType::Binary => Ok(Value::Binary(bytes.to_vec())),
            ColumnType::Text => std::str::from_utf8(bytes)
                .map(|s| Value::Text(s.to_string()))
                .map_err(|_| "BLOB stored in a text column is not valid UTF-8".to_string()),
            other => Err(format!("BLOB stored in a {} column", other)),
        },
    }
}

fn text_to_value(text: &str, column_type: ColumnType) -> Result<Value, String> {
    match column_type {
        ColumnType::Text => Ok(Value::Text(text.to_string())),
        ColumnType::Binary => Ok(Value::Binary(text.as_bytes().to_vec())),
        ColumnType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "t" => Ok(Value::Boolean(true)),
            "0" | "false" | "f" => Ok(Value::Boolean(false)),
            _ => Err(format!("'{}' is not a boolean", text)),
        },
        ColumnType::Timestamp => parse_canonical(text, column_type)
            .or_else(|_| parse_canonical(&text.replacen(' ', "T", 1), column_type))
            .map_err(|e| e.to_string()),
        other => parse_canonical(text.trim(), other).map_err(|e| e.to_string()),
    }
}

/// Convert a cell into the value bound for an INSERT parameter
///
/// Decimals and temporal values are stored as their canonical text; booleans
/// as 0/1 the way SQLite itself represents them.
pub fn to_sqlite(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Binary(b) => SqlValue::Blob(b.clone()),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Decimal(_) | Value::Date(_) | Value::Time(_) | Value::Timestamp(_) => {
            SqlValue::Text(canonical(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_integer_coercions() {
        assert_eq!(
            from_sqlite(ValueRef::Integer(1), ColumnType::Boolean).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            from_sqlite(ValueRef::Integer(12), ColumnType::Decimal).unwrap(),
            Value::Decimal("12".into())
        );
        assert!(from_sqlite(ValueRef::Integer(12), ColumnType::Date).is_err());
    }

    #[test]
    fn test_real_into_integer_only_when_whole() {
        assert_eq!(
            from_sqlite(ValueRef::Real(3.0), ColumnType::Integer).unwrap(),
            Value::Integer(3)
        );
        assert!(from_sqlite(ValueRef::Real(3.5), ColumnType::Integer).is_err());
        assert_eq!(
            from_sqlite(ValueRef::Real(1.5), ColumnType::Decimal).unwrap(),
            Value::Decimal("1.5".into())
        );
    }

    #[test]
    fn test_text_timestamps_accept_space_separator() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(
            from_sqlite(ValueRef::Text(b"2024-03-01 12:30:00"), ColumnType::Timestamp).unwrap(),
            Value::Timestamp(expected)
        );
        assert!(from_sqlite(ValueRef::Text(b"yesterday"), ColumnType::Timestamp).is_err());
    }

    #[test]
    fn test_blob_and_invalid_utf8() {
        assert_eq!(
            from_sqlite(ValueRef::Blob(&[0, 159]), ColumnType::Binary).unwrap(),
            Value::Binary(vec![0, 159])
        );
        assert!(from_sqlite(ValueRef::Blob(&[0, 159]), ColumnType::Text).is_err());
        assert!(from_sqlite(ValueRef::Text(&[0xff]), ColumnType::Text).is_err());
    }

    #[test]
    fn test_to_sqlite_storage_classes() {
        assert_eq!(to_sqlite(&Value::Boolean(true)), SqlValue::Integer(1));
        assert_eq!(
            to_sqlite(&Value::Decimal("10.25".into())),
            SqlValue::Text("10.25".into())
        );
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(
            to_sqlite(&Value::Date(date)),
            SqlValue::Text("2024-01-31".into())
        );
        assert_eq!(to_sqlite(&Value::Null), SqlValue::Null);
    }
}
