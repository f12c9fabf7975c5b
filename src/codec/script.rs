// ABOUTME: SQL literal encoding for re-executable script dumps
// ABOUTME: Single quotes are doubled, binary uses X'..' hex literals, NULL is a keyword

use super::{canonical, decode_hex, hex_upper, parse_canonical, CodecError};
use crate::model::{ColumnType, Value};

pub fn quote_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

pub fn encode(value: &Value) -> String {
    match value {
        Value::Null => String::from("NULL"),
        Value::Integer(_) | Value::Decimal(_) => canonical(value),
        Value::Float(f) if f.is_finite() => canonical(value),
        Value::Boolean(true) => String::from("TRUE"),
        Value::Boolean(false) => String::from("FALSE"),
        Value::Binary(bytes) => format!("X'{}'", hex_upper(bytes)),
        // text, dates, times and non-finite floats
        other => quote_literal(&canonical(other)),
    }
}

/// Undo `quote_literal`; `None` when the literal is not quoted
fn unquote(raw: &str, column_type: ColumnType) -> Result<Option<String>, CodecError> {
    let Some(inner) = raw.strip_prefix('\'') else {
        return Ok(None);
    };
    let Some(inner) = inner.strip_suffix('\'') else {
        return Err(CodecError::malformed(
            column_type,
            raw,
            "unterminated string literal",
        ));
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
            } else {
                return Err(CodecError::malformed(
                    column_type,
                    raw,
                    "unescaped quote inside a string literal",
                ));
            }
        }
        out.push(c);
    }
    Ok(Some(out))
}

pub fn decode(raw: &str, column_type: ColumnType) -> Result<Value, CodecError> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("NULL") {
        return Ok(Value::Null);
    }

    if column_type == ColumnType::Binary {
        let hex = raw
            .strip_prefix("X'")
            .or_else(|| raw.strip_prefix("x'"))
            .and_then(|rest| rest.strip_suffix('\''))
            .ok_or_else(|| CodecError::malformed(column_type, raw, "expected an X'..' literal"))?;
        return decode_hex(hex).map(Value::Binary);
    }

    match unquote(raw, column_type)? {
        Some(text) => match column_type {
            ColumnType::Text => Ok(Value::Text(text)),
            ColumnType::Boolean => decode_boolean(&text, raw),
            other => parse_canonical(&text, other),
        },
        None => match column_type {
            ColumnType::Text | ColumnType::Date | ColumnType::Time | ColumnType::Timestamp => Err(
                CodecError::malformed(column_type, raw, "expected a quoted string literal"),
            ),
            ColumnType::Boolean => decode_boolean(raw, raw),
            other => parse_canonical(raw, other),
        },
    }
}

fn decode_boolean(text: &str, raw: &str) -> Result<Value, CodecError> {
    if text.eq_ignore_ascii_case("true") {
        Ok(Value::Boolean(true))
    } else if text.eq_ignore_ascii_case("false") {
        Ok(Value::Boolean(false))
    } else {
        Err(CodecError::malformed(
            ColumnType::Boolean,
            raw,
            "expected TRUE or FALSE",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_literals_double_quotes() {
        assert_eq!(encode(&Value::Text("O'Brien".into())), "'O''Brien'");
        assert_eq!(
            decode("'O''Brien'", ColumnType::Text).unwrap(),
            Value::Text("O'Brien".into())
        );
        assert_eq!(encode(&Value::Text(String::new())), "''");
    }

    #[test]
    fn test_null_keyword_is_not_text() {
        assert_eq!(decode("NULL", ColumnType::Text).unwrap(), Value::Null);
        assert_eq!(decode("null", ColumnType::Integer).unwrap(), Value::Null);
        assert_eq!(
            decode("'NULL'", ColumnType::Text).unwrap(),
            Value::Text("NULL".into())
        );
        assert!(decode("''", ColumnType::Integer).is_err());
    }

    #[test]
    fn test_scalar_literals() {
        assert_eq!(encode(&Value::Integer(-5)), "-5");
        assert_eq!(encode(&Value::Boolean(true)), "TRUE");
        assert_eq!(encode(&Value::Binary(vec![0xca, 0xfe])), "X'CAFE'");
        assert_eq!(encode(&Value::Float(f64::INFINITY)), "'inf'");
        assert_eq!(decode("x'cafe'", ColumnType::Binary).unwrap(), Value::Binary(vec![0xca, 0xfe]));
        assert_eq!(decode("'12'", ColumnType::Integer).unwrap(), Value::Integer(12));
        assert_eq!(decode("true", ColumnType::Boolean).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_malformed_literals() {
        assert!(decode("'abc", ColumnType::Text).is_err());
        assert!(decode("'a'b'", ColumnType::Text).is_err());
        assert!(decode("abc", ColumnType::Text).is_err());
        assert!(decode("X'ABC'", ColumnType::Binary).is_err());
        assert!(decode("'CAFE'", ColumnType::Binary).is_err());
        assert!(decode("12x", ColumnType::Integer).is_err());
        assert!(decode("2024-01-01", ColumnType::Date).is_err());
    }
}
