// ABOUTME: Delimited-text field encoding with minimal quoting and an explicit null marker
// ABOUTME: Quotes are doubled inside quoted fields; binary data is base64 encoded

use super::{canonical, parse_canonical, CodecError};
use crate::model::{ColumnType, Value};
use base64::Engine;

pub const QUOTE: char = '"';
/// Also forces quoting, although it is never escaped
const APOSTROPHE: char = '\'';

/// Whether a raw field must be wrapped in quotes to survive tokenization
pub fn needs_quoting(field: &str, delimiter: char, null_marker: &str) -> bool {
    field.is_empty()
        || field == null_marker
        || field
            .chars()
            .any(|c| c == delimiter || c == QUOTE || c == APOSTROPHE || c == '\n' || c == '\r')
}

pub fn quote(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 2);
    out.push(QUOTE);
    for c in field.chars() {
        if c == QUOTE {
            out.push(QUOTE);
        }
        out.push(c);
    }
    out.push(QUOTE);
    out
}

pub fn encode(value: &Value, delimiter: char, null_marker: &str) -> String {
    let field = match value {
        Value::Null => return null_marker.to_string(),
        Value::Binary(bytes) => base64::engine::general_purpose::STANDARD.encode(bytes),
        other => canonical(other),
    };
    if needs_quoting(&field, delimiter, null_marker) {
        quote(&field)
    } else {
        field
    }
}

/// Strip quoting from a raw field; `None` when the field was not quoted
fn unquote(raw: &str, column_type: ColumnType) -> Result<Option<String>, CodecError> {
    let Some(inner) = raw.strip_prefix(QUOTE) else {
        if raw.contains(QUOTE) {
            return Err(CodecError::malformed(
                column_type,
                raw,
                "quote character inside an unquoted field",
            ));
        }
        return Ok(None);
    };
    let Some(inner) = inner.strip_suffix(QUOTE) else {
        return Err(CodecError::malformed(
            column_type,
            raw,
            "unterminated quoted field",
        ));
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == QUOTE {
            if chars.peek() == Some(&QUOTE) {
                chars.next();
            } else {
                return Err(CodecError::malformed(
                    column_type,
                    raw,
                    "unescaped quote inside a quoted field",
                ));
            }
        }
        out.push(c);
    }
    Ok(Some(out))
}

pub fn decode(
    raw: &str,
    column_type: ColumnType,
    _delimiter: char,
    null_marker: &str,
) -> Result<Value, CodecError> {
    if raw == null_marker {
        return Ok(Value::Null);
    }
    let text = match unquote(raw, column_type)? {
        Some(unquoted) => unquoted,
        None => raw.to_string(),
    };
    match column_type {
        ColumnType::Text => Ok(Value::Text(text)),
        ColumnType::Binary => base64::engine::general_purpose::STANDARD
            .decode(text.as_bytes())
            .map(Value::Binary)
            .map_err(|e| CodecError::malformed(column_type, &text, e.to_string())),
        other => parse_canonical(&text, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting_only_when_needed() {
        assert_eq!(encode(&Value::Text("Ann".into()), ',', ""), "Ann");
        assert_eq!(encode(&Value::Text("O'Brien".into()), ',', ""), "\"O'Brien\"");
        assert_eq!(
            decode("O'Brien", ColumnType::Text, ',', "").unwrap(),
            Value::Text("O'Brien".into())
        );
        assert_eq!(encode(&Value::Text("a,b".into()), ',', ""), "\"a,b\"");
        assert_eq!(
            encode(&Value::Text("say \"hi\"".into()), ',', ""),
            "\"say \"\"hi\"\"\""
        );
        assert_eq!(encode(&Value::Text("two\nlines".into()), ',', ""), "\"two\nlines\"");
    }

    #[test]
    fn test_null_is_distinct_from_empty_text() {
        assert_eq!(encode(&Value::Null, ',', ""), "");
        assert_eq!(encode(&Value::Text(String::new()), ',', ""), "\"\"");

        assert_eq!(decode("", ColumnType::Text, ',', "").unwrap(), Value::Null);
        assert_eq!(
            decode("\"\"", ColumnType::Text, ',', "").unwrap(),
            Value::Text(String::new())
        );
    }

    #[test]
    fn test_custom_null_marker() {
        assert_eq!(encode(&Value::Null, ',', "\\N"), "\\N");
        assert_eq!(encode(&Value::Text("\\N".into()), ',', "\\N"), "\"\\N\"");
        assert_eq!(decode("\\N", ColumnType::Integer, ',', "\\N").unwrap(), Value::Null);
        // with a visible marker an empty unquoted token is not null
        assert!(decode("", ColumnType::Integer, ',', "\\N").is_err());
        assert_eq!(
            decode("", ColumnType::Text, ',', "\\N").unwrap(),
            Value::Text(String::new())
        );
    }

    #[test]
    fn test_delimiter_quote_and_newline_survive() {
        let original = "a,\"b\"\r\nc";
        let encoded = encode(&Value::Text(original.into()), ',', "");
        assert!(encoded.starts_with('"') && encoded.ends_with('"'));
        assert_eq!(
            decode(&encoded, ColumnType::Text, ',', "").unwrap(),
            Value::Text(original.into())
        );
    }

    #[test]
    fn test_malformed_quoting() {
        for raw in ["\"abc", "ab\"c", "\"a\"b\"", "\"ab\"c"] {
            let err = decode(raw, ColumnType::Text, ',', "").unwrap_err();
            assert!(matches!(err, CodecError::Malformed { .. }), "{}", raw);
        }
    }

    #[test]
    fn test_binary_is_base64() {
        let encoded = encode(&Value::Binary(b"Hello".to_vec()), ',', "");
        assert_eq!(encoded, "SGVsbG8=");
        assert!(decode("not base64!", ColumnType::Binary, ',', "").is_err());
    }

    #[test]
    fn test_quoted_numbers_decode() {
        assert_eq!(
            decode("\"7\"", ColumnType::Integer, ',', "").unwrap(),
            Value::Integer(7)
        );
    }
}
