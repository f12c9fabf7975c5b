// ABOUTME: Type codec converting single cell values to and from format-specific text
// ABOUTME: Pure functions only; escaping rules live in the per-format submodules

pub mod delimited;
pub mod report;
pub mod script;

use crate::model::{ColumnType, Value};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("cannot encode {found} value into a {expected} column")]
    TypeMismatch {
        expected: ColumnType,
        found: &'static str,
    },

    #[error("'{text}' is not a valid {expected} value: {reason}")]
    Malformed {
        expected: ColumnType,
        text: String,
        reason: String,
    },

    #[error("{0} values cannot be decoded")]
    NotInvertible(Format),
}

impl CodecError {
    pub(crate) fn malformed(expected: ColumnType, text: &str, reason: impl Into<String>) -> Self {
        // Keep diagnostics readable for huge fields
        let text = if text.chars().count() > 64 {
            let head: String = text.chars().take(61).collect();
            format!("{}...", head)
        } else {
            text.to_string()
        };
        CodecError::Malformed {
            expected,
            text,
            reason: reason.into(),
        }
    }
}

/// Text format a codec targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Script,
    Delimited,
    Report,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Script => f.write_str("script"),
            Format::Delimited => f.write_str("delimited-text"),
            Format::Report => f.write_str("report"),
        }
    }
}

/// Value codec bound to one format and its escaping parameters
///
/// `decode(encode(v)) == v` holds for every value that fits the column type,
/// for the script and delimited-text formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    format: Format,
    delimiter: char,
    null_marker: String,
}

impl Codec {
    pub fn script() -> Self {
        Self {
            format: Format::Script,
            delimiter: ',',
            null_marker: String::new(),
        }
    }

    pub fn delimited(delimiter: char, null_marker: impl Into<String>) -> Self {
        Self {
            format: Format::Delimited,
            delimiter,
            null_marker: null_marker.into(),
        }
    }

    pub fn report() -> Self {
        Self {
            format: Format::Report,
            delimiter: ' ',
            null_marker: String::from("NULL"),
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn null_marker(&self) -> &str {
        &self.null_marker
    }

    pub fn encode(&self, value: &Value, column_type: ColumnType) -> Result<String, CodecError> {
        if !value.fits(column_type) {
            return Err(CodecError::TypeMismatch {
                expected: column_type,
                found: value.kind(),
            });
        }
        match self.format {
            Format::Script => Ok(script::encode(value)),
            Format::Delimited => Ok(delimited::encode(value, self.delimiter, &self.null_marker)),
            Format::Report => Ok(report::encode(value)),
        }
    }

    pub fn decode(&self, text: &str, column_type: ColumnType) -> Result<Value, CodecError> {
        match self.format {
            Format::Script => script::decode(text, column_type),
            Format::Delimited => {
                delimited::decode(text, column_type, self.delimiter, &self.null_marker)
            }
            Format::Report => Err(CodecError::NotInvertible(Format::Report)),
        }
    }
}

/// Locale-independent rendering of a non-null, non-text, non-binary value
pub(crate) fn canonical(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Decimal(d) => d.clone(),
        Value::Float(f) => format_float(*f),
        Value::Text(s) => s.clone(),
        Value::Binary(b) => hex_upper(b),
        Value::Date(d) => d.format(DATE_FORMAT).to_string(),
        Value::Time(t) => t.format(TIME_FORMAT).to_string(),
        Value::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        Value::Boolean(b) => b.to_string(),
    }
}

/// Shortest decimal rendering that parses back to the same bits
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        String::from("NaN")
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        f.to_string()
    }
}

/// Parse the canonical text of a scalar (non-text, non-binary) type
pub(crate) fn parse_canonical(text: &str, column_type: ColumnType) -> Result<Value, CodecError> {
    match column_type {
        ColumnType::Integer => text
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| CodecError::malformed(column_type, text, e.to_string())),
        ColumnType::Decimal => {
            if is_decimal(text) {
                Ok(Value::Decimal(text.to_string()))
            } else {
                Err(CodecError::malformed(
                    column_type,
                    text,
                    "expected digits with an optional sign and fraction",
                ))
            }
        }
        ColumnType::Float => parse_float(text),
        ColumnType::Text => Ok(Value::Text(text.to_string())),
        ColumnType::Binary => decode_hex(text).map(Value::Binary),
        ColumnType::Date => NaiveDate::parse_from_str(text, DATE_FORMAT)
            .map(Value::Date)
            .map_err(|e| CodecError::malformed(column_type, text, e.to_string())),
        ColumnType::Time => NaiveTime::parse_from_str(text, TIME_FORMAT)
            .map(Value::Time)
            .map_err(|e| CodecError::malformed(column_type, text, e.to_string())),
        ColumnType::Timestamp => NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
            .map(Value::Timestamp)
            .map_err(|e| CodecError::malformed(column_type, text, e.to_string())),
        ColumnType::Boolean => match text {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(CodecError::malformed(
                column_type,
                text,
                "expected 'true' or 'false'",
            )),
        },
    }
}

fn parse_float(text: &str) -> Result<Value, CodecError> {
    // str::parse accepts "infinity" spellings; only the canonical ones round-trip
    match text {
        "NaN" => return Ok(Value::Float(f64::NAN)),
        "inf" => return Ok(Value::Float(f64::INFINITY)),
        "-inf" => return Ok(Value::Float(f64::NEG_INFINITY)),
        _ => {}
    }
    if !text
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
    {
        return Err(CodecError::malformed(
            ColumnType::Float,
            text,
            "expected a decimal number",
        ));
    }
    text.parse::<f64>()
        .map(Value::Float)
        .map_err(|e| CodecError::malformed(ColumnType::Float, text, e.to_string()))
}

/// `-?digits(.digits)?`
pub(crate) fn is_decimal(text: &str) -> bool {
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    digits(int_part) && frac_part.map_or(true, digits)
}

pub(crate) fn hex_upper(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

pub(crate) fn decode_hex(text: &str) -> Result<Vec<u8>, CodecError> {
    if text.len() % 2 != 0 {
        return Err(CodecError::malformed(
            ColumnType::Binary,
            text,
            "hex data must have an even number of digits",
        ));
    }
    let nibble = |c: u8| -> Option<u8> {
        match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'a'..=b'f' => Some(c - b'a' + 10),
            b'A'..=b'F' => Some(c - b'A' + 10),
            _ => None,
        }
    };
    text.as_bytes()
        .chunks(2)
        .map(|pair| match (nibble(pair[0]), nibble(pair[1])) {
            (Some(hi), Some(lo)) => Ok(hi << 4 | lo),
            _ => Err(CodecError::malformed(
                ColumnType::Binary,
                text,
                "invalid hex digit",
            )),
        })
        .collect()
}
