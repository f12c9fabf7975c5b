// ABOUTME: Display rendering of cell values for printable reports
// ABOUTME: One-way only; control characters are made visible so layouts stay aligned

use super::canonical;
use crate::model::Value;

pub fn encode(value: &Value) -> String {
    match value {
        Value::Null => String::from("NULL"),
        Value::Text(text) => text
            .chars()
            .fold(String::with_capacity(text.len()), |mut out, c| {
                match c {
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    c if c.is_control() => out.push('?'),
                    c => out.push(c),
                }
                out
            }),
        Value::Binary(_) => format!("0x{}", canonical(value)),
        other => canonical(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_rendering() {
        assert_eq!(encode(&Value::Null), "NULL");
        assert_eq!(encode(&Value::Text("a\nb\tc".into())), "a\\nb\\tc");
        assert_eq!(encode(&Value::Binary(vec![1, 255])), "0x01FF");
        assert_eq!(encode(&Value::Boolean(false)), "false");
    }
}
