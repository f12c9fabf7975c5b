// ABOUTME: Printable report writer paginating rows into fixed-width or flowed layouts
// ABOUTME: Presentation only; report output has no import counterpart

use super::encode_row;
use crate::codec::Codec;
use crate::config::ReportLayout;
use crate::model::{ColumnDescriptor, RowRecord};
use anyhow::Result;

pub struct ReportWriter {
    title: String,
    columns: Vec<ColumnDescriptor>,
    layout: ReportLayout,
    page_rows: usize,
    max_width: usize,
    newline: &'static str,
    codec: Codec,
    pending: Vec<Vec<String>>,
    pages: usize,
    rows: u64,
}

impl ReportWriter {
    pub fn new(
        title: String,
        columns: Vec<ColumnDescriptor>,
        layout: ReportLayout,
        page_rows: usize,
        max_width: usize,
        newline: &'static str,
    ) -> Self {
        Self {
            title,
            columns,
            layout,
            page_rows: page_rows.max(1),
            max_width: max_width.max(4),
            newline,
            codec: Codec::report(),
            pending: Vec::new(),
            pages: 0,
            rows: 0,
        }
    }

    pub fn begin(&mut self, _out: &mut String) -> Result<()> {
        Ok(())
    }

    pub fn write_batch(&mut self, rows: &[RowRecord], first_row: u64, out: &mut String) -> Result<()> {
        for (idx, row) in rows.iter().enumerate() {
            let cells = encode_row(&self.codec, &self.columns, row, first_row + idx as u64)?;
            self.pending.push(cells);
            if self.pending.len() == self.page_rows {
                self.emit_page(out);
            }
        }
        Ok(())
    }

    pub fn finish(&mut self, out: &mut String) -> Result<()> {
        if !self.pending.is_empty() || self.pages == 0 {
            self.emit_page(out);
        }
        let noun = if self.rows == 1 { "row" } else { "rows" };
        out.push_str(&format!("({} {}){}", self.rows, noun, self.newline));
        Ok(())
    }

    fn emit_page(&mut self, out: &mut String) {
        self.pages += 1;
        if self.pages > 1 {
            out.push('\u{0C}');
            out.push_str(self.newline);
        }
        out.push_str(&format!("{} - page {}", self.title, self.pages));
        out.push_str(self.newline);
        out.push_str(self.newline);

        let page = std::mem::take(&mut self.pending);
        match self.layout {
            ReportLayout::FixedWidth => self.fixed_width(&page, out),
            ReportLayout::Flowed => self.flowed(&page, out),
        }
        out.push_str(self.newline);
    }

    fn fixed_width(&mut self, page: &[Vec<String>], out: &mut String) {
        let headers: Vec<String> = self
            .columns
            .iter()
            .map(|c| truncate(&c.name, self.max_width))
            .collect();
        let cells: Vec<Vec<String>> = page
            .iter()
            .map(|row| row.iter().map(|c| truncate(c, self.max_width)).collect())
            .collect();

        let widths: Vec<usize> = headers
            .iter()
            .enumerate()
            .map(|(idx, h)| {
                cells
                    .iter()
                    .map(|row| row[idx].chars().count())
                    .chain(std::iter::once(h.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let header_line: Vec<String> = headers
            .iter()
            .zip(&widths)
            .map(|(h, &w)| pad(h, w, false))
            .collect();
        push_line(out, &header_line.join(" | "), self.newline);

        let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
        push_line(out, &rule.join("-+-"), self.newline);

        for row in &cells {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .zip(&self.columns)
                .map(|((cell, &w), column)| pad(cell, w, column.column_type.is_numeric()))
                .collect();
            push_line(out, &line.join(" | "), self.newline);
            self.rows += 1;
        }
    }

    fn flowed(&mut self, page: &[Vec<String>], out: &mut String) {
        for row in page {
            self.rows += 1;
            push_line(out, &format!("-- row {} --", self.rows), self.newline);
            for (column, cell) in self.columns.iter().zip(row) {
                push_line(out, &format!("{}: {}", column.name, cell), self.newline);
            }
        }
    }
}

fn push_line(out: &mut String, line: &str, newline: &str) {
    out.push_str(line.trim_end());
    out.push_str(newline);
}

fn truncate(text: &str, max_width: usize) -> String {
    if text.chars().count() <= max_width {
        return text.to_string();
    }
    let head: String = text.chars().take(max_width - 3).collect();
    format!("{}...", head)
}

fn pad(text: &str, width: usize, right_align: bool) -> String {
    let fill = " ".repeat(width.saturating_sub(text.chars().count()));
    if right_align {
        format!("{}{}", fill, text)
    } else {
        format!("{}{}", text, fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnType, Value};

    fn columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("id", 0, ColumnType::Integer),
            ColumnDescriptor::new("name", 1, ColumnType::Text),
        ]
    }

    fn row(id: i64, name: &str) -> RowRecord {
        RowRecord::new(vec![Value::Integer(id), Value::Text(name.into())])
    }

    #[test]
    fn test_fixed_width_page() {
        let mut w = ReportWriter::new("users".into(), columns(), ReportLayout::FixedWidth, 10, 40, "\n");
        let mut out = String::new();
        w.write_batch(&[row(1, "Ann"), row(12, "O'Brien")], 1, &mut out)
            .unwrap();
        w.finish(&mut out).unwrap();
        assert_eq!(
            out,
            "users - page 1\n\nid | name\n---+--------\n 1 | Ann\n12 | O'Brien\n\n(2 rows)\n"
        );
    }

    #[test]
    fn test_pagination_and_truncation() {
        let mut w = ReportWriter::new("t".into(), columns(), ReportLayout::FixedWidth, 2, 6, "\n");
        let mut out = String::new();
        w.write_batch(
            &[row(1, "a"), row(2, "abcdefghij"), row(3, "c")],
            1,
            &mut out,
        )
        .unwrap();
        w.finish(&mut out).unwrap();
        assert!(out.contains("t - page 1"));
        assert!(out.contains("t - page 2"));
        assert!(out.contains("abc..."));
        assert!(!out.contains("abcdefghij"));
        assert!(out.ends_with("(3 rows)\n"));
    }

    #[test]
    fn test_flowed_layout() {
        let mut w = ReportWriter::new("t".into(), columns(), ReportLayout::Flowed, 50, 40, "\n");
        let mut out = String::new();
        w.write_batch(&[row(1, "line\nbreak")], 1, &mut out).unwrap();
        w.finish(&mut out).unwrap();
        assert!(out.contains("-- row 1 --\nid: 1\nname: line\\nbreak\n"));
        assert!(out.ends_with("(1 row)\n"));
    }

    #[test]
    fn test_empty_report_still_has_header() {
        let mut w = ReportWriter::new("t".into(), columns(), ReportLayout::FixedWidth, 50, 40, "\n");
        let mut out = String::new();
        w.finish(&mut out).unwrap();
        assert!(out.contains("id | name"));
        assert!(out.ends_with("(0 rows)\n"));
    }
}
