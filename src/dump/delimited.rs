// ABOUTME: Delimited-text dump writer producing one line per row
// ABOUTME: Writes a header line of column names unless suppressed

use super::encode_row;
use crate::codec::delimited::{needs_quoting, quote};
use crate::codec::Codec;
use crate::model::{ColumnDescriptor, RowRecord};
use anyhow::Result;

pub struct DelimitedWriter {
    columns: Vec<ColumnDescriptor>,
    codec: Codec,
    header: bool,
    newline: &'static str,
}

impl DelimitedWriter {
    pub fn new(columns: Vec<ColumnDescriptor>, codec: Codec, header: bool, newline: &'static str) -> Self {
        Self {
            columns,
            codec,
            header,
            newline,
        }
    }

    pub fn begin(&mut self, out: &mut String) -> Result<()> {
        if !self.header {
            return Ok(());
        }
        let delimiter = self.codec.delimiter();
        let names: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if needs_quoting(&c.name, delimiter, self.codec.null_marker()) {
                    quote(&c.name)
                } else {
                    c.name.clone()
                }
            })
            .collect();
        out.push_str(&names.join(&delimiter.to_string()));
        out.push_str(self.newline);
        Ok(())
    }

    pub fn write_batch(&mut self, rows: &[RowRecord], first_row: u64, out: &mut String) -> Result<()> {
        let delimiter = self.codec.delimiter().to_string();
        for (idx, row) in rows.iter().enumerate() {
            let cells = encode_row(&self.codec, &self.columns, row, first_row + idx as u64)?;
            out.push_str(&cells.join(&delimiter));
            out.push_str(self.newline);
        }
        Ok(())
    }
}
