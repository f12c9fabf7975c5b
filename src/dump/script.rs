// ABOUTME: Script dump writer emitting re-executable INSERT statements
// ABOUTME: Optionally prefixes the table definition; rows may be batched per statement

use super::{encode_row, push_statement};
use crate::codec::Codec;
use crate::model::{RowRecord, TableSchema};
use crate::schema::{create_table_statement, TypeMapping};
use crate::utils::quote_ident;
use anyhow::Result;

pub struct ScriptWriter {
    schema: TableSchema,
    mapping: TypeMapping,
    include_schema: bool,
    terminator: String,
    rows_per_statement: usize,
    newline: &'static str,
    codec: Codec,
    insert_prefix: String,
}

impl ScriptWriter {
    pub fn new(
        schema: TableSchema,
        mapping: TypeMapping,
        include_schema: bool,
        terminator: String,
        rows_per_statement: usize,
        newline: &'static str,
    ) -> Self {
        let column_list = schema
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_prefix = format!(
            "INSERT INTO {} ({}) VALUES",
            quote_ident(&schema.name),
            column_list
        );
        Self {
            schema,
            mapping,
            include_schema,
            terminator,
            rows_per_statement: rows_per_statement.max(1),
            newline,
            codec: Codec::script(),
            insert_prefix,
        }
    }

    pub fn begin(&mut self, out: &mut String) -> Result<()> {
        out.push_str(&format!(
            "-- Data dump of table {}{}",
            self.schema.name.replace(['\r', '\n'], " "),
            self.newline
        ));
        out.push_str(self.newline);
        if self.include_schema {
            let statement = create_table_statement(&self.schema, &self.mapping);
            push_statement(out, &statement, &self.terminator, self.newline);
            out.push_str(self.newline);
        }
        Ok(())
    }

    pub fn write_batch(&mut self, rows: &[RowRecord], first_row: u64, out: &mut String) -> Result<()> {
        let mut row_number = first_row;
        for statement_rows in rows.chunks(self.rows_per_statement) {
            out.push_str(&self.insert_prefix);
            for (idx, row) in statement_rows.iter().enumerate() {
                let cells = encode_row(&self.codec, &self.schema.columns, row, row_number)?;
                row_number += 1;
                if statement_rows.len() == 1 {
                    out.push(' ');
                } else {
                    out.push_str(if idx == 0 { "" } else { "," });
                    out.push_str(self.newline);
                    out.push_str("  ");
                }
                out.push('(');
                out.push_str(&cells.join(", "));
                out.push(')');
            }
            out.push_str(&self.terminator);
            out.push_str(self.newline);
        }
        Ok(())
    }
}
