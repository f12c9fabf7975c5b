// ABOUTME: Schema-only dump writer emitting table definitions without rows
// ABOUTME: Column definitions come from the source description plus caller constraints

use super::push_statement;
use crate::model::TableSchema;
use crate::schema::{create_table_statement, TypeMapping};
use anyhow::Result;

pub struct SchemaWriter {
    schema: TableSchema,
    mapping: TypeMapping,
    terminator: String,
    newline: &'static str,
}

impl SchemaWriter {
    pub fn new(schema: TableSchema, mapping: TypeMapping, terminator: String, newline: &'static str) -> Self {
        Self {
            schema,
            mapping,
            terminator,
            newline,
        }
    }

    pub fn begin(&mut self, out: &mut String) -> Result<()> {
        let statement = create_table_statement(&self.schema, &self.mapping);
        push_statement(out, &statement, &self.terminator, self.newline);
        Ok(())
    }
}
