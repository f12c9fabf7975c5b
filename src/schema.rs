// ABOUTME: Schema rendering and type mapping between the engine and SQL dialects
// ABOUTME: Builds CREATE TABLE statements and maps declared SQL types back to type tags

use crate::model::{ColumnDescriptor, ColumnType, TableSchema};
use crate::utils::quote_ident;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// SQL dialect whose type names are used for generated DDL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[default]
    Generic,
    Sqlite,
    Postgres,
}

/// Mapping from type tags to destination SQL type names
///
/// Overrides replace the dialect's base name; a size or precision on the
/// column is still appended unless the override already contains parentheses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMapping {
    #[serde(default)]
    pub dialect: Dialect,
    #[serde(default)]
    pub overrides: HashMap<ColumnType, String>,
}

impl TypeMapping {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, column_type: ColumnType, sql_type: impl Into<String>) -> Self {
        self.overrides.insert(column_type, sql_type.into());
        self
    }

    fn base_name(&self, column_type: ColumnType) -> &str {
        if let Some(name) = self.overrides.get(&column_type) {
            return name;
        }
        match (self.dialect, column_type) {
            (_, ColumnType::Integer) => "BIGINT",
            (Dialect::Sqlite, ColumnType::Decimal) => "NUMERIC",
            (_, ColumnType::Decimal) => "NUMERIC",
            (Dialect::Sqlite, ColumnType::Float) => "REAL",
            (_, ColumnType::Float) => "DOUBLE PRECISION",
            (Dialect::Postgres, ColumnType::Text) => "TEXT",
            (_, ColumnType::Text) => "TEXT",
            (Dialect::Postgres, ColumnType::Binary) => "BYTEA",
            (_, ColumnType::Binary) => "BLOB",
            (_, ColumnType::Date) => "DATE",
            (_, ColumnType::Time) => "TIME",
            (_, ColumnType::Timestamp) => "TIMESTAMP",
            (_, ColumnType::Boolean) => "BOOLEAN",
        }
    }

    /// Full SQL type for a column, including length or precision
    pub fn sql_type(&self, column: &ColumnDescriptor) -> String {
        let base = self.base_name(column.column_type);
        if base.contains('(') {
            return base.to_string();
        }
        match (column.column_type, column.size, column.scale) {
            (ColumnType::Decimal, Some(precision), Some(scale)) => {
                format!("{}({},{})", base, precision, scale)
            }
            (ColumnType::Decimal, Some(precision), None) => format!("{}({})", base, precision),
            (ColumnType::Text, Some(size), _) if base == "TEXT" => format!("VARCHAR({})", size),
            (ColumnType::Text, Some(size), _) => format!("{}({})", base, size),
            _ => base.to_string(),
        }
    }
}

/// Render `CREATE TABLE` for a table schema, without a trailing terminator
pub fn create_table_statement(schema: &TableSchema, mapping: &TypeMapping) -> String {
    let mut parts: Vec<String> = schema
        .columns
        .iter()
        .map(|column| {
            let mut def = format!("{} {}", quote_ident(&column.name), mapping.sql_type(column));
            if !column.nullable {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect();

    let quote_list = |names: &[String]| {
        names
            .iter()
            .map(|n| quote_ident(n))
            .collect::<Vec<_>>()
            .join(", ")
    };

    if !schema.constraints.primary_key.is_empty() {
        parts.push(format!(
            "PRIMARY KEY ({})",
            quote_list(&schema.constraints.primary_key)
        ));
    }
    for unique in &schema.constraints.unique {
        if !unique.is_empty() {
            parts.push(format!("UNIQUE ({})", quote_list(unique)));
        }
    }

    format!(
        "CREATE TABLE {} (\n    {}\n)",
        quote_ident(&schema.name),
        parts.join(",\n    ")
    )
}

/// Declared SQL type split into tag, size and scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredType {
    pub column_type: ColumnType,
    pub size: Option<u32>,
    pub scale: Option<u32>,
}

/// Map a declared SQL type (e.g. `VARCHAR(20)`, `NUMERIC(10,2)`) to a type tag
///
/// Exact names are matched first; otherwise SQLite's affinity rules decide
/// (`INT` → integer, `CHAR`/`CLOB`/`TEXT` → text, `BLOB` → binary,
/// `REAL`/`FLOA`/`DOUB` → float, anything else numeric → decimal). An empty
/// declaration maps to text.
pub fn column_type_from_declared(declared: &str) -> DeclaredType {
    let declared = declared.trim();
    let (name, args) = match declared.split_once('(') {
        Some((name, rest)) => (name.trim(), rest.trim_end_matches(')')),
        None => (declared, ""),
    };
    let mut numbers = args
        .split(',')
        .filter_map(|part| part.trim().parse::<u32>().ok());
    let size = numbers.next();
    let scale = numbers.next();

    let upper = name.to_ascii_uppercase();
    let column_type = match upper.as_str() {
        "" => ColumnType::Text,
        "BOOL" | "BOOLEAN" => ColumnType::Boolean,
        "DATE" => ColumnType::Date,
        "TIME" | "TIME WITHOUT TIME ZONE" | "TIMETZ" => ColumnType::Time,
        "TIMESTAMP" | "DATETIME" | "TIMESTAMPTZ" | "TIMESTAMP WITHOUT TIME ZONE"
        | "TIMESTAMP WITH TIME ZONE" => ColumnType::Timestamp,
        "BYTEA" | "BINARY" | "VARBINARY" => ColumnType::Binary,
        "UUID" | "JSON" | "JSONB" => ColumnType::Text,
        _ if upper.contains("INT") => ColumnType::Integer,
        _ if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") => {
            ColumnType::Text
        }
        _ if upper.contains("BLOB") => ColumnType::Binary,
        _ if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") => {
            ColumnType::Float
        }
        _ => ColumnType::Decimal,
    };

    DeclaredType {
        column_type,
        size,
        scale: if column_type == ColumnType::Decimal {
            scale
        } else {
            None
        },
    }
}
