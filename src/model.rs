// ABOUTME: Core data model shared by readers, writers, parsers and the batcher
// ABOUTME: Defines column descriptors, typed cell values, row records and table sources

use crate::error::TransferError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relational type tag of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Decimal,
    Float,
    Text,
    Binary,
    Date,
    Time,
    Timestamp,
    Boolean,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Binary => "binary",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Boolean => "boolean",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::Decimal | ColumnType::Float
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static metadata for one column of a table snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Zero-based position in the row
    #[serde(default)]
    pub ordinal: usize,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Declared length (text/binary) or precision (decimal)
    #[serde(default)]
    pub size: Option<u32>,
    /// Declared scale (decimal)
    #[serde(default)]
    pub scale: Option<u32>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, ordinal: usize, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            ordinal,
            column_type,
            nullable: true,
            size: None,
            scale: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_precision(mut self, precision: u32, scale: u32) -> Self {
        self.size = Some(precision);
        self.scale = Some(scale);
        self
    }
}

/// Reassign ordinals so they match positions in the slice
pub fn renumber(columns: &mut [ColumnDescriptor]) {
    for (idx, column) in columns.iter_mut().enumerate() {
        column.ordinal = idx;
    }
}

/// A single typed cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    /// Canonical decimal text, e.g. `-12.50`
    Decimal(String),
    Float(f64),
    Text(String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Boolean(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Binary(_) => "binary",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::Boolean(_) => "boolean",
        }
    }

    /// Whether this value can be stored in a column of the given type
    pub fn fits(&self, column_type: ColumnType) -> bool {
        match (self, column_type) {
            (Value::Null, _) => true,
            (Value::Integer(_), ColumnType::Integer | ColumnType::Decimal | ColumnType::Float) => {
                true
            }
            (Value::Decimal(_), ColumnType::Decimal) => true,
            (Value::Float(_), ColumnType::Float) => true,
            (Value::Text(_), ColumnType::Text) => true,
            (Value::Binary(_), ColumnType::Binary) => true,
            (Value::Date(_), ColumnType::Date) => true,
            (Value::Time(_), ColumnType::Time) => true,
            (Value::Timestamp(_), ColumnType::Timestamp) => true,
            (Value::Boolean(_), ColumnType::Boolean) => true,
            _ => false,
        }
    }
}

/// One row's cells, positionally matching the active column descriptors
#[derive(Debug, Clone, PartialEq)]
pub struct RowRecord {
    cells: Vec<Value>,
}

impl RowRecord {
    pub fn new(cells: Vec<Value>) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[Value] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.cells.get(idx)
    }

    pub fn into_cells(self) -> Vec<Value> {
        self.cells
    }

    /// Fail with a schema mismatch if the cell count differs from the column count
    pub fn check_arity(&self, columns: &[ColumnDescriptor]) -> Result<(), TransferError> {
        if self.cells.len() != columns.len() {
            return Err(TransferError::SchemaMismatch(format!(
                "row has {} cells but {} columns are active",
                self.cells.len(),
                columns.len()
            )));
        }
        Ok(())
    }
}

impl From<Vec<Value>> for RowRecord {
    fn from(cells: Vec<Value>) -> Self {
        Self::new(cells)
    }
}

/// Where rows are read from: a whole table or a named query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableSource {
    Query {
        name: String,
        query: String,
    },
    Table {
        #[serde(default)]
        schema: Option<String>,
        table: String,
    },
}

impl TableSource {
    pub fn table(name: impl Into<String>) -> Self {
        TableSource::Table {
            schema: None,
            table: name.into(),
        }
    }

    pub fn query(name: impl Into<String>, sql: impl Into<String>) -> Self {
        TableSource::Query {
            name: name.into(),
            query: sql.into(),
        }
    }

    /// Short name used for output naming and as the default target table
    pub fn name(&self) -> &str {
        match self {
            TableSource::Table { table, .. } => table,
            TableSource::Query { name, .. } => name,
        }
    }
}

impl fmt::Display for TableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableSource::Table {
                schema: Some(schema),
                table,
            } => write!(f, "{}.{}", schema, table),
            TableSource::Table { table, .. } => f.write_str(table),
            TableSource::Query { name, .. } => write!(f, "query '{}'", name),
        }
    }
}

/// Constraint metadata supplied by the caller for DDL rendering
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConstraints {
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
}

impl TableConstraints {
    pub fn is_empty(&self) -> bool {
        self.primary_key.is_empty() && self.unique.is_empty()
    }
}

/// Table name, columns and constraints as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub constraints: TableConstraints,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            name: name.into(),
            columns,
            constraints: TableConstraints::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: TableConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}
