// ABOUTME: Job configuration loaded from TOML job files or built in code
// ABOUTME: Validates every job option before a worker is allowed to start

use crate::batcher::ErrorPolicy;
use crate::codec::delimited::QUOTE;
use crate::codec::Codec;
use crate::error::TransferError;
use crate::import::ParseMode;
use crate::io::{LineEnding, TextEncoding};
use crate::model::{ColumnDescriptor, TableConstraints, TableSource};
use crate::schema::TypeMapping;
use crate::utils::validate_identifier;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Persisted artifact format of a dump or import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    Script,
    #[default]
    Delimited,
    Report,
    SchemaOnly,
}

impl DataFormat {
    /// File extension used when naming per-table output files
    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::Script | DataFormat::SchemaOnly => "sql",
            DataFormat::Delimited => "csv",
            DataFormat::Report => "txt",
        }
    }

    pub fn is_importable(&self) -> bool {
        matches!(self, DataFormat::Script | DataFormat::Delimited)
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataFormat::Script => "script",
            DataFormat::Delimited => "delimited",
            DataFormat::Report => "report",
            DataFormat::SchemaOnly => "schema-only",
        };
        f.write_str(name)
    }
}

impl FromStr for DataFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "script" | "sql" => Ok(DataFormat::Script),
            "delimited" | "csv" => Ok(DataFormat::Delimited),
            "report" | "txt" => Ok(DataFormat::Report),
            "schema-only" | "schema_only" | "schema" => Ok(DataFormat::SchemaOnly),
            other => bail!(
                "Unknown format '{}'. Expected one of: script, delimited, report, schema-only",
                other
            ),
        }
    }
}

/// Which worker a configuration is validated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Dump,
    Import,
    Migrate,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DelimitedOptions {
    pub delimiter: char,
    pub null_marker: String,
    pub header: bool,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            null_marker: String::new(),
            header: true,
        }
    }
}

impl DelimitedOptions {
    pub fn codec(&self) -> Codec {
        Codec::delimited(self.delimiter, self.null_marker.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScriptOptions {
    pub terminator: String,
    pub rows_per_statement: usize,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            terminator: String::from(";"),
            rows_per_statement: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportLayout {
    #[default]
    FixedWidth,
    Flowed,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReportOptions {
    pub layout: ReportLayout,
    pub page_rows: usize,
    pub max_column_width: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            layout: ReportLayout::FixedWidth,
            page_rows: 50,
            max_column_width: 40,
        }
    }
}

fn default_batch_size() -> usize {
    1000
}

/// Fully resolved options for one dump, import or migration
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub source: TableSource,
    /// Destination table for imports and migrations; defaults to the source name
    #[serde(default)]
    pub target_table: Option<String>,
    #[serde(default)]
    pub format: DataFormat,
    /// Output file for dumps, input file for imports
    #[serde(default)]
    pub location: Option<PathBuf>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub delimited: DelimitedOptions,
    #[serde(default)]
    pub script: ScriptOptions,
    #[serde(default)]
    pub report: ReportOptions,
    #[serde(default)]
    pub encoding: TextEncoding,
    #[serde(default)]
    pub line_ending: LineEnding,
    #[serde(default)]
    pub include_schema: bool,
    #[serde(default)]
    pub create_target: bool,
    #[serde(default)]
    pub parse_mode: ParseMode,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    #[serde(default)]
    pub constraints: TableConstraints,
    #[serde(default)]
    pub columns: Option<Vec<ColumnDescriptor>>,
    #[serde(default)]
    pub type_mapping: TypeMapping,
}

impl JobConfig {
    fn with_source(source: TableSource, format: DataFormat) -> Self {
        Self {
            source,
            target_table: None,
            format,
            location: None,
            batch_size: default_batch_size(),
            delimited: DelimitedOptions::default(),
            script: ScriptOptions::default(),
            report: ReportOptions::default(),
            encoding: TextEncoding::default(),
            line_ending: LineEnding::default(),
            include_schema: false,
            create_target: false,
            parse_mode: ParseMode::default(),
            error_policy: ErrorPolicy::default(),
            constraints: TableConstraints::default(),
            columns: None,
            type_mapping: TypeMapping::default(),
        }
    }

    pub fn for_table(table: impl Into<String>, format: DataFormat) -> Self {
        Self::with_source(TableSource::table(table), format)
    }

    pub fn for_query(name: impl Into<String>, sql: impl Into<String>, format: DataFormat) -> Self {
        Self::with_source(TableSource::query(name, sql), format)
    }

    /// Destination table name for imports and migrations
    pub fn target_table(&self) -> &str {
        self.target_table
            .as_deref()
            .unwrap_or_else(|| self.source.name())
    }

    /// Check the configuration for the given job kind
    ///
    /// Every failure is an `INVALID_CONFIG` error; nothing has been opened yet.
    pub fn validate(&self, kind: JobKind) -> Result<()> {
        self.check(kind)
            .map_err(|reason| anyhow::Error::new(TransferError::InvalidConfig(reason)))
    }

    fn check(&self, kind: JobKind) -> std::result::Result<(), String> {
        match &self.source {
            TableSource::Table { schema, table } => {
                validate_identifier(table).map_err(|e| format!("table name: {}", e))?;
                if let Some(schema) = schema {
                    validate_identifier(schema).map_err(|e| format!("schema name: {}", e))?;
                }
            }
            TableSource::Query { name, query } => {
                validate_identifier(name).map_err(|e| format!("query name: {}", e))?;
                if query.trim().is_empty() {
                    return Err(format!("query '{}' has no SQL text", name));
                }
            }
        }
        if kind != JobKind::Dump {
            validate_identifier(self.target_table())
                .map_err(|e| format!("target table: {}", e))?;
        }

        if self.batch_size == 0 {
            return Err("batch size must be at least 1".into());
        }

        match kind {
            JobKind::Dump if self.location.is_none() => {
                return Err("a dump needs an output location".into());
            }
            JobKind::Import if self.location.is_none() => {
                return Err("an import needs an input location".into());
            }
            JobKind::Import if !self.format.is_importable() => {
                return Err(format!("{} output cannot be imported", self.format));
            }
            _ => {}
        }

        if kind != JobKind::Migrate {
            self.check_format_options()?;
        }

        if let Some(columns) = &self.columns {
            if columns.is_empty() {
                return Err("explicit column list is empty".into());
            }
            let mut seen = HashSet::new();
            for column in columns {
                validate_identifier(&column.name).map_err(|e| format!("column name: {}", e))?;
                if !seen.insert(column.name.as_str()) {
                    return Err(format!("column '{}' is listed twice", column.name));
                }
            }
        }

        Ok(())
    }

    fn check_format_options(&self) -> std::result::Result<(), String> {
        match self.format {
            DataFormat::Delimited => {
                let delimiter = self.delimited.delimiter;
                if delimiter == QUOTE || delimiter == '\n' || delimiter == '\r' {
                    return Err(format!("delimiter {:?} is reserved", delimiter));
                }
                if delimiter.is_ascii_alphanumeric() || matches!(delimiter, '+' | '/' | '=') {
                    return Err(format!(
                        "delimiter {:?} collides with base64 binary data",
                        delimiter
                    ));
                }
                let marker = &self.delimited.null_marker;
                if marker
                    .chars()
                    .any(|c| c == delimiter || c == QUOTE || c == '\n' || c == '\r')
                {
                    return Err(format!(
                        "null marker {:?} contains the delimiter, a quote or a line break",
                        marker
                    ));
                }
            }
            DataFormat::Script => {
                let terminator = &self.script.terminator;
                if terminator.trim().is_empty() {
                    return Err("statement terminator cannot be empty".into());
                }
                if terminator.contains(['\'', '"']) || terminator.contains("--") {
                    return Err(format!(
                        "statement terminator {:?} contains quotes or a comment marker",
                        terminator
                    ));
                }
                if self.script.rows_per_statement == 0 {
                    return Err("rows per statement must be at least 1".into());
                }
            }
            DataFormat::Report => {
                if self.report.page_rows == 0 {
                    return Err("report page size must be at least 1".into());
                }
                if self.report.max_column_width < 4 {
                    return Err("report column width must be at least 4".into());
                }
            }
            DataFormat::SchemaOnly => {}
        }
        Ok(())
    }
}

/// Load a job configuration from a TOML file
pub fn load_job_config(path: &Path) -> Result<JobConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file at {}", path.display()))?;
    let config: JobConfig = toml::from_str(&raw)
        .map_err(|e| anyhow::Error::new(TransferError::InvalidConfig(e.to_string())))
        .with_context(|| format!("Failed to parse TOML job file at {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};
    use crate::model::ColumnType;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn dump_config() -> JobConfig {
        let mut config = JobConfig::for_table("users", DataFormat::Delimited);
        config.location = Some(PathBuf::from("/tmp/users.csv"));
        config
    }

    #[test]
    fn parse_sample_job_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        let contents = r#"
            format = "script"
            location = "users.sql"
            batch_size = 250
            include_schema = true
            parse_mode = "permissive"
            error_policy = "continue_on_error"
            encoding = "latin-1"
            line_ending = "crlf"

            [source]
            schema = "app"
            table = "users"

            [script]
            rows_per_statement = 10

            [constraints]
            primary_key = ["id"]

            [[columns]]
            name = "id"
            type = "integer"
            nullable = false

            [[columns]]
            name = "name"
            type = "text"
            size = 40
        "#;
        write!(tmp, "{}", contents).unwrap();

        let config = load_job_config(tmp.path()).unwrap();
        assert_eq!(config.format, DataFormat::Script);
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.script.rows_per_statement, 10);
        assert_eq!(config.script.terminator, ";");
        assert_eq!(config.parse_mode, ParseMode::Permissive);
        assert_eq!(config.error_policy, ErrorPolicy::ContinueOnError);
        assert_eq!(config.encoding, TextEncoding::Latin1);
        assert_eq!(config.line_ending, LineEnding::Crlf);
        assert_eq!(config.target_table(), "users");
        assert_eq!(config.constraints.primary_key, vec!["id".to_string()]);

        let columns = config.columns.as_ref().unwrap();
        assert_eq!(columns[0].column_type, ColumnType::Integer);
        assert!(!columns[0].nullable);
        assert_eq!(columns[1].size, Some(40));
        assert!(config.validate(JobKind::Dump).is_ok());
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = JobConfig::for_table("t", DataFormat::Delimited);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.delimited.delimiter, ',');
        assert_eq!(config.delimited.null_marker, "");
        assert!(config.delimited.header);
        assert_eq!(config.report.page_rows, 50);
        assert_eq!(config.parse_mode, ParseMode::Strict);
        assert_eq!(config.error_policy, ErrorPolicy::AbortOnFirstError);
    }

    #[test]
    fn malformed_job_file_is_invalid_config() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "format = \"xml\"\n[source]\ntable = \"t\"\n").unwrap();
        let err = load_job_config(tmp.path()).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::InvalidConfig);
    }

    #[test]
    fn validate_rejects_bad_options() {
        let mut cases: Vec<(&str, JobConfig, JobKind)> = Vec::new();

        let mut c = dump_config();
        c.batch_size = 0;
        cases.push(("zero batch", c, JobKind::Dump));

        let mut c = dump_config();
        c.delimited.delimiter = '"';
        cases.push(("quote delimiter", c, JobKind::Dump));

        let mut c = dump_config();
        c.delimited.delimiter = 'A';
        cases.push(("base64 delimiter", c, JobKind::Dump));

        let mut c = dump_config();
        c.delimited.null_marker = "a,b".into();
        cases.push(("marker with delimiter", c, JobKind::Dump));

        let mut c = dump_config();
        c.location = None;
        cases.push(("no location", c, JobKind::Dump));

        let mut c = dump_config();
        c.format = DataFormat::Report;
        cases.push(("report import", c, JobKind::Import));

        let mut c = dump_config();
        c.format = DataFormat::Script;
        c.script.terminator = String::new();
        cases.push(("empty terminator", c, JobKind::Dump));

        let mut c = dump_config();
        c.format = DataFormat::Report;
        c.report.page_rows = 0;
        cases.push(("zero page", c, JobKind::Dump));

        let mut c = dump_config();
        c.source = TableSource::table("");
        cases.push(("empty table", c, JobKind::Dump));

        let mut c = dump_config();
        c.columns = Some(vec![
            ColumnDescriptor::new("a", 0, ColumnType::Text),
            ColumnDescriptor::new("a", 1, ColumnType::Text),
        ]);
        cases.push(("duplicate column", c, JobKind::Import));

        for (label, config, kind) in cases {
            let err = config.validate(kind).unwrap_err();
            assert_eq!(error_kind(&err), ErrorKind::InvalidConfig, "{}", label);
        }
    }

    #[test]
    fn migration_needs_no_location() {
        let config = JobConfig::for_table("users", DataFormat::Delimited);
        assert!(config.validate(JobKind::Migrate).is_ok());
        assert!(config.validate(JobKind::Import).is_err());
    }

    #[test]
    fn format_names_parse() {
        assert_eq!("csv".parse::<DataFormat>().unwrap(), DataFormat::Delimited);
        assert_eq!(
            "schema-only".parse::<DataFormat>().unwrap(),
            DataFormat::SchemaOnly
        );
        assert!("xml".parse::<DataFormat>().is_err());
    }
}
