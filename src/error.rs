// ABOUTME: Error taxonomy for dump, import and migration jobs
// ABOUTME: Classifies anyhow error chains into fatal and row-scoped error kinds

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Classification of a failure, reported on diagnostics and failed job results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    SourceUnavailable,
    SinkUnavailable,
    MalformedValue,
    SchemaMismatch,
    RowRejected,
    InvalidConfig,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SourceUnavailable => "SOURCE_UNAVAILABLE",
            ErrorKind::SinkUnavailable => "SINK_UNAVAILABLE",
            ErrorKind::MalformedValue => "MALFORMED_VALUE",
            ErrorKind::SchemaMismatch => "SCHEMA_MISMATCH",
            ErrorKind::RowRejected => "ROW_REJECTED",
            ErrorKind::InvalidConfig => "INVALID_CONFIG",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Internal => "INTERNAL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("malformed value: {0}")]
    MalformedValue(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("row rejected by destination: {0}")]
    RowRejected(String),

    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),

    #[error("job cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            TransferError::SinkUnavailable(_) => ErrorKind::SinkUnavailable,
            TransferError::MalformedValue(_) => ErrorKind::MalformedValue,
            TransferError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            TransferError::RowRejected(_) => ErrorKind::RowRejected,
            TransferError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            TransferError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Find the first classified error in the chain
///
/// Errors created outside the taxonomy (plain `anyhow!` or library errors
/// without a `TransferError` wrapper) classify as `Internal`.
pub fn error_kind(err: &anyhow::Error) -> ErrorKind {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<TransferError>())
        .map(TransferError::kind)
        .unwrap_or(ErrorKind::Internal)
}

/// Tag an unclassified error with a fallback kind, leaving classified ones alone
pub fn classify_or(
    err: anyhow::Error,
    fallback: impl FnOnce(String) -> TransferError,
) -> anyhow::Error {
    if error_kind(&err) == ErrorKind::Internal {
        let message = format!("{:#}", err);
        anyhow::Error::new(fallback(message))
    } else {
        err
    }
}

/// Row-scoped problem recorded instead of failing the job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowDiagnostic {
    /// One-based data row number within the job's input
    pub row: u64,
    pub kind: ErrorKind,
    pub message: String,
}

impl RowDiagnostic {
    pub fn new(row: u64, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            row,
            kind,
            message: message.into(),
        }
    }

    pub fn from_error(row: u64, err: &TransferError) -> Self {
        Self::new(row, err.kind(), err.to_string())
    }

    /// Promote to a fatal job error (strict / abort-on-first-error)
    pub fn into_error(self) -> anyhow::Error {
        let row = self.row;
        let err = match self.kind {
            ErrorKind::MalformedValue => TransferError::MalformedValue(self.message),
            ErrorKind::RowRejected => TransferError::RowRejected(self.message),
            _ => TransferError::SchemaMismatch(self.message),
        };
        anyhow::Error::new(err).context(format!("row {}", row))
    }
}

impl fmt::Display for RowDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {} ({})", self.row, self.message, self.kind)
    }
}
