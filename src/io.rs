// ABOUTME: Scoped file sinks and sources plus text encoding conventions
// ABOUTME: Files open at job start and close on drop along every exit path

use crate::error::TransferError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Character encoding of persisted text artifacts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum TextEncoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "latin-1", alias = "latin1", alias = "iso-8859-1")]
    Latin1,
}

impl TextEncoding {
    /// Encode text for the sink
    ///
    /// Latin-1 cannot represent characters above U+00FF; those are a
    /// malformed value rather than a silent substitution.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        match self {
            TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        anyhow::Error::new(TransferError::MalformedValue(format!(
                            "character U+{:04X} cannot be written as latin-1",
                            u32::from(c)
                        )))
                    })
                })
                .collect(),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            TextEncoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| {
                anyhow::Error::new(TransferError::MalformedValue(format!(
                    "input is not valid utf-8: {}",
                    e.utf8_error()
                )))
            }),
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    #[default]
    Lf,
    Crlf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::Crlf => "\r\n",
        }
    }
}

/// Create (or truncate) an output file
pub fn open_sink(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .map_err(|e| {
            anyhow::Error::new(TransferError::SinkUnavailable(format!(
                "cannot create {}: {}",
                path.display(),
                e
            )))
        })
        .with_context(|| format!("Failed to open output file {}", path.display()))?;
    Ok(BufWriter::new(file))
}

pub fn open_source(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path)
        .map_err(|e| {
            anyhow::Error::new(TransferError::SourceUnavailable(format!(
                "cannot open {}: {}",
                path.display(),
                e
            )))
        })
        .with_context(|| format!("Failed to open input file {}", path.display()))?;
    Ok(BufReader::new(file))
}
