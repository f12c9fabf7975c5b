// ABOUTME: Delimited-text import parser reconstituting rows from quoted, delimited records
// ABOUTME: Quoted fields may span delimiters and line breaks; bad quoting stays row-scoped

use super::{decode_fields, map_names, LineReader, ParsedRow};
use crate::codec::delimited::QUOTE;
use crate::codec::Codec;
use crate::config::DelimitedOptions;
use crate::error::{ErrorKind, RowDiagnostic, TransferError};
use crate::io::TextEncoding;
use crate::model::{ColumnDescriptor, ColumnType, Value};
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::io::BufRead;

/// Longest run of lines a quoted field may span before it is treated as unterminated
const MAX_QUOTED_LINES: usize = 10_000;
/// Longest quoted field, in bytes, before it is treated as unterminated
const MAX_QUOTED_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FieldStart,
    Unquoted,
    Quoted,
    /// Just saw a quote inside a quoted field: either an escape or the closing quote
    QuoteInQuoted,
}

/// Raw fields of one record, quotes still in place
#[derive(Debug)]
struct RawRecord {
    fields: Vec<String>,
    /// A quoted field never closed before end of input or the span limit
    unterminated: bool,
}

impl RawRecord {
    fn is_blank(&self) -> bool {
        self.fields.len() == 1 && self.fields[0].is_empty()
    }
}

pub struct DelimitedParser<R> {
    lines: LineReader<R>,
    /// Lines taken by an unclosable quoted field, read again as records
    replay: VecDeque<String>,
    codec: Codec,
    columns: Vec<ColumnDescriptor>,
    field_map: Vec<usize>,
    rows: u64,
}

impl<R: BufRead> DelimitedParser<R> {
    /// Start parsing, matching the header line (if any) against `columns`
    ///
    /// Without a header, fields map positionally onto every target column.
    pub fn open(
        input: R,
        encoding: TextEncoding,
        options: &DelimitedOptions,
        columns: Vec<ColumnDescriptor>,
    ) -> Result<Self> {
        let mut parser = Self {
            lines: LineReader::new(input, encoding),
            replay: VecDeque::new(),
            codec: options.codec(),
            field_map: (0..columns.len()).collect(),
            columns,
            rows: 0,
        };
        if options.header {
            parser.read_header()?;
        }
        Ok(parser)
    }

    fn read_header(&mut self) -> Result<()> {
        let Some(record) = self.read_record()? else {
            return Ok(());
        };
        if record.unterminated {
            return Err(anyhow::Error::new(TransferError::MalformedValue(
                "header line has an unterminated quoted field".into(),
            )));
        }
        let names = record
            .fields
            .iter()
            .map(|raw| match self.codec.decode(raw, ColumnType::Text) {
                Ok(Value::Text(name)) => Ok(name),
                Ok(_) => Ok(String::new()),
                Err(e) => Err(anyhow::Error::new(TransferError::MalformedValue(e.to_string()))),
            })
            .collect::<Result<Vec<_>>>()
            .context("Failed to read header line")?;
        self.field_map = map_names(&names, &self.columns).context("Header line")?;
        Ok(())
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        match self.replay.pop_front() {
            Some(line) => Ok(Some(line)),
            None => self.lines.next_line(),
        }
    }

    /// Read one logical record, joining lines while inside quotes
    ///
    /// A quote that cannot close (end of input or the span limit) makes only
    /// the opening record unterminated; the lines it swallowed are re-read.
    fn read_record(&mut self) -> Result<Option<RawRecord>> {
        let Some(mut line) = self.next_line()? else {
            return Ok(None);
        };
        let delimiter = self.codec.delimiter();
        let mut fields = Vec::new();
        let mut field = String::new();
        let mut state = State::FieldStart;
        let mut spanned: Vec<String> = Vec::new();
        let mut spanned_bytes = 0;

        loop {
            let mut ended = false;
            for c in line.chars() {
                match state {
                    State::Quoted => {
                        field.push(c);
                        if c == QUOTE {
                            state = State::QuoteInQuoted;
                        }
                    }
                    _ if c == '\n' => {
                        ended = true;
                        break;
                    }
                    State::QuoteInQuoted if c == QUOTE => {
                        field.push(c);
                        state = State::Quoted;
                    }
                    _ if c == delimiter => {
                        fields.push(std::mem::take(&mut field));
                        state = State::FieldStart;
                    }
                    State::FieldStart if c == QUOTE => {
                        field.push(c);
                        state = State::Quoted;
                    }
                    _ => {
                        field.push(c);
                        state = State::Unquoted;
                    }
                }
            }

            if state != State::Quoted {
                if ended && field.ends_with('\r') {
                    field.pop();
                }
                fields.push(field);
                return Ok(Some(RawRecord {
                    fields,
                    unterminated: false,
                }));
            }

            let next = if spanned.len() < MAX_QUOTED_LINES && spanned_bytes < MAX_QUOTED_BYTES {
                self.next_line()?
            } else {
                None
            };
            match next {
                Some(next) => {
                    spanned_bytes += next.len();
                    spanned.push(next.clone());
                    line = next;
                }
                None => {
                    for swallowed in spanned.into_iter().rev() {
                        self.replay.push_front(swallowed);
                    }
                    fields.push(field);
                    return Ok(Some(RawRecord {
                        fields,
                        unterminated: true,
                    }));
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for DelimitedParser<R> {
    type Item = Result<ParsedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.read_record() {
                Ok(Some(record)) => record,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            if record.is_blank() && self.columns.len() > 1 {
                continue;
            }

            self.rows += 1;
            let outcome = if record.unterminated {
                Err(RowDiagnostic::new(
                    self.rows,
                    ErrorKind::MalformedValue,
                    "quoted field is never closed",
                ))
            } else {
                decode_fields(&self.codec, &self.columns, &self.field_map, &record.fields)
                    .map_err(|e| RowDiagnostic::from_error(self.rows, &e))
            };
            return Some(Ok(ParsedRow {
                row_number: self.rows,
                outcome,
            }));
        }
    }
}
