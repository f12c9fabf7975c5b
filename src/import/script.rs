// ABOUTME: Script import parser reading CREATE TABLE and INSERT statements
// ABOUTME: Statements split on the terminator outside literals and comments, not on line breaks

use super::{decode_fields, map_names, LineReader, ParsedRow};
use crate::codec::Codec;
use crate::error::{ErrorKind, RowDiagnostic, TransferError};
use crate::io::TextEncoding;
use crate::model::{renumber, ColumnDescriptor, TableConstraints, TableSchema};
use crate::schema::column_type_from_declared;
use anyhow::Result;
use std::collections::VecDeque;
use std::io::BufRead;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
}

#[derive(Debug, Clone)]
struct Statement {
    text: String,
    /// False when input ended inside a string literal or quoted identifier
    complete: bool,
}

pub struct ScriptParser<R> {
    lines: LineReader<R>,
    terminator: String,
    codec: Codec,
    state: LexState,
    current: String,
    /// Byte offset in `current` where the latest unquoted run begins
    unquoted_from: usize,
    statements: VecDeque<Statement>,
    eof: bool,
    columns: Vec<ColumnDescriptor>,
    rows: VecDeque<ParsedRow>,
    row_count: u64,
}

impl<R: BufRead> ScriptParser<R> {
    pub fn new(input: R, encoding: TextEncoding, terminator: &str) -> Self {
        Self {
            lines: LineReader::new(input, encoding),
            terminator: terminator.to_string(),
            codec: Codec::script(),
            state: LexState::Normal,
            current: String::new(),
            unquoted_from: 0,
            statements: VecDeque::new(),
            eof: false,
            columns: Vec::new(),
            rows: VecDeque::new(),
            row_count: 0,
        }
    }

    /// Set the target columns rows are decoded into
    pub fn bind(&mut self, columns: Vec<ColumnDescriptor>) {
        self.columns = columns;
    }

    /// Read the embedded table definition, if the script starts with one
    ///
    /// Stops at the first `CREATE TABLE` or `INSERT`; an `INSERT` seen first is
    /// kept for row parsing.
    pub fn read_schema(&mut self) -> Result<Option<TableSchema>> {
        while let Some(statement) = self.next_statement()? {
            match classify(&statement.text) {
                Kind::CreateTable => {
                    if !statement.complete {
                        return Err(anyhow::Error::new(TransferError::MalformedValue(
                            "table definition ends inside a quoted literal".into(),
                        )));
                    }
                    return parse_create_table(&statement.text)
                        .map(Some)
                        .map_err(|reason| {
                            anyhow::Error::new(TransferError::SchemaMismatch(format!(
                                "cannot read table definition: {}",
                                reason
                            )))
                        });
                }
                Kind::Insert => {
                    self.statements.push_front(statement);
                    return Ok(None);
                }
                Kind::Other => continue,
            }
        }
        Ok(None)
    }

    fn next_statement(&mut self) -> Result<Option<Statement>> {
        while self.statements.is_empty() && !self.eof {
            match self.lines.next_line()? {
                Some(line) => self.lex(&line),
                None => {
                    self.eof = true;
                    let text = self.current.trim().to_string();
                    if !text.is_empty() {
                        self.statements.push_back(Statement {
                            text,
                            complete: matches!(
                                self.state,
                                LexState::Normal | LexState::LineComment
                            ),
                        });
                    }
                    self.current.clear();
                    self.unquoted_from = 0;
                }
            }
        }
        Ok(self.statements.pop_front())
    }

    fn lex(&mut self, line: &str) {
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match self.state {
                LexState::LineComment => {
                    if c == '\n' {
                        self.unquoted_from = self.current.len();
                        self.current.push(c);
                        self.state = LexState::Normal;
                    }
                }
                LexState::SingleQuoted => {
                    self.current.push(c);
                    if c == '\'' {
                        self.state = LexState::Normal;
                        self.unquoted_from = self.current.len();
                    }
                }
                LexState::DoubleQuoted => {
                    self.current.push(c);
                    if c == '"' {
                        self.state = LexState::Normal;
                        self.unquoted_from = self.current.len();
                    }
                }
                LexState::Normal => {
                    if c == '-' && chars.peek() == Some(&'-') {
                        chars.next();
                        self.state = LexState::LineComment;
                        continue;
                    }
                    self.current.push(c);
                    match c {
                        '\'' => self.state = LexState::SingleQuoted,
                        '"' => self.state = LexState::DoubleQuoted,
                        // the whole terminator must sit outside quotes
                        _ if self.current.len() - self.unquoted_from >= self.terminator.len()
                            && self.current.ends_with(&self.terminator) =>
                        {
                            let len = self.current.len() - self.terminator.len();
                            let text = self.current[..len].trim().to_string();
                            if !text.is_empty() {
                                self.statements.push_back(Statement {
                                    text,
                                    complete: true,
                                });
                            }
                            self.current.clear();
                            self.unquoted_from = 0;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn next_row_number(&mut self) -> u64 {
        self.row_count += 1;
        self.row_count
    }

    /// Queue the rows of one INSERT statement
    fn queue_insert(&mut self, statement: &Statement) -> Result<()> {
        let parsed = if statement.complete {
            parse_insert(&statement.text)
        } else {
            Err("statement ends inside a quoted literal".to_string())
        };
        let insert = match parsed {
            Ok(insert) => insert,
            Err(reason) => {
                let row = self.next_row_number();
                self.rows.push_back(ParsedRow {
                    row_number: row,
                    outcome: Err(RowDiagnostic::new(
                        row,
                        ErrorKind::MalformedValue,
                        format!("malformed INSERT statement: {}", reason),
                    )),
                });
                return Ok(());
            }
        };

        let field_map = match &insert.columns {
            Some(names) => map_names(names, &self.columns)?,
            None => (0..self.columns.len()).collect(),
        };

        for tuple in insert.tuples {
            let row = self.next_row_number();
            let outcome = decode_fields(&self.codec, &self.columns, &field_map, &tuple)
                .map_err(|e| RowDiagnostic::from_error(row, &e));
            self.rows.push_back(ParsedRow {
                row_number: row,
                outcome,
            });
        }
        Ok(())
    }
}

impl<R: BufRead> Iterator for ScriptParser<R> {
    type Item = Result<ParsedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.rows.pop_front() {
                return Some(Ok(row));
            }
            let statement = match self.next_statement() {
                Ok(Some(statement)) => statement,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            match classify(&statement.text) {
                Kind::Insert => {
                    if let Err(e) = self.queue_insert(&statement) {
                        return Some(Err(e));
                    }
                }
                Kind::CreateTable | Kind::Other => {
                    tracing::debug!("Skipping non-INSERT statement during import");
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Kind {
    CreateTable,
    Insert,
    Other,
}

fn classify(text: &str) -> Kind {
    let mut scanner = Scanner::new(text);
    if scanner.keyword("INSERT") {
        Kind::Insert
    } else if scanner.keyword("CREATE") && scanner.keyword("TABLE") {
        Kind::CreateTable
    } else {
        Kind::Other
    }
}

/// Cursor over statement text for the handful of shapes the parser accepts
struct Scanner {
    chars: Vec<char>,
    pos: usize,
}

impl Scanner {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.chars.get(self.pos).is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.chars.len()
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.chars.get(self.pos) == Some(&expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume a case-insensitive keyword that is not the prefix of a longer word
    fn keyword(&mut self, word: &str) -> bool {
        self.skip_ws();
        let end = self.pos + word.chars().count();
        if end > self.chars.len() {
            return false;
        }
        let candidate: String = self.chars[self.pos..end].iter().collect();
        let boundary = self
            .chars
            .get(end)
            .map_or(true, |c| !(c.is_alphanumeric() || *c == '_'));
        if candidate.eq_ignore_ascii_case(word) && boundary {
            self.pos = end;
            true
        } else {
            false
        }
    }

    fn identifier(&mut self) -> Option<String> {
        self.skip_ws();
        match self.chars.get(self.pos) {
            Some('"') => {
                let mut name = String::new();
                self.pos += 1;
                loop {
                    match self.chars.get(self.pos) {
                        Some('"') if self.chars.get(self.pos + 1) == Some(&'"') => {
                            name.push('"');
                            self.pos += 2;
                        }
                        Some('"') => {
                            self.pos += 1;
                            return Some(name);
                        }
                        Some(c) => {
                            name.push(*c);
                            self.pos += 1;
                        }
                        None => return None,
                    }
                }
            }
            Some(c) if c.is_alphanumeric() || *c == '_' => {
                let start = self.pos;
                while self
                    .chars
                    .get(self.pos)
                    .is_some_and(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
                {
                    self.pos += 1;
                }
                Some(self.chars[start..self.pos].iter().collect())
            }
            _ => None,
        }
    }

    /// `name` or `schema.name`; only the last part is kept
    fn qualified_name(&mut self) -> Option<String> {
        let mut name = self.identifier()?;
        while self.chars.get(self.pos) == Some(&'.') {
            self.pos += 1;
            name = self.identifier()?;
        }
        Some(name)
    }

    fn identifier_list(&mut self) -> Result<Vec<String>, String> {
        if !self.eat('(') {
            return Err("expected '('".into());
        }
        let mut names = Vec::new();
        loop {
            names.push(self.identifier().ok_or("expected a column name")?);
            if self.eat(',') {
                continue;
            }
            if self.eat(')') {
                return Ok(names);
            }
            return Err("expected ',' or ')' in column list".into());
        }
    }

    /// Raw text up to the next top-level ',' or ')', outside quotes and nested parens
    fn raw_item(&mut self) -> Result<String, String> {
        self.skip_ws();
        let start = self.pos;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        while let Some(&c) = self.chars.get(self.pos) {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '\'') | (None, '"') => quote = Some(c),
                (None, '(') => depth += 1,
                (None, ')') if depth > 0 => depth -= 1,
                (None, ',') | (None, ')') if depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        if quote.is_some() {
            return Err("unterminated quoted literal".into());
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        let raw = raw.trim().to_string();
        if raw.is_empty() {
            return Err("empty value".into());
        }
        Ok(raw)
    }
}

#[derive(Debug, PartialEq)]
struct Insert {
    columns: Option<Vec<String>>,
    tuples: Vec<Vec<String>>,
}

fn parse_insert(text: &str) -> Result<Insert, String> {
    let mut s = Scanner::new(text);
    if !(s.keyword("INSERT") && s.keyword("INTO")) {
        return Err("expected INSERT INTO".into());
    }
    s.qualified_name().ok_or("expected a table name")?;

    s.skip_ws();
    let columns = if s.chars.get(s.pos) == Some(&'(') {
        Some(s.identifier_list()?)
    } else {
        None
    };

    if !s.keyword("VALUES") {
        return Err("expected VALUES".into());
    }

    let mut tuples = Vec::new();
    loop {
        if !s.eat('(') {
            return Err("expected '(' before a value list".into());
        }
        let mut values = Vec::new();
        loop {
            values.push(s.raw_item()?);
            if s.eat(',') {
                continue;
            }
            if s.eat(')') {
                break;
            }
            return Err("expected ',' or ')' in value list".into());
        }
        tuples.push(values);
        if !s.eat(',') {
            break;
        }
    }

    if !s.at_end() {
        return Err("unexpected text after the value list".into());
    }
    Ok(Insert { columns, tuples })
}

/// Words that end a column's declared type
const COLUMN_CONSTRAINTS: &[&str] = &[
    "NOT",
    "NULL",
    "PRIMARY",
    "UNIQUE",
    "DEFAULT",
    "REFERENCES",
    "CHECK",
    "COLLATE",
    "CONSTRAINT",
    "GENERATED",
    "AUTOINCREMENT",
];

fn parse_create_table(text: &str) -> Result<TableSchema, String> {
    let mut s = Scanner::new(text);
    if !(s.keyword("CREATE") && s.keyword("TABLE")) {
        return Err("expected CREATE TABLE".into());
    }
    if s.keyword("IF") && !(s.keyword("NOT") && s.keyword("EXISTS")) {
        return Err("expected IF NOT EXISTS".into());
    }
    let name = s.qualified_name().ok_or("expected a table name")?;
    if !s.eat('(') {
        return Err("expected '(' after the table name".into());
    }

    let mut elements = Vec::new();
    loop {
        elements.push(s.raw_item()?);
        if s.eat(',') {
            continue;
        }
        if s.eat(')') {
            break;
        }
        return Err("expected ',' or ')' in table definition".into());
    }

    let mut columns = Vec::new();
    let mut constraints = TableConstraints::default();
    for element in elements {
        let mut e = Scanner::new(&element);
        if e.keyword("CONSTRAINT") {
            e.identifier();
        }
        if e.keyword("PRIMARY") {
            if !e.keyword("KEY") {
                return Err("expected PRIMARY KEY".into());
            }
            constraints.primary_key = e.identifier_list()?;
        } else if e.keyword("UNIQUE") {
            constraints.unique.push(e.identifier_list()?);
        } else if e.keyword("CHECK") || e.keyword("FOREIGN") {
            continue;
        } else {
            let column_name = e.identifier().ok_or("expected a column name")?;
            let rest: String = e.chars[e.pos..].iter().collect();
            let (declared, constraint_text) = split_declared_type(&rest);
            let upper = constraint_text.to_ascii_uppercase();
            let declared = column_type_from_declared(declared);

            let mut column = ColumnDescriptor::new(column_name.clone(), 0, declared.column_type);
            column.size = declared.size;
            column.scale = declared.scale;
            column.nullable = !upper.contains("NOT NULL");
            if upper.contains("PRIMARY KEY") {
                constraints.primary_key = vec![column_name];
            }
            columns.push(column);
        }
    }

    if columns.is_empty() {
        return Err("table has no columns".into());
    }
    renumber(&mut columns);
    Ok(TableSchema::new(name, columns).with_constraints(constraints))
}

/// Split `NUMERIC(10, 2) NOT NULL` into the declared type and the constraint text
fn split_declared_type(rest: &str) -> (&str, &str) {
    let mut depth = 0usize;
    let mut word_start = None;
    for (idx, c) in rest.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
        let is_word = c.is_alphanumeric() || c == '_';
        match (is_word, word_start) {
            (true, None) => word_start = Some(idx),
            (false, Some(start)) => {
                if depth == 0 && is_constraint(&rest[start..idx]) {
                    return (rest[..start].trim(), &rest[start..]);
                }
                word_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = word_start {
        if depth == 0 && is_constraint(&rest[start..]) {
            return (rest[..start].trim(), &rest[start..]);
        }
    }
    (rest.trim(), "")
}

fn is_constraint(word: &str) -> bool {
    COLUMN_CONSTRAINTS
        .iter()
        .any(|k| k.eq_ignore_ascii_case(word))
}
