//! Persistence layer.
//!
//! Append-only CSV audit trail: one file per record variant (attempts,
//! near-misses, bets). The header row is written on the first append to a
//! missing or empty file. Rows are never rewritten or deduplicated, and each
//! variant is written independently of the others.

pub mod records;

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::PathsConfig;
pub use records::{
    AttemptOutcome, AttemptRecord, AuditRecord, BetRecord, NearMissRecord, RecordKind,
    SCHEMA_VERSION,
};

/// Failure to persist or read back an audit record. Never fatal to the
/// decision loop.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Audit I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed audit row {line} in {path}: {message}")]
    Malformed {
        path: String,
        line: usize,
        message: String,
    },
}

/// Destination for audit records.
pub trait AuditSink {
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError>;
}

// ---------------------------------------------------------------------------
// CSV sink
// ---------------------------------------------------------------------------

/// CSV files on the local filesystem, one per record kind.
#[derive(Debug)]
pub struct CsvAuditLog {
    attempt_path: PathBuf,
    near_miss_path: PathBuf,
    bet_path: PathBuf,
    /// Kinds whose existing header has been checked this process.
    checked: HashSet<RecordKind>,
}

impl CsvAuditLog {
    pub fn new(
        attempt_path: impl Into<PathBuf>,
        near_miss_path: impl Into<PathBuf>,
        bet_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            attempt_path: attempt_path.into(),
            near_miss_path: near_miss_path.into(),
            bet_path: bet_path.into(),
            checked: HashSet::new(),
        }
    }

    pub fn from_paths(paths: &PathsConfig) -> Self {
        Self::new(&paths.attempt_log, &paths.near_miss_log, &paths.bet_log)
    }

    pub fn path_for(&self, kind: RecordKind) -> &Path {
        match kind {
            RecordKind::Attempt => &self.attempt_path,
            RecordKind::NearMiss => &self.near_miss_path,
            RecordKind::Bet => &self.bet_path,
        }
    }

    /// Confirm every destination can be opened for appending.
    pub fn verify_writable(&self) -> Result<(), AuditError> {
        for kind in RecordKind::ALL {
            let path = self.path_for(kind);
            open_append(path)?;
        }
        Ok(())
    }

    fn warn_on_foreign_header(&mut self, kind: RecordKind, path: &Path) {
        if !self.checked.insert(kind) {
            return;
        }
        let Ok(file) = fs::File::open(path) else {
            return;
        };
        let mut first = String::new();
        if BufReader::new(file).read_line(&mut first).is_ok() && !first.is_empty() {
            let expected = encode_row(kind.columns());
            if first.trim_end_matches(['\r', '\n']) != expected {
                warn!(
                    path = %path.display(),
                    kind = %kind,
                    schema_version = SCHEMA_VERSION,
                    "Audit file header does not match the current schema"
                );
            }
        }
    }
}

impl AuditSink for CsvAuditLog {
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        let kind = record.kind();
        let path = self.path_for(kind).to_path_buf();
        self.warn_on_foreign_header(kind, &path);

        let mut file = open_append(&path)?;
        let is_empty = file.metadata().map_err(|e| io_err(&path, e))?.len() == 0;

        let mut buf = String::new();
        if is_empty {
            buf.push_str(&encode_row(kind.columns()));
            buf.push('\n');
        }
        buf.push_str(&encode_row(&record.to_row()));
        buf.push('\n');

        file.write_all(buf.as_bytes()).map_err(|e| io_err(&path, e))?;
        debug!(path = %path.display(), kind = %kind, "Audit record appended");
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<fs::File, AuditError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))
}

fn io_err(path: &Path, source: std::io::Error) -> AuditError {
    AuditError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Reading back
// ---------------------------------------------------------------------------

/// Load every record of `kind` from `path`. A missing file yields no records.
pub fn read_records(path: &Path, kind: RecordKind) -> Result<Vec<AuditRecord>, AuditError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let display = path.display().to_string();
    let malformed = |line: usize, message: String| AuditError::Malformed {
        path: display.clone(),
        line,
        message,
    };

    let rows = parse_rows(&contents).map_err(|message| malformed(0, message))?;
    let mut rows = rows.into_iter();

    match rows.next() {
        None => return Ok(Vec::new()),
        Some(header) if header.iter().map(String::as_str).eq(kind.columns().iter().copied()) => {}
        Some(header) => {
            return Err(malformed(1, format!("unexpected header {header:?}")));
        }
    }

    rows.enumerate()
        .map(|(i, row)| AuditRecord::from_row(kind, &row).map_err(|m| malformed(i + 2, m)))
        .collect()
}

// ---------------------------------------------------------------------------
// CSV codec
// ---------------------------------------------------------------------------

fn encode_field(value: &str, out: &mut String) {
    if !value.bytes().any(|b| matches!(b, b',' | b'"' | b'\n' | b'\r')) {
        out.push_str(value);
        return;
    }
    out.push('"');
    for ch in value.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
}

/// Join fields into one CSV line (no terminator), quoting where needed.
pub fn encode_row<S: AsRef<str>>(fields: &[S]) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        encode_field(field.as_ref(), &mut out);
    }
    out
}

/// Split CSV text into rows. Quoted fields may contain commas, doubled
/// quotes and line breaks.
pub fn parse_rows(text: &str) -> Result<Vec<Vec<String>>, String> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut row_started = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() => {
                in_quotes = true;
                row_started = true;
            }
            ',' => {
                row.push(std::mem::take(&mut field));
                row_started = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                if row_started || !field.is_empty() {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                }
                row_started = false;
            }
            _ => {
                field.push(ch);
                row_started = true;
            }
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".into());
    }
    if row_started || !field.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
