//! Formulator table ingestion
//!
//! Turns table files into [`DictTable`]s:
//!
//! - `.json`: an array of row objects or a `{ id, names, rows }` record,
//! - `.csv` / `.tsv` / `.txt`: delimited text with a header row.
//!
//! [`ingest_paths`] accepts files and directories (walked recursively) and
//! reports failures per file; one bad file never stops the others.

pub mod delimited;
pub mod json;

pub use delimited::{coerce_cell, parse_delimited, sniff_delimiter};
pub use json::parse_json;

use formulator_store::DictTable;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("table {table}: invalid JSON: {source}")]
    Json {
        table: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("table {table}: {reason}")]
    Shape { table: String, reason: String },

    #[error("line {line}: {reason}")]
    Delimited { line: usize, reason: String },

    #[error("unsupported file type: {0}")]
    Unsupported(PathBuf),

    #[error("table {0} has no columns")]
    NoColumns(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Table layout, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Json,
    /// Delimiter guessed from the header.
    Delimited,
    Tsv,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "csv" | "txt" => Some(Self::Delimited),
            "tsv" | "tab" => Some(Self::Tsv),
            _ => None,
        }
    }
}

/// Parse `text` as a table named `id`.
pub fn parse_table(id: &str, text: &str, format: TableFormat) -> Result<DictTable> {
    let table = match format {
        TableFormat::Json => parse_json(id, text)?,
        TableFormat::Delimited => parse_delimited(id, text, sniff_delimiter(text))?,
        TableFormat::Tsv => parse_delimited(id, text, '\t')?,
    };
    if table.names.is_empty() {
        return Err(IngestError::NoColumns(table.id.to_string()));
    }
    Ok(table)
}

/// Read one table file; the table id is the file stem.
pub fn load_table(path: &Path) -> Result<DictTable> {
    let format =
        TableFormat::from_path(path).ok_or_else(|| IngestError::Unsupported(path.to_path_buf()))?;
    let text = std::fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "table".to_string());
    parse_table(&id, &text, format)
}

/// Tables that loaded and files that did not.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub tables: Vec<DictTable>,
    pub failures: Vec<(PathBuf, IngestError)>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Load every table file named by `paths`, walking directories.
///
/// Files inside directories are visited in sorted order and skipped silently
/// when their extension is not a table format; an explicitly named file with
/// an unknown extension is a failure. Table ids are made unique by suffixing
/// `-2`, `-3`, ...
pub fn ingest_paths<P: AsRef<Path>>(paths: &[P]) -> IngestReport {
    let mut report = IngestReport::default();
    let mut ids: HashSet<String> = HashSet::new();

    for path in expand(paths, &mut report) {
        match load_table(&path) {
            Ok(mut table) => {
                let base = table.id.to_string();
                let mut id = base.clone();
                let mut n = 2;
                while !ids.insert(id.clone()) {
                    id = format!("{base}-{n}");
                    n += 1;
                }
                if id != base {
                    warn!(path = %path.display(), table = %id, "table id already used; renamed");
                    table.id = id.as_str().into();
                }
                info!(path = %path.display(), table = %table.id, rows = table.len(), "table ingested");
                report.tables.push(table);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ingestion failed");
                report.failures.push((path, e));
            }
        }
    }
    report
}

fn expand<P: AsRef<Path>>(paths: &[P], report: &mut IngestReport) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if !path.is_dir() {
            files.push(path.to_path_buf());
            continue;
        }
        let mut found = Vec::new();
        for entry in WalkDir::new(path).follow_links(false) {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    if TableFormat::from_path(entry.path()).is_some() {
                        found.push(entry.into_path());
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let at = e.path().unwrap_or(path).to_path_buf();
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                    report.failures.push((at.clone(), IngestError::Io { path: at, source }));
                }
            }
        }
        found.sort();
        files.extend(found);
    }
    files
}
