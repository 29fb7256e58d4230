//! Spreadsheet normalizer
//!
//! Turns downloaded bytes into [`SheetContent`]: sheet name mapped to the
//! ordered rows of that sheet, each row keyed by the header row.
//!
//! Rules shared by every codec:
//! - row 0 is the header; a blank header cell becomes the `""` key
//! - a cell past the last header is keyed `column_<index>`
//! - temporal cells become ISO-8601 text, everything else its text form
//! - a row whose every value is blank after trimming is dropped
//! - sheet order and row order are preserved
//!
//! Any decode failure is returned as a [`ParseError`]; no partial content.

pub mod delimited;
pub mod workbook;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Normalized file content: sheet name to rows, in workbook order
pub type SheetContent = IndexMap<String, Vec<RowRecord>>;

/// Ordered column name to text value association for one data row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowRecord(IndexMap<String, String>);

impl RowRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.insert(column.into(), value.into());
    }

    /// Raw value of `column`, matched exactly
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    /// Trimmed non-empty value of `column`
    ///
    /// Falls back to a case-insensitive match when the exact key is absent.
    pub fn value(&self, column: &str) -> Option<&str> {
        let raw = match self.0.get(column) {
            Some(v) => Some(v.as_str()),
            None => self
                .0
                .iter()
                .find(|(k, _)| k.trim().eq_ignore_ascii_case(column))
                .map(|(_, v)| v.as_str()),
        };
        raw.map(str::trim).filter(|v| !v.is_empty())
    }

    /// First non-empty value among `columns`, in order
    pub fn first_value<S: AsRef<str>>(&self, columns: &[S]) -> Option<&str> {
        columns.iter().find_map(|c| self.value(c.as_ref()))
    }

    pub fn is_blank(&self) -> bool {
        self.0.values().all(|v| v.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RowRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Character encoding of delimited files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TextEncoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "latin-1", alias = "latin1", alias = "iso-8859-1")]
    Latin1,
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextEncoding::Utf8 => write!(f, "utf-8"),
            TextEncoding::Latin1 => write!(f, "latin-1"),
        }
    }
}

/// Codec settings that only apply to delimited input
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub delimiter: u8,
    pub encoding: TextEncoding,

    /// Sheet name given to the single table of a delimited file
    pub sheet_name: String,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            encoding: TextEncoding::Utf8,
            sheet_name: "Sheet1".to_string(),
        }
    }
}

/// Parse `bytes` according to the declared extension (with or without dot)
pub fn normalize(
    bytes: &[u8],
    extension: &str,
    options: &NormalizeOptions,
) -> Result<SheetContent, ParseError> {
    let extension = extension.trim_start_matches('.').to_lowercase();
    match extension.as_str() {
        "xlsx" | "xlsm" => workbook::read_xlsx(bytes),
        "xls" => workbook::read_xls(bytes),
        "csv" | "txt" => delimited::read(bytes, options),
        other => Err(ParseError::UnsupportedExtension(other.to_string())),
    }
}

/// Lowercased extension of a remote file name, if any
pub fn extension_of(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

/// Build keyed rows from raw cell text; the first row is the header
pub(crate) fn rows_from_cells<I>(mut rows: I) -> Vec<RowRecord>
where
    I: Iterator<Item = Vec<String>>,
{
    let headers: Vec<String> = match rows.next() {
        Some(header) => header.iter().map(|h| h.trim().to_string()).collect(),
        None => return Vec::new(),
    };

    rows.filter_map(|cells| {
        let mut record = RowRecord::new();
        for (i, header) in headers.iter().enumerate() {
            let value = cells.get(i).cloned().unwrap_or_default();
            record.insert(header.clone(), value);
        }
        for (i, value) in cells.iter().enumerate().skip(headers.len()) {
            record.insert(format!("column_{}", i), value.clone());
        }
        (!record.is_blank()).then_some(record)
    })
    .collect()
}

/// Column names of the first row of the first non-empty sheet
pub fn headers(content: &SheetContent) -> Vec<String> {
    content
        .values()
        .find_map(|rows| rows.first())
        .map(|row| row.columns().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Aggregate counts stored on an ingested file record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentStats {
    pub row_count: usize,

    /// Widest first row across sheets
    pub column_count: usize,

    /// Sheet names joined with ", "
    pub sheet_names: String,
}

impl ContentStats {
    pub fn of(content: &SheetContent) -> Self {
        Self {
            row_count: content.values().map(Vec::len).sum(),
            column_count: content
                .values()
                .filter_map(|rows| rows.first())
                .map(RowRecord::len)
                .max()
                .unwrap_or(0),
            sheet_names: content.keys().cloned().collect::<Vec<_>>().join(", "),
        }
    }
}

/// Serialize content to the nested text form used for persistence
pub fn to_json(content: &SheetContent) -> Result<String, ParseError> {
    serde_json::to_string(content).map_err(|e| ParseError::Content(e.to_string()))
}

/// Read back content written by [`to_json`]
pub fn from_json(text: &str) -> Result<SheetContent, ParseError> {
    serde_json::from_str(text).map_err(|e| ParseError::Content(e.to_string()))
}
