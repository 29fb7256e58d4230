//! Excel workbook codec (`.xlsx` / `.xlsm` / `.xls`) built on calamine

use std::io::{Cursor, Read, Seek};

use calamine::{open_workbook_from_rs, Data, Reader, Xls, XlsError, Xlsx, XlsxError};

use super::{rows_from_cells, SheetContent};
use crate::error::ParseError;

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn read_xlsx(bytes: &[u8]) -> Result<SheetContent, ParseError> {
    let workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))
        .map_err(|e: XlsxError| ParseError::Workbook(e.to_string()))?;
    read_sheets(workbook)
}

pub fn read_xls(bytes: &[u8]) -> Result<SheetContent, ParseError> {
    let workbook: Xls<_> = open_workbook_from_rs(Cursor::new(bytes))
        .map_err(|e: XlsError| ParseError::Workbook(e.to_string()))?;
    read_sheets(workbook)
}

fn read_sheets<RS, R>(mut workbook: R) -> Result<SheetContent, ParseError>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: std::fmt::Display,
{
    let mut content = SheetContent::new();

    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| ParseError::Workbook(format!("sheet '{}': {}", name, e)))?;

        let cells = range
            .rows()
            .map(|row| row.iter().map(cell_text).collect::<Vec<String>>());
        let rows = rows_from_cells(cells);
        tracing::debug!(sheet = %name, rows = rows.len(), "sheet normalized");
        content.insert(name, rows);
    }

    Ok(content)
}

/// Text form of one cell
///
/// Whole floats print without a fraction ("3", not "3.0"); dates print as
/// `YYYY-MM-DDTHH:MM:SS`.
pub(crate) fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => float_text(*f),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) => value.format(DATETIME_FORMAT).to_string(),
            None => float_text(dt.as_f64()),
        },
        Data::Error(e) => e.to_string(),
    }
}

fn float_text(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_text_conversions() {
        assert_eq!(cell_text(&Data::Empty), "");
        assert_eq!(cell_text(&Data::Float(3.0)), "3");
        assert_eq!(cell_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_text(&Data::Int(-7)), "-7");
        assert_eq!(cell_text(&Data::Bool(true)), "true");
        assert_eq!(cell_text(&Data::String(" A1 ".to_string())), " A1 ");
    }

    #[test]
    fn test_garbage_bytes_are_a_workbook_error() {
        assert!(matches!(read_xlsx(b"not a zip"), Err(ParseError::Workbook(_))));
        assert!(matches!(read_xls(b"not an ole file"), Err(ParseError::Workbook(_))));
    }
}
