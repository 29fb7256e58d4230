//! Delimited text codec (`.csv`)
//!
//! A delimited file is a single table; it is exposed as one sheet named by
//! [`NormalizeOptions::sheet_name`].

use super::{rows_from_cells, NormalizeOptions, SheetContent, TextEncoding};
use crate::error::ParseError;

pub fn read(bytes: &[u8], options: &NormalizeOptions) -> Result<SheetContent, ParseError> {
    let text = decode(bytes, options.encoding)?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut cells = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ParseError::Delimited(e.to_string()))?;
        cells.push(record.iter().map(str::to_string).collect::<Vec<String>>());
    }

    let mut content = SheetContent::new();
    content.insert(options.sheet_name.clone(), rows_from_cells(cells.into_iter()));
    Ok(content)
}

fn decode(bytes: &[u8], encoding: TextEncoding) -> Result<String, ParseError> {
    match encoding {
        TextEncoding::Utf8 => {
            let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
            String::from_utf8(bytes.to_vec())
                .map_err(|e| ParseError::Delimited(format!("invalid utf-8: {}", e)))
        },
        // Latin-1 maps every byte to the code point of the same value
        TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}
