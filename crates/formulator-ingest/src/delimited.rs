//! Delimited text (CSV/TSV) tables.
//!
//! - first record is the header,
//! - records are read with the `csv` crate: fields may be quoted with `"`,
//!   a doubled `""` is a literal quote and quoted fields may span lines,
//! - rows may be shorter or longer than the header,
//! - cells are coerced to numbers and booleans where unambiguous, empty cells
//!   become `null`.

use crate::{IngestError, Result};
use csv::{ReaderBuilder, StringRecord};
use formulator_store::DictTable;
use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use tracing::warn;

/// Guess the delimiter from the header line: tab if present, else `;` when it
/// outnumbers `,`, else `,`.
pub fn sniff_delimiter(text: &str) -> char {
    let header = text.lines().next().unwrap_or("");
    if header.contains('\t') {
        '\t'
    } else if header.matches(';').count() > header.matches(',').count() {
        ';'
    } else {
        ','
    }
}

/// Parse delimited text into a table named `id`.
pub fn parse_delimited(id: &str, text: &str, delimiter: char) -> Result<DictTable> {
    let mut records = split_records(text, delimiter)?.into_iter();
    let header = records.next().ok_or_else(|| IngestError::Shape {
        table: id.to_string(),
        reason: "no header row".to_string(),
    })?;
    let names = column_names(&header);

    let mut rows = Vec::new();
    for (i, record) in records.enumerate() {
        if record.len() == 1 && record[0].trim().is_empty() {
            continue;
        }
        if record.len() > names.len() {
            warn!(table = id, row = i + 1, extra = record.len() - names.len(), "extra cells dropped");
        }
        let row: Map<String, Value> = names
            .iter()
            .zip(record)
            .map(|(name, cell)| (name.clone(), coerce_cell(&cell)))
            .collect();
        rows.push(row);
    }
    Ok(DictTable::new(id, names).with_rows(rows))
}

/// Numbers, booleans and `null` from a raw cell; everything else stays text.
///
/// Integers with a leading zero (`"007"`, zip codes) stay text.
pub fn coerce_cell(raw: &str) -> Value {
    let cell = raw.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    if cell.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if cell.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    let digits = cell.strip_prefix('-').unwrap_or(cell);
    let leading_zero = digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
    if !leading_zero {
        if let Ok(n) = cell.parse::<i64>() {
            return Value::Number(n.into());
        }
        let numeric = cell
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
        if numeric {
            if let Some(n) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
                return Value::Number(n);
            }
        }
    }
    Value::String(cell.to_string())
}

/// Header cells, trimmed; blanks become `column_N` and repeats get a suffix.
fn column_names(header: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    header
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let base = match raw.trim() {
                "" => format!("column_{}", i + 1),
                name => name.to_string(),
            };
            let mut name = base.clone();
            let mut n = 2;
            while !seen.insert(name.clone()) {
                name = format!("{base}_{n}");
                n += 1;
            }
            name
        })
        .collect()
}

fn split_records(text: &str, delimiter: char) -> Result<Vec<Vec<String>>> {
    let delimiter = u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| IngestError::Delimited {
            line: 1,
            reason: format!("delimiter {delimiter:?} is not a single ASCII byte"),
        })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => records.push(record.iter().map(str::to_string).collect()),
            Ok(false) => break,
            Err(e) => {
                return Err(IngestError::Delimited {
                    line: e.position().map_or(0, |p| p.line() as usize),
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quoted_fields_with_delimiters_and_newlines() {
        let text = "name,note\n\"Smith, J\",\"said \"\"hi\"\"\nthen left\"\nLee,\n";
        let table = parse_delimited("people", text, ',').unwrap();
        assert_eq!(table.names, vec!["name", "note"]);
        assert_eq!(table.rows[0]["name"], json!("Smith, J"));
        assert_eq!(table.rows[0]["note"], json!("said \"hi\"\nthen left"));
        assert_eq!(table.rows[1]["note"], Value::Null);
    }

    #[test]
    fn cells_are_coerced() {
        assert_eq!(coerce_cell("42"), json!(42));
        assert_eq!(coerce_cell("-3.5"), json!(-3.5));
        assert_eq!(coerce_cell("TRUE"), json!(true));
        assert_eq!(coerce_cell("  "), Value::Null);
        assert_eq!(coerce_cell("007"), json!("007"));
        assert_eq!(coerce_cell("0.5"), json!(0.5));
        assert_eq!(coerce_cell("1e3"), json!(1000.0));
        assert_eq!(coerce_cell("inf"), json!("inf"));
        assert_eq!(coerce_cell("2024-01-05"), json!("2024-01-05"));
    }

    #[test]
    fn tsv_and_crlf() {
        let text = "a\tb\r\n1\t2\r\n3\t4";
        assert_eq!(sniff_delimiter(text), '\t');
        let table = parse_delimited("t", text, '\t').unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1]["b"], json!(4));
    }

    #[test]
    fn header_names_are_made_unique() {
        let table = parse_delimited("t", "a,,a\n1,2,3\n", ',').unwrap();
        assert_eq!(table.names, vec!["a", "column_2", "a_2"]);
    }

    #[test]
    fn short_rows_leave_cells_missing() {
        let table = parse_delimited("t", "a,b\n1\n", ',').unwrap();
        assert_eq!(table.rows[0].get("b"), None);
    }

    #[test]
    fn byte_order_mark_and_blank_lines_are_skipped() {
        let table = parse_delimited("t", "\u{feff}a,b\n\n1,2\n\n3,4,5\n", ',').unwrap();
        assert_eq!(table.names, vec!["a", "b"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1]["b"], json!(4));
        assert_eq!(table.rows[1].get("column_3"), None);
    }

    #[test]
    fn multibyte_delimiters_are_rejected() {
        let err = parse_delimited("t", "a§b\n", '§').unwrap_err();
        assert!(matches!(err, IngestError::Delimited { line: 1, .. }));
    }

    #[test]
    fn semicolons_are_sniffed() {
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(sniff_delimiter("a,b\n"), ',');
    }
}
