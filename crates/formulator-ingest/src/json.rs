//! JSON tables.
//!
//! Two layouts are accepted:
//!
//! ```text
//! [ {"col": value, ...}, ... ]                        array of row objects
//! { "id"?: "...", "names"?: [...], "rows": [...] }    table record
//! ```
//!
//! Column order is `names` when given, otherwise first-seen key order.
//! Nested arrays and objects are kept as their JSON text.

use crate::{IngestError, Result};
use formulator_store::DictTable;
use serde_json::{Map, Value};

pub fn parse_json(id: &str, text: &str) -> Result<DictTable> {
    let value: Value = serde_json::from_str(text).map_err(|source| IngestError::Json {
        table: id.to_string(),
        source,
    })?;
    let shape = |reason: &str| IngestError::Shape {
        table: id.to_string(),
        reason: reason.to_string(),
    };

    let (table_id, declared_names, rows) = match value {
        Value::Array(rows) => (id.to_string(), None, rows),
        Value::Object(mut record) => {
            let rows = match record.remove("rows") {
                Some(Value::Array(rows)) => rows,
                _ => return Err(shape("expected a \"rows\" array")),
            };
            let names = match record.remove("names") {
                None => None,
                Some(Value::Array(names)) => Some(
                    names
                        .into_iter()
                        .map(|n| match n {
                            Value::String(s) => Ok(s),
                            _ => Err(shape("column names must be strings")),
                        })
                        .collect::<Result<Vec<_>>>()?,
                ),
                Some(_) => return Err(shape("\"names\" must be an array")),
            };
            let table_id = match record.remove("id") {
                Some(Value::String(s)) if !s.trim().is_empty() => s,
                _ => id.to_string(),
            };
            (table_id, names, rows)
        }
        _ => return Err(shape("expected an array of rows or a table record")),
    };

    let mut names: Vec<String> = declared_names.unwrap_or_default();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let Value::Object(object) = row else {
            return Err(shape("every row must be an object"));
        };
        let mut cells = Map::new();
        for (key, value) in object {
            if !names.contains(&key) {
                names.push(key.clone());
            }
            cells.insert(key, flatten_cell(value));
        }
        out.push(cells);
    }
    Ok(DictTable::new(table_id.as_str(), names).with_rows(out))
}

fn flatten_cell(value: Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        scalar => scalar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_arrays_collect_columns_in_first_seen_order() {
        let table = parse_json("orders", r#"[{"price": 2, "qty": 3}, {"price": 5, "note": "x"}]"#)
            .unwrap();
        assert_eq!(table.id.as_str(), "orders");
        assert_eq!(table.names, vec!["price", "qty", "note"]);
        assert_eq!(table.rows[1].get("qty"), None);
    }

    #[test]
    fn table_records_keep_declared_names_and_id() {
        let table = parse_json(
            "file",
            r#"{"id": "sales", "names": ["b", "a"], "rows": [{"a": 1, "b": [1, 2]}]}"#,
        )
        .unwrap();
        assert_eq!(table.id.as_str(), "sales");
        assert_eq!(table.names, vec!["b", "a"]);
        assert_eq!(table.rows[0]["b"], json!("[1,2]"));
    }

    #[test]
    fn bad_shapes_are_rejected() {
        assert!(matches!(parse_json("t", "42"), Err(IngestError::Shape { .. })));
        assert!(matches!(parse_json("t", "[1, 2]"), Err(IngestError::Shape { .. })));
        assert!(matches!(parse_json("t", "{\"rows\": 3}"), Err(IngestError::Shape { .. })));
        assert!(matches!(parse_json("t", "{oops"), Err(IngestError::Json { .. })));
    }
}
