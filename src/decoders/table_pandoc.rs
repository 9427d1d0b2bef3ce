//! `table.pandoc@v1`: payload is already a native `Table` block.
//! Validated pass-through.

use serde_json::Value;

use super::{schema, ArtifactInput, DecodeError, DecoderKey, FormatDecoder};
use crate::pandoc::node_type;
use crate::tree::Kind;

const UNSAFE_TYPES: [&str; 3] = ["RawBlock", "RawInline", "Div"];

pub struct TablePandocV1;

fn array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>, DecodeError> {
    value
        .as_array()
        .ok_or_else(|| schema(format!("{what} must be an array")))
}

fn tagged<'a>(value: &'a Value, tag: &str, parts: usize) -> Result<&'a Vec<Value>, DecodeError> {
    if node_type(value) != Some(tag) {
        return Err(schema(format!(
            "expected {tag}, got {}",
            node_type(value).unwrap_or("untagged value")
        )));
    }
    let c = array(&value["c"], tag)?;
    if c.len() != parts {
        return Err(schema(format!("{tag} must have {parts} parts, got {}", c.len())));
    }
    Ok(c)
}

/// Rows' summed column spans must equal the colspec count
fn check_rows(rows: &Value, columns: usize, what: &str) -> Result<(), DecodeError> {
    let rows = array(rows, what)?;
    for (i, row) in rows.iter().enumerate() {
        let row = tagged(row, "Row", 2)?;
        let mut width = 0u64;
        for (j, cell) in array(&row[1], "Row cells")?.iter().enumerate() {
            let cell = tagged(cell, "Cell", 5)?;
            let span = cell[3]
                .as_u64()
                .filter(|span| *span > 0)
                .ok_or_else(|| schema(format!("{what}[{i}] cell {j} has an invalid column span")))?;
            width = width
                .checked_add(span)
                .ok_or_else(|| schema(format!("{what}[{i}] column spans overflow")))?;
        }
        if width != columns as u64 {
            return Err(schema(format!(
                "{what}[{i}] spans {width} columns, expected {columns}"
            )));
        }
    }
    Ok(())
}

/// Reject raw markup and nested Divs anywhere in the payload
fn check_safe(value: &Value, path: &mut Vec<String>) -> Result<(), DecodeError> {
    match value {
        Value::Object(map) => {
            if let Some(t) = map.get("t").and_then(Value::as_str) {
                if UNSAFE_TYPES.contains(&t) {
                    return Err(schema(format!("{t} not allowed at {}", path.join("/"))));
                }
            }
            for (key, child) in map {
                path.push(key.clone());
                check_safe(child, path)?;
                path.pop();
            }
            Ok(())
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                path.push(i.to_string());
                check_safe(child, path)?;
                path.pop();
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

pub fn validate_table(table: &Value, allow_raw: bool) -> Result<(), DecodeError> {
    let c = tagged(table, "Table", 6)?;
    let columns = array(&c[2], "Table colspecs")?.len();
    if columns == 0 {
        return Err(schema("Table must have at least one column"));
    }

    let head = tagged(&c[3], "TableHead", 2)?;
    check_rows(&head[1], columns, "TableHead rows")?;

    for body in array(&c[4], "Table bodies")? {
        let body = tagged(body, "TableBody", 4)?;
        check_rows(&body[2], columns, "TableBody head rows")?;
        check_rows(&body[3], columns, "TableBody rows")?;
    }

    let foot = tagged(&c[5], "TableFoot", 2)?;
    check_rows(&foot[1], columns, "TableFoot rows")?;

    if !allow_raw {
        check_safe(table, &mut vec![])?;
    }
    Ok(())
}

impl FormatDecoder for TablePandocV1 {
    fn key(&self) -> DecoderKey {
        DecoderKey::new(Kind::Table, "table.pandoc", "v1")
    }

    fn decode(&self, input: &ArtifactInput<'_>) -> Result<Value, DecodeError> {
        let table: Value = serde_json::from_slice(input.bytes)?;
        validate_table(&table, input.options.allow_raw)?;
        let c = &table["c"];
        let columns = c[2].as_array().map_or(0, Vec::len);
        let body_rows: usize = c[4]
            .as_array()
            .map(|bodies| {
                bodies
                    .iter()
                    .map(|b| b["c"][3].as_array().map_or(0, Vec::len))
                    .sum()
            })
            .unwrap_or(0);
        input.options.limits.check_table(body_rows, columns)?;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::DecodeOptions;
    use crate::pandoc;
    use serde_json::json;

    fn sample(cells: usize) -> Value {
        let row = pandoc::row((0..cells).map(|_| pandoc::cell(vec![])).collect());
        pandoc::table(2, vec![row.clone()], vec![row], None)
    }

    fn decode_with(table: &Value, options: DecodeOptions) -> Result<Value, DecodeError> {
        let bytes = serde_json::to_vec(table).unwrap();
        TablePandocV1.decode(&ArtifactInput {
            id: "table.p.v1",
            bytes: &bytes,
            sidecar: None,
            target: "p.json",
            options: &options,
        })
    }

    #[test]
    fn passes_valid_table_through() {
        let table = sample(2);
        assert_eq!(decode_with(&table, DecodeOptions::default()).unwrap(), table);
    }

    #[test]
    fn rejects_wrong_width() {
        assert!(matches!(
            decode_with(&sample(3), DecodeOptions::default()),
            Err(DecodeError::Schema(_))
        ));
    }

    fn with_spans(spans: &[Value]) -> Value {
        let cells = spans
            .iter()
            .map(|span| {
                let mut cell = pandoc::cell(vec![]);
                cell["c"][3] = span.clone();
                cell
            })
            .collect();
        pandoc::table(1, vec![], vec![pandoc::row(cells)], None)
    }

    #[test]
    fn span_overflow_is_a_schema_error() {
        let table = with_spans(&[json!(u64::MAX), json!(2)]);
        assert!(matches!(
            decode_with(&table, DecodeOptions::default()),
            Err(DecodeError::Schema(msg)) if msg.contains("overflow")
        ));
    }

    #[test]
    fn rejects_zero_and_non_integer_spans() {
        for span in [json!(0), json!(-1), json!("1")] {
            let table = with_spans(&[span]);
            assert!(matches!(
                decode_with(&table, DecodeOptions::default()),
                Err(DecodeError::Schema(_))
            ));
        }
        assert!(decode_with(&with_spans(&[json!(1)]), DecodeOptions::default()).is_ok());
    }

    #[test]
    fn rejects_non_table() {
        let para = pandoc::para(vec![]);
        assert!(decode_with(&para, DecodeOptions::default()).is_err());
    }

    #[test]
    fn raw_content_needs_opt_in() {
        let raw = json!({"t": "RawBlock", "c": ["html", "<b>x</b>"]});
        let row = pandoc::row(vec![pandoc::cell(vec![raw]), pandoc::cell(vec![])]);
        let table = pandoc::table(2, vec![], vec![row], None);
        assert!(decode_with(&table, DecodeOptions::default()).is_err());
        let options = DecodeOptions { allow_raw: true, ..DecodeOptions::default() };
        assert!(decode_with(&table, options).is_ok());
    }
}
