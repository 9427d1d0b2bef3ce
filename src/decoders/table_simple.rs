//! `table.simple@v1`: `{columns: [string], rows: [[cell]], caption?}`

use serde::Deserialize;
use serde_json::Value;

use super::{schema, ArtifactInput, DecodeError, DecoderKey, FormatDecoder};
use crate::pandoc;
use crate::tree::Kind;

#[derive(Debug, Deserialize)]
struct SimpleTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    #[serde(default)]
    caption: Option<String>,
}

pub struct TableSimpleV1;

fn format_cell(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(super::metric::format_value(n, None)),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn text_cell(text: &str) -> Value {
    pandoc::cell(vec![pandoc::plain(pandoc::inlines_from_text(text))])
}

impl FormatDecoder for TableSimpleV1 {
    fn key(&self) -> DecoderKey {
        DecoderKey::new(Kind::Table, "table.simple", "v1")
    }

    fn decode(&self, input: &ArtifactInput<'_>) -> Result<Value, DecodeError> {
        let table: SimpleTable = serde_json::from_slice(input.bytes)?;

        if table.columns.is_empty() {
            return Err(schema("table.columns must be a non-empty array"));
        }
        input
            .options
            .limits
            .check_table(table.rows.len(), table.columns.len())?;

        let head = pandoc::row(table.columns.iter().map(|c| text_cell(c)).collect());

        let mut body = Vec::with_capacity(table.rows.len());
        for (i, row) in table.rows.iter().enumerate() {
            if row.len() != table.columns.len() {
                return Err(schema(format!(
                    "table.rows[{i}] has {} cells, expected {}",
                    row.len(),
                    table.columns.len()
                )));
            }
            let mut cells = Vec::with_capacity(row.len());
            for (j, value) in row.iter().enumerate() {
                let text = format_cell(value).ok_or_else(|| {
                    schema(format!("table.rows[{i}][{j}] must be string|number|boolean|null"))
                })?;
                cells.push(text_cell(&text));
            }
            body.push(pandoc::row(cells));
        }

        Ok(pandoc::table(
            table.columns.len(),
            vec![head],
            body,
            table.caption.as_deref(),
        ))
    }
}
