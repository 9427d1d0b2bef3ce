//! Pandoc AST Builders
//!
//! Constructors for the native JSON tree the external renderer accepts.
//! Every fragment the resolver splices is built from these.

use serde_json::{json, Value};

pub const API_VERSION: [u32; 3] = [1, 23, 1];

pub fn str_node(text: &str) -> Value {
    json!({"t": "Str", "c": text})
}

pub fn space() -> Value {
    json!({"t": "Space"})
}

/// Split text on whitespace into `Str`/`Space` inlines
pub fn inlines_from_text(text: &str) -> Vec<Value> {
    let mut inlines = Vec::new();
    for (i, word) in text.split_whitespace().enumerate() {
        if i > 0 {
            inlines.push(space());
        }
        inlines.push(str_node(word));
    }
    inlines
}

pub fn para(inlines: Vec<Value>) -> Value {
    json!({"t": "Para", "c": inlines})
}

pub fn plain(inlines: Vec<Value>) -> Value {
    json!({"t": "Plain", "c": inlines})
}

pub fn strong(inlines: Vec<Value>) -> Value {
    json!({"t": "Strong", "c": inlines})
}

/// Attr triple: `[id, [classes], [[key, value], ...]]`
pub fn attr(id: &str, classes: &[&str], pairs: &[(&str, &str)]) -> Value {
    let pairs: Vec<Value> = pairs.iter().map(|(k, v)| json!([k, v])).collect();
    json!([id, classes, pairs])
}

pub fn empty_attr() -> Value {
    attr("", &[], &[])
}

pub fn span(attr: Value, inlines: Vec<Value>) -> Value {
    json!({"t": "Span", "c": [attr, inlines]})
}

pub fn div(attr: Value, blocks: Vec<Value>) -> Value {
    json!({"t": "Div", "c": [attr, blocks]})
}

pub fn cell(blocks: Vec<Value>) -> Value {
    json!({
        "t": "Cell",
        "c": [empty_attr(), {"t": "AlignDefault"}, 1, 1, blocks]
    })
}

pub fn row(cells: Vec<Value>) -> Value {
    json!({"t": "Row", "c": [empty_attr(), cells]})
}

pub fn col_spec() -> Value {
    json!([{"t": "AlignDefault"}, {"t": "ColWidthDefault"}])
}

pub fn caption(text: Option<&str>) -> Value {
    match text {
        Some(text) if !text.trim().is_empty() => {
            json!([null, [para(inlines_from_text(text))]])
        }
        _ => json!([null, []]),
    }
}

/// Complete `Table` block with one head and one body
pub fn table(
    columns: usize,
    head: Vec<Value>,
    body: Vec<Value>,
    caption_text: Option<&str>,
) -> Value {
    let col_specs: Vec<Value> = (0..columns).map(|_| col_spec()).collect();
    json!({
        "t": "Table",
        "c": [
            empty_attr(),
            caption(caption_text),
            col_specs,
            {"t": "TableHead", "c": [empty_attr(), head]},
            [{"t": "TableBody", "c": [empty_attr(), 0, [], body]}],
            {"t": "TableFoot", "c": [empty_attr(), []]}
        ]
    })
}

pub fn image(alt_text: &str, target: &str) -> Value {
    json!({
        "t": "Image",
        "c": [empty_attr(), inlines_from_text(alt_text), [target, ""]]
    })
}

pub fn figure(id: &str, caption_text: &str, image: Value) -> Value {
    json!({
        "t": "Figure",
        "c": [attr(id, &["figure"], &[]), caption(Some(caption_text)), [plain(vec![image])]]
    })
}

/// Concatenated text of `Str` inlines, ignoring whitespace nodes.
/// Returns `None` when any other inline type is present.
pub fn plain_text(inlines: &[Value]) -> Option<String> {
    let mut text = String::new();
    for inline in inlines {
        match inline.get("t").and_then(Value::as_str) {
            Some("Str") => text.push_str(inline.get("c").and_then(Value::as_str).unwrap_or("")),
            Some("Space") | Some("SoftBreak") => {}
            _ => return None,
        }
    }
    Some(text)
}

pub fn node_type(node: &Value) -> Option<&str> {
    node.get("t").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inlines_split_on_whitespace() {
        let inlines = inlines_from_text("Yaw  MAE:\t1.5 deg");
        assert_eq!(inlines.len(), 7);
        assert_eq!(plain_text(&inlines).unwrap(), "YawMAE:1.5deg");
    }

    #[test]
    fn plain_text_rejects_markup() {
        let inlines = vec![str_node("a"), strong(vec![str_node("b")])];
        assert!(plain_text(&inlines).is_none());
    }

    #[test]
    fn table_has_six_parts() {
        let t = table(2, vec![], vec![], Some("cap"));
        assert_eq!(node_type(&t), Some("Table"));
        assert_eq!(t["c"].as_array().unwrap().len(), 6);
        assert_eq!(t["c"][2].as_array().unwrap().len(), 2);
    }
}
