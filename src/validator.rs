//! Resolved Document Validator
//!
//! Last check before a resolved tree is written. Walks the renderer's
//! native JSON and stops at the first violation:
//! - no `[[COMPUTED:*]]` token survives
//! - Div identifiers are unique, and so are Figure identifiers
//! - a computed or hybrid Div carries a kind
//! - no RawBlock/RawInline unless raw content is allowed

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::pandoc;
use crate::tree::{Document, KIND_ATTR, ROLE_ATTR};

static PLACEHOLDER_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\[COMPUTED:[A-Za-z]+\]\]").expect("valid placeholder token pattern")
});

const RAW_TYPES: [&str; 2] = ["RawBlock", "RawInline"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidateError {
    #[error("Unresolved placeholder {token} at {path}")]
    LeftoverPlaceholder { token: String, path: String },

    #[error("Duplicate {node} id {id}: first at {first}, again at {path}")]
    DuplicateId {
        node: String,
        id: String,
        first: String,
        path: String,
    },

    #[error("Computed block {id} has no kind at {path}")]
    MissingKind { id: String, path: String },

    #[error("{node} not allowed at {path}")]
    RawContent { node: String, path: String },
}

#[derive(Default)]
struct Seen {
    divs: HashMap<String, String>,
    figures: HashMap<String, String>,
}

/// Validate a resolved document. `allow_raw` admits raw markup.
pub fn validate_resolved(document: &Document, allow_raw: bool) -> Result<(), ValidateError> {
    let tree = document.to_pandoc();
    let mut seen = Seen::default();
    let mut path = vec!["blocks".to_string()];
    walk(&tree["blocks"], &mut path, &mut seen, allow_raw)?;
    debug!(divs = seen.divs.len(), figures = seen.figures.len(), "resolved document valid");
    Ok(())
}

fn walk(
    value: &Value,
    path: &mut Vec<String>,
    seen: &mut Seen,
    allow_raw: bool,
) -> Result<(), ValidateError> {
    match value {
        Value::Object(map) => {
            if pandoc::node_type(value).is_some() {
                check_node(value, &path.join("/"), seen, allow_raw)?;
            }
            for (key, child) in map {
                path.push(key.clone());
                walk(child, path, seen, allow_raw)?;
                path.pop();
            }
            Ok(())
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                path.push(i.to_string());
                walk(child, path, seen, allow_raw)?;
                path.pop();
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_node(
    node: &Value,
    path: &str,
    seen: &mut Seen,
    allow_raw: bool,
) -> Result<(), ValidateError> {
    match pandoc::node_type(node) {
        Some("Str") => {
            if let Some(token) = node["c"].as_str().and_then(|t| PLACEHOLDER_TOKEN.find(t)) {
                return Err(ValidateError::LeftoverPlaceholder {
                    token: token.as_str().to_string(),
                    path: path.to_string(),
                });
            }
        }
        Some(t) if RAW_TYPES.contains(&t) && !allow_raw => {
            return Err(ValidateError::RawContent {
                node: t.to_string(),
                path: path.to_string(),
            });
        }
        Some("Div") => {
            let attr = &node["c"][0];
            if let Some(id) = attr[0].as_str().filter(|id| !id.is_empty()) {
                claim(&mut seen.divs, "Div", id, path)?;
                let pairs = attr[2].as_array().map(Vec::as_slice).unwrap_or_default();
                let value_of = |key: &str| {
                    pairs
                        .iter()
                        .find(|p| p[0] == key)
                        .and_then(|p| p[1].as_str())
                };
                let needs_kind = matches!(value_of(ROLE_ATTR), Some("computed") | Some("hybrid"));
                if needs_kind && value_of(KIND_ATTR).is_none() {
                    return Err(ValidateError::MissingKind {
                        id: id.to_string(),
                        path: path.to_string(),
                    });
                }
            }
        }
        Some("Figure") => {
            if let Some(id) = node["c"][0][0].as_str().filter(|id| !id.is_empty()) {
                claim(&mut seen.figures, "Figure", id, path)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn claim(
    seen: &mut HashMap<String, String>,
    node: &str,
    id: &str,
    path: &str,
) -> Result<(), ValidateError> {
    if let Some(first) = seen.get(id) {
        return Err(ValidateError::DuplicateId {
            node: node.to_string(),
            id: id.to_string(),
            first: first.clone(),
            path: path.to_string(),
        });
    }
    seen.insert(id.to_string(), path.to_string());
    Ok(())
}
