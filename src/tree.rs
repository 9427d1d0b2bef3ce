//! Document Tree - Closed Node Model
//!
//! A document is a list of nodes. Only five node shapes exist:
//! untouched authored content, id-less wrapper Divs, semantic blocks,
//! placeholder tokens and resolved fragments. Conversion to and from the renderer's native
//! JSON happens at the edges only.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::authority::MetadataAuthority;
use crate::pandoc;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("Not a document tree: {0}")]
    NotADocument(String),

    #[error("Malformed {node} node: {reason}")]
    Malformed { node: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Metric,
    Table,
    Figure,
    Annotation,
}

impl Kind {
    pub const ALL: [Kind; 4] = [Kind::Metric, Kind::Table, Kind::Figure, Kind::Annotation];

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Metric => "metric",
            Kind::Table => "table",
            Kind::Figure => "figure",
            Kind::Annotation => "annotation",
        }
    }

    /// Token text of the placeholder paragraph, e.g. `[[COMPUTED:TABLE]]`
    pub fn placeholder_token(self) -> String {
        format!("[[COMPUTED:{}]]", self.as_str().to_uppercase())
    }

    pub fn from_placeholder_token(text: &str) -> Option<Kind> {
        let inner = text.trim().strip_prefix("[[COMPUTED:")?.strip_suffix("]]")?;
        Kind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(inner))
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Authored,
    Hybrid,
    Computed,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Authored => "authored",
            Role::Hybrid => "hybrid",
            Role::Computed => "computed",
        }
    }

    /// Computed and hybrid blocks carry a placeholder
    pub fn needs_placeholder(self) -> bool {
        matches!(self, Role::Computed | Role::Hybrid)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authored" => Ok(Role::Authored),
            "hybrid" => Ok(Role::Hybrid),
            "computed" => Ok(Role::Computed),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Internal,
    #[default]
    External,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Internal => "internal",
            Visibility::External => "external",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(Visibility::Internal),
            "external" => Ok(Visibility::External),
            other => Err(other.to_string()),
        }
    }
}

/// Metadata attached by the normalizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub role: Role,
    pub kind: Kind,
    pub visibility: Visibility,
    /// Parent block id for annotation-of blocks
    #[serde(default)]
    pub bind_to: Option<String>,
    pub authority: MetadataAuthority,
}

pub const ROLE_ATTR: &str = "role";
pub const KIND_ATTR: &str = "kind";
pub const VISIBILITY_ATTR: &str = "visibility";
pub const BIND_ATTR: &str = "bind-to";

const CANONICAL_ATTRS: [&str; 4] = [ROLE_ATTR, KIND_ATTR, VISIBILITY_ATTR, BIND_ATTR];

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticBlock {
    pub id: String,
    /// Pre-order offset of the opening marker
    pub offset: usize,
    pub classes: Vec<String>,
    /// Key/value attributes as written on the marker or source Div
    pub attributes: Vec<(String, String)>,
    pub meta: Option<BlockMeta>,
    pub content: Vec<Node>,
}

impl SemanticBlock {
    pub fn new(id: impl Into<String>, offset: usize) -> Self {
        Self {
            id: id.into(),
            offset,
            classes: vec![],
            attributes: vec![],
            meta: None,
            content: vec![],
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn placeholder_count(&self) -> usize {
        self.content
            .iter()
            .filter(|n| matches!(n, Node::Placeholder(_)))
            .count()
    }
}

/// "Computed content belongs here", owned by exactly one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub kind: Kind,
    pub block_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub block: Value,
}

pub const STUB_CLASS: &str = "unresolved";

impl Fragment {
    pub fn new(block: Value) -> Self {
        Self { block }
    }

    /// Inert, visible marker left where a placeholder could not be resolved
    pub fn stub(block_id: &str, status: &str) -> Self {
        let label = format!("[unresolved {block_id}: {status}]");
        let body = pandoc::para(vec![pandoc::strong(pandoc::inlines_from_text(&label))]);
        Self {
            block: pandoc::div(
                pandoc::attr("", &[STUB_CLASS], &[("for", block_id), ("status", status)]),
                vec![body],
            ),
        }
    }

    pub fn is_stub(&self) -> bool {
        is_stub_value(&self.block)
    }
}

fn is_stub_value(block: &Value) -> bool {
    pandoc::node_type(block) == Some("Div")
        && block["c"][0][1]
            .as_array()
            .is_some_and(|classes| classes.iter().any(|c| c == STUB_CLASS))
}

/// Div without an identifier; its children are walked like any others
#[derive(Debug, Clone, PartialEq)]
pub struct Wrapper {
    /// Attr triple exactly as read
    pub attr: Value,
    pub content: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Authored content passed through untouched
    Content(Value),
    Wrapper(Wrapper),
    Block(SemanticBlock),
    Placeholder(Placeholder),
    Fragment(Fragment),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub api_version: Value,
    pub meta: Value,
    pub blocks: Vec<Node>,
}

impl Document {
    pub fn new(blocks: Vec<Node>) -> Self {
        Self {
            api_version: json!(pandoc::API_VERSION),
            meta: json!({}),
            blocks,
        }
    }

    /// Build from the renderer's native JSON.
    ///
    /// Divs with an identifier become semantic blocks and id-less Divs
    /// become wrappers. Inside a block (at any wrapper depth) a paragraph
    /// holding only a `[[COMPUTED:*]]` token becomes a placeholder.
    /// Everything else stays opaque content.
    pub fn from_pandoc(value: Value) -> Result<Self, TreeError> {
        let Value::Object(mut map) = value else {
            return Err(TreeError::NotADocument("expected a JSON object".into()));
        };
        let blocks = match map.remove("blocks") {
            Some(Value::Array(blocks)) => blocks,
            _ => return Err(TreeError::NotADocument("missing 'blocks' array".into())),
        };
        let api_version = map
            .remove("pandoc-api-version")
            .unwrap_or_else(|| json!(pandoc::API_VERSION));
        let meta = map.remove("meta").unwrap_or_else(|| json!({}));

        let blocks = blocks
            .into_iter()
            .map(|b| node_from_pandoc(b, None))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { api_version, meta, blocks })
    }

    pub fn from_json_str(text: &str) -> Result<Self, TreeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| TreeError::NotADocument(e.to_string()))?;
        Self::from_pandoc(value)
    }

    pub fn to_pandoc(&self) -> Value {
        json!({
            "pandoc-api-version": self.api_version,
            "meta": self.meta,
            "blocks": self.blocks.iter().map(node_to_pandoc).collect::<Vec<_>>(),
        })
    }

    /// Every placeholder in document order, with its index path
    pub fn placeholder_paths(&self) -> Vec<(Vec<usize>, Placeholder)> {
        let mut out = vec![];
        collect_placeholders(&self.blocks, &mut vec![], &mut out);
        out
    }

    pub fn placeholders(&self) -> Vec<Placeholder> {
        self.placeholder_paths().into_iter().map(|(_, p)| p).collect()
    }

    /// Replace the node at an index path, returning the old node
    pub fn replace_at(&mut self, path: &[usize], node: Node) -> Option<Node> {
        let (last, parents) = path.split_last()?;
        let mut nodes = &mut self.blocks;
        for idx in parents {
            match nodes.get_mut(*idx) {
                Some(Node::Block(block)) => nodes = &mut block.content,
                Some(Node::Wrapper(wrapper)) => nodes = &mut wrapper.content,
                _ => return None,
            }
        }
        let slot = nodes.get_mut(*last)?;
        Some(std::mem::replace(slot, node))
    }

    /// All semantic blocks, depth first in document order
    pub fn blocks(&self) -> Vec<&SemanticBlock> {
        let mut out = vec![];
        collect_blocks(&self.blocks, &mut out);
        out
    }

    pub fn find_block(&self, id: &str) -> Option<&SemanticBlock> {
        self.blocks().into_iter().find(|b| b.id == id)
    }

    pub fn fragments(&self) -> Vec<&Fragment> {
        let mut out = vec![];
        collect_fragments(&self.blocks, &mut out);
        out
    }

    /// Number of stub fragments left for a block id
    pub fn stub_count(&self, block_id: &str) -> usize {
        self.fragments()
            .into_iter()
            .filter(|f| f.is_stub() && f.block["c"][0][2].as_array().is_some_and(|kv| {
                kv.iter().any(|pair| pair[0] == "for" && pair[1] == block_id)
            }))
            .count()
    }
}

fn collect_placeholders(
    nodes: &[Node],
    prefix: &mut Vec<usize>,
    out: &mut Vec<(Vec<usize>, Placeholder)>,
) {
    for (i, node) in nodes.iter().enumerate() {
        prefix.push(i);
        match node {
            Node::Placeholder(p) => out.push((prefix.clone(), p.clone())),
            Node::Block(block) => collect_placeholders(&block.content, prefix, out),
            Node::Wrapper(wrapper) => collect_placeholders(&wrapper.content, prefix, out),
            _ => {}
        }
        prefix.pop();
    }
}

fn collect_blocks<'a>(nodes: &'a [Node], out: &mut Vec<&'a SemanticBlock>) {
    for node in nodes {
        match node {
            Node::Block(block) => {
                out.push(block);
                collect_blocks(&block.content, out);
            }
            Node::Wrapper(wrapper) => collect_blocks(&wrapper.content, out),
            _ => {}
        }
    }
}

fn collect_fragments<'a>(nodes: &'a [Node], out: &mut Vec<&'a Fragment>) {
    for node in nodes {
        match node {
            Node::Fragment(f) => out.push(f),
            Node::Block(block) => collect_fragments(&block.content, out),
            Node::Wrapper(wrapper) => collect_fragments(&wrapper.content, out),
            _ => {}
        }
    }
}

fn node_from_pandoc(value: Value, owner: Option<&str>) -> Result<Node, TreeError> {
    match pandoc::node_type(&value) {
        Some("Div") => {
            let (attr, children) = div_parts(value)?;
            let id = attr[0].as_str().unwrap_or_default().to_string();
            if id.is_empty() {
                let content = children
                    .into_iter()
                    .map(|c| node_from_pandoc(c, owner))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Node::Wrapper(Wrapper { attr, content }));
            }
            block_from_div(id, attr, children).map(Node::Block)
        }
        Some("Para") if owner.is_some() => {
            let token = value["c"]
                .as_array()
                .and_then(|inlines| pandoc::plain_text(inlines))
                .and_then(|text| Kind::from_placeholder_token(&text));
            match (token, owner) {
                (Some(kind), Some(block_id)) => Ok(Node::Placeholder(Placeholder {
                    kind,
                    block_id: block_id.to_string(),
                })),
                _ => Ok(Node::Content(value)),
            }
        }
        _ => Ok(Node::Content(value)),
    }
}

/// Split a Div into its attr triple and child blocks
fn div_parts(mut value: Value) -> Result<(Value, Vec<Value>), TreeError> {
    let malformed = |reason: &str| TreeError::Malformed {
        node: "Div".into(),
        reason: reason.into(),
    };
    let Value::Array(mut parts) = value["c"].take() else {
        return Err(malformed("content is not an array"));
    };
    if parts.len() != 2 {
        return Err(malformed("expected [attr, blocks]"));
    }
    let children = parts.pop().unwrap_or_default();
    let attr = parts.pop().unwrap_or_default();
    let Value::Array(children) = children else {
        return Err(malformed("children are not an array"));
    };
    Ok((attr, children))
}

fn block_from_div(
    id: String,
    attr: Value,
    children: Vec<Value>,
) -> Result<SemanticBlock, TreeError> {
    let classes = attr[1]
        .as_array()
        .map(|cs| cs.iter().filter_map(|c| c.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let attributes = attr[2]
        .as_array()
        .map(|pairs| {
            pairs
                .iter()
                .filter_map(|p| Some((p[0].as_str()?.to_string(), p[1].as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let content = children
        .into_iter()
        .map(|c| node_from_pandoc(c, Some(&id)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SemanticBlock {
        id,
        offset: 0,
        classes,
        attributes,
        meta: None,
        content,
    })
}

fn node_to_pandoc(node: &Node) -> Value {
    match node {
        Node::Content(value) => value.clone(),
        Node::Placeholder(p) => pandoc::para(vec![pandoc::str_node(&p.kind.placeholder_token())]),
        Node::Fragment(f) => f.block.clone(),
        Node::Wrapper(wrapper) => {
            let children: Vec<Value> = wrapper.content.iter().map(node_to_pandoc).collect();
            json!({"t": "Div", "c": [wrapper.attr, children]})
        }
        Node::Block(block) => {
            let mut pairs: Vec<(String, String)> = match &block.meta {
                Some(meta) => {
                    let mut pairs = vec![
                        (ROLE_ATTR.to_string(), meta.role.as_str().to_string()),
                        (KIND_ATTR.to_string(), meta.kind.as_str().to_string()),
                        (VISIBILITY_ATTR.to_string(), meta.visibility.as_str().to_string()),
                    ];
                    if let Some(parent) = &meta.bind_to {
                        pairs.push((BIND_ATTR.to_string(), parent.clone()));
                    }
                    pairs
                }
                None => vec![],
            };
            let keep_all = block.meta.is_none();
            pairs.extend(
                block
                    .attributes
                    .iter()
                    .filter(|(k, _)| keep_all || !CANONICAL_ATTRS.contains(&k.as_str()))
                    .cloned(),
            );
            let pairs: Vec<Value> = pairs.into_iter().map(|(k, v)| json!([k, v])).collect();
            let children: Vec<Value> = block.content.iter().map(node_to_pandoc).collect();
            json!({
                "t": "Div",
                "c": [[block.id, block.classes, pairs], children]
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Value {
        json!({
            "pandoc-api-version": [1, 23, 1],
            "meta": {},
            "blocks": [
                {"t": "Para", "c": [{"t": "Str", "c": "intro"}]},
                {"t": "Div", "c": [
                    ["metric.x.v1", [], [["role", "computed"], ["kind", "metric"], ["visibility", "internal"]]],
                    [
                        {"t": "Para", "c": [{"t": "Str", "c": "prose"}]},
                        {"t": "Para", "c": [{"t": "Str", "c": "[[COMPUTED:METRIC]]"}]}
                    ]
                ]}
            ]
        })
    }

    #[test]
    fn placeholder_token_round_trip() {
        for kind in Kind::ALL {
            assert_eq!(Kind::from_placeholder_token(&kind.placeholder_token()), Some(kind));
        }
        assert_eq!(Kind::from_placeholder_token("[[COMPUTED:CHART]]"), None);
    }

    #[test]
    fn from_pandoc_finds_blocks_and_placeholders() {
        let doc = Document::from_pandoc(sample()).unwrap();
        assert_eq!(doc.blocks.len(), 2);
        let block = doc.find_block("metric.x.v1").unwrap();
        assert_eq!(block.attribute("role"), Some("computed"));
        assert_eq!(
            doc.placeholders(),
            vec![Placeholder { kind: Kind::Metric, block_id: "metric.x.v1".into() }]
        );
    }

    #[test]
    fn placeholder_outside_block_is_content() {
        let doc = Document::from_pandoc(json!({
            "blocks": [{"t": "Para", "c": [{"t": "Str", "c": "[[COMPUTED:TABLE]]"}]}]
        }))
        .unwrap();
        assert!(doc.placeholders().is_empty());
    }

    #[test]
    fn pandoc_round_trip_is_lossless() {
        let doc = Document::from_pandoc(sample()).unwrap();
        assert_eq!(doc.to_pandoc(), sample());
    }

    #[test]
    fn replace_at_swaps_nested_node() {
        let mut doc = Document::from_pandoc(sample()).unwrap();
        let (path, _) = doc.placeholder_paths().remove(0);
        assert_eq!(path, vec![1, 1]);
        let stub = Fragment::stub("metric.x.v1", "missing_entry");
        let old = doc.replace_at(&path, Node::Fragment(stub));
        assert!(matches!(old, Some(Node::Placeholder(_))));
        assert!(doc.placeholders().is_empty());
        assert_eq!(doc.stub_count("metric.x.v1"), 1);
    }

    #[test]
    fn wrapper_div_is_walked() {
        let doc = Document::from_pandoc(json!({"blocks": [
            {"t": "Div", "c": [["", ["callout"], []], [
                {"t": "Div", "c": [["metric.x.v1", [], []], [
                    {"t": "Div", "c": [["", ["inner"], []], [
                        {"t": "Para", "c": [{"t": "Str", "c": "[[COMPUTED:METRIC]]"}]}
                    ]]}
                ]]}
            ]]}
        ]}))
        .unwrap();
        assert!(matches!(doc.blocks[0], Node::Wrapper(_)));
        assert!(doc.find_block("metric.x.v1").is_some());
        let paths = doc.placeholder_paths();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].0, vec![0, 0, 0, 0]);

        let mut doc = doc;
        let path = paths[0].0.clone();
        doc.replace_at(&path, Node::Fragment(Fragment::stub("metric.x.v1", "missing_entry")));
        assert_eq!(doc.stub_count("metric.x.v1"), 1);
        assert_eq!(doc.to_pandoc()["blocks"][0]["c"][0], json!(["", ["callout"], []]));
    }

    #[test]
    fn rejects_malformed_wrapper() {
        let err = Document::from_pandoc(json!({"blocks": [{"t": "Div", "c": [["", [], []]]}]}));
        assert!(matches!(err, Err(TreeError::Malformed { .. })));
    }

    #[test]
    fn rejects_non_document() {
        assert!(Document::from_pandoc(json!([1, 2])).is_err());
        assert!(Document::from_pandoc(json!({"meta": {}})).is_err());
    }
}
