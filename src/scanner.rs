//! Block Scanner
//!
//! Turns `<!-- BEGIN id -->` / `<!-- END id -->` marker pairs into
//! semantic blocks. Single left-to-right pass with a stack of open
//! markers; ids are unique across the whole document.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::pandoc;
use crate::tree::{Document, Node, SemanticBlock};

static BEGIN_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*<!--\s*BEGIN\s+(\S+)((?:\s+[A-Za-z_-]+=\S+)*)\s*-->\s*$")
        .expect("valid BEGIN marker pattern")
});

static END_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*<!--\s*END\s+(\S+)\s*-->\s*$").expect("valid END marker pattern")
});

static SEMANTIC_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9_]+(\.[a-z0-9_-]+)*$").expect("valid semantic id pattern")
});

/// Structural errors. All are fatal and abort before normalization.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("Marker mismatch: BEGIN {open_id} (offset {open_offset}) closed by END {close_id} (offset {close_offset})")]
    MarkerMismatch {
        open_id: String,
        open_offset: usize,
        close_id: String,
        close_offset: usize,
    },

    #[error("Marker mismatch: BEGIN {id} (offset {offset}) is never closed")]
    UnclosedMarker { id: String, offset: usize },

    #[error("Marker mismatch: END {id} (offset {offset}) has no open BEGIN")]
    UnopenedMarker { id: String, offset: usize },

    #[error("Duplicate semantic id {id}: first at offset {first_offset}, again at offset {offset}")]
    DuplicateId {
        id: String,
        first_offset: usize,
        offset: usize,
    },

    #[error("Invalid semantic id {id:?} at offset {offset}: expected a dotted lowercase token")]
    InvalidId { id: String, offset: usize },
}

impl ScanError {
    /// The block id the error refers to
    pub fn block_id(&self) -> &str {
        match self {
            ScanError::MarkerMismatch { open_id, .. } => open_id,
            ScanError::UnclosedMarker { id, .. }
            | ScanError::UnopenedMarker { id, .. }
            | ScanError::DuplicateId { id, .. }
            | ScanError::InvalidId { id, .. } => id,
        }
    }

    pub fn is_marker_mismatch(&self) -> bool {
        matches!(
            self,
            ScanError::MarkerMismatch { .. }
                | ScanError::UnclosedMarker { .. }
                | ScanError::UnopenedMarker { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Marker {
    Begin { id: String, attributes: Vec<(String, String)> },
    End { id: String },
}

fn parse_marker(raw: &str) -> Option<Marker> {
    if let Some(caps) = BEGIN_MARKER.captures(raw) {
        let attributes = caps
            .get(2)
            .map(|m| {
                m.as_str()
                    .split_whitespace()
                    .filter_map(|pair| pair.split_once('='))
                    .map(|(k, v)| (k.to_string(), v.trim_matches('"').to_string()))
                    .collect()
            })
            .unwrap_or_default();
        return Some(Marker::Begin {
            id: caps[1].to_string(),
            attributes,
        });
    }
    END_MARKER
        .captures(raw)
        .map(|caps| Marker::End { id: caps[1].to_string() })
}

fn raw_html(node: &Value) -> Option<&str> {
    match pandoc::node_type(node) {
        Some("RawBlock") | Some("RawInline") if node["c"][0] == "html" => node["c"][1].as_str(),
        _ => None,
    }
}

/// Marker carried by a standalone RawBlock, or a Para whose only
/// non-whitespace inline is a marker.
fn block_marker(node: &Value) -> Option<Marker> {
    match pandoc::node_type(node) {
        Some("RawBlock") => raw_html(node).and_then(parse_marker),
        Some("Para") | Some("Plain") => {
            let inlines = node["c"].as_array()?;
            let mut significant = inlines
                .iter()
                .filter(|i| !matches!(pandoc::node_type(i), Some("Space") | Some("SoftBreak")));
            let only = significant.next()?;
            if significant.next().is_some() {
                return None;
            }
            raw_html(only).and_then(parse_marker)
        }
        _ => None,
    }
}

/// A paragraph that ends with an END marker and no blank line before it.
/// Returns the paragraph without the marker (None if nothing is left).
fn split_trailing_end(node: &Value) -> Option<(Option<Value>, String)> {
    if pandoc::node_type(node) != Some("Para") {
        return None;
    }
    let inlines = node["c"].as_array()?;
    let last = inlines
        .iter()
        .rposition(|i| !matches!(pandoc::node_type(i), Some("Space") | Some("SoftBreak")))?;
    let Some(Marker::End { id }) = raw_html(&inlines[last]).and_then(parse_marker) else {
        return None;
    };
    let mut rest: Vec<Value> = inlines[..last].to_vec();
    while rest
        .last()
        .is_some_and(|i| matches!(pandoc::node_type(i), Some("Space") | Some("SoftBreak")))
    {
        rest.pop();
    }
    let rest = (!rest.is_empty()).then(|| pandoc::para(rest));
    Some((rest, id))
}

struct Frame {
    block: SemanticBlock,
}

#[derive(Default)]
struct ScanState {
    offset: usize,
    seen: HashMap<String, usize>,
}

impl ScanState {
    fn next_offset(&mut self) -> usize {
        let offset = self.offset;
        self.offset += 1;
        offset
    }

    fn claim(&mut self, id: &str, offset: usize) -> Result<(), ScanError> {
        if !SEMANTIC_ID.is_match(id) {
            return Err(ScanError::InvalidId {
                id: id.to_string(),
                offset,
            });
        }
        if let Some(first) = self.seen.get(id) {
            return Err(ScanError::DuplicateId {
                id: id.to_string(),
                first_offset: *first,
                offset,
            });
        }
        self.seen.insert(id.to_string(), offset);
        Ok(())
    }
}

/// Replace marker-delimited ranges with semantic blocks.
///
/// Pre-existing blocks (Divs with an identifier) are kept and take part
/// in duplicate detection. Markers inside them and inside id-less
/// wrapper Divs are scanned too; a marker pair must open and close
/// within the same container.
pub fn scan(document: Document) -> Result<Document, ScanError> {
    let mut state = ScanState::default();
    let Document {
        api_version,
        meta,
        blocks,
    } = document;
    let blocks = scan_nodes(blocks, &mut state)?;
    debug!(blocks = state.seen.len(), "scan complete");
    Ok(Document {
        api_version,
        meta,
        blocks,
    })
}

fn scan_nodes(nodes: Vec<Node>, state: &mut ScanState) -> Result<Vec<Node>, ScanError> {
    let mut out: Vec<Node> = Vec::with_capacity(nodes.len());
    let mut stack: Vec<Frame> = vec![];

    for node in nodes {
        let offset = state.next_offset();
        match node {
            Node::Content(value) => {
                if let Some(marker) = block_marker(&value) {
                    match marker {
                        Marker::Begin { id, attributes } => {
                            state.claim(&id, offset)?;
                            let mut block = SemanticBlock::new(id, offset);
                            block.attributes = attributes;
                            stack.push(Frame { block });
                        }
                        Marker::End { id } => {
                            close(&mut stack, &mut out, id, offset)?;
                        }
                    }
                } else if let Some((rest, id)) = split_trailing_end(&value) {
                    if let Some(rest) = rest {
                        push(&mut stack, &mut out, Node::Content(rest));
                    }
                    close(&mut stack, &mut out, id, offset)?;
                } else {
                    push(&mut stack, &mut out, Node::Content(value));
                }
            }
            Node::Block(mut block) => {
                state.claim(&block.id, offset)?;
                block.offset = offset;
                block.content = scan_nodes(std::mem::take(&mut block.content), state)?;
                push(&mut stack, &mut out, Node::Block(block));
            }
            Node::Wrapper(mut wrapper) => {
                wrapper.content = scan_nodes(std::mem::take(&mut wrapper.content), state)?;
                push(&mut stack, &mut out, Node::Wrapper(wrapper));
            }
            other => push(&mut stack, &mut out, other),
        }
    }

    if let Some(frame) = stack.pop() {
        return Err(ScanError::UnclosedMarker {
            id: frame.block.id,
            offset: frame.block.offset,
        });
    }
    Ok(out)
}

fn push(stack: &mut [Frame], out: &mut Vec<Node>, node: Node) {
    match stack.last_mut() {
        Some(frame) => frame.block.content.push(node),
        None => out.push(node),
    }
}

fn close(
    stack: &mut Vec<Frame>,
    out: &mut Vec<Node>,
    id: String,
    offset: usize,
) -> Result<(), ScanError> {
    let Some(frame) = stack.pop() else {
        return Err(ScanError::UnopenedMarker { id, offset });
    };
    if frame.block.id != id {
        return Err(ScanError::MarkerMismatch {
            open_id: frame.block.id,
            open_offset: frame.block.offset,
            close_id: id,
            close_offset: offset,
        });
    }
    push(stack, out, Node::Block(frame.block));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(text: &str) -> Value {
        json!({"t": "RawBlock", "c": ["html", text]})
    }

    fn text(s: &str) -> Value {
        pandoc::para(pandoc::inlines_from_text(s))
    }

    fn doc(blocks: Vec<Value>) -> Document {
        Document::from_pandoc(json!({ "blocks": blocks })).unwrap()
    }

    #[test]
    fn parses_marker_attributes() {
        let marker = parse_marker("<!-- BEGIN metric.x.v1 role=computed kind=metric -->").unwrap();
        assert_eq!(
            marker,
            Marker::Begin {
                id: "metric.x.v1".into(),
                attributes: vec![
                    ("role".into(), "computed".into()),
                    ("kind".into(), "metric".into())
                ],
            }
        );
        assert_eq!(
            parse_marker("  <!--END note.x-->  "),
            Some(Marker::End { id: "note.x".into() })
        );
        assert_eq!(parse_marker("<!-- a comment -->"), None);
    }

    #[test]
    fn wraps_marked_range() {
        let scanned = scan(doc(vec![
            text("before"),
            raw("<!-- BEGIN metric.x.v1 -->"),
            text("inside"),
            raw("<!-- END metric.x.v1 -->"),
            text("after"),
        ]))
        .unwrap();
        assert_eq!(scanned.blocks.len(), 3);
        let block = scanned.find_block("metric.x.v1").unwrap();
        assert_eq!(block.offset, 1);
        assert_eq!(block.content.len(), 1);
    }

    #[test]
    fn nested_blocks_keep_order() {
        let scanned = scan(doc(vec![
            raw("<!-- BEGIN outer.v1 -->"),
            raw("<!-- BEGIN inner.v1 -->"),
            text("deep"),
            raw("<!-- END inner.v1 -->"),
            raw("<!-- END outer.v1 -->"),
        ]))
        .unwrap();
        let ids: Vec<_> = scanned.blocks().iter().map(|b| b.id.clone()).collect();
        assert_eq!(ids, vec!["outer.v1", "inner.v1"]);
        assert_eq!(scanned.blocks.len(), 1);
    }

    #[test]
    fn mismatch_names_both_ids() {
        let err = scan(doc(vec![
            raw("<!-- BEGIN a.v1 -->"),
            raw("<!-- END b.v1 -->"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ScanError::MarkerMismatch {
                open_id: "a.v1".into(),
                open_offset: 0,
                close_id: "b.v1".into(),
                close_offset: 1,
            }
        );
        assert!(err.is_marker_mismatch());
    }

    #[test]
    fn unclosed_marker_is_mismatch() {
        let err = scan(doc(vec![raw("<!-- BEGIN block.v1 -->"), text("x")])).unwrap_err();
        assert!(err.is_marker_mismatch());
        assert_eq!(err.block_id(), "block.v1");
    }

    #[test]
    fn stray_end_is_mismatch() {
        let err = scan(doc(vec![raw("<!-- END lone.v1 -->")])).unwrap_err();
        assert_eq!(err, ScanError::UnopenedMarker { id: "lone.v1".into(), offset: 0 });
    }

    #[test]
    fn closed_id_cannot_reopen() {
        let err = scan(doc(vec![
            raw("<!-- BEGIN dup.v1 -->"),
            raw("<!-- END dup.v1 -->"),
            raw("<!-- BEGIN dup.v1 -->"),
            raw("<!-- END dup.v1 -->"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ScanError::DuplicateId { id: "dup.v1".into(), first_offset: 0, offset: 2 }
        );
    }

    #[test]
    fn nested_id_must_differ_from_ancestor() {
        let err = scan(doc(vec![
            raw("<!-- BEGIN same.v1 -->"),
            raw("<!-- BEGIN same.v1 -->"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ScanError::DuplicateId { .. }));
    }

    #[test]
    fn rejects_uppercase_id() {
        let err = scan(doc(vec![raw("<!-- BEGIN Metric.X -->")])).unwrap_err();
        assert!(matches!(err, ScanError::InvalidId { .. }));
    }

    #[test]
    fn end_marker_trailing_paragraph() {
        let para_with_end = json!({"t": "Para", "c": [
            {"t": "Str", "c": "body"},
            {"t": "SoftBreak"},
            {"t": "RawInline", "c": ["html", "<!-- END note.x -->"]}
        ]});
        let scanned = scan(doc(vec![raw("<!-- BEGIN note.x -->"), para_with_end])).unwrap();
        let block = scanned.find_block("note.x").unwrap();
        assert_eq!(block.content.len(), 1);
        match &block.content[0] {
            Node::Content(v) => assert_eq!(v["c"].as_array().unwrap().len(), 1),
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn marker_in_paragraph() {
        let begin = json!({"t": "Para", "c": [{"t": "RawInline", "c": ["html", "<!-- BEGIN fig.a -->"]}]});
        let end = json!({"t": "Para", "c": [{"t": "RawInline", "c": ["html", "<!-- END fig.a -->"]}]});
        let scanned = scan(doc(vec![begin, end])).unwrap();
        assert!(scanned.find_block("fig.a").is_some());
    }

    fn wrapper(children: Vec<Value>) -> Value {
        json!({"t": "Div", "c": [["", ["callout"], []], children]})
    }

    #[test]
    fn markers_inside_wrapper_div() {
        let scanned = scan(doc(vec![wrapper(vec![
            raw("<!-- BEGIN metric.x.v1 -->"),
            text("inside"),
            raw("<!-- END metric.x.v1 -->"),
        ])]))
        .unwrap();
        assert_eq!(scanned.blocks.len(), 1);
        assert!(matches!(&scanned.blocks[0], Node::Wrapper(w) if w.content.len() == 1));
        let block = scanned.find_block("metric.x.v1").unwrap();
        assert_eq!(block.offset, 1);
    }

    #[test]
    fn ids_inside_wrapper_count_as_duplicates() {
        let inner = json!({"t": "Div", "c": [["table.t.v1", [], []], []]});
        let err = scan(doc(vec![
            wrapper(vec![inner]),
            raw("<!-- BEGIN table.t.v1 -->"),
            raw("<!-- END table.t.v1 -->"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ScanError::DuplicateId { id: "table.t.v1".into(), first_offset: 1, offset: 2 }
        );
    }

    #[test]
    fn marker_cannot_cross_wrapper_boundary() {
        let err = scan(doc(vec![
            wrapper(vec![raw("<!-- BEGIN note.x -->")]),
            raw("<!-- END note.x -->"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ScanError::UnclosedMarker { ref id, .. } if id == "note.x"));
    }

    #[test]
    fn existing_div_participates_in_duplicates() {
        let existing = json!({"t": "Div", "c": [["table.t.v1", [], []], []]});
        let err = scan(doc(vec![
            existing,
            raw("<!-- BEGIN table.t.v1 -->"),
            raw("<!-- END table.t.v1 -->"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ScanError::DuplicateId { .. }));
    }
}
