//! Normalizer
//!
//! Attaches role/kind/visibility to every scanned block and gives each
//! computed or hybrid block exactly one typed placeholder.
//!
//! Metadata precedence: registry entry, then marker attributes, then
//! defaults (`role=authored`, `visibility=external`).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::authority::MetadataAuthority;
use crate::pandoc;
use crate::registry::{NormalizationEntry, NormalizationRegistry};
use crate::tree::{
    BlockMeta, Document, Kind, Node, Placeholder, Role, SemanticBlock, Visibility, BIND_ATTR,
    KIND_ATTR, ROLE_ATTR, VISIBILITY_ATTR,
};

/// Node types a computed block's evidence replaces
const AUTHORED_PAYLOAD: [&str; 3] = ["Table", "Image", "Figure"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Unknown semantic kind {kind:?} for block {id}")]
    UnknownSemanticId { id: String, kind: String },

    #[error("Invalid {key}={value:?} on block {id}")]
    InvalidAttribute { id: String, key: String, value: String },

    #[error("Annotation {id} is bound to {parent}, which is not in the document")]
    DanglingAnnotation { id: String, parent: String },
}

impl NormalizeError {
    pub fn block_id(&self) -> &str {
        match self {
            NormalizeError::UnknownSemanticId { id, .. }
            | NormalizeError::InvalidAttribute { id, .. }
            | NormalizeError::DanglingAnnotation { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Id suffix marking an annotation of another block; `None` disables
    /// suffix linkage (explicit `bind_to` still applies)
    pub annotation_suffix: Option<String>,
    /// Fail instead of warn when an annotation's parent is absent
    pub require_annotation_parent: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            annotation_suffix: Some(".annotation".to_string()),
            require_annotation_parent: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// No registry entry; marker attributes or defaults were used
    MissingRegistryEntry,
    /// Annotation parent not found
    DanglingAnnotation { parent: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeWarning {
    pub id: String,
    pub kind: WarningKind,
}

impl fmt::Display for NormalizeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            WarningKind::MissingRegistryEntry => {
                write!(f, "{}: no normalization registry entry", self.id)
            }
            WarningKind::DanglingAnnotation { parent } => {
                write!(f, "{}: annotation parent {parent} not found", self.id)
            }
        }
    }
}

/// Normalized tree plus the warnings collected on the way
#[derive(Debug, Clone)]
pub struct Normalized {
    pub document: Document,
    pub warnings: Vec<NormalizeWarning>,
}

struct Context<'a> {
    registry: &'a NormalizationRegistry,
    config: &'a NormalizerConfig,
    ids: HashSet<String>,
    warnings: Vec<NormalizeWarning>,
}

/// Normalize a scanned document.
///
/// Running it again on its own output yields the same tree.
pub fn normalize(
    document: Document,
    registry: &NormalizationRegistry,
    config: &NormalizerConfig,
) -> Result<Normalized, NormalizeError> {
    let ids = document.blocks().iter().map(|b| b.id.clone()).collect();
    let mut ctx = Context {
        registry,
        config,
        ids,
        warnings: vec![],
    };

    let Document {
        api_version,
        meta,
        blocks,
    } = document;
    let blocks = normalize_nodes(blocks, &mut ctx)?;
    let document = Document {
        api_version,
        meta,
        blocks,
    };

    info!(
        blocks = ctx.ids.len(),
        placeholders = document.placeholder_paths().len(),
        warnings = ctx.warnings.len(),
        "normalization complete"
    );
    Ok(Normalized {
        document,
        warnings: ctx.warnings,
    })
}

fn normalize_nodes(nodes: Vec<Node>, ctx: &mut Context<'_>) -> Result<Vec<Node>, NormalizeError> {
    nodes
        .into_iter()
        .map(|node| match node {
            Node::Block(block) => normalize_block(block, ctx).map(Node::Block),
            Node::Wrapper(mut wrapper) => {
                wrapper.content = normalize_nodes(std::mem::take(&mut wrapper.content), ctx)?;
                Ok(Node::Wrapper(wrapper))
            }
            other => Ok(other),
        })
        .collect()
}

fn normalize_block(
    mut block: SemanticBlock,
    ctx: &mut Context<'_>,
) -> Result<SemanticBlock, NormalizeError> {
    let meta = resolve_meta(&block, ctx)?;
    let content = normalize_nodes(std::mem::take(&mut block.content), ctx)?;

    let mut content = prune_body(content, meta.role);
    if meta.role.needs_placeholder() {
        content.push(Node::Placeholder(Placeholder {
            kind: meta.kind,
            block_id: block.id.clone(),
        }));
    }

    debug!(
        id = %block.id,
        role = meta.role.as_str(),
        kind = meta.kind.as_str(),
        authority = ?meta.authority,
        "block normalized"
    );
    block.content = content;
    block.meta = Some(meta);
    Ok(block)
}

/// Applies `keep_in_body` through wrappers, leaving nested blocks alone
fn prune_body(nodes: Vec<Node>, role: Role) -> Vec<Node> {
    nodes
        .into_iter()
        .filter_map(|node| match node {
            Node::Wrapper(mut wrapper) => {
                wrapper.content = prune_body(std::mem::take(&mut wrapper.content), role);
                Some(Node::Wrapper(wrapper))
            }
            node => keep_in_body(&node, role).then_some(node),
        })
        .collect()
}

/// Old placeholders always go; computed blocks also lose authored payload
fn keep_in_body(node: &Node, role: Role) -> bool {
    match node {
        Node::Placeholder(_) => false,
        Node::Fragment(_) => !role.needs_placeholder(),
        Node::Content(value) if role == Role::Computed => !is_authored_payload(value),
        _ => true,
    }
}

fn is_authored_payload(value: &serde_json::Value) -> bool {
    match pandoc::node_type(value) {
        Some(t) if AUTHORED_PAYLOAD.contains(&t) => true,
        // A standalone image paragraph
        Some("Para") | Some("Plain") => value["c"].as_array().is_some_and(|inlines| {
            inlines.len() == 1 && pandoc::node_type(&inlines[0]) == Some("Image")
        }),
        _ => false,
    }
}

fn resolve_meta(block: &SemanticBlock, ctx: &mut Context<'_>) -> Result<BlockMeta, NormalizeError> {
    let mut meta = match ctx.registry.get(&block.id) {
        Some(entry) => meta_from_registry(&block.id, entry)?,
        None => {
            warn!(id = %block.id, "no normalization registry entry, using marker/defaults");
            ctx.warnings.push(NormalizeWarning {
                id: block.id.clone(),
                kind: WarningKind::MissingRegistryEntry,
            });
            meta_from_marker(block)?
        }
    };

    if meta.kind == Kind::Annotation {
        link_annotation(block, &mut meta, ctx)?;
    }
    Ok(meta)
}

fn parse_role(id: &str, value: &str) -> Result<Role, NormalizeError> {
    value.parse().map_err(|value| NormalizeError::InvalidAttribute {
        id: id.to_string(),
        key: ROLE_ATTR.to_string(),
        value,
    })
}

fn parse_visibility(id: &str, value: &str) -> Result<Visibility, NormalizeError> {
    value.parse().map_err(|value| NormalizeError::InvalidAttribute {
        id: id.to_string(),
        key: VISIBILITY_ATTR.to_string(),
        value,
    })
}

fn parse_kind(id: &str, value: &str) -> Result<Kind, NormalizeError> {
    value.parse().map_err(|kind| NormalizeError::UnknownSemanticId {
        id: id.to_string(),
        kind,
    })
}

fn meta_from_registry(id: &str, entry: &NormalizationEntry) -> Result<BlockMeta, NormalizeError> {
    Ok(BlockMeta {
        role: parse_role(id, &entry.role)?,
        kind: parse_kind(id, &entry.kind)?,
        visibility: match &entry.visibility {
            Some(v) => parse_visibility(id, v)?,
            None => Visibility::default(),
        },
        bind_to: entry.bind_to.clone(),
        authority: MetadataAuthority::Registry,
    })
}

fn meta_from_marker(block: &SemanticBlock) -> Result<BlockMeta, NormalizeError> {
    let id = block.id.as_str();
    let role = block.attribute(ROLE_ATTR);
    let kind = block.attribute(KIND_ATTR);
    let visibility = block.attribute(VISIBILITY_ATTR);

    let authority = if role.is_some() || kind.is_some() || visibility.is_some() {
        MetadataAuthority::Marker
    } else {
        MetadataAuthority::Default
    };

    Ok(BlockMeta {
        role: role.map(|r| parse_role(id, r)).transpose()?.unwrap_or(Role::Authored),
        kind: match kind {
            Some(k) => parse_kind(id, k)?,
            None => kind_from_id(id),
        },
        visibility: visibility
            .map(|v| parse_visibility(id, v))
            .transpose()?
            .unwrap_or_default(),
        bind_to: block.attribute(BIND_ATTR).map(String::from),
        authority,
    })
}

/// `metric.face.yaw_mae.v1` -> metric; anything unrecognized -> annotation
fn kind_from_id(id: &str) -> Kind {
    id.split('.')
        .next()
        .and_then(|segment| segment.parse().ok())
        .unwrap_or(Kind::Annotation)
}

fn link_annotation(
    block: &SemanticBlock,
    meta: &mut BlockMeta,
    ctx: &mut Context<'_>,
) -> Result<(), NormalizeError> {
    let parent = meta.bind_to.clone().or_else(|| {
        let suffix = ctx.config.annotation_suffix.as_deref()?;
        block
            .id
            .strip_suffix(suffix)
            .filter(|p| !p.is_empty())
            .map(String::from)
    });
    let Some(parent) = parent else {
        return Ok(());
    };

    // Annotations are prose and never resolved against artifacts
    meta.role = Role::Authored;
    meta.bind_to = Some(parent.clone());

    if !ctx.ids.contains(&parent) {
        if ctx.config.require_annotation_parent {
            return Err(NormalizeError::DanglingAnnotation {
                id: block.id.clone(),
                parent,
            });
        }
        warn!(id = %block.id, parent = %parent, "annotation parent not found");
        ctx.warnings.push(NormalizeWarning {
            id: block.id.clone(),
            kind: WarningKind::DanglingAnnotation { parent },
        });
    }
    Ok(())
}
