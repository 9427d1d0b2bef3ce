//! Format Decoders
//!
//! One decoder per `(kind, format, version)`. Each is a pure function from
//! artifact bytes to a tree fragment, or a typed decode failure.
//! Versions are independent: adding `v2` never touches `v1` documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::registry::SpecTag;
use crate::tree::Kind;

pub mod figure;
pub mod metric;
pub mod table_pandoc;
pub mod table_simple;

pub use figure::FigureBinaryV1;
pub use metric::MetricV1;
pub use table_pandoc::TablePandocV1;
pub use table_simple::TableSimpleV1;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Schema violation: {0}")]
    Schema(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Sidecar metadata: {0}")]
    Sidecar(String),

    #[error("Unrecognized image data: {0}")]
    Image(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecoderKey {
    pub kind: Kind,
    pub format: String,
    pub version: String,
}

impl DecoderKey {
    pub fn new(kind: Kind, format: &str, version: &str) -> Self {
        Self {
            kind,
            format: format.to_string(),
            version: version.to_string(),
        }
    }

    pub fn for_spec(kind: Kind, spec: &SpecTag) -> Self {
        Self::new(kind, spec.canonical_format(), &spec.version)
    }
}

impl fmt::Display for DecoderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.kind, self.format, self.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeLimits {
    pub max_table_rows: usize,
    pub max_table_cols: usize,
    pub max_table_cells: usize,
    pub max_image_bytes: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_table_rows: 10_000,
            max_table_cols: 100,
            max_table_cells: 200_000,
            max_image_bytes: 50_000_000,
        }
    }
}

impl DecodeLimits {
    pub fn check_table(&self, rows: usize, cols: usize) -> Result<(), DecodeError> {
        if cols > self.max_table_cols {
            return Err(DecodeError::LimitExceeded(format!(
                "{cols} columns > {}",
                self.max_table_cols
            )));
        }
        if rows > self.max_table_rows {
            return Err(DecodeError::LimitExceeded(format!(
                "{rows} rows > {}",
                self.max_table_rows
            )));
        }
        if rows * cols > self.max_table_cells {
            return Err(DecodeError::LimitExceeded(format!(
                "{} cells > {}",
                rows * cols,
                self.max_table_cells
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    pub limits: DecodeLimits,
    /// Permit RawBlock/RawInline/Div inside pass-through tables
    pub allow_raw: bool,
    /// Inline figure bytes as `data:` URIs instead of linking the file
    pub embed_figures: bool,
}

/// Everything a decoder may look at
#[derive(Debug, Clone, Copy)]
pub struct ArtifactInput<'a> {
    pub id: &'a str,
    pub bytes: &'a [u8],
    /// Companion metadata, for decoders that ask for one
    pub sidecar: Option<&'a [u8]>,
    /// Location the renderer should use to reference the artifact
    pub target: &'a str,
    pub options: &'a DecodeOptions,
}

/// Decoder trait - produces a fragment or a typed failure
pub trait FormatDecoder: Send + Sync {
    fn key(&self) -> DecoderKey;

    fn decode(&self, input: &ArtifactInput<'_>) -> Result<Value, DecodeError>;

    /// Whether the resolver must load a sidecar before decoding
    fn needs_sidecar(&self) -> bool {
        false
    }
}

/// Explicit decoder table
pub struct DecoderTable {
    decoders: HashMap<DecoderKey, Box<dyn FormatDecoder>>,
}

impl DecoderTable {
    pub fn new() -> Self {
        let mut table = Self::empty();
        table.register(Box::new(MetricV1));
        table.register(Box::new(TableSimpleV1));
        table.register(Box::new(TablePandocV1));
        table.register(Box::new(FigureBinaryV1));
        table
    }

    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Add or replace the decoder for its key
    pub fn register(&mut self, decoder: Box<dyn FormatDecoder>) {
        self.decoders.insert(decoder.key(), decoder);
    }

    pub fn lookup(&self, kind: Kind, spec: &SpecTag) -> Option<&dyn FormatDecoder> {
        self.decoders
            .get(&DecoderKey::for_spec(kind, spec))
            .map(|d| d.as_ref())
    }

    pub fn keys(&self) -> Vec<DecoderKey> {
        let mut keys: Vec<_> = self.decoders.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for DecoderTable {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn schema(msg: impl Into<String>) -> DecodeError {
    DecodeError::Schema(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_covers_four_formats() {
        let table = DecoderTable::new();
        let keys: Vec<String> = table.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "metric:metric@v1",
                "table:table.pandoc@v1",
                "table:table.simple@v1",
                "figure:figure.binary@v1",
            ]
        );
    }

    #[test]
    fn lookup_accepts_json_suffix() {
        let table = DecoderTable::new();
        let spec: SpecTag = "metric.json@v1".parse().unwrap();
        assert!(table.lookup(Kind::Metric, &spec).is_some());
        let spec: SpecTag = "table.simple.json@v1".parse().unwrap();
        assert!(table.lookup(Kind::Table, &spec).is_some());
    }

    #[test]
    fn lookup_misses_unknown_version_and_kind() {
        let table = DecoderTable::new();
        let v2: SpecTag = "metric@v2".parse().unwrap();
        assert!(table.lookup(Kind::Metric, &v2).is_none());
        let v1: SpecTag = "metric@v1".parse().unwrap();
        assert!(table.lookup(Kind::Table, &v1).is_none());
    }

    #[test]
    fn limits_reject_large_tables() {
        let limits = DecodeLimits {
            max_table_cells: 10,
            ..DecodeLimits::default()
        };
        assert!(limits.check_table(3, 3).is_ok());
        assert!(matches!(limits.check_table(4, 3), Err(DecodeError::LimitExceeded(_))));
    }
}
