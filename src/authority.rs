//! Metadata Authority
//!
//! Records where a block's role/kind/visibility came from, so the
//! normalizer has one precedence order instead of scattered fallbacks.

use serde::{Deserialize, Serialize};

/// Source of a semantic block's metadata, in descending precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataAuthority {
    /// Normalization registry entry (authoritative)
    Registry,
    /// Attributes written on the BEGIN marker or the source Div
    Marker,
    /// Built-in defaults (role=authored, visibility=external)
    Default,
}

impl Default for MetadataAuthority {
    fn default() -> Self {
        Self::Default
    }
}
