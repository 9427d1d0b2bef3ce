//! Registries - Immutable Build Snapshots
//!
//! Two independent mappings are loaded once per build:
//! - the normalization registry (semantic id -> role/kind/visibility)
//! - the artifact registry, AARC (semantic id -> uri/sha256/spec + provenance)
//!
//! Loading validates shape only. No transformation happens here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::hashing::normalize_digest;

pub const SUPPORTED_AARC_VERSIONS: [&str; 2] = ["aarc-1.0", "aarc-1.1"];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in registry: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported registry_version {0} (expected one of aarc-1.0, aarc-1.1)")]
    UnsupportedVersion(String),

    #[error("Duplicate entry id in registry: {0}")]
    DuplicateEntry(String),

    #[error("Invalid entry {id}: {reason}")]
    InvalidEntry { id: String, reason: String },

    #[error("Invalid spec {spec:?} for {id}: expected <format>@<version>")]
    InvalidSpec { id: String, spec: String },
}

// --- Normalization registry ---

/// Raw registry values are kept as strings; the normalizer validates
/// them so errors can point at the offending block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationEntry {
    pub role: String,
    pub kind: String,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default, alias = "bind-to")]
    pub bind_to: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizationRegistry {
    entries: HashMap<String, NormalizationEntry>,
}

impl NormalizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> Result<Self, RegistryError> {
        let entries: HashMap<String, NormalizationEntry> = serde_json::from_str(text)?;
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let text = fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::from_json_str(&text)?;
        debug!(path = %path.display(), entries = registry.len(), "normalization registry loaded");
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&NormalizationEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// --- Artifact registry (AARC) ---

/// `(format, version)` parsed from a spec string like `metric.json@v1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpecTag {
    pub format: String,
    pub version: String,
}

impl SpecTag {
    pub fn new(format: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            version: version.into(),
        }
    }

    /// Format with a trailing `.json` removed, so `metric.json@v1`
    /// and `metric@v1` name the same decoder.
    pub fn canonical_format(&self) -> &str {
        self.format.strip_suffix(".json").unwrap_or(&self.format)
    }
}

impl FromStr for SpecTag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (format, version) = s.split_once('@').ok_or(())?;
        if format.is_empty() || version.is_empty() || version.contains('@') {
            return Err(());
        }
        Ok(Self::new(format, version))
    }
}

impl fmt::Display for SpecTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.format, self.version)
    }
}

/// Build-wide record of how the artifacts were produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub pipeline: Value,
    pub commit: String,
    #[serde(default)]
    pub inputs: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct RawEntry {
    id: String,
    uri: String,
    sha256: String,
    spec: String,
    #[serde(default)]
    meta_uri: Option<String>,
    #[serde(default)]
    meta_sha256: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawArtifactRegistry {
    #[serde(default)]
    registry_version: Option<String>,
    #[serde(default)]
    generated_at: Option<String>,
    artifact_root: String,
    entries: Vec<RawEntry>,
    run: Provenance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub id: String,
    pub uri: String,
    /// Lowercase hex digest, without any `sha256:` prefix
    pub content_hash: String,
    pub spec: SpecTag,
    pub meta_uri: Option<String>,
    pub meta_hash: Option<String>,
}

impl ArtifactEntry {
    /// Sidecar uri: explicit `meta_uri`, else `<uri>.meta.json`
    pub fn sidecar_uri(&self) -> String {
        self.meta_uri
            .clone()
            .unwrap_or_else(|| format!("{}.meta.json", self.uri))
    }
}

/// Immutable AARC snapshot
#[derive(Debug, Clone)]
pub struct ArtifactRegistry {
    pub registry_version: Option<String>,
    pub generated_at: Option<String>,
    pub artifact_root: PathBuf,
    pub provenance: Provenance,
    entries: BTreeMap<String, ArtifactEntry>,
}

impl ArtifactRegistry {
    /// Parse an AARC document. Relative `artifact_root` values are
    /// resolved against `base_dir`.
    pub fn from_json_str(text: &str, base_dir: &Path) -> Result<Self, RegistryError> {
        let raw: RawArtifactRegistry = serde_json::from_str(text)?;

        if let Some(version) = &raw.registry_version {
            if !SUPPORTED_AARC_VERSIONS.contains(&version.as_str()) {
                return Err(RegistryError::UnsupportedVersion(version.clone()));
            }
        }

        let root = PathBuf::from(&raw.artifact_root);
        let artifact_root = if root.is_absolute() {
            root
        } else {
            base_dir.join(root)
        };

        let mut entries = BTreeMap::new();
        for e in raw.entries {
            let entry = validate_entry(e)?;
            if entries.contains_key(&entry.id) {
                return Err(RegistryError::DuplicateEntry(entry.id));
            }
            entries.insert(entry.id.clone(), entry);
        }

        Ok(Self {
            registry_version: raw.registry_version,
            generated_at: raw.generated_at,
            artifact_root,
            provenance: raw.run,
            entries,
        })
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let text = fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let registry = Self::from_json_str(&text, base_dir)?;
        debug!(
            path = %path.display(),
            entries = registry.len(),
            root = %registry.artifact_root.display(),
            "artifact registry loaded"
        );
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&ArtifactEntry> {
        self.entries.get(id)
    }

    /// Entries in id order
    pub fn entries(&self) -> impl Iterator<Item = &ArtifactEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Absolute location of a (validated, root-relative) uri
    pub fn resolve_uri(&self, uri: &str) -> PathBuf {
        self.artifact_root.join(uri)
    }
}

fn validate_entry(e: RawEntry) -> Result<ArtifactEntry, RegistryError> {
    let invalid = |id: &str, reason: &str| RegistryError::InvalidEntry {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    if e.id.trim().is_empty() {
        return Err(invalid("<empty>", "id must not be empty"));
    }
    check_uri(&e.id, &e.uri)?;
    if let Some(meta_uri) = &e.meta_uri {
        check_uri(&e.id, meta_uri)?;
    }
    if normalize_digest(&e.sha256).is_empty() {
        return Err(invalid(&e.id, "sha256 must not be empty"));
    }
    let spec = e.spec.parse::<SpecTag>().map_err(|_| RegistryError::InvalidSpec {
        id: e.id.clone(),
        spec: e.spec.clone(),
    })?;

    Ok(ArtifactEntry {
        content_hash: normalize_digest(&e.sha256),
        meta_hash: e.meta_sha256.as_deref().map(normalize_digest),
        id: e.id,
        uri: e.uri,
        spec,
        meta_uri: e.meta_uri,
    })
}

/// A uri must name a file under the artifact root
fn check_uri(id: &str, uri: &str) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidEntry {
        id: id.to_string(),
        reason: format!("uri {uri:?} {reason}"),
    };
    if uri.trim().is_empty() {
        return Err(invalid("is empty"));
    }
    if uri.contains("://") {
        return Err(invalid("must be a path under artifact_root"));
    }
    for component in Path::new(uri).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(invalid("escapes artifact_root")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("must be relative to artifact_root"))
            }
        }
    }
    Ok(())
}
