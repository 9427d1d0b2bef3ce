//! Build Pipeline - Single Entry Point
//!
//! scan -> normalize -> resolve -> validate, each stage consuming the
//! whole output of the one before. Structural errors abort before anything is
//! resolved; resolution errors carry the complete report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::{BuildConfig, ConfigError};
use crate::decoders::DecoderTable;
use crate::hashing::compute_build_fingerprint;
use crate::normalizer::{normalize, NormalizeError, NormalizeWarning, Normalized};
use crate::policy::FailureMode;
use crate::registry::{ArtifactRegistry, NormalizationRegistry, Provenance, RegistryError};
use crate::report::{ReportStatus, ResolutionReport};
use crate::resolver::{resolve, verify_registry, ResolveError, Resolution};
use crate::scanner::{scan, ScanError};
use crate::tree::{Document, TreeError};
use crate::validator::{validate_resolved, ValidateError};
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validate(#[from] ValidateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Resolution failures (the report exists) versus everything else
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::Resolve(
                ResolveError::HashMismatch { .. } | ResolveError::Unresolved { .. }
            )
        )
    }

    pub fn report(&self) -> Option<&ResolutionReport> {
        match self {
            PipelineError::Resolve(e) => e.report(),
            _ => None,
        }
    }
}

/// Non-deterministic facts about one build, kept apart from the outputs
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub build_id: String,
    pub generated_at: DateTime<Utc>,
    pub engine_version: String,
    pub mode: FailureMode,
    pub skip_hash_verify: bool,
    pub input_fingerprint: String,
    pub provenance: Provenance,
    pub counts: BTreeMap<ReportStatus, usize>,
    pub warnings: Vec<NormalizeWarning>,
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub normalized: Document,
    pub resolved: Document,
    pub report: ResolutionReport,
    pub summary: BuildSummary,
}

/// The build pipeline - the only path from a parsed tree to a resolved one
pub struct BuildPipeline {
    config: BuildConfig,
    decoders: DecoderTable,
}

impl BuildPipeline {
    pub fn new(config: BuildConfig) -> Self {
        Self::with_decoders(config, DecoderTable::new())
    }

    pub fn with_decoders(config: BuildConfig, decoders: DecoderTable) -> Self {
        Self { config, decoders }
    }

    /// Scan markers and attach metadata
    pub fn normalize(
        &self,
        raw: Document,
        registry: &NormalizationRegistry,
    ) -> Result<Normalized, PipelineError> {
        let scanned = scan(raw)?;
        Ok(normalize(scanned, registry, &self.config.normalizer)?)
    }

    /// Resolve placeholders and validate the resolved tree
    pub fn resolve(
        &self,
        normalized: Document,
        aarc: &ArtifactRegistry,
    ) -> Result<Resolution, PipelineError> {
        let resolution = resolve(normalized, aarc, &self.decoders, &self.config.resolver)?;
        validate_resolved(&resolution.document, self.config.resolver.decode.allow_raw)?;
        Ok(resolution)
    }

    /// Verify every AARC entry without touching a document
    pub fn check(&self, aarc: &ArtifactRegistry) -> Result<ResolutionReport, PipelineError> {
        Ok(verify_registry(aarc, self.config.resolver.jobs)?)
    }

    /// Full build
    pub fn build(
        &self,
        raw: Document,
        registry: &NormalizationRegistry,
        aarc: &ArtifactRegistry,
    ) -> Result<BuildOutput, PipelineError> {
        let Normalized { document, warnings } = self.normalize(raw, registry)?;
        let normalized = document;

        let input_fingerprint = compute_build_fingerprint(
            &normalized.to_pandoc(),
            aarc.entries().map(|e| (e.id.as_str(), e.content_hash.as_str())),
            ENGINE_VERSION,
        )?;

        let Resolution { document, report } = self.resolve(normalized.clone(), aarc)?;

        let summary = BuildSummary {
            build_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            engine_version: ENGINE_VERSION.to_string(),
            mode: self.config.resolver.mode,
            skip_hash_verify: self.config.resolver.skip_hash_verify,
            input_fingerprint,
            provenance: aarc.provenance.clone(),
            counts: report.counts(),
            warnings,
        };
        info!(build_id = %summary.build_id, resolved = report.len(), "build complete");

        Ok(BuildOutput {
            normalized,
            resolved: document,
            report,
            summary,
        })
    }
}

impl Default for BuildPipeline {
    fn default() -> Self {
        Self::new(BuildConfig::default())
    }
}

/// Read a tree in the renderer's native JSON
pub fn read_document(path: &Path) -> Result<Document, PipelineError> {
    let text = fs::read_to_string(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Document::from_json_str(&text)?)
}

/// Deterministic JSON text for an output file
pub fn to_output_json<T: Serialize>(value: &T) -> Result<String, PipelineError> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text)
}
