//! Resolver - Placeholder Substitution
//!
//! Every placeholder is resolved independently: registry lookup, file
//! read, SHA-256 verification, decoder dispatch, decode. Work fans out
//! over a bounded rayon pool; results land in slots indexed by document
//! order and are spliced back after the whole pass completes, so the
//! report is complete even when the build is about to fail.
//!
//! CRITICAL: hash mismatches fail the build in every mode.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::decoders::{ArtifactInput, DecodeOptions, DecoderKey, DecoderTable};
use crate::hashing::{sha256_file, sha256_hex};
use crate::policy::{Action, FailureMode, ResolutionPolicy};
use crate::registry::{ArtifactEntry, ArtifactRegistry};
use crate::report::{ReportEntry, ReportStatus, ResolutionReport};
use crate::tree::{Document, Fragment, Node, Placeholder};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Artifact hash mismatch for {}: evidence changed since registration", ids.join(", "))]
    HashMismatch {
        ids: Vec<String>,
        report: ResolutionReport,
    },

    #[error("{} placeholder(s) unresolved in strict mode: {}", failed.len(), failed.join(", "))]
    Unresolved {
        failed: Vec<String>,
        report: ResolutionReport,
    },

    #[error("Failed to start resolver worker pool: {0}")]
    WorkerPool(String),
}

impl ResolveError {
    /// Complete report of the failed pass, when one was produced
    pub fn report(&self) -> Option<&ResolutionReport> {
        match self {
            ResolveError::HashMismatch { report, .. } | ResolveError::Unresolved { report, .. } => {
                Some(report)
            }
            ResolveError::WorkerPool(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResolverConfig {
    pub mode: FailureMode,
    /// Trust registry digests without reading them back
    pub skip_hash_verify: bool,
    /// Worker threads; 0 lets rayon decide
    pub jobs: usize,
    pub decode: DecodeOptions,
}

impl ResolverConfig {
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn lenient() -> Self {
        Self {
            mode: FailureMode::Lenient,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> ResolutionPolicy {
        ResolutionPolicy::new(self.mode)
    }
}

/// Resolved tree and its report
#[derive(Debug, Clone)]
pub struct Resolution {
    pub document: Document,
    pub report: ResolutionReport,
}

/// Result of one placeholder's work
#[derive(Debug)]
struct Outcome {
    entry: ReportEntry,
    fragment: Option<Value>,
}

impl Outcome {
    fn failed(id: &str, status: ReportStatus, detail: impl Into<String>) -> Self {
        Self {
            entry: ReportEntry::new(id, status, detail),
            fragment: None,
        }
    }
}

/// Replace every placeholder in `document` with its artifact fragment.
pub fn resolve(
    mut document: Document,
    registry: &ArtifactRegistry,
    decoders: &DecoderTable,
    config: &ResolverConfig,
) -> Result<Resolution, ResolveError> {
    let slots = document.placeholder_paths();
    if slots.is_empty() {
        debug!("no placeholders, nothing to resolve");
        return Ok(Resolution {
            document,
            report: ResolutionReport::default(),
        });
    }

    info!(
        placeholders = slots.len(),
        mode = ?config.mode,
        skip_hash_verify = config.skip_hash_verify,
        "resolving placeholders"
    );

    let pool = worker_pool(config.jobs)?;

    // Ordered collect: outcome i belongs to slot i
    let outcomes: Vec<Outcome> = pool.install(|| {
        slots
            .par_iter()
            .map(|(_, placeholder)| resolve_one(placeholder, registry, decoders, config))
            .collect()
    });

    let policy = config.policy();
    let mut entries = Vec::with_capacity(outcomes.len());
    for ((path, _), outcome) in slots.into_iter().zip(outcomes) {
        let Outcome { entry, fragment } = outcome;
        let fragment = match (policy.action(entry.status), fragment) {
            (Action::Splice, Some(block)) => Fragment::new(block),
            (action, _) => {
                warn!(
                    id = %entry.id,
                    status = %entry.status,
                    detail = %entry.detail,
                    fatal = action.is_fatal(),
                    "placeholder unresolved"
                );
                Fragment::stub(&entry.id, entry.status.as_str())
            }
        };
        document.replace_at(&path, Node::Fragment(fragment));
        entries.push(entry);
    }

    let report = ResolutionReport::new(entries);
    let verdict = policy.verdict(&report);
    info!(
        counts = ?report.counts(),
        stubbed = verdict.stubbed.len(),
        "resolution pass complete"
    );

    if verdict.passes() {
        return Ok(Resolution { document, report });
    }
    if !verdict.aborted.is_empty() {
        return Err(ResolveError::HashMismatch {
            ids: verdict.aborted,
            report,
        });
    }
    Err(ResolveError::Unresolved {
        failed: verdict.failed,
        report,
    })
}

fn worker_pool(jobs: usize) -> Result<rayon::ThreadPool, ResolveError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .map_err(|e| ResolveError::WorkerPool(e.to_string()))
}

fn resolve_one(
    placeholder: &Placeholder,
    registry: &ArtifactRegistry,
    decoders: &DecoderTable,
    config: &ResolverConfig,
) -> Outcome {
    let id = placeholder.block_id.as_str();

    let Some(entry) = registry.get(id) else {
        return Outcome::failed(id, ReportStatus::MissingEntry, "no artifact registry entry");
    };

    let path = registry.resolve_uri(&entry.uri);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            return Outcome::failed(id, ReportStatus::MissingFile, format!("{}: {e}", entry.uri));
        }
    };

    if !config.skip_hash_verify {
        let actual = sha256_hex(&bytes);
        if actual != entry.content_hash {
            return Outcome::failed(
                id,
                ReportStatus::HashMismatch,
                format!("{}: expected {}, got {actual}", entry.uri, entry.content_hash),
            );
        }
    }

    let Some(decoder) = decoders.lookup(placeholder.kind, &entry.spec) else {
        return Outcome::failed(
            id,
            ReportStatus::UnsupportedSpec,
            format!("no decoder for {}", DecoderKey::for_spec(placeholder.kind, &entry.spec)),
        );
    };

    let sidecar = if decoder.needs_sidecar() {
        let sidecar_uri = entry.sidecar_uri();
        match fs::read(registry.resolve_uri(&sidecar_uri)) {
            Ok(meta) => {
                if let (Some(expected), false) = (&entry.meta_hash, config.skip_hash_verify) {
                    let actual = sha256_hex(&meta);
                    if &actual != expected {
                        return Outcome::failed(
                            id,
                            ReportStatus::HashMismatch,
                            format!("{sidecar_uri}: expected {expected}, got {actual}"),
                        );
                    }
                }
                Some(meta)
            }
            // Decoder reports the absence
            Err(_) => None,
        }
    } else {
        None
    };

    let target = path.to_string_lossy();
    let input = ArtifactInput {
        id,
        bytes: &bytes,
        sidecar: sidecar.as_deref(),
        target: &target,
        options: &config.decode,
    };

    match decoder.decode(&input) {
        Ok(fragment) => {
            debug!(id, spec = %entry.spec, "placeholder resolved");
            let detail = format!("{} ({})", entry.uri, entry.spec);
            Outcome {
                entry: ReportEntry::new(id, ReportStatus::Resolved, detail),
                fragment: Some(fragment),
            }
        }
        Err(e) => Outcome::failed(id, ReportStatus::DecodeError, format!("{}: {e}", entry.uri)),
    }
}

/// Pre-flight check of every registry entry: file present and digest
/// matching. Entries come back in id order; decoding is not attempted.
/// Files are hashed on a pool of `jobs` workers, like a resolution pass.
pub fn verify_registry(
    registry: &ArtifactRegistry,
    jobs: usize,
) -> Result<ResolutionReport, ResolveError> {
    let entries: Vec<&ArtifactEntry> = registry.entries().collect();
    let pool = worker_pool(jobs)?;
    let checked = pool.install(|| {
        entries
            .par_iter()
            .map(|entry| verify_entry(registry, entry))
            .collect()
    });
    Ok(ResolutionReport::new(checked))
}

fn verify_entry(registry: &ArtifactRegistry, entry: &ArtifactEntry) -> ReportEntry {
    let check = |uri: &str, expected: &str| match sha256_file(&registry.resolve_uri(uri)) {
        Ok(actual) if actual == expected => None,
        Ok(actual) => Some((
            ReportStatus::HashMismatch,
            format!("{uri}: expected {expected}, got {actual}"),
        )),
        Err(e) => Some((ReportStatus::MissingFile, format!("{uri}: {e}"))),
    };
    let failure = check(&entry.uri, &entry.content_hash).or_else(|| {
        let expected = entry.meta_hash.as_deref()?;
        check(&entry.sidecar_uri(), expected)
    });
    match failure {
        Some((status, detail)) => ReportEntry::new(&entry.id, status, detail),
        None => ReportEntry::new(
            &entry.id,
            ReportStatus::Resolved,
            format!("{} ({})", entry.uri, entry.spec),
        ),
    }
}
