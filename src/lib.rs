//! LitePub Core - Evidence-Backed Document Builder
//!
//! # The Build Contract
//! 1. Registries Are Snapshots (loaded once, passed explicitly)
//! 2. Structure Before Resolution (scan and normalize fail fast)
//! 3. Evidence Is Hashed (a changed artifact always fails the build)
//! 4. Deterministic Output (same inputs, byte-identical trees and reports)
//! 5. Reports Are Complete (every placeholder, in document order)
//! 6. Output Is Checked (a resolved tree is validated before it is written)

pub mod authority;
pub mod config;
pub mod decoders;
pub mod hashing;
pub mod normalizer;
pub mod pandoc;
pub mod pipeline;
pub mod policy;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod scanner;
pub mod tree;
pub mod validator;

pub use authority::MetadataAuthority;
pub use config::{BuildConfig, ConfigError, Overrides};
pub use decoders::{DecodeError, DecodeOptions, DecoderTable, FormatDecoder};
pub use hashing::{canonical_json, compute_build_fingerprint, sha256_hex};
pub use normalizer::{normalize, NormalizeError, NormalizeWarning, Normalized, NormalizerConfig};
pub use pipeline::{BuildOutput, BuildPipeline, BuildSummary, PipelineError};
pub use policy::{FailureMode, ResolutionPolicy};
pub use registry::{ArtifactRegistry, NormalizationRegistry, Provenance, RegistryError};
pub use report::{ReportEntry, ReportStatus, ResolutionReport};
pub use resolver::{resolve, verify_registry, Resolution, ResolveError, ResolverConfig};
pub use scanner::{scan, ScanError};
pub use tree::{Document, Kind, Node, Role, Visibility};
pub use validator::{validate_resolved, ValidateError};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
