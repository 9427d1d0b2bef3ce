//! Build configuration
//!
//! Optional TOML file with `[normalizer]` and `[resolver]` tables. Every
//! field has a default, so an empty file is a valid configuration.
//! Command-line flags are applied on top by the caller.
//!
//! ```toml
//! [normalizer]
//! annotation_suffix = ".annotation"
//! require_annotation_parent = false
//!
//! [resolver]
//! mode = "lenient"
//! skip_hash_verify = false
//! jobs = 4
//!
//! [resolver.decode]
//! embed_figures = true
//!
//! [resolver.decode.limits]
//! max_table_rows = 5000
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::normalizer::NormalizerConfig;
use crate::policy::FailureMode;
use crate::resolver::ResolverConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub normalizer: NormalizerConfig,
    pub resolver: ResolverConfig,
}

/// Command-line overrides; `None`/`false` leaves the file value alone
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub lenient: bool,
    pub skip_hash_verify: bool,
    pub jobs: Option<usize>,
    pub embed_figures: bool,
}

impl BuildConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File config when a path is given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        if overrides.lenient {
            self.resolver.mode = FailureMode::Lenient;
        }
        if overrides.skip_hash_verify {
            self.resolver.skip_hash_verify = true;
        }
        if let Some(jobs) = overrides.jobs {
            self.resolver.jobs = jobs;
        }
        if overrides.embed_figures {
            self.resolver.decode.embed_figures = true;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = BuildConfig::from_toml_str("").unwrap();
        assert_eq!(config, BuildConfig::default());
        assert_eq!(config.resolver.mode, FailureMode::Strict);
        assert_eq!(config.normalizer.annotation_suffix.as_deref(), Some(".annotation"));
    }

    #[test]
    fn parses_nested_tables() {
        let config = BuildConfig::from_toml_str(
            r#"
            [normalizer]
            require_annotation_parent = true

            [resolver]
            mode = "lenient"
            jobs = 3

            [resolver.decode.limits]
            max_table_rows = 50
            "#,
        )
        .unwrap();
        assert!(config.normalizer.require_annotation_parent);
        assert_eq!(config.resolver.mode, FailureMode::Lenient);
        assert_eq!(config.resolver.jobs, 3);
        assert_eq!(config.resolver.decode.limits.max_table_rows, 50);
        assert_eq!(config.resolver.decode.limits.max_table_cols, 100);
    }

    #[test]
    fn rejects_unknown_sections() {
        assert!(BuildConfig::from_toml_str("[render]\ntheme = \"dark\"").is_err());
    }

    #[test]
    fn flags_override_file() {
        let config = BuildConfig::default().apply(Overrides {
            lenient: true,
            jobs: Some(2),
            embed_figures: true,
            ..Overrides::default()
        });
        assert_eq!(config.resolver.mode, FailureMode::Lenient);
        assert_eq!(config.resolver.jobs, 2);
        assert!(config.resolver.decode.embed_figures);
        assert!(!config.resolver.skip_hash_verify);
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.toml");
        fs::write(&path, "[resolver]\njobs = \"many\"").unwrap();
        let err = BuildConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("build.toml"));
        assert!(BuildConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
