//! Pipeline configuration
//!
//! Loaded from TOML. Every field has a default, so an empty document is a
//! valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::EpubVersion;
use crate::packaging::{CoverMode, PackagingEngine};
use crate::project::CostSchedule;
use crate::retry::RetryConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    /// Upper bound on a single phase. `None` lets a phase run until it settles.
    #[serde(default = "default_phase_deadline_secs")]
    pub phase_deadline_secs: Option<u64>,
    #[serde(default)]
    pub cover_mode: CoverMode,
    #[serde(default)]
    pub epub_version: EpubVersion,
    #[serde(default)]
    pub costs: CostSchedule,
}

fn default_phase_deadline_secs() -> Option<u64> { Some(300) }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            phase_deadline_secs: default_phase_deadline_secs(),
            cover_mode: CoverMode::default(),
            epub_version: EpubVersion::default(),
            costs: CostSchedule::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn phase_deadline(&self) -> Option<Duration> {
        self.phase_deadline_secs.map(Duration::from_secs)
    }

    pub fn packaging_engine(&self) -> PackagingEngine {
        PackagingEngine::new(self.epub_version, self.cover_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(PipelineConfig::from_toml_str("").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = PipelineConfig::from_toml_str(
            r#"
cover_mode = "required"
epub_version = "v2"

[retry]
max_attempts = 5

[costs]
registration_cents = 6500
"#,
        )
        .unwrap();
        assert_eq!(config.cover_mode, CoverMode::Required);
        assert_eq!(config.epub_version, EpubVersion::V2);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 200);
        assert_eq!(config.costs.registration_cents, 6_500);
        assert_eq!(config.costs.cover_cents, 400);
        assert_eq!(config.phase_deadline(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "phase_deadline_secs = 12").unwrap();
        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.phase_deadline(), Some(Duration::from_secs(12)));

        assert!(matches!(PipelineConfig::load("/nonexistent/forgepress.toml"), Err(ConfigError::Io { .. })));
        assert!(matches!(PipelineConfig::from_toml_str("retry = 3"), Err(ConfigError::Parse(_))));
    }
}
