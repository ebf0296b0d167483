//! Knowledge base configuration, persisted as TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::propagate::EvaluationOrder;
use crate::store::watch::DEFAULT_PROPAGATION_LIMIT;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Settings for a [`KnowledgeBase`](crate::engine::KnowledgeBase).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KbConfig {
    /// Deepest goal nesting before resolution gives up with `DepthExceeded`.
    pub max_depth: usize,
    /// Minimum link-predictor probability reported as an answer.
    pub fallback_threshold: f64,
    /// Register `=`, `is`, comparisons and friends on construction.
    pub standard_builtins: bool,
    /// Deepest nesting of attribute watches triggering further watches.
    /// Zero disables watches.
    pub propagation_limit: usize,
    /// How propagation epochs evaluate their transitions.
    pub evaluation_order: EvaluationOrder,
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            max_depth: 512,
            fallback_threshold: 0.5,
            standard_builtins: true,
            propagation_limit: DEFAULT_PROPAGATION_LIMIT,
            evaluation_order: EvaluationOrder::Sequential,
        }
    }
}

impl KbConfig {
    /// Parse from TOML text. Missing fields take their defaults.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Self::parse(content, "<inline>")
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    fn parse(content: &str, origin: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid {
                message: "max_depth must be greater than zero".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.fallback_threshold) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "fallback_threshold must lie in [0, 1], got {}",
                    self.fallback_threshold
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = KbConfig::from_toml_str("max_depth = 64").unwrap();
        assert_eq!(config.max_depth, 64);
        assert_eq!(config.fallback_threshold, 0.5);
        assert!(config.standard_builtins);
        assert_eq!(config.propagation_limit, DEFAULT_PROPAGATION_LIMIT);
        assert_eq!(config.evaluation_order, EvaluationOrder::Sequential);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("kb.toml");
        let config = KbConfig {
            max_depth: 100,
            evaluation_order: EvaluationOrder::Shuffled { seed: 42 },
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(KbConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn invalid_values_rejected() {
        let err = KbConfig::from_toml_str("max_depth = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        let err = KbConfig::from_toml_str("fallback_threshold = 1.5").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        let err = KbConfig::from_toml_str("max_depth = \"deep\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = KbConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
