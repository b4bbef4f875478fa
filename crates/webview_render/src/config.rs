use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid render config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid render config: {0}")]
    Invalid(String),
}

/// Top-level configuration for both rendering halves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderConfig {
    pub progressive: ProgressiveRenderConfig,
    pub notebook: NotebookConfig,
}

impl RenderConfig {
    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        let config: RenderConfig = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&source)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.progressive;
        if p.min_rate <= 0.0 || p.min_rate > p.max_rate {
            return Err(ConfigError::Invalid(format!(
                "minRate {} must be positive and not exceed maxRate {}",
                p.min_rate, p.max_rate
            )));
        }
        if p.settled_min_rate > p.max_rate {
            return Err(ConfigError::Invalid(format!(
                "settledMinRate {} exceeds maxRate {}",
                p.settled_min_rate, p.max_rate
            )));
        }
        if p.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tickIntervalMs must be non-zero".into()));
        }
        Ok(())
    }
}

/// Word-rate model for progressive chat rendering, in words per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProgressiveRenderConfig {
    /// Lower clamp while the response is still streaming.
    pub min_rate: f64,
    pub max_rate: f64,
    /// Lower clamp once the response is complete or paused.
    pub settled_min_rate: f64,
    /// Rate used before any timing history exists, while streaming.
    pub default_streaming_rate: f64,
    /// Rate used before any timing history exists, once complete or paused.
    pub default_settled_rate: f64,
    pub tick_interval_ms: u64,
}

impl Default for ProgressiveRenderConfig {
    fn default() -> Self {
        Self {
            min_rate: 5.0,
            max_rate: 2000.0,
            settled_min_rate: 80.0,
            default_streaming_rate: 8.0,
            default_settled_rate: 80.0,
            tick_interval_ms: 50,
        }
    }
}

impl ProgressiveRenderConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotebookConfig {
    /// Fallback delay for idle-deferred output work when the host never
    /// reports idleness.
    pub idle_timeout_ms: u64,
}

impl Default for NotebookConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 300,
        }
    }
}

impl NotebookConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_object_yields_defaults() {
        let config = RenderConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RenderConfig::default());
        assert_eq!(config.progressive.tick_interval(), Duration::from_millis(50));
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config = RenderConfig::from_json_str(
            r#"{"progressive": {"maxRate": 500}, "notebook": {"idleTimeoutMs": 10}}"#,
        )
        .unwrap();
        assert_eq!(config.progressive.max_rate, 500.0);
        assert_eq!(config.progressive.min_rate, 5.0);
        assert_eq!(config.notebook.idle_timeout(), Duration::from_millis(10));
    }

    #[test]
    fn rejects_inverted_rate_bounds() {
        let err = RenderConfig::from_json_str(r#"{"progressive": {"minRate": 10, "maxRate": 1}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.json");
        std::fs::write(&path, r#"{"progressive": {"tickIntervalMs": 16}}"#).unwrap();
        let config = RenderConfig::load(&path).unwrap();
        assert_eq!(config.progressive.tick_interval_ms, 16);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = RenderConfig::load("/nonexistent/render.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
