//! Render configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// When flushed content is handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FlushPolicy {
    /// One sink write per emitted segment.
    #[default]
    EachSegment,
    /// Coalesce everything emitted by one flush pass into a single write.
    PerPass,
    /// Buffer until at least `bytes` are pending, or the render ends.
    Threshold { bytes: usize },
}

/// Content substituted for a fragment that failed or timed out.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Contribute nothing.
    #[default]
    Skip,
    /// Contribute fixed content.
    Render { content: String },
    /// Contribute the error's message.
    ErrorText,
}

impl FallbackStrategy {
    /// Create a fallback that renders fixed content.
    pub fn content(content: impl Into<String>) -> Self {
        Self::Render {
            content: content.into(),
        }
    }
}

/// Configuration shared by every fragment of a render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Deadline applied to fragments declared without their own timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,

    /// Flush policy.
    #[serde(default)]
    pub flush: FlushPolicy,

    /// Fallback applied to failed fragments without their own fallback.
    #[serde(default)]
    pub fallback: FallbackStrategy,
}

impl RenderConfig {
    /// Load config from a file. `.json` files are parsed as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        if path.extension().is_some_and(|ext| ext == "json") {
            Ok(serde_json::from_str(&content)?)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Parse config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Set the default fragment timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the flush policy.
    pub fn with_flush(mut self, flush: FlushPolicy) -> Self {
        self.flush = flush;
        self
    }

    /// Set the default fallback.
    pub fn with_fallback(mut self, fallback: FallbackStrategy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Default fragment timeout, if any.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}
