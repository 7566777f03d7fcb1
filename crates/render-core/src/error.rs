//! Error taxonomy for renders.

use std::time::Duration;

use crate::ids::FragmentId;

/// Error reported through a render's `error` channel.
///
/// Every variant is isolated to the fragment (or flush) that produced it:
/// the render keeps going and still reaches `end`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("Fragment {fragment} failed: {message}")]
    FragmentFailed { fragment: FragmentId, message: String },

    #[error("Fragment {fragment} raised: {message}")]
    FragmentException { fragment: FragmentId, message: String },

    #[error("Fragment {fragment} timed out after {after:?}")]
    FragmentTimeout { fragment: FragmentId, after: Duration },

    #[error("Fragment {fragment} dropped its completion handle without completing")]
    FragmentAbandoned { fragment: FragmentId },

    #[error("Output sink error: {0}")]
    Sink(#[from] SinkError),
}

impl RenderError {
    /// Build a failure from any producer error, keeping its context chain.
    pub fn failed(fragment: FragmentId, err: impl Into<anyhow::Error>) -> Self {
        Self::FragmentFailed {
            fragment,
            message: format!("{:#}", err.into()),
        }
    }

    /// Fragment this error belongs to, if any.
    pub fn fragment(&self) -> Option<FragmentId> {
        match self {
            Self::FragmentFailed { fragment, .. }
            | Self::FragmentException { fragment, .. }
            | Self::FragmentTimeout { fragment, .. }
            | Self::FragmentAbandoned { fragment } => Some(*fragment),
            Self::Sink(_) => None,
        }
    }

    /// Whether this error came from an elapsed fragment deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::FragmentTimeout { .. })
    }
}

/// Error raised by an output sink adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Destination closed")]
    Closed,

    #[error("Sink already finished")]
    AlreadyFinished,
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err.to_string())
    }
}

/// Error loading a render configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
}
