//! Per-fragment options.

use std::time::Duration;

use render_core::FallbackStrategy;

/// Options for a single async fragment.
///
/// Unset fields fall back to the render's `RenderConfig`.
#[derive(Debug, Clone, Default)]
pub struct FragmentOptions {
    /// Name used in logs.
    pub name: Option<String>,
    /// Deadline for the fragment to complete.
    pub timeout: Option<Duration>,
    /// Content substituted if the fragment fails.
    pub fallback: Option<FallbackStrategy>,
}

impl FragmentOptions {
    /// Options with nothing overridden.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a named fragment.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Set the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the fallback.
    pub fn with_fallback(mut self, fallback: FallbackStrategy) -> Self {
        self.fallback = Some(fallback);
        self
    }
}
