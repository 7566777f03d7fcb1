//! Fallback content for failed fragments.

use render_core::{FallbackStrategy, RenderError};

/// Content a failed or timed-out fragment contributes, if any.
pub fn apply_fallback(strategy: &FallbackStrategy, error: &RenderError) -> Option<String> {
    match strategy {
        FallbackStrategy::Skip => None,
        FallbackStrategy::Render { content } => Some(content.clone()),
        FallbackStrategy::ErrorText => Some(error.to_string()),
    }
}
