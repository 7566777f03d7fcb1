//! Observability for ordered async renders.
//!
//! This crate provides:
//! - `MetricsCollector` - Builds `RenderMetrics` from render events
//! - `MetricsHandle` - Collector attached to a live `RenderContext`

mod metrics;

pub use metrics::*;

// Re-export the ids metrics are keyed by
pub use render_core::{FragmentId, RenderId};
