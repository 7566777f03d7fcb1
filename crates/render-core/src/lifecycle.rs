//! Render lifecycle tracking.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Lifecycle phase of a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderPhase {
    /// Accepting top-level writes and fragment declarations.
    #[default]
    Building,
    /// `end_render` was called; waiting for pending fragments.
    Ended,
    /// Everything has been flushed and the sink finished.
    Flushed,
}

impl RenderPhase {
    /// Whether top-level writes are still accepted.
    pub fn accepts_writes(&self) -> bool {
        matches!(self, Self::Building)
    }

    /// Whether the render has fully completed.
    pub fn is_flushed(&self) -> bool {
        matches!(self, Self::Flushed)
    }
}

/// Timing marks recorded over the course of a render.
#[derive(Debug, Clone)]
pub struct TimingContext {
    start: Instant,
    marks: HashMap<String, Instant>,
}

impl TimingContext {
    /// Create a new timing context starting now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            marks: HashMap::new(),
        }
    }

    /// Record a timing mark. Later marks with the same name overwrite earlier ones.
    pub fn mark(&mut self, name: &str) {
        self.marks.insert(name.to_string(), Instant::now());
    }

    /// Record a timing mark only if it has not been recorded yet.
    pub fn mark_once(&mut self, name: &str) {
        self.marks
            .entry(name.to_string())
            .or_insert_with(Instant::now);
    }

    /// Time from render start to a named mark.
    pub fn since_start(&self, name: &str) -> Option<Duration> {
        self.marks.get(name).map(|t| t.duration_since(self.start))
    }

    /// Time to the first byte handed to the sink.
    pub fn time_to_first_flush(&self) -> Option<Duration> {
        self.since_start("first_flush")
    }

    /// Time to the `end` notification.
    pub fn time_to_end(&self) -> Option<Duration> {
        self.since_start("end")
    }

    /// Elapsed time since the render started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for TimingContext {
    fn default() -> Self {
        Self::new()
    }
}
