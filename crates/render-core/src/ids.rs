//! Render and fragment identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a single render (one root context and its fragment tree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderId(pub u64);

impl RenderId {
    /// Allocate the next process-wide render ID.
    pub fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "render-{}", self.0)
    }
}

/// Identifier of an async fragment, unique within its render.
///
/// IDs are handed out in declaration order, so a lower ID was declared earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentId(pub u64);

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
