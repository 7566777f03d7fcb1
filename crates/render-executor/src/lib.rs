//! Ordered scheduling and execution of async render fragments.
//!
//! This crate turns the streaming primitives into a render:
//! - `RenderContext` - Fluent façade for writes, fragments and events
//! - `FragmentScheduler` - Pending tracking and document-order flushing
//! - `Completion` - One-shot handle a fragment callback resolves through
//! - `FragmentOptions` - Per-fragment timeout and fallback
//! - `apply_fallback` - Content substituted for failed fragments

mod context;
mod fallback;
mod options;
mod runner;
mod scheduler;

pub use context::*;
pub use fallback::*;
pub use options::*;
pub use runner::{Completion, FragmentCallback};
pub use scheduler::*;
