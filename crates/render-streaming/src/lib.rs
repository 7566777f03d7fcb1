//! Output sinks, segment arena and flush control for ordered rendering.
//!
//! This crate provides the leaf layer under the scheduler:
//! - `OutputSink` - Uniform `write` / `finish` contract over any destination
//! - `SegmentArena` - Ordered literal / placeholder sequences of a render
//! - `FlushController` - When flushed content is handed to the sink

mod flush;
mod segment;
mod sink;

pub use flush::*;
pub use segment::*;
pub use sink::*;
