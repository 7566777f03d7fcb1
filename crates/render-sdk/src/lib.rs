//! Public SDK for ordered async rendering.
//!
//! A render lets a producer write output synchronously while handing parts
//! of it to async work. Output always comes out in declaration order:
//!
//! ```ignore
//! use render_sdk::prelude::*;
//!
//! let ctx = render_sdk::create();
//! ctx.on_error(|e| eprintln!("{e}"))
//!     .begin_render()
//!     .write("1")
//!     .begin_async_task(FragmentOptions::new(), |_| async {
//!         tokio::time::sleep(Duration::from_millis(200)).await;
//!         Ok(Some("2".to_string()))
//!     })
//!     .write("3")
//!     .end_render();
//!
//! let outcome = ctx.finished().await;
//! assert_eq!(outcome.output.as_deref(), Some("123"));
//! ```

pub use render_core;
pub use render_executor;
pub use render_observability;
pub use render_streaming;

use render_core::RenderConfig;
use render_executor::RenderContext;
use render_streaming::OutputSink;

/// Create a render accumulating its output in memory.
pub fn create() -> RenderContext {
    RenderContext::in_memory(RenderConfig::default())
}

/// Create a render writing to `sink`.
pub fn create_with(sink: impl OutputSink + 'static) -> RenderContext {
    RenderContext::new(RenderConfig::default(), sink)
}

/// Create a render with explicit configuration.
pub fn create_with_config(config: RenderConfig, sink: impl OutputSink + 'static) -> RenderContext {
    RenderContext::new(config, sink)
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use std::time::Duration;

    pub use render_core::*;
    pub use render_executor::*;
    pub use render_observability::*;
    pub use render_streaming::*;
}
