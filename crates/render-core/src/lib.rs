//! Core abstractions for ordered async rendering.
//!
//! This crate provides the fundamental types shared by every layer:
//! - `FragmentId` / `RenderId` - Identifiers for renders and their fragments
//! - `RenderError` - Error taxonomy reported through `error` events
//! - `RenderEvent` / `EventEmitter` - Observer list for render notifications
//! - `RenderPhase` / `TimingContext` - Render lifecycle tracking
//! - `RenderConfig` - Render configuration

mod config;
mod error;
mod events;
mod ids;
mod lifecycle;

pub use config::*;
pub use error::*;
pub use events::*;
pub use ids::*;
pub use lifecycle::*;
