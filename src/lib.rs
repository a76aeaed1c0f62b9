//! Layered image compositor core.
//!
//! Layers are positioned, scaled and blended bitmaps on a pannable, zoomable
//! canvas. Dragging a layer over a larger one raises overlap events, and any
//! layer can be warped by a displacement map. Pixels live behind the
//! [`engine::RenderEngine`] boundary; [`engine::skia::TinySkiaEngine`] is the
//! bundled CPU engine.

pub mod blend;
pub mod config;
pub mod displacement;
pub mod engine;
pub mod error;
pub mod interaction;
pub mod layer;
pub mod overlap;
pub mod project;
pub mod session;
pub mod store;
pub mod transform;
pub mod workspace;

pub use error::CompositorError;
pub use session::Session;
pub use workspace::Workspace;
