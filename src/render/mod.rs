//! Rendering context and the raw-sample pump feeding it.

pub mod context;
pub mod pump;

pub use context::{RenderContext, RenderHandle, RenderJob};
pub use pump::{Pacer, RenderPump};
