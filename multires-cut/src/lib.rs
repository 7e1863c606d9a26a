//! Live resolution fronts over a multires forest
//!
//! This crate owns the dynamic side of the engine: the [`Renderer`] packs
//! the active vertices and triangles of one [`Cut`] into dense, GPU-ready
//! arrays; the [`Simplifier`] folds and unfolds the cut under a budget or
//! error-threshold policy using per-cut priority queues and a pluggable
//! [`ErrorMetric`].

pub mod cut;
pub mod debug;
pub mod error;
pub mod metric;
pub mod renderer;
pub mod simplifier;

pub use cut::*;
pub use debug::*;
pub use error::*;
pub use metric::*;
pub use renderer::*;
pub use simplifier::*;

/// Common result type for multires-cut operations
pub type Result<T> = std::result::Result<T, CutError>;
