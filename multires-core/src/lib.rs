//! Core data structures for multires
//!
//! This crate provides the static side of the multiresolution engine: the
//! immutable geometry store, the Node/Tri entities, the merge-tree Forest
//! with its depth-first numbering and subtriangle assignment, and the
//! builder that assembles a valid Forest from raw records.

pub mod builder;
pub mod error;
pub mod forest;
pub mod geometry;
pub mod node;

pub use builder::*;
pub use error::*;
pub use forest::*;
pub use geometry::*;
pub use node::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Point3, Vector3};

/// Common result type for multires operations
pub type Result<T> = std::result::Result<T, Error>;
