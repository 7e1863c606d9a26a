//! Pluggable node error metrics
//!
//! The simplifier orders its queues by a caller-supplied error function.
//! Metrics see only the cached per-node fields, never the cut, so a metric
//! evaluation can never observe half-updated state.

use multires_core::{Point3f, Vector3f};

/// Everything a metric may look at for one node
#[derive(Debug, Clone, Copy)]
pub struct NodeErrorContext<'a> {
    /// Bounding-box center of everything merged into the node
    pub center: Point3f,
    /// Bounding-box half-extents
    pub half_extents: Vector3f,
    /// The node's error-parameter record, empty when it has none
    pub params: &'a [f32],
}

impl NodeErrorContext<'_> {
    /// Full diagonal of the node's bounding box
    pub fn diagonal(&self) -> f32 {
        2.0 * self.half_extents.norm()
    }
}

/// Injected error strategy for queue ordering
pub trait ErrorMetric {
    fn node_error(&self, ctx: &NodeErrorContext<'_>) -> f32;
}

/// View-independent default: the bounding-box diagonal.
///
/// A node standing in for a large region of the mesh carries a large error,
/// so the budget policies refine big merges first.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundBoxDiagonal;

impl ErrorMetric for BoundBoxDiagonal {
    fn node_error(&self, ctx: &NodeErrorContext<'_>) -> f32 {
        ctx.diagonal()
    }
}

/// View-dependent metric: bounding-box diagonal over distance to the eye.
///
/// Approximates projected screen-space size; nodes near the viewpoint sort
/// ahead of equally sized nodes far away. Must be re-evaluated (via
/// `Simplifier::update_node_errors`) whenever the eye moves.
#[derive(Debug, Clone, Copy)]
pub struct ScreenSpaceError {
    pub eye: Point3f,
}

impl ScreenSpaceError {
    pub fn new(eye: Point3f) -> Self {
        Self { eye }
    }
}

impl ErrorMetric for ScreenSpaceError {
    fn node_error(&self, ctx: &NodeErrorContext<'_>) -> f32 {
        let diag = ctx.diagonal();
        let dist = (ctx.center - self.eye).norm();
        // Inside the box everything is maximally important
        let clearance = (dist - diag).max(1e-6);
        diag / clearance
    }
}
