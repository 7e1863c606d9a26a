//! Vertex attribute storage and GPU-ready packing

use bytemuck::{Pod, Zeroable};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// A 3D point with floating point coordinates
pub type Point3f = Point3<f32>;

/// A 3D vector with floating point components
pub type Vector3f = Vector3<f32>;

/// One packed vertex as handed to the rendering layer.
///
/// Fixed stride, attributes in the order position, normal, color, texcoord.
/// Missing attributes are filled with defaults so the stride never varies.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct VertexRenderDatum {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
    pub texcoord: [f32; 2],
}

impl Default for VertexRenderDatum {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            normal: [0.0, 0.0, 1.0],
            color: [1.0; 3],
            texcoord: [0.0; 2],
        }
    }
}

/// Flat arrays of vertex attributes, immutable after construction.
///
/// Every node of a [`crate::Forest`] references one slot of this store via
/// its `attribute` index; coincident nodes may share a slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeometryStore {
    pub positions: Vec<Point3f>,
    pub normals: Option<Vec<Vector3f>>,
    pub colors: Option<Vec<[u8; 3]>>,
    /// One inner array per texture layer, each the same length as `positions`
    pub texcoords: Vec<Vec<[f32; 2]>>,
}

impl GeometryStore {
    pub fn new(positions: Vec<Point3f>) -> Self {
        Self {
            positions,
            normals: None,
            colors: None,
            texcoords: Vec::new(),
        }
    }

    /// Number of attribute slots
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    pub fn has_colors(&self) -> bool {
        self.colors.is_some()
    }

    pub fn num_textures(&self) -> usize {
        self.texcoords.len()
    }

    pub fn position(&self, slot: usize) -> Point3f {
        self.positions[slot]
    }

    /// Pack the attributes of one slot into a fixed-stride render datum.
    ///
    /// Only the first texture layer is packed; additional layers are
    /// available to callers that build their own vertex formats.
    pub fn render_datum(&self, slot: usize) -> VertexRenderDatum {
        let p = self.positions[slot];
        let normal = self
            .normals
            .as_ref()
            .map(|n| [n[slot].x, n[slot].y, n[slot].z])
            .unwrap_or([0.0, 0.0, 1.0]);
        let color = self
            .colors
            .as_ref()
            .map(|c| {
                let c = c[slot];
                [
                    c[0] as f32 / 255.0,
                    c[1] as f32 / 255.0,
                    c[2] as f32 / 255.0,
                ]
            })
            .unwrap_or([1.0; 3]);
        let texcoord = self
            .texcoords
            .first()
            .map(|t| t[slot])
            .unwrap_or([0.0; 2]);
        VertexRenderDatum {
            position: [p.x, p.y, p.z],
            normal,
            color,
            texcoord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_datum_defaults() {
        let store = GeometryStore::new(vec![Point3f::new(1.0, 2.0, 3.0)]);
        let d = store.render_datum(0);
        assert_eq!(d.position, [1.0, 2.0, 3.0]);
        assert_eq!(d.normal, [0.0, 0.0, 1.0]);
        assert_eq!(d.color, [1.0, 1.0, 1.0]);
        assert_eq!(d.texcoord, [0.0, 0.0]);
    }

    #[test]
    fn test_render_datum_full_attributes() {
        let mut store = GeometryStore::new(vec![Point3f::origin()]);
        store.normals = Some(vec![Vector3f::new(0.0, 1.0, 0.0)]);
        store.colors = Some(vec![[255, 0, 127]]);
        store.texcoords.push(vec![[0.25, 0.75]]);
        let d = store.render_datum(0);
        assert_eq!(d.normal, [0.0, 1.0, 0.0]);
        assert_eq!(d.color[0], 1.0);
        assert_eq!(d.color[1], 0.0);
        assert!((d.color[2] - 127.0 / 255.0).abs() < 1e-6);
        assert_eq!(d.texcoord, [0.25, 0.75]);
    }

    #[test]
    fn test_vertex_render_datum_is_pod() {
        // Fixed 44-byte stride expected by the index-buffer contract
        assert_eq!(std::mem::size_of::<VertexRenderDatum>(), 44);
        let data = [VertexRenderDatum::default(); 2];
        let bytes: &[u8] = bytemuck::cast_slice(&data);
        assert_eq!(bytes.len(), 88);
    }
}
