//! Programmatic forest assembly
//!
//! The builder consumes the same records the VIF interchange format
//! carries: positions (with optional per-position attributes), vertices,
//! triangles, error parameters and merges. `build` validates the topology,
//! computes bounding boxes bottom-up, renumbers depth-first and assigns
//! subtriangles. Clustering heuristics (which merges to perform) are the
//! caller's problem; the builder only checks that what it was given forms
//! a single well-formed tree.

use crate::error::{Error, Result};
use crate::forest::Forest;
use crate::geometry::{GeometryStore, Point3f, Vector3f};
use crate::node::{Node, NodeIndex, Tri, NIL};

#[derive(Debug, Clone)]
struct VertexSpec {
    position: usize,
    patch: u16,
    coincident: Option<usize>,
}

#[derive(Debug, Clone)]
struct TriSpec {
    corners: [usize; 3],
    patch: u16,
}

#[derive(Debug, Clone)]
struct MergeSpec {
    parent: usize,
    children: Vec<usize>,
    /// 0-based error-parameter record for the parent vertex
    error_param: Option<usize>,
}

/// Assembles a valid [`Forest`] from raw records.
#[derive(Debug, Default)]
pub struct ForestBuilder {
    positions: Vec<Point3f>,
    normals: Option<Vec<Vector3f>>,
    colors: Option<Vec<[u8; 3]>>,
    texcoords: Vec<Vec<[f32; 2]>>,
    vertices: Vec<VertexSpec>,
    tris: Vec<TriSpec>,
    error_params: Vec<f32>,
    error_param_size: usize,
    merges: Vec<MergeSpec>,
}

impl ForestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_position(&mut self, p: Point3f) -> usize {
        self.positions.push(p);
        self.positions.len() - 1
    }

    pub fn set_normals(&mut self, normals: Vec<Vector3f>) {
        self.normals = Some(normals);
    }

    pub fn set_colors(&mut self, colors: Vec<[u8; 3]>) {
        self.colors = Some(colors);
    }

    pub fn add_texcoord_layer(&mut self, texcoords: Vec<[f32; 2]>) {
        self.texcoords.push(texcoords);
    }

    /// Add a vertex referencing a position slot. `coincident` names the
    /// next vertex in this vertex's seam cycle, if any.
    pub fn add_vertex(&mut self, position: usize, patch: u16, coincident: Option<usize>) -> usize {
        self.vertices.push(VertexSpec {
            position,
            patch,
            coincident,
        });
        self.vertices.len() - 1
    }

    pub fn add_tri(&mut self, corners: [usize; 3], patch: u16) {
        self.tris.push(TriSpec { corners, patch });
    }

    /// Install the flat error-parameter table; `size` floats per record.
    pub fn set_error_params(&mut self, params: Vec<f32>, size: usize) {
        self.error_params = params;
        self.error_param_size = size;
    }

    /// Record one merge: `children` become children of `parent`, in order.
    pub fn add_merge(&mut self, parent: usize, children: &[usize], error_param: Option<usize>) {
        self.merges.push(MergeSpec {
            parent,
            children: children.to_vec(),
            error_param,
        });
    }

    pub fn build(self) -> Result<Forest> {
        let nv = self.vertices.len();
        if nv == 0 {
            return Err(Error::InvalidData("forest has no vertices".into()));
        }
        self.check_ranges()?;

        // Vertex i becomes provisional node i + 1; slot 0 is nil.
        let to_node = |v: usize| (v + 1) as NodeIndex;
        let mut nodes = vec![Node::nil(); nv + 1];
        for (i, v) in self.vertices.iter().enumerate() {
            let n = &mut nodes[i + 1];
            n.patch = v.patch;
            n.attribute = v.position as u32;
            n.center = self.positions[v.position];
            n.coincident = v.coincident.map(to_node).unwrap_or(NIL);
        }

        // Wire the merge tree
        for m in &self.merges {
            let parent = to_node(m.parent);
            if nodes[parent as usize].first_child != NIL {
                return Err(Error::Topology(format!(
                    "vertex {} is the parent of two merges",
                    m.parent
                )));
            }
            if m.children.is_empty() {
                return Err(Error::Topology(format!(
                    "merge into vertex {} has no children",
                    m.parent
                )));
            }
            let mut prev = NIL;
            for &c in &m.children {
                let child = to_node(c);
                if child == parent {
                    return Err(Error::Topology(format!(
                        "vertex {} merges into itself",
                        m.parent
                    )));
                }
                if nodes[child as usize].parent != NIL {
                    return Err(Error::Topology(format!(
                        "vertex {} is a child of two merges",
                        c
                    )));
                }
                nodes[child as usize].parent = parent;
                nodes[child as usize].left_sibling = prev;
                if prev == NIL {
                    nodes[parent as usize].first_child = child;
                } else {
                    nodes[prev as usize].right_sibling = child;
                }
                prev = child;
            }
            if let Some(e) = m.error_param {
                nodes[parent as usize].error_param = e as u32 + 1;
            }
        }

        // Exactly one root
        let roots: Vec<NodeIndex> = (1..=nv as NodeIndex)
            .filter(|&n| nodes[n as usize].parent == NIL)
            .collect();
        let root = match roots.as_slice() {
            [r] => *r,
            [] => return Err(Error::Topology("merge records form a cycle".into())),
            _ => {
                return Err(Error::Topology(format!(
                    "forest has {} roots, expected one",
                    roots.len()
                )))
            }
        };

        self.check_coincident_cycles(&nodes)?;

        // Triangles; corners must be leaves of the agreed patch
        let mut tris = vec![Tri::nil(); self.tris.len() + 1];
        for (i, t) in self.tris.iter().enumerate() {
            let corners = t.corners.map(to_node);
            if corners[0] == corners[1] || corners[1] == corners[2] || corners[0] == corners[2] {
                return Err(Error::Topology(format!(
                    "triangle {} has repeated corners",
                    i
                )));
            }
            for &c in &corners {
                if nodes[c as usize].first_child != NIL {
                    return Err(Error::Topology(format!(
                        "triangle {} corner {} is a merged vertex, not a leaf",
                        i, c as usize - 1
                    )));
                }
                if nodes[c as usize].patch != t.patch {
                    return Err(Error::Topology(format!(
                        "triangle {} has patch {} but corner {} has patch {}",
                        i,
                        t.patch,
                        c as usize - 1,
                        nodes[c as usize].patch
                    )));
                }
            }
            tris[i + 1] = Tri {
                corners,
                patch: t.patch,
                next_subtri: NIL,
            };
        }

        // Every leaf owns at least one corner
        let mut owns_corner = vec![false; nv + 1];
        for t in tris.iter().skip(1) {
            for &c in &t.corners {
                owns_corner[c as usize] = true;
            }
        }
        for n in 1..=nv as NodeIndex {
            if nodes[n as usize].first_child == NIL && !owns_corner[n as usize] {
                return Err(Error::Topology(format!(
                    "leaf vertex {} owns no triangle corner",
                    n as usize - 1
                )));
            }
        }

        Self::compute_bounding_boxes(&mut nodes, &self.positions, root);

        let num_patches = self
            .vertices
            .iter()
            .map(|v| v.patch)
            .max()
            .map(|p| p + 1)
            .unwrap_or(0);

        let mut geometry = GeometryStore::new(self.positions);
        geometry.normals = self.normals;
        geometry.colors = self.colors;
        geometry.texcoords = self.texcoords;

        let mut forest = Forest::new(
            nodes,
            tris,
            geometry,
            self.error_params,
            self.error_param_size,
            num_patches,
        );
        forest.reorder_depth_first(root)?;
        forest.assign_subtris()?;
        Ok(forest)
    }

    /// All index fields must be in range before any of them is followed.
    fn check_ranges(&self) -> Result<()> {
        let np = self.positions.len();
        let nv = self.vertices.len();
        if let Some(n) = &self.normals {
            if n.len() != np {
                return Err(Error::InvalidData(format!(
                    "{} normals for {} positions",
                    n.len(),
                    np
                )));
            }
        }
        if let Some(c) = &self.colors {
            if c.len() != np {
                return Err(Error::InvalidData(format!(
                    "{} colors for {} positions",
                    c.len(),
                    np
                )));
            }
        }
        for (layer, t) in self.texcoords.iter().enumerate() {
            if t.len() != np {
                return Err(Error::InvalidData(format!(
                    "texture layer {} has {} records for {} positions",
                    layer,
                    t.len(),
                    np
                )));
            }
        }
        for (i, v) in self.vertices.iter().enumerate() {
            if v.position >= np {
                return Err(Error::InvalidData(format!(
                    "vertex {} references position {} of {}",
                    i, v.position, np
                )));
            }
            if let Some(c) = v.coincident {
                if c >= nv {
                    return Err(Error::InvalidData(format!(
                        "vertex {} references coincident vertex {} of {}",
                        i, c, nv
                    )));
                }
            }
        }
        for (i, t) in self.tris.iter().enumerate() {
            for &c in &t.corners {
                if c >= nv {
                    return Err(Error::InvalidData(format!(
                        "triangle {} references vertex {} of {}",
                        i, c, nv
                    )));
                }
            }
        }
        for m in &self.merges {
            if m.parent >= nv {
                return Err(Error::InvalidData(format!(
                    "merge parent {} out of range",
                    m.parent
                )));
            }
            for &c in &m.children {
                if c >= nv {
                    return Err(Error::InvalidData(format!(
                        "merge child {} out of range",
                        c
                    )));
                }
            }
            if let Some(e) = m.error_param {
                let records = if self.error_param_size == 0 {
                    0
                } else {
                    self.error_params.len() / self.error_param_size
                };
                if e >= records {
                    return Err(Error::InvalidData(format!(
                        "merge references error-parameter record {} of {}",
                        e, records
                    )));
                }
            }
        }
        Ok(())
    }

    /// Coincident links must form closed cycles with no self-reference.
    fn check_coincident_cycles(&self, nodes: &[Node]) -> Result<()> {
        for start in 1..nodes.len() as NodeIndex {
            let first = nodes[start as usize].coincident;
            if first == NIL {
                continue;
            }
            if first == start {
                return Err(Error::Topology(format!(
                    "vertex {} is coincident with itself",
                    start as usize - 1
                )));
            }
            let mut cur = first;
            let mut steps = 0usize;
            while cur != start {
                if cur == NIL || steps > nodes.len() {
                    return Err(Error::Topology(format!(
                        "coincident cycle through vertex {} does not close",
                        start as usize - 1
                    )));
                }
                cur = nodes[cur as usize].coincident;
                steps += 1;
            }
        }
        Ok(())
    }

    /// Leaves get a degenerate box at their position; every parent's box
    /// is the union of its children's boxes and its own position.
    fn compute_bounding_boxes(nodes: &mut [Node], positions: &[Point3f], root: NodeIndex) {
        fn union(
            nodes: &mut [Node],
            positions: &[Point3f],
            n: NodeIndex,
        ) -> (Point3f, Point3f) {
            let own = positions[nodes[n as usize].attribute as usize];
            let (mut min, mut max) = (own, own);
            let mut c = nodes[n as usize].first_child;
            while c != NIL {
                let (cmin, cmax) = union(nodes, positions, c);
                for k in 0..3 {
                    min[k] = min[k].min(cmin[k]);
                    max[k] = max[k].max(cmax[k]);
                }
                c = nodes[c as usize].right_sibling;
            }
            nodes[n as usize].center = Point3f::from((min.coords + max.coords) * 0.5);
            nodes[n as usize].half_extents = (max - min) * 0.5;
            (min, max)
        }
        union(nodes, positions, root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_builder() -> ForestBuilder {
        let mut b = ForestBuilder::new();
        for i in 0..3 {
            b.add_position(Point3f::new(i as f32, 0.0, 0.0));
        }
        let root_pos = b.add_position(Point3f::new(1.0, 0.0, 0.0));
        for i in 0..3 {
            b.add_vertex(i, 0, None);
        }
        let root = b.add_vertex(root_pos, 0, None);
        b.add_tri([0, 1, 2], 0);
        b.add_merge(root, &[0, 1, 2], None);
        b
    }

    #[test]
    fn test_build_minimal() {
        let f = strip_builder().build().unwrap();
        assert_eq!(f.node_count(), 4);
        assert_eq!(f.tri_count(), 1);
        assert_eq!(f.num_patches(), 1);
    }

    #[test]
    fn test_empty_rejected() {
        assert!(ForestBuilder::new().build().is_err());
    }

    #[test]
    fn test_out_of_range_position() {
        let mut b = ForestBuilder::new();
        b.add_vertex(0, 0, None);
        assert!(matches!(b.build(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_two_roots_rejected() {
        let mut b = ForestBuilder::new();
        b.add_position(Point3f::origin());
        b.add_position(Point3f::new(1.0, 0.0, 0.0));
        b.add_vertex(0, 0, None);
        b.add_vertex(1, 0, None);
        // No merge joins them, so both are roots
        match b.build() {
            Err(Error::Topology(msg)) => assert!(msg.contains("root")),
            other => panic!("expected topology error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_coincidence_rejected() {
        let mut b = strip_builder();
        // Vertex 0 coincident with itself
        b.vertices[0].coincident = Some(0);
        match b.build() {
            Err(Error::Topology(msg)) => assert!(msg.contains("coincident")),
            other => panic!("expected topology error, got {:?}", other),
        }
    }

    #[test]
    fn test_open_coincident_cycle_rejected() {
        let mut b = strip_builder();
        // 0 -> 1 but 1 does not point back
        b.vertices[0].coincident = Some(1);
        match b.build() {
            Err(Error::Topology(msg)) => assert!(msg.contains("close")),
            other => panic!("expected topology error, got {:?}", other),
        }
    }

    #[test]
    fn test_patch_mismatch_rejected() {
        let mut b = ForestBuilder::new();
        for i in 0..3 {
            b.add_position(Point3f::new(i as f32, 0.0, 0.0));
        }
        let rp = b.add_position(Point3f::new(1.0, 0.0, 0.0));
        b.add_vertex(0, 0, None);
        b.add_vertex(1, 1, None); // wrong patch
        b.add_vertex(2, 0, None);
        let root = b.add_vertex(rp, 0, None);
        b.add_tri([0, 1, 2], 0);
        b.add_merge(root, &[0, 1, 2], None);
        match b.build() {
            Err(Error::Topology(msg)) => assert!(msg.contains("patch")),
            other => panic!("expected topology error, got {:?}", other),
        }
    }

    #[test]
    fn test_double_parent_rejected() {
        let mut b = strip_builder();
        let extra_pos = b.add_position(Point3f::new(5.0, 0.0, 0.0));
        let extra = b.add_vertex(extra_pos, 0, None);
        b.add_merge(extra, &[0], None); // vertex 0 already merged
        match b.build() {
            Err(Error::Topology(msg)) => assert!(msg.contains("child of two")),
            other => panic!("expected topology error, got {:?}", other),
        }
    }

    #[test]
    fn test_merged_vertex_as_corner_rejected() {
        let mut b = ForestBuilder::new();
        for i in 0..4 {
            b.add_position(Point3f::new(i as f32, 0.0, 0.0));
        }
        for i in 0..4 {
            b.add_vertex(i, 0, None);
        }
        b.add_tri([0, 1, 3], 0); // 3 is about to become a parent
        b.add_merge(3, &[0, 1, 2], None);
        match b.build() {
            Err(Error::Topology(msg)) => assert!(msg.contains("leaf")),
            other => panic!("expected topology error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_params_attached() {
        let mut b = strip_builder();
        b.set_error_params(vec![0.5, 1.5, 2.5, 3.5], 2);
        b.merges[0].error_param = Some(1);
        let f = b.build().unwrap();
        assert_eq!(f.node_error_params(crate::forest::ROOT), &[2.5, 3.5]);
        // Leaves have no record
        let leaf = (1..=f.node_count() as NodeIndex)
            .find(|&n| f.node(n).is_leaf())
            .unwrap();
        assert!(f.node_error_params(leaf).is_empty());
    }
}
