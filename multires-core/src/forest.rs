//! The static multiresolution merge tree
//!
//! A [`Forest`] is built once by [`crate::ForestBuilder`] and is read-only
//! afterwards. Nodes are numbered depth-first with the root at index 1, so
//! every child index is greater than its parent index and every subtree
//! occupies a contiguous index range. Both properties are load-bearing:
//! the subtriangle assignment and the per-cut "which child covers this
//! corner" query rely on them.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::{GeometryStore, Point3f, Vector3f};
use crate::node::{Node, NodeIndex, Tri, TriIndex, NIL};

/// Index of the root node after depth-first reordering
pub const ROOT: NodeIndex = 1;

/// The complete static hierarchy: all nodes, all triangles, the shared
/// geometry store and the error-parameter table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forest {
    /// Node arena; slot 0 is the nil sentinel
    nodes: Vec<Node>,
    /// Triangle arena; slot 0 is the nil sentinel
    tris: Vec<Tri>,
    geometry: GeometryStore,
    /// Flat per-node error parameters, `error_param_size` floats per record
    error_params: Vec<f32>,
    error_param_size: usize,
    num_patches: u16,
}

impl Forest {
    pub(crate) fn new(
        nodes: Vec<Node>,
        tris: Vec<Tri>,
        geometry: GeometryStore,
        error_params: Vec<f32>,
        error_param_size: usize,
        num_patches: u16,
    ) -> Self {
        Self {
            nodes,
            tris,
            geometry,
            error_params,
            error_param_size,
            num_patches,
        }
    }

    /// Reassembles a forest from arrays persisted by a previous build.
    ///
    /// The arrays must already be in depth-first order with slot 0 nil;
    /// only structural sanity is checked here, not full topology.
    pub fn from_parts(
        nodes: Vec<Node>,
        tris: Vec<Tri>,
        geometry: GeometryStore,
        error_params: Vec<f32>,
        error_param_size: usize,
        num_patches: u16,
    ) -> Result<Self> {
        if nodes.len() < 2 {
            return Err(Error::InvalidData("node array holds no real nodes".into()));
        }
        let n = nodes.len() as NodeIndex;
        if nodes[ROOT as usize].parent != NIL {
            return Err(Error::Topology("node 1 is not a root".into()));
        }
        for (i, node) in nodes.iter().enumerate().skip(2) {
            if node.parent == NIL || node.parent >= i as NodeIndex {
                return Err(Error::Topology(format!(
                    "node {} breaks depth-first order (parent {})",
                    i, node.parent
                )));
            }
        }
        for (t, tri) in tris.iter().enumerate().skip(1) {
            if tri.corners.iter().any(|&c| c == NIL || c >= n) {
                return Err(Error::InvalidData(format!(
                    "triangle {} has an out-of-range corner",
                    t
                )));
            }
        }
        if error_param_size > 0 && error_params.len() % error_param_size != 0 {
            return Err(Error::InvalidData(
                "error-parameter array length is not a multiple of the record size".into(),
            ));
        }
        Ok(Self {
            nodes,
            tris,
            geometry,
            error_params,
            error_param_size,
            num_patches,
        })
    }

    /// Number of real nodes (the arena holds one more for the nil slot)
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Number of real triangles
    pub fn tri_count(&self) -> usize {
        self.tris.len() - 1
    }

    pub fn num_patches(&self) -> u16 {
        self.num_patches
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index as usize]
    }

    pub fn tri(&self, index: TriIndex) -> &Tri {
        &self.tris[index as usize]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn tris(&self) -> &[Tri] {
        &self.tris
    }

    pub fn geometry(&self) -> &GeometryStore {
        &self.geometry
    }

    pub fn error_params(&self) -> &[f32] {
        &self.error_params
    }

    pub fn error_param_size(&self) -> usize {
        self.error_param_size
    }

    /// One record of the error-parameter table; record 0 means "none"
    pub fn error_param_record(&self, record: u32) -> &[f32] {
        if record == 0 || self.error_param_size == 0 {
            return &[];
        }
        let start = (record as usize - 1) * self.error_param_size;
        &self.error_params[start..start + self.error_param_size]
    }

    /// Error-parameter record of a node, empty when the node has none
    pub fn node_error_params(&self, index: NodeIndex) -> &[f32] {
        self.error_param_record(self.nodes[index as usize].error_param)
    }

    /// Bounding box of everything merged into a node, as (center, half-extents)
    pub fn bounding_box(&self, index: NodeIndex) -> (Point3f, Vector3f) {
        let n = &self.nodes[index as usize];
        (n.center, n.half_extents)
    }

    /// Iterate a node's children in child-list order (ascending index)
    pub fn children(&self, index: NodeIndex) -> ChildIter<'_> {
        ChildIter {
            forest: self,
            current: self.nodes[index as usize].first_child,
        }
    }

    /// Iterate a node's subtriangle list
    pub fn subtris(&self, index: NodeIndex) -> SubTriIter<'_> {
        SubTriIter {
            forest: self,
            current: self.nodes[index as usize].first_subtri,
        }
    }

    /// Whether two nodes are the same or occupy the same position on
    /// opposite sides of a patch seam. Walks the coincident cycle, O(cycle).
    pub fn nodes_are_coincident_or_equal(&self, a: NodeIndex, b: NodeIndex) -> bool {
        if a == b {
            return true;
        }
        let mut cur = self.nodes[a as usize].coincident;
        while cur != NIL && cur != a {
            if cur == b {
                return true;
            }
            cur = self.nodes[cur as usize].coincident;
        }
        false
    }

    /// The child of `parent` whose subtree contains `descendant`.
    ///
    /// Relies on contiguous depth-first subtree ranges: the covering child
    /// is the last child whose index is <= the descendant's index.
    pub fn child_containing(&self, parent: NodeIndex, descendant: NodeIndex) -> NodeIndex {
        let mut best = NIL;
        for child in self.children(parent) {
            if child > descendant {
                break;
            }
            best = child;
        }
        best
    }

    /// Lowest common ancestor of two nodes.
    ///
    /// With depth-first numbering an ancestor always has the smaller index,
    /// so repeatedly replacing the larger index with its parent converges
    /// on the LCA.
    pub fn lca(&self, a: NodeIndex, b: NodeIndex) -> NodeIndex {
        let (mut x, mut y) = (a, b);
        while x != y {
            if x > y {
                x = self.nodes[x as usize].parent;
            } else {
                y = self.nodes[y as usize].parent;
            }
            if x == NIL || y == NIL {
                return NIL;
            }
        }
        x
    }

    /// The node whose unfold first makes this triangle fully resolved.
    ///
    /// Sort the corners a <= b <= c. The owner is lca(b, c) unless that
    /// ancestor's index is at or above a (meaning it covers a too), in
    /// which case the ab path decides.
    pub fn subtri_owner(&self, tri: TriIndex) -> NodeIndex {
        let mut c = self.tris[tri as usize].corners;
        c.sort_unstable();
        let l = self.lca(c[1], c[2]);
        if l > c[0] {
            l
        } else {
            self.lca(c[0], c[1])
        }
    }

    // ---- build-time passes, invoked once by the builder ----

    /// Renumber all nodes depth-first so the root lands at index 1 and
    /// every child index exceeds its parent index. Remaps every link in
    /// the node and tri arrays.
    pub(crate) fn reorder_depth_first(&mut self, root: NodeIndex) -> Result<()> {
        let n = self.nodes.len();
        // old index -> new index; 0 stays the nil slot
        let mut remap = vec![NIL; n];
        let mut next: NodeIndex = 1;

        let mut stack = vec![root];
        while let Some(old) = stack.pop() {
            if remap[old as usize] != NIL {
                return Err(Error::Topology(format!(
                    "node {} reachable twice during reordering",
                    old
                )));
            }
            remap[old as usize] = next;
            next += 1;
            // Push children in reverse so the first child is visited first
            let mut children = Vec::new();
            let mut c = self.nodes[old as usize].first_child;
            while c != NIL {
                children.push(c);
                c = self.nodes[c as usize].right_sibling;
            }
            for &c in children.iter().rev() {
                stack.push(c);
            }
        }

        if next as usize != n {
            return Err(Error::Topology(format!(
                "{} of {} nodes unreachable from the root",
                n - next as usize,
                n - 1
            )));
        }

        let map = |i: NodeIndex| remap[i as usize];
        let mut reordered = vec![Node::nil(); n];
        for old in 1..n {
            let mut node = self.nodes[old];
            node.parent = map(node.parent);
            node.left_sibling = map(node.left_sibling);
            node.right_sibling = map(node.right_sibling);
            node.first_child = map(node.first_child);
            node.coincident = map(node.coincident);
            reordered[remap[old] as usize] = node;
        }
        self.nodes = reordered;

        for tri in self.tris.iter_mut().skip(1) {
            for corner in tri.corners.iter_mut() {
                *corner = remap[*corner as usize];
            }
        }
        Ok(())
    }

    /// Compute every triangle's owning node and chain the subtriangle
    /// lists. Must run after depth-first reordering.
    pub(crate) fn assign_subtris(&mut self) -> Result<()> {
        // Walk triangles in reverse so each list ends up in ascending order
        for t in (1..self.tris.len() as TriIndex).rev() {
            let owner = self.subtri_owner(t);
            if owner == NIL {
                return Err(Error::Topology(format!(
                    "triangle {} has corners in disjoint trees",
                    t
                )));
            }
            let head = self.nodes[owner as usize].first_subtri;
            self.tris[t as usize].next_subtri = head;
            self.nodes[owner as usize].first_subtri = t;
        }
        Ok(())
    }
}

/// Iterator over a node's child list
pub struct ChildIter<'a> {
    forest: &'a Forest,
    current: NodeIndex,
}

impl Iterator for ChildIter<'_> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<NodeIndex> {
        if self.current == NIL {
            return None;
        }
        let cur = self.current;
        self.current = self.forest.nodes[cur as usize].right_sibling;
        Some(cur)
    }
}

/// Iterator over a node's subtriangle list
pub struct SubTriIter<'a> {
    forest: &'a Forest,
    current: TriIndex,
}

impl Iterator for SubTriIter<'_> {
    type Item = TriIndex;

    fn next(&mut self) -> Option<TriIndex> {
        if self.current == NIL {
            return None;
        }
        let cur = self.current;
        self.current = self.forest.tris[cur as usize].next_subtri;
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ForestBuilder;

    /// 2x2 grid of cells: 9 vertices, 8 triangles, one merge into a root.
    fn grid_forest() -> Forest {
        let mut b = ForestBuilder::new();
        for y in 0..3 {
            for x in 0..3 {
                b.add_position(Point3f::new(x as f32, y as f32, 0.0));
            }
        }
        // Root vertex at the grid center
        let root_pos = b.add_position(Point3f::new(1.0, 1.0, 0.0));
        for i in 0..9 {
            b.add_vertex(i, 0, None);
        }
        let root = b.add_vertex(root_pos, 0, None);
        for y in 0..2usize {
            for x in 0..2usize {
                let tl = y * 3 + x;
                let tr = tl + 1;
                let bl = (y + 1) * 3 + x;
                let br = bl + 1;
                b.add_tri([tl, bl, tr], 0);
                b.add_tri([tr, bl, br], 0);
            }
        }
        b.add_merge(root, &[0, 1, 2, 3, 4, 5, 6, 7, 8], None);
        b.build().unwrap()
    }

    /// Two merge levels over a strip of 4 vertices and 2 triangles.
    fn two_level_forest() -> Forest {
        let mut b = ForestBuilder::new();
        for i in 0..4 {
            b.add_position(Point3f::new(i as f32, 0.0, 0.0));
        }
        let m0 = b.add_position(Point3f::new(0.5, 0.0, 0.0));
        let m1 = b.add_position(Point3f::new(2.5, 0.0, 0.0));
        let r = b.add_position(Point3f::new(1.5, 0.0, 0.0));
        for i in 0..4 {
            b.add_vertex(i, 0, None);
        }
        let v_m0 = b.add_vertex(m0, 0, None);
        let v_m1 = b.add_vertex(m1, 0, None);
        let v_r = b.add_vertex(r, 0, None);
        b.add_tri([0, 1, 2], 0);
        b.add_tri([1, 3, 2], 0);
        b.add_merge(v_m0, &[0, 1], None);
        b.add_merge(v_m1, &[2, 3], None);
        b.add_merge(v_r, &[v_m0, v_m1], None);
        b.build().unwrap()
    }

    #[test]
    fn test_depth_first_numbering() {
        let f = grid_forest();
        assert_eq!(f.node_count(), 10);
        for i in 2..=f.node_count() as NodeIndex {
            assert!(
                f.node(i).parent < i,
                "child {} must have a smaller parent index",
                i
            );
        }
        assert_eq!(f.node(ROOT).parent, NIL);
    }

    #[test]
    fn test_children_ascending() {
        let f = two_level_forest();
        for n in 1..=f.node_count() as NodeIndex {
            let children: Vec<_> = f.children(n).collect();
            for w in children.windows(2) {
                assert!(w[0] < w[1], "child list of {} not ascending", n);
            }
        }
    }

    #[test]
    fn test_grid_subtris_belong_to_root() {
        let f = grid_forest();
        let subtris: Vec<_> = f.subtris(ROOT).collect();
        assert_eq!(subtris.len(), 8);
        for t in 1..=8 {
            assert_eq!(f.subtri_owner(t), ROOT);
        }
    }

    #[test]
    fn test_two_level_subtri_owners() {
        let f = two_level_forest();
        // Both triangles span the two intermediate clusters, so only the
        // root's unfold leaves all three corners distinct... unless the
        // deepest pairwise LCA is an intermediate node.
        for t in 1..=2 {
            let owner = f.subtri_owner(t);
            assert_ne!(owner, NIL);
            let tri = f.tri(t);
            // The owner must be an ancestor of at least two corners
            let covered = tri
                .corners
                .iter()
                .filter(|&&c| {
                    let mut cur = c;
                    while cur != NIL && cur != owner {
                        cur = f.node(cur).parent;
                    }
                    cur == owner
                })
                .count();
            assert!(covered >= 2, "owner {} covers {} corners", owner, covered);
        }
    }

    #[test]
    fn test_lca() {
        let f = two_level_forest();
        // Leaves under the same intermediate node meet below the root
        let leaves: Vec<NodeIndex> = (1..=f.node_count() as NodeIndex)
            .filter(|&n| f.node(n).is_leaf())
            .collect();
        assert_eq!(leaves.len(), 4);
        for &l in &leaves {
            assert_eq!(f.lca(l, l), l);
            assert_eq!(f.lca(ROOT, l), ROOT);
        }
    }

    #[test]
    fn test_child_containing() {
        let f = two_level_forest();
        for n in 1..=f.node_count() as NodeIndex {
            for child in f.children(n) {
                // Every descendant of the child maps back to it
                let mut stack = vec![child];
                while let Some(d) = stack.pop() {
                    assert_eq!(f.child_containing(n, d), child);
                    stack.extend(f.children(d));
                }
            }
        }
    }

    #[test]
    fn test_bounding_boxes_nested() {
        let f = two_level_forest();
        let (rc, rh) = f.bounding_box(ROOT);
        for n in 2..=f.node_count() as NodeIndex {
            let (c, h) = f.bounding_box(n);
            for k in 0..3 {
                assert!(c[k] - h[k] >= rc[k] - rh[k] - 1e-6);
                assert!(c[k] + h[k] <= rc[k] + rh[k] + 1e-6);
            }
        }
    }

    #[test]
    fn test_coincident_walk_trivial() {
        let f = grid_forest();
        assert!(f.nodes_are_coincident_or_equal(2, 2));
        assert!(!f.nodes_are_coincident_or_equal(2, 3));
    }
}
