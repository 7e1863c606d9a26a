//! The live state of one resolution front
//!
//! A [`Cut`] tracks which forest nodes are currently active, the per-node
//! budget items the simplifier's queues are keyed on, and the per-triangle
//! proxy/back-reference records for every live triangle. The cut owns its
//! renderer and both priority queues; the only mutators are the fold and
//! unfold transitions in [`crate::Simplifier`].

use std::cmp::Reverse;
use std::sync::Arc;

use priority_queue::PriorityQueue;

use multires_core::{Forest, NodeIndex, Point3f, TriIndex, Vector3f, NIL, ROOT};

use crate::error::{CutError, Result};
use crate::renderer::Renderer;

/// Queue ordering key over f32 error values (total order, like the
/// edge-cost keys in classic collapse simplifiers)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorKey(pub f32);

impl Eq for ErrorKey {}

impl PartialOrd for ErrorKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ErrorKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Which side of the resolution front an active node is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Acting as a proxy for everything merged into it; a candidate for
    /// unfolding (refinement)
    Folded,
    /// Its children are active instead; a candidate for folding
    /// (coarsening)
    Unfolded,
}

/// A handle naming one corner of one triangle: `tri * 3 + corner`.
///
/// The per-node live-triangle lists link through these instead of bare
/// triangle indices so traversal stays unambiguous even while a fold has
/// temporarily routed two corners of one triangle through the same node.
pub(crate) type CornerHandle = u32;

/// Triangle 0 is the nil sentinel, so handle 0 is never a real corner
pub(crate) const NO_CORNER: CornerHandle = 0;

#[inline]
pub(crate) fn corner_handle(tri: TriIndex, corner: usize) -> CornerHandle {
    tri * 3 + corner as u32
}

#[inline]
pub(crate) fn handle_tri(h: CornerHandle) -> TriIndex {
    h / 3
}

#[inline]
pub(crate) fn handle_corner(h: CornerHandle) -> usize {
    (h % 3) as usize
}

/// Cut-local bookkeeping for one active node.
///
/// Error-relevant node fields are duplicated here so queue updates never
/// chase into the forest's node array.
#[derive(Debug, Clone)]
pub struct BudgetItem {
    pub node: NodeIndex,
    pub center: Point3f,
    pub half_extents: Vector3f,
    /// 1-based error-parameter record, 0 for none (copied from the node)
    pub error_param: u32,
    /// Error value the queues were last keyed on
    pub error: f32,
    /// Dense render-array slot holding this node's vertex
    pub vertex_slot: usize,
    /// Head of the list of triangle corners proxied through this node
    pub(crate) first_live: CornerHandle,
    pub state: NodeState,
}

/// Proxy and back-reference record for one live triangle
#[derive(Debug, Clone)]
pub struct TriRef {
    /// The active node each corner currently proxies through; always an
    /// ancestor-or-self of the real corner
    pub backrefs: [NodeIndex; 3],
    /// The corresponding dense vertex slots (renderer index space)
    pub proxies: [u32; 3],
    /// Next corner in each of the three live lists this triangle is on
    pub(crate) next_live: [CornerHandle; 3],
    /// Slot in the patch's index buffer
    pub tri_slot: usize,
}

/// One live resolution front through a forest.
pub struct Cut {
    forest: Arc<Forest>,
    pub(crate) renderer: Renderer,
    /// One entry per node (index 0 unused); `Some` exactly for active nodes
    pub(crate) node_refs: Vec<Option<BudgetItem>>,
    /// One entry per triangle (index 0 unused); `Some` exactly for live ones
    pub(crate) tri_refs: Vec<Option<TriRef>>,
    /// Unfolded nodes, keyed so the least error-contributing pops first
    pub(crate) fold_queue: PriorityQueue<NodeIndex, Reverse<ErrorKey>>,
    /// Folded non-leaf nodes, keyed so the largest error pops first
    pub(crate) unfold_queue: PriorityQueue<NodeIndex, ErrorKey>,
}

impl Cut {
    /// Create a cut with only the root active, folded, showing nothing.
    ///
    /// Queue keys start at zero; run `Simplifier::update_node_errors`
    /// before the first budget call to key them with the real metric.
    pub fn new(forest: Arc<Forest>) -> Self {
        let mut renderer = Renderer::new(forest.num_patches());
        let mut node_refs: Vec<Option<BudgetItem>> = vec![None; forest.node_count() + 1];
        let tri_refs = vec![None; forest.tri_count() + 1];
        let mut unfold_queue = PriorityQueue::new();

        let root = forest.node(ROOT);
        let datum = forest.geometry().render_datum(root.attribute as usize);
        let vertex_slot = renderer.add_vertex_render_datum(datum);
        node_refs[ROOT as usize] = Some(BudgetItem {
            node: ROOT,
            center: root.center,
            half_extents: root.half_extents,
            error_param: root.error_param,
            error: 0.0,
            vertex_slot,
            first_live: NO_CORNER,
            state: NodeState::Folded,
        });
        unfold_queue.push(ROOT, ErrorKey(0.0));

        Self {
            forest,
            renderer,
            node_refs,
            tri_refs,
            fold_queue: PriorityQueue::new(),
            unfold_queue,
        }
    }

    pub fn forest(&self) -> &Arc<Forest> {
        &self.forest
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn live_tri_count(&self) -> usize {
        self.renderer.live_tri_count()
    }

    pub fn active_vertex_count(&self) -> usize {
        self.renderer.active_vertex_count()
    }

    pub fn is_active(&self, node: NodeIndex) -> bool {
        self.node_refs[node as usize].is_some()
    }

    pub fn budget_item(&self, node: NodeIndex) -> Option<&BudgetItem> {
        self.node_refs[node as usize].as_ref()
    }

    pub fn tri_ref(&self, tri: TriIndex) -> Option<&TriRef> {
        self.tri_refs[tri as usize].as_ref()
    }

    /// All currently active nodes, ascending
    pub fn active_nodes(&self) -> Vec<NodeIndex> {
        (1..self.node_refs.len() as NodeIndex)
            .filter(|&n| self.node_refs[n as usize].is_some())
            .collect()
    }

    /// The folded active node standing in for `node` in this cut.
    ///
    /// Nothing below the resolution front is active, so the first active
    /// node on the walk to the root is the front member covering `node`.
    pub fn active_ancestor(&self, node: NodeIndex) -> NodeIndex {
        let mut cur = node;
        while cur != NIL {
            if self.node_refs[cur as usize].is_some() {
                return cur;
            }
            cur = self.forest.node(cur).parent;
        }
        NIL
    }

    pub(crate) fn item(&self, node: NodeIndex) -> Result<&BudgetItem> {
        self.node_refs[node as usize]
            .as_ref()
            .ok_or_else(|| CutError::Consistency(format!("node {} has no budget item", node)))
    }

    pub(crate) fn item_mut(&mut self, node: NodeIndex) -> Result<&mut BudgetItem> {
        self.node_refs[node as usize]
            .as_mut()
            .ok_or_else(|| CutError::Consistency(format!("node {} has no budget item", node)))
    }

    pub(crate) fn tri_mut(&mut self, tri: TriIndex) -> Result<&mut TriRef> {
        self.tri_refs[tri as usize]
            .as_mut()
            .ok_or_else(|| CutError::Consistency(format!("triangle {} has no proxy record", tri)))
    }

    // ---- live-triangle list plumbing ----

    /// Link one corner of a live triangle at the head of a node's list
    pub(crate) fn link_live(&mut self, node: NodeIndex, tri: TriIndex, corner: usize) -> Result<()> {
        let head = self.item(node)?.first_live;
        self.tri_mut(tri)?.next_live[corner] = head;
        self.item_mut(node)?.first_live = corner_handle(tri, corner);
        Ok(())
    }

    /// Unlink one corner of a live triangle from a node's list.
    ///
    /// O(list length); folds pay this once per detached subtriangle.
    pub(crate) fn unlink_live(
        &mut self,
        node: NodeIndex,
        tri: TriIndex,
        corner: usize,
    ) -> Result<()> {
        let target = corner_handle(tri, corner);
        let after_target = self.tri_ref(tri).map(|t| t.next_live[corner]).ok_or_else(|| {
            CutError::Consistency(format!("unlinking triangle {} which is not live", tri))
        })?;

        let head = self.item(node)?.first_live;
        if head == target {
            self.item_mut(node)?.first_live = after_target;
            self.tri_mut(tri)?.next_live[corner] = NO_CORNER;
            return Ok(());
        }

        let mut cur = head;
        loop {
            if cur == NO_CORNER {
                log::error!("triangle {} missing from live list of node {}", tri, node);
                return Err(CutError::Consistency(format!(
                    "triangle {} missing from live list of node {}",
                    tri, node
                )));
            }
            let (ct, cc) = (handle_tri(cur), handle_corner(cur));
            let next = self
                .tri_ref(ct)
                .ok_or_else(|| {
                    CutError::Consistency(format!("live list of node {} links dead triangle {}", node, ct))
                })?
                .next_live[cc];
            if next == target {
                self.tri_mut(ct)?.next_live[cc] = after_target;
                self.tri_mut(tri)?.next_live[corner] = NO_CORNER;
                return Ok(());
            }
            cur = next;
        }
    }

    /// Snapshot a node's live list as (triangle, corner) pairs
    pub(crate) fn collect_live(&self, node: NodeIndex) -> Result<Vec<(TriIndex, usize)>> {
        let mut out = Vec::new();
        let mut cur = self.item(node)?.first_live;
        while cur != NO_CORNER {
            let (t, c) = (handle_tri(cur), handle_corner(cur));
            cur = self
                .tri_ref(t)
                .ok_or_else(|| {
                    CutError::Consistency(format!("live list of node {} links dead triangle {}", node, t))
                })?
                .next_live[c];
            out.push((t, c));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multires_core::ForestBuilder;

    fn strip_forest() -> Arc<Forest> {
        let mut b = ForestBuilder::new();
        for i in 0..3 {
            b.add_position(Point3f::new(i as f32, 0.0, 0.0));
        }
        let rp = b.add_position(Point3f::new(1.0, 0.0, 0.0));
        for i in 0..3 {
            b.add_vertex(i, 0, None);
        }
        let root = b.add_vertex(rp, 0, None);
        b.add_tri([0, 1, 2], 0);
        b.add_merge(root, &[0, 1, 2], None);
        Arc::new(b.build().unwrap())
    }

    #[test]
    fn test_new_cut_has_root_only() {
        let cut = Cut::new(strip_forest());
        assert_eq!(cut.active_nodes(), vec![ROOT]);
        assert_eq!(cut.live_tri_count(), 0);
        assert_eq!(cut.active_vertex_count(), 1);
        let item = cut.budget_item(ROOT).unwrap();
        assert_eq!(item.state, NodeState::Folded);
        assert_eq!(cut.unfold_queue.len(), 1);
        assert!(cut.fold_queue.is_empty());
    }

    #[test]
    fn test_active_ancestor_walks_to_front() {
        let cut = Cut::new(strip_forest());
        // Every leaf proxies through the root while only the root is active
        for n in 2..=cut.forest().node_count() as NodeIndex {
            assert_eq!(cut.active_ancestor(n), ROOT);
        }
        assert_eq!(cut.active_ancestor(ROOT), ROOT);
    }

    #[test]
    fn test_error_key_total_order() {
        assert!(ErrorKey(2.0) > ErrorKey(1.0));
        assert!(ErrorKey(-1.0) < ErrorKey(0.0));
        // NaN sorts deterministically rather than breaking the heap
        let mut keys = [ErrorKey(f32::NAN), ErrorKey(1.0), ErrorKey(0.0)];
        keys.sort();
        assert_eq!(keys[0], ErrorKey(0.0));
        assert_eq!(keys[1], ErrorKey(1.0));
    }

    #[test]
    fn test_corner_handles() {
        let h = corner_handle(7, 2);
        assert_eq!(handle_tri(h), 7);
        assert_eq!(handle_corner(h), 2);
        assert_eq!(NO_CORNER, corner_handle(0, 0));
    }
}
