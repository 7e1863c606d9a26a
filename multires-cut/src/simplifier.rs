//! The budget-driven fold/unfold controller
//!
//! Fold and Unfold are the only two mutations a cut ever undergoes. Each
//! active node is either Folded (a member of the unfold-candidate queue)
//! or Unfolded (a member of the fold-candidate queue); the budgeting
//! policies walk both queues by repeated extremum-pop until their stopping
//! condition holds.

use std::cmp::Reverse;

use multires_core::{Forest, NodeIndex, NIL};

use crate::cut::{BudgetItem, Cut, ErrorKey, NodeState, TriRef, NO_CORNER};
use crate::error::{CutError, Result};
use crate::metric::{ErrorMetric, NodeErrorContext};

/// What a policy call accomplished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimplifyOutcome {
    /// Fold/unfold operations performed
    pub ops: usize,
    /// False when the operation cap cut the call short; re-invoke to
    /// converge further
    pub converged: bool,
}

/// Drives one or more cuts toward a budget or error threshold.
///
/// Holds only policy: the metric, the tolerance band that keeps the
/// budget loop from thrashing one node across the boundary, and a hard
/// cap on operations per call. All cut state lives in the [`Cut`].
pub struct Simplifier {
    pub metric: Box<dyn ErrorMetric>,
    /// Half-width of the dead band around a budget limit
    pub budget_tolerance: usize,
    /// Maximum fold/unfold operations per policy call
    pub break_count: usize,
}

impl Simplifier {
    pub fn new(metric: Box<dyn ErrorMetric>) -> Self {
        Self {
            metric,
            budget_tolerance: 1,
            break_count: usize::MAX,
        }
    }

    pub fn with_params(
        metric: Box<dyn ErrorMetric>,
        budget_tolerance: usize,
        break_count: usize,
    ) -> Self {
        Self {
            metric,
            budget_tolerance,
            break_count,
        }
    }

    fn error_for(&self, forest: &Forest, node: NodeIndex) -> f32 {
        let n = forest.node(node);
        let ctx = NodeErrorContext {
            center: n.center,
            half_extents: n.half_extents,
            params: forest.node_error_params(node),
        };
        self.metric.node_error(&ctx)
    }

    // ---- the two state transitions ----

    /// Refine the cut at `node`: its children become the front there.
    ///
    /// Calling this on an inactive, already-unfolded or leaf node is a
    /// caller bug; it is logged and ignored, never fatal.
    pub fn unfold(&self, cut: &mut Cut, node: NodeIndex) -> Result<()> {
        match cut.budget_item(node) {
            None => {
                log::warn!("unfold: node {} is not active in this cut", node);
                return Ok(());
            }
            Some(item) if item.state == NodeState::Unfolded => {
                log::debug!("unfold: node {} is already unfolded", node);
                return Ok(());
            }
            Some(_) => {}
        }
        if cut.forest().node(node).is_leaf() {
            log::warn!("unfold: node {} is a leaf", node);
            return Ok(());
        }
        self.unfold_one(cut, node)?;

        // Seam partners move together or cracks open along the patch edge
        let forest = cut.forest().clone();
        let mut m = forest.node(node).coincident;
        while m != NIL && m != node {
            let ready = cut
                .budget_item(m)
                .map_or(false, |i| i.state == NodeState::Folded)
                && !forest.node(m).is_leaf();
            if ready {
                self.unfold_one(cut, m)?;
            }
            m = forest.node(m).coincident;
        }
        Ok(())
    }

    fn unfold_one(&self, cut: &mut Cut, node: NodeIndex) -> Result<()> {
        let forest = cut.forest().clone();
        let parent_slot = cut.item(node)?.vertex_slot;

        // Activate the children
        for child in forest.children(node) {
            if cut.is_active(child) {
                log::error!("unfold: node {} already active under {}", child, node);
                return Err(CutError::Consistency(format!(
                    "duplicate budget item for node {}",
                    child
                )));
            }
            let cnode = forest.node(child);
            let datum = forest.geometry().render_datum(cnode.attribute as usize);
            let slot = cut.renderer.add_vertex_render_datum(datum);
            let error = self.error_for(&forest, child);
            cut.node_refs[child as usize] = Some(BudgetItem {
                node: child,
                center: cnode.center,
                half_extents: cnode.half_extents,
                error_param: cnode.error_param,
                error,
                vertex_slot: slot,
                first_live: NO_CORNER,
                state: NodeState::Folded,
            });
            // Leaves are pruned: active but never queued, they cannot unfold
            if !cnode.is_leaf() {
                cut.unfold_queue.push(child, ErrorKey(error));
            }
        }

        // Route this node's live corners through the children instead
        let moved = cut.collect_live(node)?;
        cut.item_mut(node)?.first_live = NO_CORNER;
        for (t, k) in moved {
            let corner = forest.tri(t).corners[k];
            let child = forest.child_containing(node, corner);
            if child == NIL {
                return Err(CutError::Consistency(format!(
                    "corner {} of triangle {} not under node {}",
                    k, t, node
                )));
            }
            let child_slot = cut.item(child)?.vertex_slot;
            let patch = forest.tri(t).patch;
            let tri_slot = {
                let tref = cut.tri_mut(t)?;
                tref.backrefs[k] = child;
                tref.proxies[k] = child_slot as u32;
                tref.tri_slot
            };
            cut.renderer.set_tri_corner(patch, tri_slot, k, child_slot as u32);
            cut.renderer.release_vertex_use(parent_slot)?;
            cut.renderer.add_vertex_use(child_slot);
            cut.link_live(child, t, k)?;
        }

        // This unfold is the moment the node's subtriangles first have
        // three distinct proxies; introduce them to the renderer
        for t in forest.subtris(node) {
            if cut.tri_ref(t).is_some() {
                return Err(CutError::Consistency(format!(
                    "triangle {} already live before its owner unfolded",
                    t
                )));
            }
            let tri = forest.tri(t);
            let mut backrefs = [NIL; 3];
            let mut proxies = [0u32; 3];
            for k in 0..3 {
                let p = cut.active_ancestor(tri.corners[k]);
                if p == NIL {
                    return Err(CutError::Consistency(format!(
                        "corner {} of triangle {} has no active ancestor",
                        k, t
                    )));
                }
                backrefs[k] = p;
                proxies[k] = cut.item(p)?.vertex_slot as u32;
            }
            let tri_slot = cut.renderer.add_tri_render_datum(tri.patch, proxies);
            for k in 0..3 {
                cut.renderer.add_vertex_use(proxies[k] as usize);
            }
            cut.tri_refs[t as usize] = Some(TriRef {
                backrefs,
                proxies,
                next_live: [NO_CORNER; 3],
                tri_slot,
            });
            for k in 0..3 {
                cut.link_live(backrefs[k], t, k)?;
            }
        }

        // The node is now a fold candidate instead of an unfold candidate
        let error = {
            let item = cut.item_mut(node)?;
            item.state = NodeState::Unfolded;
            item.error
        };
        cut.unfold_queue.remove(&node);
        cut.fold_queue.push(node, Reverse(ErrorKey(error)));
        Ok(())
    }

    /// Coarsen the cut at `node`: it stands in for its children again.
    ///
    /// Any still-unfolded child is folded first, recursively.
    pub fn fold(&self, cut: &mut Cut, node: NodeIndex) -> Result<()> {
        match cut.budget_item(node) {
            None => {
                log::warn!("fold: node {} is not active in this cut", node);
                return Ok(());
            }
            Some(item) if item.state == NodeState::Folded => {
                log::debug!("fold: node {} is already folded", node);
                return Ok(());
            }
            Some(_) => {}
        }
        self.fold_one(cut, node)?;

        let forest = cut.forest().clone();
        let mut m = forest.node(node).coincident;
        while m != NIL && m != node {
            let ready = cut
                .budget_item(m)
                .map_or(false, |i| i.state == NodeState::Unfolded);
            if ready {
                self.fold_one(cut, m)?;
            }
            m = forest.node(m).coincident;
        }
        Ok(())
    }

    fn fold_one(&self, cut: &mut Cut, node: NodeIndex) -> Result<()> {
        let forest = cut.forest().clone();

        // Children must present a folded front before they can merge away
        for child in forest.children(node) {
            let unfolded = cut
                .budget_item(child)
                .map_or(false, |i| i.state == NodeState::Unfolded);
            if unfolded {
                self.fold(cut, child)?;
            }
        }

        let node_slot = cut.item(node)?.vertex_slot;

        // Hoist every child's live corners up to this node
        for child in forest.children(node) {
            for (t, k) in cut.collect_live(child)? {
                let patch = forest.tri(t).patch;
                let tri_slot = {
                    let tref = cut.tri_mut(t)?;
                    tref.backrefs[k] = node;
                    tref.proxies[k] = node_slot as u32;
                    tref.tri_slot
                };
                cut.renderer.set_tri_corner(patch, tri_slot, k, node_slot as u32);
                let child_slot = cut.item(child)?.vertex_slot;
                cut.renderer.release_vertex_use(child_slot)?;
                cut.renderer.add_vertex_use(node_slot);
                cut.link_live(node, t, k)?;
            }
            cut.item_mut(child)?.first_live = NO_CORNER;
        }

        // The node's subtriangles are no longer individually resolvable
        for t in forest.subtris(node) {
            let (backrefs, proxies, tri_slot) = {
                let tref = cut.tri_mut(t)?;
                (tref.backrefs, tref.proxies, tref.tri_slot)
            };
            for k in 0..3 {
                cut.unlink_live(backrefs[k], t, k)?;
            }
            for k in 0..3 {
                cut.renderer.release_vertex_use(proxies[k] as usize)?;
            }
            cut.renderer.remove_tri_render_datum(forest.tri(t).patch, tri_slot)?;
            cut.tri_refs[t as usize] = None;
        }

        // Deactivate the children; their use counts drained during the hoist
        for child in forest.children(node) {
            let item = cut.node_refs[child as usize].take().ok_or_else(|| {
                CutError::Consistency(format!("child {} inactive while folding {}", child, node))
            })?;
            debug_assert_eq!(item.first_live, NO_CORNER);
            cut.unfold_queue.remove(&child);
            cut.renderer.remove_vertex_render_datum(item.vertex_slot)?;
        }

        let error = {
            let item = cut.item_mut(node)?;
            item.state = NodeState::Folded;
            item.error
        };
        cut.fold_queue.remove(&node);
        cut.unfold_queue.push(node, ErrorKey(error));
        Ok(())
    }

    // ---- budgeting policies ----

    fn current(cut: &Cut, use_tri_count: bool) -> usize {
        if use_tri_count {
            cut.live_tri_count()
        } else {
            cut.active_vertex_count()
        }
    }

    /// Drive the cut toward `limit` live triangles (or active vertices).
    ///
    /// Alternates refinement and coarsening passes; the tolerance band
    /// keeps a single node from oscillating across the boundary.
    pub fn simplify_budget(
        &self,
        cut: &mut Cut,
        limit: usize,
        use_tri_count: bool,
    ) -> Result<SimplifyOutcome> {
        let mut ops = 0usize;
        loop {
            let before = Self::current(cut, use_tri_count);
            while Self::current(cut, use_tri_count) < limit.saturating_sub(self.budget_tolerance) {
                let Some((&n, _)) = cut.unfold_queue.peek() else {
                    break;
                };
                if ops >= self.break_count {
                    return Ok(SimplifyOutcome { ops, converged: false });
                }
                self.unfold(cut, n)?;
                ops += 1;
            }
            while Self::current(cut, use_tri_count) >= limit + self.budget_tolerance {
                let Some((&n, _)) = cut.fold_queue.peek() else {
                    break;
                };
                if ops >= self.break_count {
                    return Ok(SimplifyOutcome { ops, converged: false });
                }
                self.fold(cut, n)?;
                ops += 1;
            }
            if Self::current(cut, use_tri_count) == before {
                break;
            }
        }
        Ok(SimplifyOutcome { ops, converged: true })
    }

    /// Fold every node erring below `threshold`, unfold every node at or
    /// above it.
    pub fn simplify_threshold(&self, cut: &mut Cut, threshold: f32) -> Result<SimplifyOutcome> {
        let mut ops = 0usize;
        while let Some((&n, &Reverse(key))) = cut.fold_queue.peek() {
            if key.0 >= threshold {
                break;
            }
            if ops >= self.break_count {
                return Ok(SimplifyOutcome { ops, converged: false });
            }
            self.fold(cut, n)?;
            ops += 1;
        }
        while let Some((&n, &key)) = cut.unfold_queue.peek() {
            if key.0 < threshold {
                break;
            }
            if ops >= self.break_count {
                return Ok(SimplifyOutcome { ops, converged: false });
            }
            self.unfold(cut, n)?;
            ops += 1;
        }
        Ok(SimplifyOutcome { ops, converged: true })
    }

    /// Budget and threshold combined. The direction is locked at entry so
    /// the two criteria cannot tug the cut back and forth in one call.
    pub fn simplify_budget_and_threshold(
        &self,
        cut: &mut Cut,
        limit: usize,
        use_tri_count: bool,
        threshold: f32,
    ) -> Result<SimplifyOutcome> {
        let mut ops = 0usize;
        let expanding = Self::current(cut, use_tri_count) < limit;
        if expanding {
            while Self::current(cut, use_tri_count) < limit.saturating_sub(self.budget_tolerance) {
                let Some((&n, &key)) = cut.unfold_queue.peek() else {
                    break;
                };
                if key.0 < threshold {
                    break;
                }
                if ops >= self.break_count {
                    return Ok(SimplifyOutcome { ops, converged: false });
                }
                self.unfold(cut, n)?;
                ops += 1;
            }
        } else {
            loop {
                let over =
                    Self::current(cut, use_tri_count) >= limit + self.budget_tolerance;
                let Some((&n, &Reverse(key))) = cut.fold_queue.peek() else {
                    break;
                };
                if !over && key.0 >= threshold {
                    break;
                }
                if ops >= self.break_count {
                    return Ok(SimplifyOutcome { ops, converged: false });
                }
                self.fold(cut, n)?;
                ops += 1;
            }
        }
        Ok(SimplifyOutcome { ops, converged: true })
    }

    /// Re-key every queued item with the current metric and rebuild both
    /// heaps in one O(n) pass. Required whenever the viewpoint moves.
    pub fn update_node_errors(&self, cut: &mut Cut) {
        let forest = cut.forest().clone();
        for slot in cut.node_refs.iter_mut() {
            if let Some(item) = slot {
                let ctx = NodeErrorContext {
                    center: item.center,
                    half_extents: item.half_extents,
                    params: forest.error_param_record(item.error_param),
                };
                item.error = self.metric.node_error(&ctx);
            }
        }
        cut.unfold_queue = cut
            .node_refs
            .iter()
            .flatten()
            .filter(|i| i.state == NodeState::Folded && !forest.node(i.node).is_leaf())
            .map(|i| (i.node, ErrorKey(i.error)))
            .collect();
        cut.fold_queue = cut
            .node_refs
            .iter()
            .flatten()
            .filter(|i| i.state == NodeState::Unfolded)
            .map(|i| (i.node, Reverse(ErrorKey(i.error))))
            .collect();
    }
}
