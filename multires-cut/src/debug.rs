//! Consistency scans for a cut
//!
//! These walks are far too slow for per-frame use; they exist for tests
//! and for tracking down corruption after an engine change. Which scans
//! run is chosen by an explicit [`DebugContext`] so callers pay only for
//! what they ask.

use std::cmp::Reverse;

use multires_core::{NodeIndex, NIL, ROOT};

use crate::cut::{handle_corner, handle_tri, Cut, ErrorKey, NodeState, NO_CORNER};
use crate::error::{CutError, Result};

/// Selects which validation scans [`Cut::validate`] performs.
#[derive(Debug, Clone)]
pub struct DebugContext {
    /// Verify the active set is a well-formed cut and the queues agree
    /// with the node states
    pub check_cut: bool,
    /// Verify triangle liveness, backrefs, proxies, and the per-node
    /// live lists
    pub check_live_tris: bool,
    /// Recount vertex slot references and compare with the renderer
    pub check_use_counts: bool,
    /// Dump this node's budget item and live list to the log
    pub highlight: Option<NodeIndex>,
}

impl Default for DebugContext {
    fn default() -> Self {
        Self {
            check_cut: true,
            check_live_tris: true,
            check_use_counts: true,
            highlight: None,
        }
    }
}

fn fail(msg: String) -> CutError {
    log::error!("cut validation: {}", msg);
    CutError::Consistency(msg)
}

impl Cut {
    /// Run the scans selected by `ctx`, failing on the first
    /// inconsistency found.
    pub fn validate(&self, ctx: &DebugContext) -> Result<()> {
        if ctx.check_cut {
            self.scan_cut()?;
        }
        if ctx.check_live_tris {
            self.scan_live_tris()?;
        }
        if ctx.check_use_counts {
            self.scan_use_counts()?;
        }
        if let Some(node) = ctx.highlight {
            match self.budget_item(node) {
                Some(item) => log::debug!(
                    "node {}: state {:?}, error {}, vertex slot {}, live corners {:?}",
                    node,
                    item.state,
                    item.error,
                    item.vertex_slot,
                    self.live_corners(node)
                ),
                None => log::debug!("node {}: inactive", node),
            }
        }
        Ok(())
    }

    fn live_corners(&self, node: NodeIndex) -> Vec<(u32, usize)> {
        let mut out = Vec::new();
        let mut h = match self.budget_item(node) {
            Some(item) => item.first_live,
            None => NO_CORNER,
        };
        while h != NO_CORNER {
            let (t, k) = (handle_tri(h), handle_corner(h));
            out.push((t, k));
            h = match &self.tri_refs[t as usize] {
                Some(tref) => tref.next_live[k],
                None => NO_CORNER,
            };
        }
        out
    }

    fn scan_cut(&self) -> Result<()> {
        let forest = self.forest();
        if !self.is_active(ROOT) {
            return Err(fail("root is not active".into()));
        }
        for node in self.active_nodes() {
            let Some(item) = self.budget_item(node) else {
                continue;
            };
            if item.node != node {
                return Err(fail(format!(
                    "budget item at {} names node {}",
                    node, item.node
                )));
            }
            if node != ROOT {
                let parent = forest.node(node).parent;
                let ok = self
                    .budget_item(parent)
                    .map_or(false, |p| p.state == NodeState::Unfolded);
                if !ok {
                    return Err(fail(format!(
                        "active node {} under a parent that is not unfolded",
                        node
                    )));
                }
            }
            match item.state {
                NodeState::Unfolded => {
                    for child in forest.children(node) {
                        if !self.is_active(child) {
                            return Err(fail(format!(
                                "unfolded node {} has inactive child {}",
                                node, child
                            )));
                        }
                    }
                    if self.fold_queue.get_priority(&node)
                        != Some(&Reverse(ErrorKey(item.error)))
                    {
                        return Err(fail(format!("node {} missing from fold queue", node)));
                    }
                    if self.unfold_queue.get_priority(&node).is_some() {
                        return Err(fail(format!(
                            "unfolded node {} still in unfold queue",
                            node
                        )));
                    }
                }
                NodeState::Folded => {
                    let queued = self.unfold_queue.get_priority(&node).is_some();
                    if queued == forest.node(node).is_leaf() {
                        return Err(fail(format!(
                            "folded node {} queue membership disagrees with leafness",
                            node
                        )));
                    }
                    if self.fold_queue.get_priority(&node).is_some() {
                        return Err(fail(format!("folded node {} in fold queue", node)));
                    }
                }
            }
        }
        let active = self.active_nodes().len();
        if self.fold_queue.len() + self.unfold_queue.len() > active {
            return Err(fail("queues hold more entries than active nodes".into()));
        }
        Ok(())
    }

    fn scan_live_tris(&self) -> Result<()> {
        let forest = self.forest();
        for t in 1..=forest.tri_count() as u32 {
            let owner = forest.subtri_owner(t);
            let owner_unfolded = self
                .budget_item(owner)
                .map_or(false, |i| i.state == NodeState::Unfolded);
            match &self.tri_refs[t as usize] {
                None => {
                    if owner_unfolded {
                        return Err(fail(format!(
                            "triangle {} not live though its owner {} is unfolded",
                            t, owner
                        )));
                    }
                }
                Some(tref) => {
                    if !owner_unfolded {
                        return Err(fail(format!(
                            "triangle {} live though its owner {} is not unfolded",
                            t, owner
                        )));
                    }
                    let tri = forest.tri(t);
                    for k in 0..3 {
                        let backref = tref.backrefs[k];
                        let item = self.budget_item(backref).ok_or_else(|| {
                            fail(format!(
                                "triangle {} corner {} proxies inactive node {}",
                                t, k, backref
                            ))
                        })?;
                        if tref.proxies[k] != item.vertex_slot as u32 {
                            return Err(fail(format!(
                                "triangle {} corner {} proxy slot out of date",
                                t, k
                            )));
                        }
                        // The backref must lie on the corner's root path
                        let mut v = tri.corners[k];
                        while v != NIL && v != backref {
                            v = forest.node(v).parent;
                        }
                        if v == NIL {
                            return Err(fail(format!(
                                "triangle {} corner {} proxies non-ancestor {}",
                                t, k, backref
                            )));
                        }
                    }
                    let rendered = self.renderer.tri_corners(tri.patch, tref.tri_slot);
                    if rendered != tref.proxies {
                        return Err(fail(format!(
                            "triangle {} renderer corners disagree with proxies",
                            t
                        )));
                    }
                }
            }
        }

        // Every live corner on exactly the list of the node it proxies
        let mut seen = vec![[false; 3]; forest.tri_count() + 1];
        for node in self.active_nodes() {
            for (t, k) in self.live_corners(node) {
                let tref = self.tri_refs[t as usize].as_ref().ok_or_else(|| {
                    fail(format!("live list of node {} links dead triangle {}", node, t))
                })?;
                if tref.backrefs[k] != node {
                    return Err(fail(format!(
                        "triangle {} corner {} on list of {} but proxies {}",
                        t, k, node, tref.backrefs[k]
                    )));
                }
                if seen[t as usize][k] {
                    return Err(fail(format!(
                        "triangle {} corner {} linked twice",
                        t, k
                    )));
                }
                seen[t as usize][k] = true;
            }
        }
        for t in 1..=forest.tri_count() {
            if self.tri_refs[t].is_some() && seen[t] != [true; 3] {
                return Err(fail(format!("live triangle {} has unlinked corners", t)));
            }
        }
        Ok(())
    }

    fn scan_use_counts(&self) -> Result<()> {
        let mut counted = vec![0u32; self.renderer.vertex_array().len()];
        for tref in self.tri_refs.iter().flatten() {
            for k in 0..3 {
                counted[tref.proxies[k] as usize] += 1;
            }
        }
        for (slot, &expect) in counted.iter().enumerate() {
            let actual = self.renderer.vertex_use_count(slot);
            if actual != expect {
                return Err(fail(format!(
                    "vertex slot {} use count {} but {} live corners reference it",
                    slot, actual, expect
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use multires_core::{Forest, ForestBuilder, Point3f};

    use crate::metric::BoundBoxDiagonal;
    use crate::simplifier::Simplifier;

    fn fan_forest() -> Arc<Forest> {
        let mut b = ForestBuilder::new();
        for i in 0..4 {
            b.add_position(Point3f::new(i as f32, (i % 2) as f32, 0.0));
            b.add_vertex(i, 0, None);
        }
        let c = b.add_position(Point3f::new(1.5, 0.5, 0.0));
        let r = b.add_vertex(c, 0, None);
        b.add_tri([0, 1, 2], 0);
        b.add_tri([1, 3, 2], 0);
        b.add_merge(r, &[0, 1, 2, 3], None);
        Arc::new(b.build().unwrap())
    }

    #[test]
    fn test_validate_clean_after_transitions() {
        let s = Simplifier::new(Box::new(BoundBoxDiagonal));
        let mut cut = Cut::new(fan_forest());
        s.update_node_errors(&mut cut);
        let ctx = DebugContext::default();
        cut.validate(&ctx).unwrap();
        s.unfold(&mut cut, ROOT).unwrap();
        cut.validate(&ctx).unwrap();
        s.fold(&mut cut, ROOT).unwrap();
        cut.validate(&ctx).unwrap();
    }

    #[test]
    fn test_validate_catches_use_count_drift() {
        let s = Simplifier::new(Box::new(BoundBoxDiagonal));
        let mut cut = Cut::new(fan_forest());
        s.update_node_errors(&mut cut);
        s.unfold(&mut cut, ROOT).unwrap();
        let slot = cut.budget_item(2).unwrap().vertex_slot;
        cut.renderer.add_vertex_use(slot);
        let ctx = DebugContext {
            check_cut: false,
            check_live_tris: false,
            ..DebugContext::default()
        };
        assert!(cut.validate(&ctx).is_err());
    }

    #[test]
    fn test_validate_scans_can_be_disabled() {
        let s = Simplifier::new(Box::new(BoundBoxDiagonal));
        let mut cut = Cut::new(fan_forest());
        s.update_node_errors(&mut cut);
        s.unfold(&mut cut, ROOT).unwrap();
        let slot = cut.budget_item(2).unwrap().vertex_slot;
        cut.renderer.add_vertex_use(slot);
        let ctx = DebugContext {
            check_cut: true,
            check_live_tris: true,
            check_use_counts: false,
            highlight: Some(ROOT),
        };
        cut.validate(&ctx).unwrap();
        cut.renderer.release_vertex_use(slot).unwrap();
        cut.validate(&DebugContext::default()).unwrap();
    }
}
