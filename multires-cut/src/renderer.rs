//! Dense, GPU-ready vertex and per-patch index arrays for one cut
//!
//! Slots are recycled through small free lists backed by a linear scan, so
//! fold/unfold churn stays cheap without ever moving a live slot. Indices
//! are stable: growth only appends, and freed triangle slots are rewritten
//! as degenerate triples so a patch's index buffer can be submitted as-is
//! up to its high-water mark.

use std::collections::VecDeque;

use multires_core::VertexRenderDatum;

use crate::error::{CutError, Result};

/// Ring-buffer cache of recently freed slots. Frees beyond the capacity
/// are dropped; the linear-scan refill finds them again later.
const FREE_LIST_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct FreeList {
    slots: VecDeque<usize>,
}

impl FreeList {
    fn push(&mut self, slot: usize) {
        if self.slots.len() < FREE_LIST_CAPACITY {
            self.slots.push_back(slot);
        }
    }

    fn pop(&mut self) -> Option<usize> {
        self.slots.pop_front()
    }

    /// Refill from a linear scan over the allocation bitmap. Only called
    /// when the list is empty, so no slot can be cached twice.
    fn refill(&mut self, allocated: &[bool]) {
        debug_assert!(self.slots.is_empty());
        for (i, &a) in allocated.iter().enumerate() {
            if !a {
                self.slots.push_back(i);
                if self.slots.len() == FREE_LIST_CAPACITY {
                    break;
                }
            }
        }
    }
}

/// One patch's index buffer plus its allocation bookkeeping
#[derive(Debug, Default)]
struct PatchBuffer {
    indices: Vec<[u32; 3]>,
    allocated: Vec<bool>,
    free: FreeList,
    /// 1 + highest allocated slot; the submittable prefix length
    high_water: usize,
    live: usize,
}

/// Owns the dense render arrays for one cut.
///
/// The vertex array is shared by all patches; each patch (material group)
/// has its own contiguous index buffer. Per-slot vertex use counts track
/// how many triangle corners currently proxy through each slot; a slot may
/// only be freed at exactly zero.
#[derive(Debug)]
pub struct Renderer {
    vertices: Vec<VertexRenderDatum>,
    vertex_allocated: Vec<bool>,
    vertex_uses: Vec<u32>,
    vertex_free: FreeList,
    vertex_high_water: usize,
    active_vertices: usize,
    patches: Vec<PatchBuffer>,
    live_tris: usize,
}

impl Renderer {
    pub fn new(num_patches: u16) -> Self {
        let mut patches = Vec::with_capacity(num_patches as usize);
        patches.resize_with(num_patches as usize, PatchBuffer::default);
        Self {
            vertices: Vec::new(),
            vertex_allocated: Vec::new(),
            vertex_uses: Vec::new(),
            vertex_free: FreeList::default(),
            vertex_high_water: 0,
            active_vertices: 0,
            patches,
            live_tris: 0,
        }
    }

    pub fn num_patches(&self) -> u16 {
        self.patches.len() as u16
    }

    pub fn active_vertex_count(&self) -> usize {
        self.active_vertices
    }

    pub fn live_tri_count(&self) -> usize {
        self.live_tris
    }

    // ---- vertex slots ----

    /// Reserve a dense slot and copy the datum into it.
    pub fn add_vertex_render_datum(&mut self, datum: VertexRenderDatum) -> usize {
        let slot = match self.alloc_vertex_slot() {
            Some(s) => s,
            None => {
                // Grow by half again, never one element at a time
                if self.vertices.len() == self.vertices.capacity() {
                    let additional = (self.vertices.len() / 2).max(4);
                    self.vertices.reserve(additional);
                    self.vertex_allocated.reserve(additional);
                    self.vertex_uses.reserve(additional);
                }
                self.vertices.push(VertexRenderDatum::default());
                self.vertex_allocated.push(false);
                self.vertex_uses.push(0);
                self.vertices.len() - 1
            }
        };
        self.vertices[slot] = datum;
        self.vertex_allocated[slot] = true;
        self.vertex_uses[slot] = 0;
        self.active_vertices += 1;
        if slot + 1 > self.vertex_high_water {
            self.vertex_high_water = slot + 1;
        }
        slot
    }

    fn alloc_vertex_slot(&mut self) -> Option<usize> {
        if let Some(s) = self.vertex_free.pop() {
            return Some(s);
        }
        self.vertex_free.refill(&self.vertex_allocated);
        self.vertex_free.pop()
    }

    /// Return a slot to the free list. The slot's use count must be zero.
    pub fn remove_vertex_render_datum(&mut self, slot: usize) -> Result<()> {
        if !self.vertex_allocated[slot] {
            log::error!("vertex slot {} freed twice", slot);
            return Err(CutError::Consistency(format!(
                "vertex slot {} freed twice",
                slot
            )));
        }
        let uses = self.vertex_uses[slot];
        if uses != 0 {
            log::error!("vertex slot {} freed with use count {}", slot, uses);
            return Err(CutError::SlotInUse { slot, uses });
        }
        self.vertex_allocated[slot] = false;
        self.vertex_free.push(slot);
        self.active_vertices -= 1;
        // Amortized O(1): scan backward only when the high-water slot goes
        if slot + 1 == self.vertex_high_water {
            let mut hw = slot;
            while hw > 0 && !self.vertex_allocated[hw - 1] {
                hw -= 1;
            }
            self.vertex_high_water = hw;
        }
        Ok(())
    }

    pub fn vertex_datum(&self, slot: usize) -> &VertexRenderDatum {
        &self.vertices[slot]
    }

    /// The dense vertex array, valid up to the high-water mark
    pub fn vertex_array(&self) -> &[VertexRenderDatum] {
        &self.vertices[..self.vertex_high_water]
    }

    pub fn add_vertex_use(&mut self, slot: usize) {
        debug_assert!(self.vertex_allocated[slot]);
        self.vertex_uses[slot] += 1;
    }

    pub fn release_vertex_use(&mut self, slot: usize) -> Result<()> {
        if self.vertex_uses[slot] == 0 {
            log::error!("vertex slot {} released below zero uses", slot);
            return Err(CutError::Consistency(format!(
                "vertex slot {} released below zero uses",
                slot
            )));
        }
        self.vertex_uses[slot] -= 1;
        Ok(())
    }

    pub fn vertex_use_count(&self, slot: usize) -> u32 {
        self.vertex_uses[slot]
    }

    // ---- per-patch triangle slots ----

    /// Reserve an index-buffer slot in a patch and write the corner triple.
    pub fn add_tri_render_datum(&mut self, patch: u16, corners: [u32; 3]) -> usize {
        let p = &mut self.patches[patch as usize];
        let slot = match p.free.pop().or_else(|| {
            p.free.refill(&p.allocated);
            p.free.pop()
        }) {
            Some(s) => s,
            None => {
                if p.indices.len() == p.indices.capacity() {
                    let additional = (p.indices.len() / 2).max(4);
                    p.indices.reserve(additional);
                    p.allocated.reserve(additional);
                }
                p.indices.push([0; 3]);
                p.allocated.push(false);
                p.indices.len() - 1
            }
        };
        p.indices[slot] = corners;
        p.allocated[slot] = true;
        p.live += 1;
        if slot + 1 > p.high_water {
            p.high_water = slot + 1;
        }
        self.live_tris += 1;
        slot
    }

    /// Free an index-buffer slot; the hole becomes a degenerate triple so
    /// the buffer stays submittable without compaction.
    pub fn remove_tri_render_datum(&mut self, patch: u16, slot: usize) -> Result<()> {
        let p = &mut self.patches[patch as usize];
        if !p.allocated[slot] {
            log::error!("patch {} tri slot {} freed twice", patch, slot);
            return Err(CutError::Consistency(format!(
                "patch {} tri slot {} freed twice",
                patch, slot
            )));
        }
        p.indices[slot] = [0; 3];
        p.allocated[slot] = false;
        p.free.push(slot);
        p.live -= 1;
        if slot + 1 == p.high_water {
            let mut hw = slot;
            while hw > 0 && !p.allocated[hw - 1] {
                hw -= 1;
            }
            p.high_water = hw;
        }
        self.live_tris -= 1;
        Ok(())
    }

    /// Repoint one corner of a live triangle at a new vertex slot
    pub fn set_tri_corner(&mut self, patch: u16, slot: usize, corner: usize, vertex: u32) {
        debug_assert!(self.patches[patch as usize].allocated[slot]);
        self.patches[patch as usize].indices[slot][corner] = vertex;
    }

    pub fn tri_corners(&self, patch: u16, slot: usize) -> [u32; 3] {
        self.patches[patch as usize].indices[slot]
    }

    /// A patch's index buffer, valid up to its high-water mark
    pub fn patch_index_array(&self, patch: u16) -> &[[u32; 3]] {
        let p = &self.patches[patch as usize];
        &p.indices[..p.high_water]
    }

    pub fn patch_live_count(&self, patch: u16) -> usize {
        self.patches[patch as usize].live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datum(x: f32) -> VertexRenderDatum {
        VertexRenderDatum {
            position: [x, 0.0, 0.0],
            ..Default::default()
        }
    }

    #[test]
    fn test_vertex_slot_reuse() {
        let mut r = Renderer::new(1);
        let a = r.add_vertex_render_datum(datum(1.0));
        let b = r.add_vertex_render_datum(datum(2.0));
        assert_ne!(a, b);
        r.remove_vertex_render_datum(a).unwrap();
        let c = r.add_vertex_render_datum(datum(3.0));
        assert_eq!(c, a, "freed slot should be recycled");
        assert_eq!(r.vertex_datum(c).position[0], 3.0);
        assert_eq!(r.active_vertex_count(), 2);
    }

    #[test]
    fn test_use_count_guards_removal() {
        let mut r = Renderer::new(1);
        let s = r.add_vertex_render_datum(datum(1.0));
        r.add_vertex_use(s);
        assert!(matches!(
            r.remove_vertex_render_datum(s),
            Err(CutError::SlotInUse { uses: 1, .. })
        ));
        r.release_vertex_use(s).unwrap();
        r.remove_vertex_render_datum(s).unwrap();
    }

    #[test]
    fn test_release_below_zero_is_error() {
        let mut r = Renderer::new(1);
        let s = r.add_vertex_render_datum(datum(1.0));
        assert!(r.release_vertex_use(s).is_err());
    }

    #[test]
    fn test_double_free_is_error() {
        let mut r = Renderer::new(1);
        let s = r.add_vertex_render_datum(datum(1.0));
        r.remove_vertex_render_datum(s).unwrap();
        assert!(r.remove_vertex_render_datum(s).is_err());
    }

    #[test]
    fn test_high_water_tracks_top_slot() {
        let mut r = Renderer::new(1);
        let slots: Vec<_> = (0..5).map(|i| r.add_vertex_render_datum(datum(i as f32))).collect();
        assert_eq!(r.vertex_array().len(), 5);
        // Free the top two; the mark retreats past both
        r.remove_vertex_render_datum(slots[4]).unwrap();
        r.remove_vertex_render_datum(slots[3]).unwrap();
        assert_eq!(r.vertex_array().len(), 3);
        // Free a middle slot; the mark stays
        r.remove_vertex_render_datum(slots[1]).unwrap();
        assert_eq!(r.vertex_array().len(), 3);
    }

    #[test]
    fn test_free_list_overflow_falls_back_to_scan() {
        let mut r = Renderer::new(1);
        let n = FREE_LIST_CAPACITY + 16;
        let slots: Vec<_> = (0..n).map(|i| r.add_vertex_render_datum(datum(i as f32))).collect();
        for &s in &slots {
            r.remove_vertex_render_datum(s).unwrap();
        }
        // More frees than the ring caches; reallocation must still find
        // every slot without growing the array
        for i in 0..n {
            let s = r.add_vertex_render_datum(datum(i as f32));
            assert!(s < n, "slot {} allocated beyond original storage", s);
        }
        assert_eq!(r.active_vertex_count(), n);
    }

    #[test]
    fn test_tri_slots_scoped_per_patch() {
        let mut r = Renderer::new(2);
        let a = r.add_tri_render_datum(0, [0, 1, 2]);
        let b = r.add_tri_render_datum(1, [3, 4, 5]);
        assert_eq!(a, 0);
        assert_eq!(b, 0, "patches have independent slot spaces");
        assert_eq!(r.live_tri_count(), 2);
        assert_eq!(r.patch_live_count(0), 1);
        assert_eq!(r.patch_index_array(0), &[[0, 1, 2]]);
    }

    #[test]
    fn test_tri_removal_leaves_degenerate_hole() {
        let mut r = Renderer::new(1);
        r.add_tri_render_datum(0, [0, 1, 2]);
        let s = r.add_tri_render_datum(0, [3, 4, 5]);
        r.add_tri_render_datum(0, [6, 7, 8]);
        r.remove_tri_render_datum(0, s).unwrap();
        let buf = r.patch_index_array(0);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf[s], [0, 0, 0]);
        assert_eq!(r.live_tri_count(), 2);
    }

    #[test]
    fn test_set_tri_corner() {
        let mut r = Renderer::new(1);
        let s = r.add_tri_render_datum(0, [0, 1, 2]);
        r.set_tri_corner(0, s, 1, 9);
        assert_eq!(r.tri_corners(0, s), [0, 9, 2]);
    }
}
