//! Page table - maps logical terrain pages onto a fixed pool of physical slots
//!
//! - Fixed capacity, shared by all four channels (one slot = one array layer)
//! - Slots move `Free -> Writing -> Resident` and only return to the free
//!   list through an explicit unload or combine
//! - Never evicts: a full pool reports `Error::PoolExhausted`

use std::collections::{HashMap, HashSet};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::quadtree::PageCoord;
use crate::render::TerrainGpu;

use super::lookup::PageLookup;

/// Hard upper bound on physical slots
pub const MAX_PHYSICAL_SLOTS: u32 = 2048;

/// Slots needed for a fully subdivided tree of `lod_count` levels, capped
pub fn default_capacity(lod_count: u32) -> u32 {
    4u64.saturating_pow(lod_count).min(MAX_PHYSICAL_SLOTS as u64) as u32
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Free,
    /// A composite targets this slot; not reusable until the write completes
    Writing,
    Resident,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageEntry {
    pub slot: u32,
    pub depth: u32,
    /// Frame at which the page was allocated
    pub generation: u64,
}

/// Slots involved in folding four child pages into their parent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CombinePlan {
    pub target: u32,
    /// Child slots in quadrant order; `None` where the child had no content
    pub children: [Option<u32>; 4],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageTableStats {
    pub capacity: u32,
    pub resident: u32,
    pub writing: u32,
    pub free: u32,
    pub pending: u32,
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    state: SlotState,
    /// `None` while free, or while writing after the owner was released
    owner: Option<PageCoord>,
}

const FREE_SLOT: Slot = Slot {
    state: SlotState::Free,
    owner: None,
};

pub struct VirtualTexture {
    max_depth: u32,
    capacity: u32,
    pages: HashMap<PageCoord, PageEntry>,
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    /// Loads queued for the streaming pipeline and not yet started
    pending: HashSet<PageCoord>,
    frame: u64,
    lookup: PageLookup,
    dirty: bool,
}

impl VirtualTexture {
    pub fn new(max_depth: u32, capacity: u32) -> Self {
        let capacity = if capacity > MAX_PHYSICAL_SLOTS {
            log::warn!(
                "Requested {} page slots, clamping to {}",
                capacity,
                MAX_PHYSICAL_SLOTS
            );
            MAX_PHYSICAL_SLOTS
        } else {
            capacity.max(1)
        };

        log::info!(
            "Created page table: {} slots, lookup {}x{}",
            capacity,
            1u32 << max_depth,
            1u32 << max_depth
        );

        Self {
            max_depth,
            capacity,
            pages: HashMap::new(),
            slots: vec![FREE_SLOT; capacity as usize],
            // Popped from the back, so slot 0 is handed out first
            free_slots: (0..capacity).rev().collect(),
            pending: HashSet::new(),
            frame: 0,
            lookup: PageLookup::new(max_depth),
            dirty: true,
        }
    }

    /// Drop every mapping and return all slots to the free list
    pub fn reset(&mut self) {
        self.pages.clear();
        self.slots.fill(FREE_SLOT);
        self.free_slots = (0..self.capacity).rev().collect();
        self.pending.clear();
        self.dirty = true;
    }

    /// Advance the generation counter stamped on newly loaded pages
    pub fn advance_frame(&mut self) {
        self.frame += 1;
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Allocate a slot for `page`, or reuse its slot if already mapped
    pub fn load_new_texture(&mut self, page: PageCoord) -> Result<u32> {
        if let Some(entry) = self.pages.get(&page) {
            let slot = entry.slot;
            self.slots[slot as usize].state = SlotState::Writing;
            self.dirty = true;
            return Ok(slot);
        }

        let slot = self.free_slots.pop().ok_or(Error::PoolExhausted {
            capacity: self.capacity,
        })?;
        self.slots[slot as usize] = Slot {
            state: SlotState::Writing,
            owner: Some(page),
        };
        self.pages.insert(
            page,
            PageEntry {
                slot,
                depth: page.depth(self.max_depth),
                generation: self.frame,
            },
        );
        self.dirty = true;
        log::trace!("Page {:?} -> slot {}", page, slot);
        Ok(slot)
    }

    /// Mark a slot's composite as finished
    pub fn complete_write(&mut self, slot: u32) {
        let Some(s) = self.slots.get_mut(slot as usize) else {
            log::warn!("complete_write on unknown slot {}", slot);
            return;
        };
        match (s.state, s.owner) {
            (SlotState::Writing, Some(_)) => {
                s.state = SlotState::Resident;
                self.dirty = true;
            }
            (SlotState::Writing, None) => {
                // Owner went away mid-write; the slot is reusable only now
                *s = FREE_SLOT;
                self.free_slots.push(slot);
            }
            (state, _) => {
                log::warn!("complete_write on slot {} in state {:?}", slot, state);
            }
        }
    }

    /// Fold the four children of `page` into it.
    ///
    /// Returns `None` when the page was still mapped (children are just
    /// released). On success the target slot is `Writing` until the caller
    /// completes the combine pass. Child slots are freed before returning.
    pub fn combine_texture(&mut self, page: PageCoord) -> Result<Option<CombinePlan>> {
        self.pending.remove(&page);

        if self.pages.contains_key(&page) {
            self.release_children(page);
            return Ok(None);
        }

        // Allocate before releasing so the target never aliases a child
        let target = match self.load_new_texture(page) {
            Ok(slot) => slot,
            Err(e) => {
                self.release_children(page);
                return Err(e);
            }
        };

        let mut children = [None; 4];
        if let Some(child_pages) = page.children() {
            for (quadrant, child) in child_pages.iter().enumerate() {
                self.pending.remove(child);
                if let Some(entry) = self.pages.get(child) {
                    if self.slots[entry.slot as usize].state == SlotState::Resident {
                        children[quadrant] = Some(entry.slot);
                    }
                }
                self.release(child);
            }
        }

        Ok(Some(CombinePlan { target, children }))
    }

    fn release_children(&mut self, page: PageCoord) {
        if let Some(child_pages) = page.children() {
            for child in child_pages {
                self.pending.remove(&child);
                self.release(&child);
            }
        }
    }

    /// Free the slot of `page` immediately. Unknown pages are a no-op.
    pub fn unload_texture(&mut self, page: PageCoord) {
        self.pending.remove(&page);
        self.release(&page);
    }

    fn release(&mut self, page: &PageCoord) -> Option<u32> {
        let entry = self.pages.remove(page)?;
        let slot = &mut self.slots[entry.slot as usize];
        if slot.state == SlotState::Writing {
            slot.owner = None;
        } else {
            *slot = FREE_SLOT;
            self.free_slots.push(entry.slot);
        }
        self.dirty = true;
        log::trace!("Released page {:?} (slot {})", page, entry.slot);
        Some(entry.slot)
    }

    /// Record that a load for `page` was handed to the streaming pipeline
    pub fn mark_pending(&mut self, page: PageCoord) {
        self.pending.insert(page);
    }

    /// Claim a pending load. `false` means it was cancelled meanwhile.
    pub fn take_pending(&mut self, page: PageCoord) -> bool {
        self.pending.remove(&page)
    }

    pub fn is_pending(&self, page: PageCoord) -> bool {
        self.pending.contains(&page)
    }

    pub fn slot_of(&self, page: PageCoord) -> Option<u32> {
        self.pages.get(&page).map(|e| e.slot)
    }

    pub fn entry(&self, page: PageCoord) -> Option<&PageEntry> {
        self.pages.get(&page)
    }

    pub fn is_resident(&self, page: PageCoord) -> bool {
        self.slot_of(page)
            .is_some_and(|slot| self.slots[slot as usize].state == SlotState::Resident)
    }

    pub fn slot_state(&self, slot: u32) -> Option<SlotState> {
        self.slots.get(slot as usize).map(|s| s.state)
    }

    pub fn owner_of(&self, slot: u32) -> Option<PageCoord> {
        self.slots.get(slot as usize).and_then(|s| s.owner)
    }

    /// Resident pages, oldest generation first
    pub fn resident_pages(&self) -> Vec<(PageCoord, PageEntry)> {
        let mut pages: Vec<_> = self
            .pages
            .iter()
            .filter(|(_, e)| self.slots[e.slot as usize].state == SlotState::Resident)
            .map(|(p, e)| (*p, *e))
            .collect();
        pages.sort_by_key(|(_, e)| (e.generation, e.slot));
        pages
    }

    pub fn free_slots(&self) -> usize {
        self.free_slots.len()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn stats(&self) -> PageTableStats {
        let mut stats = PageTableStats {
            capacity: self.capacity,
            pending: self.pending.len() as u32,
            ..Default::default()
        };
        for slot in &self.slots {
            match slot.state {
                SlotState::Free => stats.free += 1,
                SlotState::Writing => stats.writing += 1,
                SlotState::Resident => stats.resident += 1,
            }
        }
        stats
    }

    pub fn lookup(&self) -> &PageLookup {
        &self.lookup
    }

    /// Rebuild the lookup grid if any mapping changed. Returns whether it did.
    pub fn refresh_lookup(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        self.lookup.clear();

        let mut resident: Vec<_> = self
            .pages
            .iter()
            .filter(|(_, e)| self.slots[e.slot as usize].state == SlotState::Resident)
            .collect();
        // Coarse first so finer pages win
        resident.sort_by(|a, b| b.0.size.cmp(&a.0.size));
        for (page, entry) in resident {
            self.lookup.write(*page, entry.slot);
        }

        self.dirty = false;
        true
    }

    /// Publish the lookup to the GPU when it changed since the last publish
    pub fn update<G: TerrainGpu>(&mut self, gpu: &mut G) -> bool {
        if !self.refresh_lookup() {
            return false;
        }
        gpu.publish_lookup(&self.lookup);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::UVec2;
    use crate::quadtree::NodeCoord;
    use crate::virtual_texture::lookup::NO_PAGE;

    fn page(depth: u32, x: u32, y: u32) -> PageCoord {
        NodeCoord::new(depth, x, y).page(3)
    }

    fn load_resident(vt: &mut VirtualTexture, p: PageCoord) -> u32 {
        let slot = vt.load_new_texture(p).unwrap();
        vt.complete_write(slot);
        slot
    }

    impl VirtualTexture {
        /// Every slot has at most one owner and the free list matches slot states
        fn assert_consistent(&self) {
            let mut owned = HashSet::new();
            for (p, e) in &self.pages {
                assert!(owned.insert(e.slot), "slot {} owned twice", e.slot);
                assert_eq!(self.slots[e.slot as usize].owner, Some(*p));
            }
            let free: HashSet<u32> = self.free_slots.iter().copied().collect();
            assert_eq!(free.len(), self.free_slots.len(), "duplicate free slot");
            for (i, slot) in self.slots.iter().enumerate() {
                let i = i as u32;
                assert_eq!(slot.state == SlotState::Free, free.contains(&i));
                assert!(!(owned.contains(&i) && free.contains(&i)));
            }
        }
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(default_capacity(1), 4);
        assert_eq!(default_capacity(3), 64);
        assert_eq!(default_capacity(6), 2048);
        assert_eq!(default_capacity(12), 2048);
    }

    #[test]
    fn test_load_is_idempotent_per_page() {
        let mut vt = VirtualTexture::new(3, 8);
        let a = load_resident(&mut vt, page(1, 0, 0));
        let again = vt.load_new_texture(page(1, 0, 0)).unwrap();
        assert_eq!(a, again);
        assert_eq!(vt.free_slots(), 7);
    }

    #[test]
    fn test_pool_exhaustion_never_evicts() {
        let mut vt = VirtualTexture::new(3, 2);
        load_resident(&mut vt, page(1, 0, 0));
        load_resident(&mut vt, page(1, 1, 0));

        let err = vt.load_new_texture(page(1, 0, 1)).unwrap_err();
        assert!(matches!(err, Error::PoolExhausted { capacity: 2 }));
        assert!(vt.is_resident(page(1, 0, 0)));
        assert!(vt.is_resident(page(1, 1, 0)));
    }

    #[test]
    fn test_unload_frees_for_reuse() {
        let mut vt = VirtualTexture::new(3, 4);
        let a = load_resident(&mut vt, page(2, 0, 0));
        vt.unload_texture(page(2, 0, 0));
        assert_eq!(vt.slot_state(a), Some(SlotState::Free));

        let b = vt.load_new_texture(page(2, 3, 3)).unwrap();
        assert_eq!(a, b);
        assert_eq!(vt.owner_of(b), Some(page(2, 3, 3)));

        // Unknown page is a no-op
        vt.unload_texture(page(3, 7, 7));
        vt.assert_consistent();
    }

    #[test]
    fn test_writing_slot_is_not_reused_until_complete() {
        let mut vt = VirtualTexture::new(3, 1);
        let slot = vt.load_new_texture(page(1, 0, 0)).unwrap();
        vt.unload_texture(page(1, 0, 0));

        assert_eq!(vt.slot_state(slot), Some(SlotState::Writing));
        assert!(vt.load_new_texture(page(1, 1, 0)).is_err());

        vt.complete_write(slot);
        assert_eq!(vt.slot_state(slot), Some(SlotState::Free));
        assert_eq!(vt.load_new_texture(page(1, 1, 0)).unwrap(), slot);
        vt.assert_consistent();
    }

    #[test]
    fn test_combine_frees_children() {
        let mut vt = VirtualTexture::new(3, 8);
        let children: Vec<u32> = (0..4)
            .map(|q| load_resident(&mut vt, NodeCoord::new(1, 0, 0).child(q).page(3)))
            .collect();
        // Quadrant 3 never finished compositing
        let unfinished = NodeCoord::new(1, 0, 0).child(3).page(3);
        vt.load_new_texture(unfinished).unwrap();

        let plan = vt.combine_texture(page(1, 0, 0)).unwrap().unwrap();
        assert_eq!(plan.children[0], Some(children[0]));
        assert_eq!(plan.children[2], Some(children[2]));
        assert_eq!(plan.children[3], None);
        assert!(!plan.children.contains(&Some(plan.target)));

        for q in 0..4 {
            assert_eq!(vt.slot_of(NodeCoord::new(1, 0, 0).child(q).page(3)), None);
        }
        assert_eq!(vt.slot_state(plan.target), Some(SlotState::Writing));
        vt.complete_write(plan.target);
        assert!(vt.is_resident(page(1, 0, 0)));
        vt.assert_consistent();
    }

    #[test]
    fn test_combine_onto_mapped_parent_only_releases() {
        let mut vt = VirtualTexture::new(3, 8);
        load_resident(&mut vt, page(0, 0, 0));
        load_resident(&mut vt, page(1, 1, 1));

        assert_eq!(vt.combine_texture(page(0, 0, 0)).unwrap(), None);
        assert_eq!(vt.slot_of(page(1, 1, 1)), None);
        assert!(vt.is_resident(page(0, 0, 0)));
    }

    #[test]
    fn test_combine_when_full_releases_children() {
        let mut vt = VirtualTexture::new(3, 4);
        for q in 0..4 {
            load_resident(&mut vt, NodeCoord::ROOT.child(q).page(3));
        }
        assert!(vt.combine_texture(page(0, 0, 0)).is_err());
        assert_eq!(vt.free_slots(), 4);
        vt.assert_consistent();
    }

    #[test]
    fn test_pending_cancelled_by_unload_and_combine() {
        let mut vt = VirtualTexture::new(3, 8);
        vt.mark_pending(page(1, 0, 0));
        vt.mark_pending(page(2, 0, 0));
        vt.mark_pending(page(2, 3, 3));

        vt.unload_texture(page(1, 0, 0));
        vt.combine_texture(page(1, 0, 0)).unwrap();

        assert!(!vt.take_pending(page(1, 0, 0)));
        assert!(!vt.take_pending(page(2, 0, 0)));
        assert!(vt.take_pending(page(2, 3, 3)));
        assert!(!vt.take_pending(page(2, 3, 3)));
    }

    #[test]
    fn test_resident_pages_oldest_first() {
        let mut vt = VirtualTexture::new(3, 8);
        load_resident(&mut vt, page(1, 1, 1));
        vt.advance_frame();
        load_resident(&mut vt, page(1, 0, 0));
        vt.advance_frame();
        load_resident(&mut vt, page(1, 1, 0));

        let order: Vec<PageCoord> = vt.resident_pages().into_iter().map(|(p, _)| p).collect();
        assert_eq!(order, vec![page(1, 1, 1), page(1, 0, 0), page(1, 1, 0)]);
        assert_eq!(vt.entry(page(1, 1, 0)).unwrap().generation, 2);
        assert_eq!(vt.entry(page(1, 1, 0)).unwrap().depth, 1);
    }

    #[test]
    fn test_lookup_prefers_finer_pages() {
        let mut vt = VirtualTexture::new(3, 8);
        let root = load_resident(&mut vt, page(0, 0, 0));
        let fine = load_resident(&mut vt, page(2, 1, 0));
        // Writing pages are not published
        vt.load_new_texture(page(2, 0, 0)).unwrap();

        assert!(vt.refresh_lookup());
        assert!(!vt.refresh_lookup());
        let lookup = vt.lookup();
        assert_eq!(lookup.get(2, 0), fine);
        assert_eq!(lookup.get(3, 1), fine);
        assert_eq!(lookup.get(0, 0), root);
        assert_eq!(lookup.get(7, 7), root);

        vt.reset();
        assert!(vt.refresh_lookup());
        assert_eq!(vt.lookup().get(7, 7), NO_PAGE);
    }

    #[test]
    fn test_random_event_sequences_keep_slots_unique() {
        let mut vt = VirtualTexture::new(3, 16);
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for _ in 0..2000 {
            let r = next();
            let depth = (r % 4) as u32;
            let side = 1u32 << depth;
            let p = PageCoord::new(
                UVec2::new(((r >> 8) as u32 % side) << (3 - depth), ((r >> 16) as u32 % side) << (3 - depth)),
                1 << (3 - depth),
            );
            match (r >> 32) % 4 {
                0 => {
                    if let Ok(slot) = vt.load_new_texture(p) {
                        vt.complete_write(slot);
                    }
                }
                1 => {
                    // Leave the write open for a while
                    let _ = vt.load_new_texture(p);
                }
                2 => vt.unload_texture(p),
                _ => {
                    if let Ok(Some(plan)) = vt.combine_texture(p) {
                        vt.complete_write(plan.target);
                    }
                }
            }
            vt.assert_consistent();

            if (r >> 40) % 8 == 0 {
                // Finish every open write
                for slot in 0..vt.capacity() {
                    if vt.slot_state(slot) == Some(SlotState::Writing) {
                        vt.complete_write(slot);
                    }
                }
                vt.assert_consistent();
            }
        }
    }
}
