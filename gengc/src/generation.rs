use fnv::FnvHashMap;

use semispace::{HeapObject, Space};

/// A pair of semispaces plus the survival bookkeeping that drives tenuring.
///
/// Exactly one space - `from` - receives allocations at any time outside of
/// a running cycle; `to` sits empty as the copy target. Survival counts are
/// keyed by slot index in the live space and re-keyed on every role swap.
pub struct Generation {
    from: Space,
    to: Space,
    counts: FnvHashMap<u32, u32>,
    promotion_threshold: u32,
}

impl Generation {
    pub fn new(capacity: u32, promotion_threshold: u32) -> Generation {
        Generation {
            from: Space::with_capacity(capacity),
            to: Space::with_capacity(capacity),
            counts: FnvHashMap::default(),
            promotion_threshold,
        }
    }

    /// The space currently receiving allocations
    pub fn live(&self) -> &Space {
        &self.from
    }

    pub fn live_mut(&mut self) -> &mut Space {
        &mut self.from
    }

    /// Both spaces at once, for a scanner that needs the pair mutably
    pub fn spaces_mut(&mut self) -> (&mut Space, &mut Space) {
        (&mut self.from, &mut self.to)
    }

    pub fn alloc(&mut self, object: HeapObject) -> Result<u32, HeapObject> {
        self.from.alloc(object)
    }

    pub fn promotion_threshold(&self) -> u32 {
        self.promotion_threshold
    }

    /// Cycles the object at the given live-space slot has survived so far.
    /// Freshly allocated objects have no entry and have survived none.
    pub fn count_for(&self, slot: u32) -> u32 {
        self.counts.get(&slot).copied().unwrap_or(0)
    }

    /// Forget the survival count for a live-space slot. Called when the
    /// object there has tenured out, leaving only a forwarding husk.
    pub fn clear_count(&mut self, slot: u32) {
        self.counts.remove(&slot);
    }

    /// Complete a cycle: the just-filled to-space becomes the live space,
    /// the drained from-space is reset as the next copy target, and the
    /// survival counts keyed by to-space slots take effect.
    pub fn swap(&mut self, counts: FnvHashMap<u32, u32>) {
        std::mem::swap(&mut self.from, &mut self.to);
        self.to.reset();
        self.counts = counts;
    }
}
