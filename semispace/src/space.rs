use crate::object::HeapObject;

/// An allocation error type
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AllocError {
    /// The bump pointer reached the space's capacity
    OutOfSpace,
    /// An address did not resolve to a live object in this space
    InvalidReference,
}

/// A fixed-capacity, bump-pointer allocation region - one of a generation's
/// two semispaces. Slot indices start at zero and the allocation pointer is
/// the number of occupied slots, so `0 <= alloc_ptr <= capacity` always
/// holds. There is no compaction within a space; reclamation happens by
/// copying survivors out and resetting.
pub struct Space {
    capacity: u32,
    slots: Vec<HeapObject>,
}

impl Space {
    pub fn with_capacity(capacity: u32) -> Space {
        Space {
            capacity,
            slots: Vec::with_capacity(capacity as usize),
        }
    }

    /// Write an object at the allocation pointer and return its slot index,
    /// or hand the object back if the space is full. Overflow is reported,
    /// never absorbed - it is the caller's collection trigger.
    pub fn alloc(&mut self, object: HeapObject) -> Result<u32, HeapObject> {
        if self.slots.len() as u32 == self.capacity {
            return Err(object);
        }

        let slot = self.slots.len() as u32;
        self.slots.push(object);
        Ok(slot)
    }

    pub fn get(&self, slot: u32) -> Result<&HeapObject, AllocError> {
        self.slots
            .get(slot as usize)
            .ok_or(AllocError::InvalidReference)
    }

    pub fn get_mut(&mut self, slot: u32) -> Result<&mut HeapObject, AllocError> {
        self.slots
            .get_mut(slot as usize)
            .ok_or(AllocError::InvalidReference)
    }

    pub fn alloc_ptr(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn free_slots(&self) -> u32 {
        self.capacity - self.alloc_ptr()
    }

    pub fn is_full(&self) -> bool {
        self.alloc_ptr() == self.capacity
    }

    /// Drop all objects and rewind the allocation pointer. Called on the
    /// drained from-space after a cycle's role swap.
    pub fn reset(&mut self) {
        self.slots.clear();
    }
}
