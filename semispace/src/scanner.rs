use log::trace;

use crate::object::Address;
use crate::space::{AllocError, Space};

/// A Cheney copying scan over one generation's semispace pair.
///
/// There is no auxiliary stack and no visited set: the to-space itself is the
/// work queue. Objects between the `scan` pointer and the to-space allocation
/// pointer have been copied but not yet had their reference fields examined,
/// so `drain` walks to-space left to right as it grows. The forwarding-marker
/// check in `copy_if_needed` short-circuits shared references and cycles,
/// which bounds the to-space allocation pointer and guarantees termination.
pub struct CheneyScan<'a> {
    gen_index: u32,
    from: &'a mut Space,
    to: &'a mut Space,
    scan: u32,
    relocations: Vec<(u32, u32)>,
}

impl<'a> CheneyScan<'a> {
    pub fn new(gen_index: u32, from: &'a mut Space, to: &'a mut Space) -> CheneyScan<'a> {
        CheneyScan {
            gen_index,
            from,
            to,
            scan: 0,
            relocations: Vec::new(),
        }
    }

    /// Relocate the object at `addr` into to-space, or resolve its existing
    /// forwarding marker if it was copied earlier in this cycle. Shared
    /// references thus produce exactly one copy: both parents land here and
    /// the second one finds the marker the first one left.
    pub fn copy_if_needed(&mut self, addr: Address) -> Result<Address, AllocError> {
        debug_assert!(addr.gen() == self.gen_index);

        if let Some(dest) = self.from.get(addr.slot())?.forwarding() {
            return Ok(dest);
        }

        // reference fields move verbatim; rewriting happens when the copy's
        // turn comes up at the scan pointer
        let contents = self.from.get_mut(addr.slot())?.take_contents();
        let to_slot = self
            .to
            .alloc(contents)
            .map_err(|_| AllocError::OutOfSpace)?;

        let dest = Address::new(self.gen_index, to_slot);
        self.from.get_mut(addr.slot())?.set_forwarding(dest);
        self.relocations.push((addr.slot(), to_slot));

        trace!(
            "gen {}: copied slot {} to slot {}",
            self.gen_index,
            addr.slot(),
            to_slot
        );

        Ok(dest)
    }

    /// Drain the work queue: advance the scan pointer until it catches up
    /// with the to-space allocation pointer, rewriting every in-generation
    /// reference field through `copy_if_needed` along the way. References
    /// into other generations and nil references pass through untouched.
    pub fn drain(&mut self) -> Result<(), AllocError> {
        while self.scan < self.to.alloc_ptr() {
            let num_fields = self.to.get(self.scan)?.num_fields();

            for index in 0..num_fields {
                let target = match self.to.get(self.scan)?.reference_at(index) {
                    Some(addr) if addr.gen() == self.gen_index => addr,
                    _ => continue,
                };

                let dest = self.copy_if_needed(target)?;
                self.to.get_mut(self.scan)?.rewrite_reference_at(index, dest);
            }

            self.scan += 1;
        }

        Ok(())
    }

    /// Consume the scan, yielding the (from-slot, to-slot) pairs of every
    /// object copied this cycle for the caller's survival accounting.
    pub fn finish(self) -> Vec<(u32, u32)> {
        self.relocations
    }
}
