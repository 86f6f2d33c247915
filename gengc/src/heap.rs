//! The generational heap: the embedding program's allocation and field
//! access surface, and the orchestrator that drives a copying cycle per
//! generation when a space overflows.

use fnv::FnvHashMap;
use log::debug;

use semispace::{
    Address, AllocError, CheneyScan, HeapObject, ObjectKind, Slot, Space, DEFAULT_SPACE_CAPACITY,
};

use crate::error::{err_invalid_ref, err_oom, ErrorKind, RuntimeError};
use crate::generation::Generation;

const DEFAULT_GENERATION_COUNT: usize = 3;
const DEFAULT_PROMOTION_THRESHOLD: u32 = 2;

/// Heap tunables. All state derived from these lives in the heap value
/// itself - there is no process-wide collector state.
pub struct HeapConfig {
    /// Number of generations, youngest first. At least one.
    pub generations: usize,
    /// Slot capacity of each semispace.
    pub space_capacity: u32,
    /// Cycles an object must survive before it is tenured into the
    /// next-older generation.
    pub promotion_threshold: u32,
}

impl Default for HeapConfig {
    fn default() -> HeapConfig {
        HeapConfig {
            generations: DEFAULT_GENERATION_COUNT,
            space_capacity: DEFAULT_SPACE_CAPACITY,
            promotion_threshold: DEFAULT_PROMOTION_THRESHOLD,
        }
    }
}

/// An ordered sequence of generations, youngest to oldest. New objects are
/// always allocated into the youngest; survivors climb toward the oldest.
///
/// The embedding program owns the root set and passes it to `alloc` and
/// `collect` as a mutable slice; any cycle rewrites the entries in place to
/// the relocated addresses, so externally held references stay valid.
pub struct GenHeap {
    generations: Vec<Generation>,
}

impl GenHeap {
    pub fn new() -> GenHeap {
        GenHeap::with_config(HeapConfig::default())
    }

    pub fn with_config(config: HeapConfig) -> GenHeap {
        let count = config.generations.max(1);
        let generations = (0..count)
            .map(|_| Generation::new(config.space_capacity, config.promotion_threshold))
            .collect();

        GenHeap { generations }
    }

    pub fn generation_count(&self) -> usize {
        self.generations.len()
    }

    /// Occupied slots in a generation's live space. Debug/render hooks can
    /// observe usage between cycles without touching collector internals.
    pub fn live_count(&self, gen: usize) -> u32 {
        self.generations
            .get(gen)
            .map(|generation| generation.live().alloc_ptr())
            .unwrap_or(0)
    }

    /// Allocate a new object into the youngest generation. On overflow, one
    /// cycle is run against the supplied roots and the allocation is retried
    /// exactly once; a second failure is the terminal out-of-memory
    /// condition. The pending object's reference fields ride through the
    /// cycle alongside the roots, so the retry installs relocated addresses.
    ///
    /// Initial reference slots must resolve to live objects.
    pub fn alloc(
        &mut self,
        kind: ObjectKind,
        fields: Vec<(String, Slot)>,
        roots: &mut [Address],
    ) -> Result<Address, RuntimeError> {
        for (_, slot) in &fields {
            if let Slot::Reference(Some(target)) = slot {
                self.resolve(*target)?;
            }
        }

        let object = HeapObject::new(kind, fields);

        match self.generations[0].alloc(object) {
            Ok(slot) => Ok(Address::new(0, slot)),
            Err(mut object) => {
                // the pending object is not on the heap yet, so the cycle
                // cannot see its fields; treat them as extra roots and copy
                // the rewritten addresses back in before retrying
                let mut all_roots: Vec<Address> = roots.to_vec();
                for index in 0..object.num_fields() {
                    if let Some(target) = object.reference_at(index) {
                        all_roots.push(target);
                    }
                }

                self.collect_generation(0, &mut all_roots)?;

                roots.copy_from_slice(&all_roots[..roots.len()]);

                let mut forwarded = all_roots[roots.len()..].iter();
                for index in 0..object.num_fields() {
                    if object.reference_at(index).is_some() {
                        if let Some(dest) = forwarded.next() {
                            object.rewrite_reference_at(index, *dest);
                        }
                    }
                }

                match self.generations[0].alloc(object) {
                    Ok(slot) => Ok(Address::new(0, slot)),
                    Err(_) => Err(err_oom()),
                }
            }
        }
    }

    pub fn kind_of(&self, addr: Address) -> Result<ObjectKind, RuntimeError> {
        Ok(self.resolve(addr)?.kind())
    }

    pub fn read_field(&self, addr: Address, name: &str) -> Result<Slot, RuntimeError> {
        self.resolve(addr)?
            .field(name)
            .cloned()
            .ok_or_else(|| RuntimeError::new(ErrorKind::UnknownField(String::from(name))))
    }

    /// Overwrite a field's payload. The scalar/reference tag was fixed when
    /// the object was constructed; a value of the other tag is rejected, as
    /// is a reference that does not resolve to a live object.
    pub fn write_field(
        &mut self,
        addr: Address,
        name: &str,
        value: Slot,
    ) -> Result<(), RuntimeError> {
        if let Slot::Reference(Some(target)) = &value {
            self.resolve(*target)?;
        }

        let generation = self
            .generations
            .get_mut(addr.gen() as usize)
            .ok_or_else(err_invalid_ref)?;
        let object = generation.live_mut().get_mut(addr.slot())?;

        let slot = object
            .field_mut(name)
            .ok_or_else(|| RuntimeError::new(ErrorKind::UnknownField(String::from(name))))?;

        if !slot.same_tag(&value) {
            return Err(RuntimeError::new(ErrorKind::TagMismatch));
        }

        *slot = value;
        Ok(())
    }

    /// Explicit full cycle over every generation, youngest first. Root
    /// entries are rewritten in place to their relocated addresses.
    pub fn collect(&mut self, roots: &mut [Address]) -> Result<(), RuntimeError> {
        for gen in 0..self.generations.len() {
            self.collect_generation(gen, roots)?;
        }
        Ok(())
    }

    fn resolve(&self, addr: Address) -> Result<&HeapObject, RuntimeError> {
        let generation = self
            .generations
            .get(addr.gen() as usize)
            .ok_or_else(err_invalid_ref)?;
        Ok(generation.live().get(addr.slot())?)
    }

    /// One complete cycle for a single generation: copy the survivors into
    /// to-space and swap the space roles, then tenure the long-lived ones
    /// into the next-older generation. The embedding program never observes
    /// a generation between these phases.
    fn collect_generation(
        &mut self,
        gen: usize,
        roots: &mut [Address],
    ) -> Result<(), RuntimeError> {
        let gen_index = gen as u32;

        {
            // split the generation under collection from all the others so
            // the scanner can borrow its space pair while the rest are
            // scanned for incoming references
            let (left, rest) = self.generations.split_at_mut(gen);
            let (gen_g, right) = match rest.split_first_mut() {
                Some(split) => split,
                None => return Ok(()),
            };

            debug!(
                "generation {}: starting cycle with {} live slots",
                gen,
                gen_g.live().alloc_ptr()
            );

            // Collecting: roots first, then every reference held by another
            // generation's live space - without write barriers those are
            // scanned wholesale and treated as roots too - then drain the
            // work queue.
            let relocations = {
                let (from, to) = gen_g.spaces_mut();
                let mut scan = CheneyScan::new(gen_index, from, to);

                for root in roots.iter_mut() {
                    if root.gen() == gen_index {
                        *root = scan.copy_if_needed(*root)?;
                    }
                }

                for other in left.iter_mut().chain(right.iter_mut()) {
                    forward_space_references(&mut scan, other.live_mut(), gen_index)?;
                }

                scan.drain()?;
                scan.finish()
            };

            let mut new_counts = FnvHashMap::default();
            for (from_slot, to_slot) in &relocations {
                new_counts.insert(*to_slot, gen_g.count_for(*from_slot) + 1);
            }

            debug!(
                "generation {}: cycle complete, copied {} survivors",
                gen,
                relocations.len()
            );

            gen_g.swap(new_counts);
        }

        self.promote_survivors(gen, roots)
    }

    /// Tenure every object in `gen` that has survived the threshold number
    /// of cycles into the next-older generation's live space, leaving
    /// forwarding markers behind. The tenured set is known exactly at this
    /// point and each object takes exactly one slot, so if the older
    /// generation lacks room it is collected first; room still missing
    /// after that is the terminal out-of-memory condition. The oldest
    /// generation has no tenuring target and skips promotion entirely.
    fn promote_survivors(&mut self, gen: usize, roots: &mut [Address]) -> Result<(), RuntimeError> {
        if gen + 1 >= self.generations.len() {
            return Ok(());
        }

        let gen_index = gen as u32;

        let tenured: Vec<u32> = {
            let generation = &self.generations[gen];
            let threshold = generation.promotion_threshold();
            (0..generation.live().alloc_ptr())
                .filter(|slot| generation.count_for(*slot) >= threshold)
                .collect()
        };

        if tenured.is_empty() {
            return Ok(());
        }

        if tenured.len() as u32 > self.generations[gen + 1].live().free_slots() {
            debug!(
                "generation {} lacks room for {} tenured objects, collecting it",
                gen + 1,
                tenured.len()
            );
            self.collect_generation(gen + 1, roots)?;

            if tenured.len() as u32 > self.generations[gen + 1].live().free_slots() {
                return Err(err_oom());
            }
        }

        let (left, rest) = self.generations.split_at_mut(gen);
        let (gen_g, right) = match rest.split_first_mut() {
            Some(split) => split,
            None => return Ok(()),
        };
        let older = match right.first_mut() {
            Some(older) => older,
            None => return Ok(()),
        };

        // The forwarding check stays global per object, so no duplicate
        // copy can cross the generation boundary.
        let mut promoted: FnvHashMap<u32, Address> = FnvHashMap::default();

        for slot in tenured {
            let contents = gen_g.live_mut().get_mut(slot)?.take_contents();
            let older_slot = match older.alloc(contents) {
                Ok(older_slot) => older_slot,
                // the room check above makes this unreachable short of a
                // bookkeeping bug
                Err(_) => return Err(err_oom()),
            };

            let dest = Address::new(gen_index + 1, older_slot);
            gen_g.live_mut().get_mut(slot)?.set_forwarding(dest);
            gen_g.clear_count(slot);
            promoted.insert(slot, dest);
        }

        for root in roots.iter_mut() {
            if root.gen() == gen_index {
                if let Some(dest) = promoted.get(&root.slot()) {
                    *root = *dest;
                }
            }
        }

        // rewrite references into this generation everywhere they can live:
        // its own surviving objects and every other generation's live
        // space, the fresh tenured copies included
        rewrite_promoted_references(gen_g.live_mut(), gen_index, &promoted)?;
        for other in left.iter_mut().chain(right.iter_mut()) {
            rewrite_promoted_references(other.live_mut(), gen_index, &promoted)?;
        }

        debug!("generation {}: promoted {} objects", gen, promoted.len());

        Ok(())
    }
}

impl Default for GenHeap {
    fn default() -> GenHeap {
        GenHeap::new()
    }
}

/// Forward every reference a quiescent space holds into the generation
/// under collection, rewriting each field in place.
fn forward_space_references(
    scan: &mut CheneyScan<'_>,
    space: &mut Space,
    gen_index: u32,
) -> Result<(), AllocError> {
    for slot in 0..space.alloc_ptr() {
        let num_fields = space.get(slot)?.num_fields();

        for index in 0..num_fields {
            let target = match space.get(slot)?.reference_at(index) {
                Some(addr) if addr.gen() == gen_index => addr,
                _ => continue,
            };

            let dest = scan.copy_if_needed(target)?;
            space.get_mut(slot)?.rewrite_reference_at(index, dest);
        }
    }
    Ok(())
}

/// Redirect references caught by a promotion: any field pointing at a
/// to-space slot that tenured out follows the promotion table to the
/// object's new home.
fn rewrite_promoted_references(
    space: &mut Space,
    gen_index: u32,
    promoted: &FnvHashMap<u32, Address>,
) -> Result<(), AllocError> {
    for slot in 0..space.alloc_ptr() {
        let num_fields = space.get(slot)?.num_fields();

        for index in 0..num_fields {
            let target = match space.get(slot)?.reference_at(index) {
                Some(addr) if addr.gen() == gen_index => addr,
                _ => continue,
            };

            if let Some(dest) = promoted.get(&target.slot()) {
                space.get_mut(slot)?.rewrite_reference_at(index, *dest);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {

    use super::*;
    use semispace::Value;

    fn config(generations: usize, capacity: u32, threshold: u32) -> HeapConfig {
        HeapConfig {
            generations,
            space_capacity: capacity,
            promotion_threshold: threshold,
        }
    }

    fn leaf_fields(n: i64) -> Vec<(String, Slot)> {
        vec![(String::from("a"), Slot::Scalar(Value::Int(n)))]
    }

    fn ref_fields(name: &str, target: Option<Address>) -> Vec<(String, Slot)> {
        vec![(String::from(name), Slot::Reference(target))]
    }

    fn read_int(heap: &GenHeap, addr: Address, name: &str) -> i64 {
        match heap.read_field(addr, name) {
            Ok(Slot::Scalar(Value::Int(n))) => n,
            other => panic!("expected int field, got {:?}", other),
        }
    }

    fn read_ref(heap: &GenHeap, addr: Address, name: &str) -> Address {
        match heap.read_field(addr, name) {
            Ok(Slot::Reference(Some(target))) => target,
            other => panic!("expected reference field, got {:?}", other),
        }
    }

    #[test]
    fn test_alloc_and_read() {
        let mut heap = GenHeap::new();
        let mut roots = vec![];

        let a = heap
            .alloc(ObjectKind::Int, leaf_fields(10), &mut roots)
            .unwrap();

        assert!(a == Address::new(0, 0));
        assert!(heap.kind_of(a).unwrap() == ObjectKind::Int);
        assert!(read_int(&heap, a, "a") == 10);
    }

    #[test]
    fn test_alloc_validates_references() {
        let mut heap = GenHeap::new();
        let mut roots = vec![];

        let bogus = Address::new(0, 99);
        let result = heap.alloc(ObjectKind::Cons, ref_fields("tail", Some(bogus)), &mut roots);

        assert!(result == Err(RuntimeError::new(ErrorKind::InvalidReference)));
    }

    #[test]
    fn test_write_field_tag_mismatch() {
        let mut heap = GenHeap::new();
        let mut roots = vec![];

        let a = heap
            .alloc(ObjectKind::Int, leaf_fields(10), &mut roots)
            .unwrap();

        let result = heap.write_field(a, "a", Slot::Reference(None));
        assert!(result == Err(RuntimeError::new(ErrorKind::TagMismatch)));

        // same tag is fine
        assert!(heap.write_field(a, "a", Slot::Scalar(Value::Int(11))).is_ok());
        assert!(read_int(&heap, a, "a") == 11);
    }

    #[test]
    fn test_write_field_invalid_reference() {
        let mut heap = GenHeap::new();
        let mut roots = vec![];

        let cons = heap
            .alloc(ObjectKind::Cons, ref_fields("tail", None), &mut roots)
            .unwrap();

        let bogus = Address::new(7, 0);
        let result = heap.write_field(cons, "tail", Slot::Reference(Some(bogus)));
        assert!(result == Err(RuntimeError::new(ErrorKind::InvalidReference)));
    }

    #[test]
    fn test_unknown_field() {
        let mut heap = GenHeap::new();
        let mut roots = vec![];

        let a = heap
            .alloc(ObjectKind::Int, leaf_fields(10), &mut roots)
            .unwrap();

        match heap.read_field(a, "b") {
            Err(err) => assert!(*err.error_kind() == ErrorKind::UnknownField(String::from("b"))),
            Ok(_) => assert!(false, "read of missing field succeeded"),
        }
    }

    #[test]
    fn test_collect_preserves_reachable_drops_garbage() {
        let mut heap = GenHeap::with_config(config(1, 10, 2));
        let mut roots = vec![];

        let c = heap
            .alloc(ObjectKind::Int, leaf_fields(7), &mut roots)
            .unwrap();
        heap.alloc(ObjectKind::Int, leaf_fields(99), &mut roots)
            .unwrap(); // garbage
        let a = heap
            .alloc(ObjectKind::Generic, ref_fields("c", Some(c)), &mut roots)
            .unwrap();
        let r = heap
            .alloc(ObjectKind::Generic, ref_fields("a", Some(a)), &mut roots)
            .unwrap();

        let mut roots = vec![r];
        heap.collect(&mut roots).unwrap();

        // R, A, C survive; the unreferenced leaf does not
        assert!(heap.live_count(0) == 3);

        let new_r = roots[0];
        let new_a = read_ref(&heap, new_r, "a");
        let new_c = read_ref(&heap, new_a, "c");
        assert!(read_int(&heap, new_c, "a") == 7);
    }

    #[test]
    fn test_collect_single_copy_for_shared_child() {
        let mut heap = GenHeap::with_config(config(1, 10, 2));
        let mut roots = vec![];

        let s = heap
            .alloc(ObjectKind::Int, leaf_fields(42), &mut roots)
            .unwrap();
        let p = heap
            .alloc(ObjectKind::Generic, ref_fields("s", Some(s)), &mut roots)
            .unwrap();
        let q = heap
            .alloc(ObjectKind::Generic, ref_fields("s", Some(s)), &mut roots)
            .unwrap();

        let mut roots = vec![p, q];
        heap.collect(&mut roots).unwrap();

        assert!(heap.live_count(0) == 3);
        assert!(read_ref(&heap, roots[0], "s") == read_ref(&heap, roots[1], "s"));
    }

    #[test]
    fn test_collect_preserves_cycles() {
        let mut heap = GenHeap::with_config(config(1, 10, 2));
        let mut roots = vec![];

        let a = heap
            .alloc(ObjectKind::Generic, ref_fields("other", None), &mut roots)
            .unwrap();
        let b = heap
            .alloc(ObjectKind::Generic, ref_fields("other", Some(a)), &mut roots)
            .unwrap();
        heap.write_field(a, "other", Slot::Reference(Some(b)))
            .unwrap();

        let mut roots = vec![a];
        heap.collect(&mut roots).unwrap();

        assert!(heap.live_count(0) == 2);

        let new_a = roots[0];
        let new_b = read_ref(&heap, new_a, "other");
        assert!(read_ref(&heap, new_b, "other") == new_a);
    }

    #[test]
    fn test_no_op_cycle_idempotent() {
        let mut heap = GenHeap::with_config(config(1, 10, 100));
        let mut roots = vec![];

        let c = heap
            .alloc(ObjectKind::Int, leaf_fields(5), &mut roots)
            .unwrap();
        let r = heap
            .alloc(ObjectKind::Generic, ref_fields("c", Some(c)), &mut roots)
            .unwrap();

        let mut roots = vec![r];
        heap.collect(&mut roots).unwrap();
        let first_count = heap.live_count(0);
        let first_value = read_int(&heap, read_ref(&heap, roots[0], "c"), "a");

        heap.collect(&mut roots).unwrap();

        assert!(heap.live_count(0) == first_count);
        assert!(read_int(&heap, read_ref(&heap, roots[0], "c"), "a") == first_value);
    }

    #[test]
    fn test_alloc_triggers_collection() {
        let mut heap = GenHeap::with_config(config(1, 2, 100));
        let mut roots = vec![];

        // fill the space with garbage
        heap.alloc(ObjectKind::Int, leaf_fields(1), &mut roots)
            .unwrap();
        heap.alloc(ObjectKind::Int, leaf_fields(2), &mut roots)
            .unwrap();

        // the overflow triggers a cycle that reclaims both
        let c = heap
            .alloc(ObjectKind::Int, leaf_fields(3), &mut roots)
            .unwrap();

        assert!(heap.live_count(0) == 1);
        assert!(read_int(&heap, c, "a") == 3);
    }

    #[test]
    fn test_alloc_with_references_survives_collection() {
        let mut heap = GenHeap::with_config(config(1, 3, 100));
        let mut roots = vec![];

        heap.alloc(ObjectKind::Int, leaf_fields(1), &mut roots)
            .unwrap(); // garbage
        let x = heap
            .alloc(ObjectKind::Int, leaf_fields(9), &mut roots)
            .unwrap();
        heap.alloc(ObjectKind::Int, leaf_fields(2), &mut roots)
            .unwrap(); // garbage

        // the space is full, so this allocation triggers a cycle that
        // relocates X; the installed field must follow it
        let mut roots = vec![x];
        let p = heap
            .alloc(ObjectKind::Generic, ref_fields("x", Some(x)), &mut roots)
            .unwrap();

        assert!(heap.live_count(0) == 2);
        assert!(read_ref(&heap, p, "x") == roots[0]);
        assert!(read_int(&heap, roots[0], "a") == 9);
    }

    #[test]
    fn test_out_of_memory_when_full_of_live_objects() {
        let mut heap = GenHeap::with_config(config(1, 2, 100));
        let mut roots = vec![];

        let a = heap
            .alloc(ObjectKind::Int, leaf_fields(1), &mut roots)
            .unwrap();
        let b = heap
            .alloc(ObjectKind::Int, leaf_fields(2), &mut roots)
            .unwrap();

        let mut roots = vec![a, b];
        let result = heap.alloc(ObjectKind::Int, leaf_fields(3), &mut roots);

        assert!(result == Err(RuntimeError::new(ErrorKind::OutOfMemory)));

        // the failed allocation still left the roots usable
        assert!(read_int(&heap, roots[0], "a") == 1);
        assert!(read_int(&heap, roots[1], "a") == 2);
    }

    #[test]
    fn test_promotion_into_older_generation() {
        let mut heap = GenHeap::with_config(config(2, 8, 2));
        let mut roots = vec![];

        let x = heap
            .alloc(ObjectKind::Int, leaf_fields(10), &mut roots)
            .unwrap();
        let mut roots = vec![x];

        // first survival: still young
        heap.collect(&mut roots).unwrap();
        assert!(roots[0].gen() == 0);

        // second survival reaches the threshold: tenured
        heap.collect(&mut roots).unwrap();
        assert!(roots[0].gen() == 1);
        assert!(heap.live_count(1) == 1);
        assert!(read_int(&heap, roots[0], "a") == 10);

        // the next young cycle reclaims the husk left behind
        heap.collect(&mut roots).unwrap();
        assert!(heap.live_count(0) == 0);
        assert!(read_int(&heap, roots[0], "a") == 10);
    }

    #[test]
    fn test_old_to_young_reference_keeps_child_alive() {
        let mut heap = GenHeap::with_config(config(2, 8, 1));
        let mut roots = vec![];

        // parent tenures immediately with threshold 1
        let p = heap
            .alloc(ObjectKind::Generic, ref_fields("child", None), &mut roots)
            .unwrap();
        let mut roots = vec![p];
        heap.collect(&mut roots).unwrap();
        assert!(roots[0].gen() == 1);

        // young child is reachable only through the old parent
        let c = heap
            .alloc(ObjectKind::Int, leaf_fields(5), &mut roots)
            .unwrap();
        heap.write_field(roots[0], "child", Slot::Reference(Some(c)))
            .unwrap();

        heap.collect(&mut roots).unwrap();

        let child = read_ref(&heap, roots[0], "child");
        assert!(read_int(&heap, child, "a") == 5);
    }

    #[test]
    fn test_promotion_overflow_collects_older_generation() {
        let mut heap = GenHeap::with_config(config(2, 4, 1));

        // tenure four objects, filling the older generation
        let mut roots = vec![];
        for n in 0..4 {
            let addr = heap
                .alloc(ObjectKind::Int, leaf_fields(n), &mut roots)
                .unwrap();
            roots.push(addr);
            heap.collect(&mut roots).unwrap();
        }
        assert!(heap.live_count(1) == 4);

        // drop every root: the old generation is now all garbage
        let mut roots = vec![];
        let e = heap
            .alloc(ObjectKind::Int, leaf_fields(40), &mut roots)
            .unwrap();
        let mut roots = vec![e];

        // tenuring E has no room until the older generation is collected
        heap.collect(&mut roots).unwrap();

        assert!(roots[0].gen() == 1);
        assert!(heap.live_count(1) == 1);
        assert!(read_int(&heap, roots[0], "a") == 40);
    }
}
