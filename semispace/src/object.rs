use std::mem::take;

/// The identity of a heap object: the index of the generation that holds it
/// and the slot index within that generation's currently-live space.
///
/// A slot index on its own is not meaningful across spaces - relocation gives
/// an object a new `Address` every time it survives a cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    gen: u32,
    slot: u32,
}

impl Address {
    pub fn new(gen: u32, slot: u32) -> Address {
        Address { gen, slot }
    }

    pub fn gen(&self) -> u32 {
        self.gen
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }
}

/// Scalar payloads. These are opaque to the collector - only the embedding
/// program gives them meaning, and a scan never interprets one as an address.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Text(String),
}

/// A single named field of a heap object. Whether a field holds a scalar or
/// a reference is fixed when the object is constructed and never inferred
/// from the runtime shape of the payload.
///
/// A `Reference` field may hold `None` - a nil reference, which every
/// traversal short-circuits.
#[derive(Clone, Debug, PartialEq)]
pub enum Slot {
    Scalar(Value),
    Reference(Option<Address>),
}

impl Slot {
    /// True if both slots carry the same tag, regardless of payload
    pub fn same_tag(&self, other: &Slot) -> bool {
        match (self, other) {
            (Slot::Scalar(_), Slot::Scalar(_)) => true,
            (Slot::Reference(_), Slot::Reference(_)) => true,
            _ => false,
        }
    }
}

/// Object kind tag. The collector never branches on this - it exists for
/// the embedding program to recognize its own objects.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ObjectKind {
    Int,
    Bool,
    Text,
    Cons,
    Generic,
}

/// The unit of allocation: a kind tag and an ordered mapping of field names
/// to tagged slots, plus a reserved forwarding marker that is set on the
/// old copy when the object is relocated. The marker lives outside the
/// field namespace and is never visible to the embedding program.
#[derive(Clone, Debug, PartialEq)]
pub struct HeapObject {
    kind: ObjectKind,
    fields: Vec<(String, Slot)>,
    forwarding: Option<Address>,
}

impl HeapObject {
    pub fn new(kind: ObjectKind, fields: Vec<(String, Slot)>) -> HeapObject {
        HeapObject {
            kind,
            fields,
            forwarding: None,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn field(&self, name: &str) -> Option<&Slot> {
        self.fields
            .iter()
            .find(|(field_name, _)| field_name == name)
            .map(|(_, slot)| slot)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Slot> {
        self.fields
            .iter_mut()
            .find(|(field_name, _)| field_name == name)
            .map(|(_, slot)| slot)
    }

    pub fn num_fields(&self) -> u32 {
        self.fields.len() as u32
    }

    /// The address a reference field points at, by field position.
    /// `None` for scalar fields and nil references alike.
    pub fn reference_at(&self, index: u32) -> Option<Address> {
        match self.fields.get(index as usize) {
            Some((_, Slot::Reference(target))) => *target,
            _ => None,
        }
    }

    /// Point the reference field at `index` to a relocated address.
    /// The caller must have read the field as a reference first.
    pub fn rewrite_reference_at(&mut self, index: u32, target: Address) {
        match self.fields.get_mut(index as usize) {
            Some((_, Slot::Reference(old))) => *old = Some(target),
            _ => panic!("attempt to rewrite a non-reference field"),
        }
    }

    pub fn forwarding(&self) -> Option<Address> {
        self.forwarding
    }

    /// Record the object's relocated address. An object is copied at most
    /// once per cycle; a second marker means the forwarding check was
    /// skipped somewhere and the heap can no longer be trusted.
    pub fn set_forwarding(&mut self, target: Address) {
        if self.forwarding.is_some() {
            panic!("double forward of heap object to {:?}", target);
        }
        self.forwarding = Some(target);
    }

    /// Move the object's contents out for relocation, leaving an empty husk
    /// behind to carry the forwarding marker.
    pub fn take_contents(&mut self) -> HeapObject {
        HeapObject {
            kind: self.kind,
            fields: take(&mut self.fields),
            forwarding: None,
        }
    }
}
