mod error;
mod generation;
mod heap;

pub use crate::error::{ErrorKind, RuntimeError};
pub use crate::heap::{GenHeap, HeapConfig};

pub use semispace::{Address, HeapObject, ObjectKind, Slot, Value};
