mod constants;
mod object;
mod scanner;
mod space;

pub use crate::constants::DEFAULT_SPACE_CAPACITY;
pub use crate::object::{Address, HeapObject, ObjectKind, Slot, Value};
pub use crate::scanner::CheneyScan;
pub use crate::space::{AllocError, Space};
