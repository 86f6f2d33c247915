use std::error::Error;
use std::fmt;

use semispace::AllocError;

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// The oldest generation overflowed with no further tenuring target -
    /// terminal, unlike the recoverable per-space overflow handled internally
    OutOfMemory,
    /// An address did not resolve to a live object in its claimed space
    InvalidReference,
    /// The object has no field with the given name
    UnknownField(String),
    /// A write attempted to change a slot's scalar/reference tag
    TagMismatch,
}

/// The collector's runtime error type
#[derive(Debug, PartialEq)]
pub struct RuntimeError {
    kind: ErrorKind,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind) -> RuntimeError {
        RuntimeError { kind }
    }

    pub fn error_kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            ErrorKind::OutOfMemory => write!(f, "Out of memory!"),
            ErrorKind::InvalidReference => {
                write!(f, "Reference does not resolve to a live object")
            }
            ErrorKind::UnknownField(ref name) => {
                write!(f, "Object has no field named \"{}\"", name)
            }
            ErrorKind::TagMismatch => {
                write!(f, "Value does not match the field's declared tag")
            }
        }
    }
}

/// Convert from AllocError. A space overflow surfacing this far means the
/// collect-and-retry path is exhausted, so it reports as OutOfMemory.
impl From<AllocError> for RuntimeError {
    fn from(other: AllocError) -> RuntimeError {
        match other {
            AllocError::OutOfSpace => RuntimeError::new(ErrorKind::OutOfMemory),
            AllocError::InvalidReference => RuntimeError::new(ErrorKind::InvalidReference),
        }
    }
}

impl Error for RuntimeError {
    fn cause(&self) -> Option<&dyn Error> {
        None
    }
}

/// Convenience shorthand function for building an invalid-reference error
pub fn err_invalid_ref() -> RuntimeError {
    RuntimeError::new(ErrorKind::InvalidReference)
}

/// Convenience shorthand function for building an out-of-memory error
pub fn err_oom() -> RuntimeError {
    RuntimeError::new(ErrorKind::OutOfMemory)
}
