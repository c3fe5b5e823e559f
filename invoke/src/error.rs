use crate::{Class, MethodType, ObjectRef};

/// Abrupt completion of a dispatch or a variable access.
///
/// Every variant aborts the in-flight operation; none of them is retried by
/// this crate. `Thrown` carries a completion raised by the callee itself and
/// is forwarded untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// Call-site and handle signatures cannot be reconciled.
    WrongMethodType { expected: String, actual: String },
    /// A non-null referent is not an instance of the required class.
    ClassCast { from: String, to: String },
    NullPointer(String),
    IllegalState(String),
    IndexOutOfBounds { index: i64, length: i64 },
    UnsupportedOperation(String),
    /// A writing access mode was used on a read-only byte buffer.
    ReadOnlyBuffer,
    NoSuchMethod(String),
    ClassNotFound(String),
    ClassInitialization(String),
    Thrown(ObjectRef),
}

pub type InvokeResult<T> = Result<T, InvokeError>;

impl InvokeError {
    #[must_use]
    pub fn wrong_method_type(expected: &MethodType, actual: &MethodType) -> Self {
        Self::WrongMethodType {
            expected: expected.descriptor(),
            actual: actual.descriptor(),
        }
    }

    #[must_use]
    pub fn class_cast(from: &Class, to: &Class) -> Self {
        Self::ClassCast {
            from: from.pretty_name(),
            to: to.pretty_name(),
        }
    }

    pub fn null_pointer(message: impl Into<String>) -> Self {
        Self::NullPointer(message.into())
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation(message.into())
    }

    #[must_use]
    pub fn index_out_of_bounds(index: i64, length: i64) -> Self {
        Self::IndexOutOfBounds { index, length }
    }
}

impl std::fmt::Display for InvokeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongMethodType { expected, actual } => {
                write!(f, "wrong method type: expected {expected} but was {actual}")
            }
            Self::ClassCast { from, to } => write!(f, "{from} cannot be cast to {to}"),
            Self::NullPointer(message) => write!(f, "null pointer: {message}"),
            Self::IllegalState(message) => write!(f, "illegal state: {message}"),
            Self::IndexOutOfBounds { index, length } => {
                write!(f, "index {index} out of bounds for length {length}")
            }
            Self::UnsupportedOperation(message) => write!(f, "unsupported operation: {message}"),
            Self::ReadOnlyBuffer => write!(f, "buffer is read-only"),
            Self::NoSuchMethod(message) => write!(f, "no such method: {message}"),
            Self::ClassNotFound(descriptor) => write!(f, "class not found: {descriptor}"),
            Self::ClassInitialization(class) => write!(f, "initialization of {class} failed"),
            Self::Thrown(object) => write!(f, "callee completed abruptly with {object:?}"),
        }
    }
}

impl std::error::Error for InvokeError {}
