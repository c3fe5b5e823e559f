use std::num::NonZeroU32;

use crate::Primitive;

/// Compressed reference into the heap's object table.
///
/// Raw slots encode `None` as `0`, which is why the id is never zero.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(NonZeroU32);

impl ObjectRef {
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.get()
    }

    /// Raw slot encoding of a possibly null reference.
    #[inline]
    #[must_use]
    pub fn encode(reference: Option<ObjectRef>) -> u32 {
        reference.map_or(0, ObjectRef::raw)
    }
}

#[inline]
#[must_use]
pub fn bits_to_float(bits: u32) -> f32 {
    f32::from_bits(bits)
}

#[inline]
#[must_use]
pub fn bits_to_double(bits: u64) -> f64 {
    f64::from_bits(bits)
}

/// A typed value moving between operand windows, fields and conversions.
///
/// Sub-int kinds travel as normalized `I32`: booleans as their low byte,
/// bytes and shorts sign-extended, chars zero-extended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Ref(Option<ObjectRef>),
}

impl Value {
    pub const NULL: Value = Value::Ref(None);

    /// The recognizable zero of a kind: `0`, `0.0` or null.
    #[must_use]
    pub const fn zero(kind: Primitive) -> Self {
        match kind {
            Primitive::Not => Self::Ref(None),
            Primitive::Long => Self::I64(0),
            Primitive::Float => Self::F32(0.0),
            Primitive::Double => Self::F64(0.0),
            _ => Self::I32(0),
        }
    }

    #[must_use]
    pub fn from_bool(value: bool) -> Self {
        Self::I32(i32::from(value))
    }

    #[must_use]
    pub fn from_ref(reference: ObjectRef) -> Self {
        Self::Ref(Some(reference))
    }

    /// Decodes raw slot or memory bits as a value of `kind`, truncating and
    /// extending the way the kind requires.
    #[must_use]
    pub fn from_raw(kind: Primitive, bits: u64) -> Self {
        match kind {
            Primitive::Boolean => Self::I32(i32::from(bits as u8)),
            Primitive::Byte => Self::I32(i32::from(bits as u8 as i8)),
            Primitive::Char => Self::I32(i32::from(bits as u16)),
            Primitive::Short => Self::I32(i32::from(bits as u16 as i16)),
            Primitive::Int => Self::I32(bits as u32 as i32),
            Primitive::Long => Self::I64(bits as i64),
            Primitive::Float => Self::F32(bits_to_float(bits as u32)),
            Primitive::Double => Self::F64(bits_to_double(bits)),
            Primitive::Not => Self::Ref(ObjectRef::from_raw(bits as u32)),
            Primitive::Void => Self::I32(0),
        }
    }

    /// Raw bits, zero-extended to 64 bits.
    #[must_use]
    pub fn raw_bits(self) -> u64 {
        match self {
            Self::I32(v) => u64::from(v as u32),
            Self::I64(v) => v as u64,
            Self::F32(v) => u64::from(v.to_bits()),
            Self::F64(v) => v.to_bits(),
            Self::Ref(r) => u64::from(ObjectRef::encode(r)),
        }
    }

    #[inline]
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self.raw_bits() as u32 as i32
    }

    #[inline]
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::I32(v) => i64::from(v),
            other => other.raw_bits() as i64,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_f32(self) -> f32 {
        match self {
            Self::F32(v) => v,
            other => bits_to_float(other.raw_bits() as u32),
        }
    }

    #[inline]
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::F64(v) => v,
            other => bits_to_double(other.raw_bits()),
        }
    }

    #[inline]
    #[must_use]
    pub fn as_bool(self) -> bool {
        self.as_i32() & 0xff != 0
    }

    #[inline]
    #[must_use]
    pub fn as_reference(self) -> Option<ObjectRef> {
        match self {
            Self::Ref(r) => r,
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(self) -> bool {
        matches!(self, Self::Ref(None))
    }
}
