/// Kind of a value as seen by a slot, parameter, field or array component.
///
/// The declaration order matters: `is_widenable` relies on numeric kinds
/// being ordered from narrowest to widest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Primitive {
    /// A reference to a heap object.
    Not,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
}

impl Primitive {
    pub const PRIMITIVES: [Primitive; 8] = [
        Primitive::Boolean,
        Primitive::Byte,
        Primitive::Char,
        Primitive::Short,
        Primitive::Int,
        Primitive::Long,
        Primitive::Float,
        Primitive::Double,
    ];

    #[must_use]
    pub const fn from_descriptor(c: u8) -> Option<Self> {
        match c {
            b'Z' => Some(Self::Boolean),
            b'B' => Some(Self::Byte),
            b'C' => Some(Self::Char),
            b'S' => Some(Self::Short),
            b'I' => Some(Self::Int),
            b'J' => Some(Self::Long),
            b'F' => Some(Self::Float),
            b'D' => Some(Self::Double),
            b'V' => Some(Self::Void),
            b'L' | b'[' => Some(Self::Not),
            _ => None,
        }
    }

    /// Single character descriptor, `L` for references.
    #[must_use]
    pub const fn descriptor(self) -> char {
        match self {
            Self::Not => 'L',
            Self::Boolean => 'Z',
            Self::Byte => 'B',
            Self::Char => 'C',
            Self::Short => 'S',
            Self::Int => 'I',
            Self::Long => 'J',
            Self::Float => 'F',
            Self::Double => 'D',
            Self::Void => 'V',
        }
    }

    #[must_use]
    pub const fn pretty_name(self) -> &'static str {
        match self {
            Self::Not => "reference",
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Void => "void",
        }
    }

    /// Size in bytes of a field or array component of this kind.
    /// References are compressed to 32 bits.
    #[must_use]
    pub const fn component_size(self) -> usize {
        match self {
            Self::Void => 0,
            Self::Boolean | Self::Byte => 1,
            Self::Char | Self::Short => 2,
            Self::Not | Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
        }
    }

    /// Number of 32-bit operand slots a value of this kind occupies.
    #[must_use]
    pub const fn slot_count(self) -> usize {
        match self {
            Self::Void => 0,
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_64bit(self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    #[inline]
    #[must_use]
    pub const fn is_reference(self) -> bool {
        matches!(self, Self::Not)
    }

    #[inline]
    #[must_use]
    pub const fn is_primitive(self) -> bool {
        !self.is_reference()
    }

    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Byte | Self::Char | Self::Short | Self::Int | Self::Long | Self::Float | Self::Double
        )
    }

    #[must_use]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            Self::Byte | Self::Char | Self::Short | Self::Int | Self::Long
        )
    }

    #[must_use]
    pub const fn is_floating_point(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// Descriptor of the wrapper class used when boxing this kind.
    #[must_use]
    pub const fn boxed_descriptor(self) -> Option<&'static str> {
        match self {
            Self::Boolean => Some("Ljava/lang/Boolean;"),
            Self::Byte => Some("Ljava/lang/Byte;"),
            Self::Char => Some("Ljava/lang/Character;"),
            Self::Short => Some("Ljava/lang/Short;"),
            Self::Int => Some("Ljava/lang/Integer;"),
            Self::Long => Some("Ljava/lang/Long;"),
            Self::Float => Some("Ljava/lang/Float;"),
            Self::Double => Some("Ljava/lang/Double;"),
            Self::Not | Self::Void => None,
        }
    }

    /// Whether a value of kind `from` can be converted to `to` without
    /// losing magnitude. Every kind is widenable to itself, boolean only to
    /// itself, and nothing widens to char.
    #[must_use]
    pub fn is_widenable(from: Self, to: Self) -> bool {
        if from == to {
            return from.is_primitive() && from != Self::Void;
        }
        if !from.is_numeric() || !to.is_numeric() {
            return false;
        }
        match from {
            // char is unsigned, so it cannot widen to short
            Self::Char => matches!(to, Self::Int | Self::Long | Self::Float | Self::Double),
            _ => to != Self::Char && from < to,
        }
    }
}

impl std::fmt::Display for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.pretty_name())
    }
}
