use std::sync::atomic::Ordering;

use bitflags::bitflags;

use crate::Primitive;

/// Operations a variable handle can perform, in their canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessMode {
    Get,
    Set,
    GetVolatile,
    SetVolatile,
    GetAcquire,
    SetRelease,
    GetOpaque,
    SetOpaque,
    CompareAndSet,
    CompareAndExchange,
    CompareAndExchangeAcquire,
    CompareAndExchangeRelease,
    WeakCompareAndSetPlain,
    WeakCompareAndSet,
    WeakCompareAndSetAcquire,
    WeakCompareAndSetRelease,
    GetAndSet,
    GetAndSetAcquire,
    GetAndSetRelease,
    GetAndAdd,
    GetAndAddAcquire,
    GetAndAddRelease,
    GetAndBitwiseOr,
    GetAndBitwiseOrRelease,
    GetAndBitwiseOrAcquire,
    GetAndBitwiseAnd,
    GetAndBitwiseAndRelease,
    GetAndBitwiseAndAcquire,
    GetAndBitwiseXor,
    GetAndBitwiseXorRelease,
    GetAndBitwiseXorAcquire,
}

/// Shape of an access mode's signature: which value operands it takes and
/// what it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessModeTemplate {
    /// `(coordinates) -> T`
    Get,
    /// `(coordinates, T) -> void`
    Set,
    /// `(coordinates, T expected, T desired) -> boolean`
    CompareAndSet,
    /// `(coordinates, T expected, T desired) -> T`
    CompareAndExchange,
    /// `(coordinates, T) -> T`
    GetAndUpdate,
}

impl AccessModeTemplate {
    /// Number of value operands following the coordinates.
    #[must_use]
    pub const fn value_operands(self) -> usize {
        match self {
            Self::Get => 0,
            Self::Set | Self::GetAndUpdate => 1,
            Self::CompareAndSet | Self::CompareAndExchange => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Set,
    Add,
    BitwiseOr,
    BitwiseAnd,
    BitwiseXor,
}

/// Accessor method names sorted for binary search.
const ACCESSOR_NAMES: [(&str, AccessMode); AccessMode::COUNT] = [
    ("compareAndExchange", AccessMode::CompareAndExchange),
    ("compareAndExchangeAcquire", AccessMode::CompareAndExchangeAcquire),
    ("compareAndExchangeRelease", AccessMode::CompareAndExchangeRelease),
    ("compareAndSet", AccessMode::CompareAndSet),
    ("get", AccessMode::Get),
    ("getAcquire", AccessMode::GetAcquire),
    ("getAndAdd", AccessMode::GetAndAdd),
    ("getAndAddAcquire", AccessMode::GetAndAddAcquire),
    ("getAndAddRelease", AccessMode::GetAndAddRelease),
    ("getAndBitwiseAnd", AccessMode::GetAndBitwiseAnd),
    ("getAndBitwiseAndAcquire", AccessMode::GetAndBitwiseAndAcquire),
    ("getAndBitwiseAndRelease", AccessMode::GetAndBitwiseAndRelease),
    ("getAndBitwiseOr", AccessMode::GetAndBitwiseOr),
    ("getAndBitwiseOrAcquire", AccessMode::GetAndBitwiseOrAcquire),
    ("getAndBitwiseOrRelease", AccessMode::GetAndBitwiseOrRelease),
    ("getAndBitwiseXor", AccessMode::GetAndBitwiseXor),
    ("getAndBitwiseXorAcquire", AccessMode::GetAndBitwiseXorAcquire),
    ("getAndBitwiseXorRelease", AccessMode::GetAndBitwiseXorRelease),
    ("getAndSet", AccessMode::GetAndSet),
    ("getAndSetAcquire", AccessMode::GetAndSetAcquire),
    ("getAndSetRelease", AccessMode::GetAndSetRelease),
    ("getOpaque", AccessMode::GetOpaque),
    ("getVolatile", AccessMode::GetVolatile),
    ("set", AccessMode::Set),
    ("setOpaque", AccessMode::SetOpaque),
    ("setRelease", AccessMode::SetRelease),
    ("setVolatile", AccessMode::SetVolatile),
    ("weakCompareAndSet", AccessMode::WeakCompareAndSet),
    ("weakCompareAndSetAcquire", AccessMode::WeakCompareAndSetAcquire),
    ("weakCompareAndSetPlain", AccessMode::WeakCompareAndSetPlain),
    ("weakCompareAndSetRelease", AccessMode::WeakCompareAndSetRelease),
];

impl AccessMode {
    pub const COUNT: usize = 31;

    pub const ALL: [AccessMode; AccessMode::COUNT] = [
        Self::Get,
        Self::Set,
        Self::GetVolatile,
        Self::SetVolatile,
        Self::GetAcquire,
        Self::SetRelease,
        Self::GetOpaque,
        Self::SetOpaque,
        Self::CompareAndSet,
        Self::CompareAndExchange,
        Self::CompareAndExchangeAcquire,
        Self::CompareAndExchangeRelease,
        Self::WeakCompareAndSetPlain,
        Self::WeakCompareAndSet,
        Self::WeakCompareAndSetAcquire,
        Self::WeakCompareAndSetRelease,
        Self::GetAndSet,
        Self::GetAndSetAcquire,
        Self::GetAndSetRelease,
        Self::GetAndAdd,
        Self::GetAndAddAcquire,
        Self::GetAndAddRelease,
        Self::GetAndBitwiseOr,
        Self::GetAndBitwiseOrRelease,
        Self::GetAndBitwiseOrAcquire,
        Self::GetAndBitwiseAnd,
        Self::GetAndBitwiseAndRelease,
        Self::GetAndBitwiseAndAcquire,
        Self::GetAndBitwiseXor,
        Self::GetAndBitwiseXorRelease,
        Self::GetAndBitwiseXorAcquire,
    ];

    #[must_use]
    pub const fn template(self) -> AccessModeTemplate {
        use AccessMode::*;
        match self {
            Get | GetVolatile | GetAcquire | GetOpaque => AccessModeTemplate::Get,
            Set | SetVolatile | SetRelease | SetOpaque => AccessModeTemplate::Set,
            CompareAndSet
            | WeakCompareAndSetPlain
            | WeakCompareAndSet
            | WeakCompareAndSetAcquire
            | WeakCompareAndSetRelease => AccessModeTemplate::CompareAndSet,
            CompareAndExchange | CompareAndExchangeAcquire | CompareAndExchangeRelease => {
                AccessModeTemplate::CompareAndExchange
            }
            _ => AccessModeTemplate::GetAndUpdate,
        }
    }

    #[must_use]
    pub const fn update_op(self) -> Option<UpdateOp> {
        use AccessMode::*;
        match self {
            GetAndSet | GetAndSetAcquire | GetAndSetRelease => Some(UpdateOp::Set),
            GetAndAdd | GetAndAddAcquire | GetAndAddRelease => Some(UpdateOp::Add),
            GetAndBitwiseOr | GetAndBitwiseOrRelease | GetAndBitwiseOrAcquire => {
                Some(UpdateOp::BitwiseOr)
            }
            GetAndBitwiseAnd | GetAndBitwiseAndRelease | GetAndBitwiseAndAcquire => {
                Some(UpdateOp::BitwiseAnd)
            }
            GetAndBitwiseXor | GetAndBitwiseXorRelease | GetAndBitwiseXorAcquire => {
                Some(UpdateOp::BitwiseXor)
            }
            _ => None,
        }
    }

    /// `(success, failure)` orderings. Loads and stores use the first.
    #[must_use]
    pub const fn orderings(self) -> (Ordering, Ordering) {
        use AccessMode::*;
        match self {
            Get | Set | GetOpaque | SetOpaque | WeakCompareAndSetPlain => {
                (Ordering::Relaxed, Ordering::Relaxed)
            }
            GetAcquire
            | CompareAndExchangeAcquire
            | WeakCompareAndSetAcquire
            | GetAndSetAcquire
            | GetAndAddAcquire
            | GetAndBitwiseOrAcquire
            | GetAndBitwiseAndAcquire
            | GetAndBitwiseXorAcquire => (Ordering::Acquire, Ordering::Acquire),
            SetRelease
            | CompareAndExchangeRelease
            | WeakCompareAndSetRelease
            | GetAndSetRelease
            | GetAndAddRelease
            | GetAndBitwiseOrRelease
            | GetAndBitwiseAndRelease
            | GetAndBitwiseXorRelease => (Ordering::Release, Ordering::Relaxed),
            _ => (Ordering::SeqCst, Ordering::SeqCst),
        }
    }

    /// Modes that only read memory.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self.template(), AccessModeTemplate::Get)
    }

    /// Weak compare-and-set may fail spuriously.
    #[must_use]
    pub const fn is_weak(self) -> bool {
        use AccessMode::*;
        matches!(
            self,
            WeakCompareAndSetPlain
                | WeakCompareAndSet
                | WeakCompareAndSetAcquire
                | WeakCompareAndSetRelease
        )
    }

    /// Name of the accessor method, e.g. `getAndAddAcquire`.
    #[must_use]
    pub fn method_name(self) -> &'static str {
        ACCESSOR_NAMES
            .iter()
            .find(|(_, mode)| *mode == self)
            .map_or("", |(name, _)| name)
    }

    #[must_use]
    pub fn from_method_name(name: &str) -> Option<Self> {
        ACCESSOR_NAMES
            .binary_search_by(|(candidate, _)| (*candidate).cmp(name))
            .ok()
            .map(|index| ACCESSOR_NAMES[index].1)
    }

    /// Erased return type of the accessor method.
    #[must_use]
    pub const fn return_type_descriptor(self) -> &'static str {
        match self.template() {
            AccessModeTemplate::Set => "V",
            AccessModeTemplate::CompareAndSet => "Z",
            _ => "Ljava/lang/Object;",
        }
    }

    #[inline]
    #[must_use]
    pub const fn bit(self) -> AccessModes {
        AccessModes::from_bits_retain(1 << self as u32)
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.method_name())
    }
}

bitflags! {
    /// Set of access modes a handle supports, fixed when the handle is built.
    /// Bit `n` is the mode with ordinal `n`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessModes: u32 {
        const GET = 1 << 0;
        const SET = 1 << 1;
        const GET_VOLATILE = 1 << 2;
        const SET_VOLATILE = 1 << 3;
        const GET_ACQUIRE = 1 << 4;
        const SET_RELEASE = 1 << 5;
        const GET_OPAQUE = 1 << 6;
        const SET_OPAQUE = 1 << 7;
        const COMPARE_AND_SET = 1 << 8;
        const COMPARE_AND_EXCHANGE = 1 << 9;
        const COMPARE_AND_EXCHANGE_ACQUIRE = 1 << 10;
        const COMPARE_AND_EXCHANGE_RELEASE = 1 << 11;
        const WEAK_COMPARE_AND_SET_PLAIN = 1 << 12;
        const WEAK_COMPARE_AND_SET = 1 << 13;
        const WEAK_COMPARE_AND_SET_ACQUIRE = 1 << 14;
        const WEAK_COMPARE_AND_SET_RELEASE = 1 << 15;
        const GET_AND_SET = 1 << 16;
        const GET_AND_SET_ACQUIRE = 1 << 17;
        const GET_AND_SET_RELEASE = 1 << 18;
        const GET_AND_ADD = 1 << 19;
        const GET_AND_ADD_ACQUIRE = 1 << 20;
        const GET_AND_ADD_RELEASE = 1 << 21;
        const GET_AND_BITWISE_OR = 1 << 22;
        const GET_AND_BITWISE_OR_RELEASE = 1 << 23;
        const GET_AND_BITWISE_OR_ACQUIRE = 1 << 24;
        const GET_AND_BITWISE_AND = 1 << 25;
        const GET_AND_BITWISE_AND_RELEASE = 1 << 26;
        const GET_AND_BITWISE_AND_ACQUIRE = 1 << 27;
        const GET_AND_BITWISE_XOR = 1 << 28;
        const GET_AND_BITWISE_XOR_RELEASE = 1 << 29;
        const GET_AND_BITWISE_XOR_ACQUIRE = 1 << 30;
    }
}

impl AccessModes {
    #[must_use]
    pub fn supports(self, mode: AccessMode) -> bool {
        self.contains(mode.bit())
    }

    /// Supported modes in canonical order.
    pub fn modes(self) -> impl Iterator<Item = AccessMode> {
        AccessMode::ALL.into_iter().filter(move |&mode| self.supports(mode))
    }

    #[must_use]
    pub fn from_modes(modes: &[AccessMode]) -> Self {
        modes.iter().map(|&mode| mode.bit()).collect()
    }

    /// Every mode a variable of `kind` can support: floating point has no
    /// bitwise operations, booleans and references have neither arithmetic
    /// nor bitwise ones.
    /// A read-only variable keeps only the `Get` modes.
    #[must_use]
    pub fn for_var_type(kind: Primitive, read_only: bool) -> Self {
        AccessMode::ALL
            .into_iter()
            .filter(|&mode| is_supported_for_kind(mode, kind))
            .filter(|&mode| !read_only || mode.is_read_only())
            .map(AccessMode::bit)
            .collect()
    }
}

/// Kind specific exclusions, independent of any handle's mask.
#[must_use]
pub fn is_supported_for_kind(mode: AccessMode, kind: Primitive) -> bool {
    match mode.update_op() {
        Some(UpdateOp::Add) => kind.is_numeric(),
        Some(UpdateOp::BitwiseOr | UpdateOp::BitwiseAnd | UpdateOp::BitwiseXor) => {
            kind.is_integral()
        }
        _ => kind != Primitive::Void,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_table_is_sorted_and_complete() {
        assert!(
            ACCESSOR_NAMES.windows(2).all(|pair| pair[0].0 < pair[1].0),
            "binary search needs a sorted table"
        );
        for mode in AccessMode::ALL {
            assert_eq!(AccessMode::from_method_name(mode.method_name()), Some(mode));
        }
        assert_eq!(
            AccessMode::from_method_name("getAndBitwiseXorRelease"),
            Some(AccessMode::GetAndBitwiseXorRelease)
        );
        assert_eq!(AccessMode::from_method_name("getAndMultiply"), None);
        assert_eq!(AccessMode::from_method_name(""), None);
    }

    #[test]
    fn canonical_order() {
        for (index, mode) in AccessMode::ALL.into_iter().enumerate() {
            assert_eq!(mode as usize, index, "{mode}");
        }
    }

    #[test]
    fn templates_and_return_descriptors() {
        assert_eq!(AccessMode::SetOpaque.return_type_descriptor(), "V");
        assert_eq!(AccessMode::WeakCompareAndSetPlain.return_type_descriptor(), "Z");
        assert_eq!(
            AccessMode::CompareAndExchangeRelease.return_type_descriptor(),
            "Ljava/lang/Object;"
        );
        assert_eq!(
            AccessMode::GetAndBitwiseOrAcquire.template(),
            AccessModeTemplate::GetAndUpdate
        );
        assert_eq!(AccessModeTemplate::CompareAndExchange.value_operands(), 2);
        let read_only = AccessMode::ALL.iter().filter(|m| m.is_read_only()).count();
        assert_eq!(read_only, 4);
    }

    #[test]
    fn orderings() {
        assert_eq!(
            AccessMode::GetAndAddRelease.orderings(),
            (Ordering::Release, Ordering::Relaxed)
        );
        assert_eq!(
            AccessMode::CompareAndExchangeAcquire.orderings(),
            (Ordering::Acquire, Ordering::Acquire)
        );
        assert_eq!(AccessMode::WeakCompareAndSetPlain.orderings().0, Ordering::Relaxed);
        assert_eq!(AccessMode::WeakCompareAndSet.orderings().0, Ordering::SeqCst);
        assert_eq!(AccessMode::GetOpaque.orderings().0, Ordering::Relaxed);
        assert_eq!(AccessMode::SetVolatile.orderings().0, Ordering::SeqCst);
    }

    #[test]
    fn kind_masks() {
        let reference = AccessModes::for_var_type(Primitive::Not, false);
        assert!(reference.supports(AccessMode::GetAndSet));
        assert!(reference.supports(AccessMode::CompareAndExchange));
        assert!(!reference.supports(AccessMode::GetAndAdd));
        assert!(!reference.supports(AccessMode::GetAndBitwiseOr));

        let boolean = AccessModes::for_var_type(Primitive::Boolean, false);
        assert!(!boolean.supports(AccessMode::GetAndAdd));
        assert!(!boolean.supports(AccessMode::GetAndBitwiseXor));
        assert!(boolean.supports(AccessMode::GetAndSetRelease));

        let double = AccessModes::for_var_type(Primitive::Double, false);
        assert!(double.supports(AccessMode::GetAndAddAcquire));
        assert!(!double.supports(AccessMode::GetAndBitwiseAnd));

        let int = AccessModes::for_var_type(Primitive::Int, false);
        assert_eq!(int, AccessModes::all());
        assert_eq!(int.modes().count(), AccessMode::COUNT);

        let final_int = AccessModes::for_var_type(Primitive::Int, true);
        assert!(final_int.modes().all(AccessMode::is_read_only));
        assert!(int.contains(final_int));
    }

    #[test]
    fn mode_bits_follow_ordinals() {
        assert_eq!(AccessMode::Get.bit(), AccessModes::GET);
        assert_eq!(AccessMode::GetAndBitwiseXorAcquire.bit(), AccessModes::GET_AND_BITWISE_XOR_ACQUIRE);
        assert_eq!(AccessModes::all().bits(), (1 << AccessMode::COUNT) - 1);
        for mode in AccessMode::ALL {
            assert_eq!(mode.bit().bits(), 1 << mode as u32, "{mode}");
        }
        let restricted = AccessModes::from_modes(&[AccessMode::Set, AccessMode::GetAndAdd]);
        assert_eq!(restricted, AccessModes::SET | AccessModes::GET_AND_ADD);
        assert_eq!(
            restricted.modes().collect::<Vec<_>>(),
            [AccessMode::Set, AccessMode::GetAndAdd]
        );
        assert!(!restricted.supports(AccessMode::Get));
    }
}
