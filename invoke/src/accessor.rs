//! Atomic accessors behind every variable handle shape.
//!
//! A handle resolves its coordinates to a [`Location`]; from there the access
//! is the same whether the slot lives in an instance, a class, an array or a
//! byte view.

use crate::{
    AccessMode, AccessModeTemplate, BitwiseOp, FieldHolder, FrameGetter, InvokeError,
    InvokeResult, ObjectRef, Primitive, RawStorage, Runtime, Scalar, UpdateOp, Value,
    get_and_add, get_and_bitwise, is_supported_for_kind,
};

/// A resolved, bounds-checked slot.
pub(crate) struct Location<'a> {
    pub storage: &'a RawStorage,
    pub offset: usize,
    pub kind: Primitive,
    /// Stored in the opposite byte order of the host.
    pub byte_swap: bool,
    /// Owner reported to the reference barrier.
    pub holder: FieldHolder,
}

/// Checks a byte index relative to `start` against an exclusive `limit`
/// for an access of `kind`, returning the absolute index.
pub fn check_element_index(
    kind: Primitive,
    relative_index: i32,
    start: usize,
    limit: usize,
) -> InvokeResult<usize> {
    let start = start as i64;
    let limit = limit as i64;
    let index = start + i64::from(relative_index);
    let max_index = limit - kind.component_size() as i64;
    if index < start || index > max_index {
        return Err(InvokeError::index_out_of_bounds(index, limit - start));
    }
    Ok(index as usize)
}

/// Checks an array element index against the array length.
pub fn check_array_index(index: i32, length: usize) -> InvokeResult<usize> {
    match usize::try_from(index) {
        Ok(index) if index < length => Ok(index),
        _ => Err(InvokeError::index_out_of_bounds(
            i64::from(index),
            length as i64,
        )),
    }
}

/// Performs `mode` on `location`, reading value operands from `getter`.
pub(crate) fn access(
    rt: &Runtime,
    mode: AccessMode,
    location: &Location<'_>,
    getter: &mut FrameGetter<'_>,
) -> InvokeResult<Value> {
    if !is_supported_for_kind(mode, location.kind) {
        return Err(InvokeError::unsupported(format!(
            "{mode} on a {} variable",
            location.kind
        )));
    }
    log::trace!(
        "{mode} on {} at offset {}",
        location.kind,
        location.offset
    );

    match location.kind {
        Primitive::Boolean => dispatch_scalar::<u8>(mode, location, getter),
        Primitive::Byte => dispatch_scalar::<i8>(mode, location, getter),
        Primitive::Char => dispatch_scalar::<u16>(mode, location, getter),
        Primitive::Short => dispatch_scalar::<i16>(mode, location, getter),
        Primitive::Int | Primitive::Float => dispatch_scalar::<i32>(mode, location, getter),
        Primitive::Long | Primitive::Double => dispatch_scalar::<i64>(mode, location, getter),
        Primitive::Not => dispatch_reference(rt, mode, location, getter),
        Primitive::Void => Err(InvokeError::unsupported("void variable")),
    }
}

/// Plain get and set on a misaligned byte view fall back to a byte copy;
/// nothing else can be done atomically there.
pub(crate) fn access_unaligned(
    mode: AccessMode,
    location: &Location<'_>,
    getter: &mut FrameGetter<'_>,
) -> InvokeResult<Value> {
    match location.kind {
        Primitive::Char => unaligned::<u16>(mode, location, getter),
        Primitive::Short => unaligned::<i16>(mode, location, getter),
        Primitive::Int | Primitive::Float => unaligned::<i32>(mode, location, getter),
        Primitive::Long | Primitive::Double => unaligned::<i64>(mode, location, getter),
        kind => Err(InvokeError::unsupported(format!("{kind} byte view"))),
    }
}

fn unaligned<T: Scalar>(
    mode: AccessMode,
    location: &Location<'_>,
    getter: &mut FrameGetter<'_>,
) -> InvokeResult<Value> {
    let swap = |value: T| if location.byte_swap { value.swap_bytes() } else { value };
    let mut bytes = [0u8; 8];
    match mode {
        AccessMode::Get => {
            location
                .storage
                .read_bytes(location.offset, &mut bytes[..T::SIZE])?;
            let value = swap(T::from_ne_slice(&bytes));
            Ok(Value::from_raw(location.kind, value.to_bits()))
        }
        AccessMode::Set => {
            let value = swap(T::from_bits(getter.read(location.kind).raw_bits()));
            value.write_ne_slice(&mut bytes);
            location
                .storage
                .write_bytes(location.offset, &bytes[..T::SIZE])?;
            Ok(Value::I32(0))
        }
        _ => Err(InvokeError::illegal_state("Unaligned access not supported")),
    }
}

fn dispatch_scalar<T: Scalar>(
    mode: AccessMode,
    location: &Location<'_>,
    getter: &mut FrameGetter<'_>,
) -> InvokeResult<Value> {
    let kind = location.kind;
    let byte_swap = location.byte_swap;
    let swap = |value: T| if byte_swap { value.swap_bytes() } else { value };
    let mut operand = || T::from_bits(getter.read(kind).raw_bits());
    let result = |value: T| Value::from_raw(kind, value.to_bits());

    let ptr = location.storage.slot::<T>(location.offset)?;
    let (success, failure) = mode.orderings();

    // SAFETY: `slot` checked bounds and alignment, and the storage outlives
    // this call
    let value = unsafe {
        match mode.template() {
            AccessModeTemplate::Get => result(swap(T::load(ptr, success))),
            AccessModeTemplate::Set => {
                T::store(ptr, swap(operand()), success);
                Value::I32(0)
            }
            AccessModeTemplate::CompareAndSet => {
                let expected = swap(operand());
                let desired = swap(operand());
                let outcome = if mode.is_weak() {
                    T::compare_exchange_weak(ptr, expected, desired, success, failure)
                } else {
                    T::compare_exchange(ptr, expected, desired, success, failure)
                };
                Value::from_bool(outcome.is_ok())
            }
            AccessModeTemplate::CompareAndExchange => {
                let expected = swap(operand());
                let desired = swap(operand());
                let (Ok(old) | Err(old)) =
                    T::compare_exchange(ptr, expected, desired, success, failure);
                result(swap(old))
            }
            AccessModeTemplate::GetAndUpdate => {
                let value = operand();
                let old = match mode.update_op() {
                    Some(UpdateOp::Add) => {
                        get_and_add(ptr, kind, value, byte_swap, success, failure)
                    }
                    Some(UpdateOp::BitwiseOr) => {
                        get_and_bitwise(ptr, BitwiseOp::Or, value, byte_swap, success)
                    }
                    Some(UpdateOp::BitwiseAnd) => {
                        get_and_bitwise(ptr, BitwiseOp::And, value, byte_swap, success)
                    }
                    Some(UpdateOp::BitwiseXor) => {
                        get_and_bitwise(ptr, BitwiseOp::Xor, value, byte_swap, success)
                    }
                    Some(UpdateOp::Set) | None => swap(T::swap(ptr, swap(value), success)),
                };
                result(old)
            }
        }
    };
    Ok(value)
}

fn dispatch_reference(
    rt: &Runtime,
    mode: AccessMode,
    location: &Location<'_>,
    getter: &mut FrameGetter<'_>,
) -> InvokeResult<Value> {
    let mut operand = || ObjectRef::encode(getter.read(Primitive::Not).as_reference());
    let result = |raw: u32| Value::from_raw(Primitive::Not, u64::from(raw));
    let barrier = || {
        rt.barrier()
            .pre_write_barrier(&location.holder, location.offset)
    };

    let ptr = location.storage.slot::<u32>(location.offset)?;
    let (success, failure) = mode.orderings();

    // SAFETY: `slot` checked bounds and alignment, and the storage outlives
    // this call
    let value = unsafe {
        match mode.template() {
            AccessModeTemplate::Get => result(u32::load(ptr, success)),
            AccessModeTemplate::Set => {
                let value = operand();
                barrier();
                u32::store(ptr, value, success);
                Value::I32(0)
            }
            AccessModeTemplate::CompareAndSet => {
                let expected = operand();
                let desired = operand();
                barrier();
                let outcome = if mode.is_weak() {
                    u32::compare_exchange_weak(ptr, expected, desired, success, failure)
                } else {
                    u32::compare_exchange(ptr, expected, desired, success, failure)
                };
                Value::from_bool(outcome.is_ok())
            }
            AccessModeTemplate::CompareAndExchange => {
                let expected = operand();
                let desired = operand();
                barrier();
                let (Ok(old) | Err(old)) =
                    u32::compare_exchange(ptr, expected, desired, success, failure);
                result(old)
            }
            AccessModeTemplate::GetAndUpdate => match mode.update_op() {
                Some(UpdateOp::Set) => {
                    let value = operand();
                    barrier();
                    result(u32::swap(ptr, value, success))
                }
                _ => {
                    return Err(InvokeError::unsupported(format!(
                        "{mode} on a reference variable"
                    )));
                }
            },
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_index_bounds_are_inclusive() {
        assert_eq!(check_element_index(Primitive::Int, 0, 0, 8), Ok(0));
        assert_eq!(check_element_index(Primitive::Int, 4, 0, 8), Ok(4));
        assert_eq!(
            check_element_index(Primitive::Int, 5, 0, 8),
            Err(InvokeError::index_out_of_bounds(5, 8))
        );
        assert_eq!(
            check_element_index(Primitive::Long, -1, 0, 16),
            Err(InvokeError::index_out_of_bounds(-1, 16))
        );
    }

    #[test]
    fn element_index_relative_to_start() {
        assert_eq!(check_element_index(Primitive::Short, 2, 4, 10), Ok(6));
        assert_eq!(check_element_index(Primitive::Short, 4, 4, 10), Ok(8));
        assert_eq!(
            check_element_index(Primitive::Short, 5, 4, 10),
            Err(InvokeError::index_out_of_bounds(9, 6)),
            "length reported relative to start"
        );
    }

    #[test]
    fn array_index_bounds() {
        assert_eq!(check_array_index(2, 3), Ok(2));
        assert!(check_array_index(3, 3).is_err());
        assert_eq!(
            check_array_index(-1, 3),
            Err(InvokeError::index_out_of_bounds(-1, 3))
        );
    }
}
