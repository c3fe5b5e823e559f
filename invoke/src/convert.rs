//! Signature convertibility and the value conversions performed when a call
//! site and its target disagree on types.

use std::sync::Arc;

use crate::{
    ClassRef, FrameGetter, FrameSetter, InvokeError, InvokeResult, MethodType, Primitive, Runtime,
    Value,
};

/// Whether some conversion from `from` to `to` could succeed. Failures that
/// depend on runtime values are left to [`convert_value`].
#[must_use]
pub fn is_parameter_convertible(rt: &Runtime, from: &ClassRef, to: &ClassRef) -> bool {
    if Arc::ptr_eq(from, to) {
        return true;
    }

    let from_kind = from.primitive();
    let to_kind = to.primitive();
    if from_kind == Primitive::Void || to_kind == Primitive::Void {
        return false;
    }

    match (from_kind.is_reference(), to_kind.is_reference()) {
        // assignability is checked against the actual value
        (true, true) => true,
        (false, false) => Primitive::is_widenable(from_kind, to_kind),
        // boxing, the box class is checked against the actual call
        (false, true) => true,
        (true, false) => {
            if from.is_object_class() {
                return true;
            }
            if Arc::ptr_eq(from, &rt.specials().number) {
                return to_kind.is_numeric();
            }
            rt.specials()
                .unboxed_kind(from)
                .is_some_and(|unboxed| Primitive::is_widenable(unboxed, to_kind))
        }
    }
}

/// A void target ignores the value and a void source produces zero.
#[must_use]
pub fn is_return_convertible(rt: &Runtime, from: &ClassRef, to: &ClassRef) -> bool {
    to.primitive() == Primitive::Void
        || from.primitive() == Primitive::Void
        || is_parameter_convertible(rt, from, to)
}

/// Whether a call site of type `callsite` could invoke something of type
/// `target` through conversions.
#[must_use]
pub fn is_method_type_convertible(rt: &Runtime, callsite: &MethodType, target: &MethodType) -> bool {
    callsite.parameter_count() == target.parameter_count()
        && is_return_convertible(rt, target.rtype(), callsite.rtype())
        && callsite
            .ptypes()
            .iter()
            .zip(target.ptypes())
            .all(|(from, to)| is_parameter_convertible(rt, from, to))
}

/// Widens a primitive along the lattice; `None` when `from` does not widen
/// to `to`.
#[must_use]
pub fn convert_primitive_value(from: Primitive, to: Primitive, value: Value) -> Option<Value> {
    if from == to {
        return Some(value);
    }
    if !Primitive::is_widenable(from, to) {
        return None;
    }
    let converted = match to {
        Primitive::Short | Primitive::Int => Value::I32(value.as_i32()),
        Primitive::Long => Value::I64(value.as_i64()),
        Primitive::Float => Value::F32(value.as_i64() as f32),
        Primitive::Double if from == Primitive::Float => Value::F64(f64::from(value.as_f32())),
        Primitive::Double => Value::F64(value.as_i64() as f64),
        _ => return None,
    };
    Some(converted)
}

/// Converts `value` of static class `from` into class `to` for a call from
/// `callsite` into `callee`.
pub fn convert_value(
    rt: &Runtime,
    callsite: &MethodType,
    callee: &MethodType,
    from: &ClassRef,
    to: &ClassRef,
    value: Value,
) -> InvokeResult<Value> {
    let from_kind = from.primitive();
    let to_kind = to.primitive();
    let wrong_type = || InvokeError::wrong_method_type(callee, callsite);

    if from_kind == Primitive::Void {
        return Ok(Value::zero(to_kind));
    }

    match (from_kind.is_reference(), to_kind.is_reference()) {
        (false, false) => convert_primitive_value(from_kind, to_kind, value).ok_or_else(wrong_type),
        (true, true) => {
            if let Some(reference) = value.as_reference() {
                let class = rt.class_of(reference)?;
                if !rt.linker().is_assignable_from(to, &class) {
                    return Err(InvokeError::class_cast(&class, to));
                }
            }
            Ok(value)
        }
        (false, true) => {
            let boxed_kind = match rt.specials().unboxed_kind(to) {
                Some(kind) => kind,
                None => {
                    let boxed_from = rt.specials().boxed(from_kind).ok_or_else(wrong_type)?;
                    if !boxed_from.is_subclass_of(to) {
                        return Err(wrong_type());
                    }
                    from_kind
                }
            };
            // no widening before boxing
            if boxed_kind != from_kind {
                return Err(wrong_type());
            }
            rt.box_primitive(boxed_kind, value).map(Value::from_ref)
        }
        (true, false) => {
            let Some(reference) = value.as_reference() else {
                return Err(InvokeError::null_pointer(format!(
                    "Expected to unbox a '{}' primitive type but was returned null",
                    from.pretty_name()
                )));
            };
            let (unboxed_kind, unboxed) = rt.unbox(reference).ok_or_else(wrong_type)?;
            convert_primitive_value(unboxed_kind, to_kind, unboxed).ok_or_else(|| {
                match rt.specials().boxed(to_kind) {
                    Some(boxed_to) if from.is_assignable_from(boxed_to) => {
                        InvokeError::class_cast(from, to)
                    }
                    _ => wrong_type(),
                }
            })
        }
    }
}

/// Converts argument `index` from the call site's parameter type to the
/// callee's.
pub fn convert_argument_value(
    rt: &Runtime,
    callsite: &MethodType,
    callee: &MethodType,
    index: usize,
    value: Value,
) -> InvokeResult<Value> {
    let from = callsite.ptype(index);
    let to = callee.ptype(index);
    if Arc::ptr_eq(from, to) {
        return Ok(value);
    }
    convert_value(rt, callsite, callee, from, to, value)
}

/// Converts the callee's result to what the call site expects.
pub fn convert_return_value(
    rt: &Runtime,
    callsite: &MethodType,
    callee: &MethodType,
    value: Value,
) -> InvokeResult<Value> {
    let from = callee.rtype();
    let to = callsite.rtype();
    if to.primitive() == Primitive::Void || Arc::ptr_eq(from, to) {
        return Ok(value);
    }
    convert_value(rt, callsite, callee, from, to, value)
}

/// Moves every argument from `getter` to `setter`, converting from the call
/// site's parameter types to the callee's. Identical types are copied raw.
pub fn perform_conversions(
    rt: &Runtime,
    callsite: &MethodType,
    callee: &MethodType,
    getter: &mut FrameGetter<'_>,
    setter: &mut FrameSetter<'_>,
) -> InvokeResult<()> {
    if callsite.parameter_count() != callee.parameter_count() {
        return Err(InvokeError::wrong_method_type(callee, callsite));
    }

    for (index, (from, to)) in callsite.ptypes().iter().zip(callee.ptypes()).enumerate() {
        let from_kind = from.primitive();
        if Arc::ptr_eq(from, to) {
            if from_kind.is_reference() {
                setter.set_reference(getter.get_reference());
            } else if from_kind.is_64bit() {
                setter.set_long(getter.get_long());
            } else {
                setter.set(getter.get());
            }
            continue;
        }

        let value = getter.read(from_kind);
        let converted = convert_argument_value(rt, callsite, callee, index, value)?;
        setter.write(to.primitive(), converted);
    }
    Ok(())
}
