//! Invocation of method handles from a call site.
//!
//! The interpreter reads the handle out of its own register and passes the
//! remaining operands, described by the call site's [`MethodType`]. A call
//! that exactly matches the handle type copies its operands verbatim; any
//! other call converts each argument and the result.

use std::sync::Arc;

use log::debug;

use crate::{
    AccessMode, EmulatedStackFrame, FieldRef, Frame, FrameGetter, FrameSetter, HandleTarget,
    InvokeError, InvokeResult, MethodHandle, MethodRef, MethodType, NoReceiverOperands,
    ObjectRef, Operands, Primitive, Runtime, Value, copy_arguments,
    convert::{
        convert_argument_value, convert_return_value, is_method_type_convertible,
        perform_conversions,
    },
    var_handle::access_with_conversions,
};

/// `invoke`: arguments are converted to the handle type as needed.
pub fn dispatch_call(
    rt: &Runtime,
    frame: &Frame,
    handle: Option<ObjectRef>,
    callsite: &Arc<MethodType>,
    operands: &dyn Operands,
) -> InvokeResult<Value> {
    let (handle_ref, mh) = resolve_handle(rt, handle)?;
    if callsite.is_exact_match(mh.handle_type()) {
        invoke_exact_internal(rt, frame, handle_ref, &mh, callsite, operands)
    } else {
        invoke_internal(rt, frame, handle_ref, &mh, callsite, operands)
    }
}

/// `invokeExact`: the call site must match the handle's declared type.
pub fn dispatch_call_exact(
    rt: &Runtime,
    frame: &Frame,
    handle: Option<ObjectRef>,
    callsite: &Arc<MethodType>,
    operands: &dyn Operands,
) -> InvokeResult<Value> {
    let (handle_ref, mh) = resolve_handle(rt, handle)?;
    if let Some(nominal) = mh.nominal_type() {
        if !callsite.is_exact_match(nominal) {
            return Err(InvokeError::wrong_method_type(nominal, callsite));
        }
        if !nominal.is_exact_match(mh.handle_type()) {
            debug!("nominal type {nominal} differs from {}, converting", mh.handle_type());
            return invoke_internal(rt, frame, handle_ref, &mh, callsite, operands);
        }
    }
    invoke_exact_internal(rt, frame, handle_ref, &mh, callsite, operands)
}

fn resolve_handle(
    rt: &Runtime,
    handle: Option<ObjectRef>,
) -> InvokeResult<(ObjectRef, Arc<MethodHandle>)> {
    let handle_ref = handle.ok_or_else(|| {
        InvokeError::null_pointer("Attempt to invoke a MethodHandle on a null reference")
    })?;
    let object = rt.object(handle_ref)?;
    let mh = object.as_method_handle().cloned().ok_or_else(|| {
        InvokeError::class_cast(&object.class, &rt.specials().method_handle)
    })?;
    Ok((handle_ref, mh))
}

fn invoke_internal(
    rt: &Runtime,
    frame: &Frame,
    handle_ref: ObjectRef,
    mh: &MethodHandle,
    callsite: &Arc<MethodType>,
    operands: &dyn Operands,
) -> InvokeResult<Value> {
    let target = mh.target();
    if target.is_field_access() {
        if !is_method_type_convertible(rt, callsite, mh.handle_type()) {
            return Err(InvokeError::wrong_method_type(mh.handle_type(), callsite));
        }
        return field_access(rt, frame, mh, callsite, operands, true);
    }
    match *target {
        HandleTarget::VarHandleInvoker(mode) | HandleTarget::VarHandleInvokerExact(mode) => {
            invoke_var_handle(rt, frame, mh, mode, callsite, operands, false)
        }
        _ => invoke_method(rt, frame, handle_ref, mh, callsite, operands),
    }
}

fn invoke_exact_internal(
    rt: &Runtime,
    frame: &Frame,
    handle_ref: ObjectRef,
    mh: &MethodHandle,
    callsite: &Arc<MethodType>,
    operands: &dyn Operands,
) -> InvokeResult<Value> {
    let handle_type = mh.handle_type();
    if !callsite.is_exact_match(handle_type) {
        return Err(InvokeError::wrong_method_type(handle_type, callsite));
    }

    let target = mh.target();
    if target.is_field_access() {
        return field_access(rt, frame, mh, callsite, operands, false);
    }
    if target.is_transform() || is_caller_transformer(rt, callsite) {
        return invoke_method(rt, frame, handle_ref, mh, callsite, operands);
    }
    if let HandleTarget::VarHandleInvoker(mode) | HandleTarget::VarHandleInvokerExact(mode) =
        *target
    {
        return invoke_var_handle(rt, frame, mh, mode, callsite, operands, true);
    }

    let call = refine_target(rt, frame, mh, callsite, operands)?;
    debug!("exact call of {}", call.method.pretty_name());
    let (registers, first_arg) = call.method.frame_layout();
    let mut callee = Frame::for_method(&call.method, registers);
    {
        let mut guard = callee.begin_construction();
        let first_dest = call.push_instance(&mut guard, first_arg);
        copy_arguments(frame, operands, &mut guard, first_dest);
    }
    let result = rt
        .interpreter()
        .perform_call(rt, &call.method, &mut callee, first_arg)?;
    Ok(call.result(result))
}

/// A transformer forwarding its packed frame passes it as the only argument.
fn is_caller_transformer(rt: &Runtime, callsite: &MethodType) -> bool {
    callsite.parameter_count() == 1
        && Arc::ptr_eq(callsite.ptype(0), &rt.specials().emulated_stack_frame)
}

fn caller_record(frame: &Frame, operands: &dyn Operands) -> InvokeResult<ObjectRef> {
    frame
        .get_reference(operands.operand(0))
        .ok_or_else(|| InvokeError::null_pointer("emulated stack frame is null"))
}

fn with_record<R>(
    rt: &Runtime,
    record: ObjectRef,
    f: impl FnOnce(&mut EmulatedStackFrame) -> InvokeResult<R>,
) -> InvokeResult<R> {
    let object = rt.object(record)?;
    let frame = object.as_stack_frame().ok_or_else(|| {
        InvokeError::class_cast(&object.class, &rt.specials().emulated_stack_frame)
    })?;
    f(&mut frame.lock())
}

/// Method chosen for a call after looking at the receiver.
struct CallTarget {
    method: MethodRef,
    /// Allocated by a constructor call, passed as receiver and returned.
    new_instance: Option<ObjectRef>,
}

impl CallTarget {
    fn direct(method: &MethodRef) -> Self {
        Self {
            method: method.clone(),
            new_instance: None,
        }
    }

    /// Stores the new instance ahead of the arguments, returning the first
    /// argument register.
    fn push_instance(&self, callee: &mut Frame, first_arg: usize) -> usize {
        match self.new_instance {
            Some(instance) => {
                callee.set_reference(first_arg, Some(instance));
                first_arg + 1
            }
            None => first_arg,
        }
    }

    fn result(&self, returned: Value) -> Value {
        self.new_instance.map_or(returned, Value::from_ref)
    }
}

/// First argument of the call, looking inside a forwarded record.
fn receiver_of(
    rt: &Runtime,
    frame: &Frame,
    callsite: &MethodType,
    operands: &dyn Operands,
) -> InvokeResult<Option<ObjectRef>> {
    if operands.is_empty() {
        return Ok(None);
    }
    if is_caller_transformer(rt, callsite) {
        let record = caller_record(frame, operands)?;
        return with_record(rt, record, |esf| Ok(esf.receiver()));
    }
    Ok(frame.get_reference(operands.operand(0)))
}

fn refine_target(
    rt: &Runtime,
    frame: &Frame,
    mh: &MethodHandle,
    callsite: &MethodType,
    operands: &dyn Operands,
) -> InvokeResult<CallTarget> {
    match mh.target() {
        HandleTarget::DirectCall(method)
        | HandleTarget::Transform(method)
        | HandleTarget::CallSiteTransform(method) => Ok(CallTarget::direct(method)),
        HandleTarget::VirtualCall(method) | HandleTarget::InterfaceCall(method) => {
            let receiver = receiver_of(rt, frame, callsite, operands)?.ok_or_else(|| {
                InvokeError::null_pointer(format!(
                    "Attempt to invoke {} on a null object reference",
                    method.pretty_name()
                ))
            })?;
            let receiver_class = rt.class_of(receiver)?;
            let declaring = method.declaring_class();
            if !rt.linker().is_assignable_from(declaring, &receiver_class) {
                return Err(InvokeError::class_cast(&receiver_class, declaring));
            }
            let resolved = rt.linker().find_virtual_override(&receiver_class, method)?;
            debug!(
                "{} resolved to {} for {}",
                method.pretty_name(),
                resolved.pretty_name(),
                receiver_class.pretty_name()
            );
            Ok(CallTarget::direct(&resolved))
        }
        HandleTarget::SuperCall(method) => {
            let declaring = method.declaring_class();
            let referrer = mh.handle_type().ptype(0);
            if Arc::ptr_eq(declaring, referrer) || declaring.is_interface() {
                return Ok(CallTarget::direct(method));
            }
            let resolved = rt.linker().super_method(referrer, method)?;
            Ok(CallTarget::direct(&resolved))
        }
        HandleTarget::ConstructorCall(method) => {
            let class = method.declaring_class();
            if class.is_string_class() {
                let factory = rt.linker().string_factory_for(method)?;
                debug!("{} replaced by {}", method.pretty_name(), factory.pretty_name());
                return Ok(CallTarget::direct(&factory));
            }
            rt.linker().ensure_initialized(rt, class)?;
            Ok(CallTarget {
                method: method.clone(),
                new_instance: Some(rt.new_object(class)?),
            })
        }
        target => Err(InvokeError::illegal_state(format!(
            "{target:?} does not call a method"
        ))),
    }
}

fn invoke_method(
    rt: &Runtime,
    frame: &Frame,
    handle_ref: ObjectRef,
    mh: &MethodHandle,
    callsite: &Arc<MethodType>,
    operands: &dyn Operands,
) -> InvokeResult<Value> {
    let call = refine_target(rt, frame, mh, callsite, operands)?;
    match mh.target() {
        HandleTarget::CallSiteTransform(_) => {
            invoke_transform(rt, frame, handle_ref, &call.method, callsite, callsite, operands)
        }
        HandleTarget::Transform(_) => invoke_transform(
            rt,
            frame,
            handle_ref,
            &call.method,
            callsite,
            mh.handle_type(),
            operands,
        ),
        _ => call_with_conversions(rt, frame, &call, mh.handle_type(), callsite, operands),
    }
}

fn call_with_conversions(
    rt: &Runtime,
    frame: &Frame,
    call: &CallTarget,
    target_type: &Arc<MethodType>,
    callsite: &Arc<MethodType>,
    operands: &dyn Operands,
) -> InvokeResult<Value> {
    let (registers, first_arg) = call.method.frame_layout();
    let mut callee = Frame::for_method(&call.method, registers);
    let mut record = None;
    {
        // boxing may allocate while the callee frame is half built
        let mut guard = callee.begin_construction();
        let first_dest = call.push_instance(&mut guard, first_arg);
        if callsite.is_exact_match(target_type) {
            copy_arguments(frame, operands, &mut guard, first_dest);
        } else if is_caller_transformer(rt, callsite) {
            let packed = caller_record(frame, operands)?;
            with_record(rt, packed, |esf| {
                esf.write_to_frame(rt, target_type, &mut guard, first_dest)
            })?;
            record = Some(packed);
        } else {
            if !is_method_type_convertible(rt, callsite, target_type) {
                return Err(InvokeError::wrong_method_type(target_type, callsite));
            }
            let mut getter = FrameGetter::new(frame, operands);
            let mut setter = FrameSetter::new(&mut guard, first_dest);
            perform_conversions(rt, callsite, target_type, &mut getter, &mut setter)?;
        }
    }

    debug!("converting call of {}", call.method.pretty_name());
    let result = rt
        .interpreter()
        .perform_call(rt, &call.method, &mut callee, first_arg)?;
    let result = call.result(result);

    match record {
        Some(packed) => with_record(rt, packed, |esf| {
            let value = convert_return_value(rt, esf.method_type(), target_type, result)?;
            esf.set_return_value(value);
            Ok(value)
        }),
        None => convert_return_value(rt, callsite, target_type, result),
    }
}

/// Calls the transformer with `(handle, packed arguments)`. The record is
/// typed `callee_type`; a record arriving from another transformer is passed
/// through as is.
fn invoke_transform(
    rt: &Runtime,
    frame: &Frame,
    handle_ref: ObjectRef,
    method: &MethodRef,
    callsite: &Arc<MethodType>,
    callee_type: &Arc<MethodType>,
    operands: &dyn Operands,
) -> InvokeResult<Value> {
    let record = if is_caller_transformer(rt, callsite) {
        caller_record(frame, operands)?
    } else {
        let packed = EmulatedStackFrame::from_frame_and_args(
            rt,
            callsite,
            callee_type.clone(),
            frame,
            operands,
        )?;
        rt.new_stack_frame(packed)?
    };

    debug!("transform {} with {callee_type}", method.pretty_name());
    let (registers, first_arg) = method.frame_layout();
    let mut callee = Frame::for_method(method, registers);
    callee.set_reference(first_arg, Some(handle_ref));
    callee.set_reference(first_arg + 1, Some(record));
    rt.interpreter()
        .perform_call(rt, method, &mut callee, first_arg)?;

    let result = with_record(rt, record, |esf| Ok(esf.return_value()))?;
    convert_return_value(rt, callsite, callee_type, result)
}

fn field_access(
    rt: &Runtime,
    frame: &Frame,
    mh: &MethodHandle,
    callsite: &MethodType,
    operands: &dyn Operands,
    convert: bool,
) -> InvokeResult<Value> {
    let handle_type = mh.handle_type();
    let convert_result = |value: Value| {
        if convert {
            convert_return_value(rt, callsite, handle_type, value)
        } else {
            Ok(value)
        }
    };
    let read_argument = |index: usize| {
        let kind = callsite.ptype(index).primitive();
        let value = frame.read_value(kind, operands.operand(index));
        if convert {
            convert_argument_value(rt, callsite, handle_type, index, value)
        } else {
            Ok(value)
        }
    };
    let void = Value::zero(Primitive::Void);

    match mh.target() {
        HandleTarget::InstanceFieldGet(field) => {
            let object = instance_of(rt, frame, operands, field)?;
            convert_result(rt.read_field(Some(object), field)?)
        }
        HandleTarget::StaticFieldGet(field) => {
            rt.linker().ensure_initialized(rt, field.declaring_class())?;
            convert_result(rt.read_field(None, field)?)
        }
        HandleTarget::InstanceFieldPut(field) => {
            let value = read_argument(1)?;
            let object = instance_of(rt, frame, operands, field)?;
            rt.write_field(Some(object), field, value)?;
            Ok(void)
        }
        HandleTarget::StaticFieldPut(field) => {
            rt.linker().ensure_initialized(rt, field.declaring_class())?;
            let value = read_argument(0)?;
            rt.write_field(None, field, value)?;
            Ok(void)
        }
        target => Err(InvokeError::illegal_state(format!(
            "{target:?} is not a field access"
        ))),
    }
}

/// The object operand of an instance field handle.
fn instance_of(
    rt: &Runtime,
    frame: &Frame,
    operands: &dyn Operands,
    field: &FieldRef,
) -> InvokeResult<ObjectRef> {
    let object = frame.get_reference(operands.operand(0)).ok_or_else(|| {
        InvokeError::null_pointer(format!(
            "Attempt to access field {} on a null object reference",
            field.pretty_name()
        ))
    })?;
    let class = rt.class_of(object)?;
    if !field.declaring_class().is_assignable_from(&class) {
        return Err(InvokeError::class_cast(&class, field.declaring_class()));
    }
    Ok(object)
}

/// Invokes the accessor for `mode` on the var handle passed as the first
/// argument.
fn invoke_var_handle(
    rt: &Runtime,
    frame: &Frame,
    mh: &MethodHandle,
    mode: AccessMode,
    callsite: &Arc<MethodType>,
    operands: &dyn Operands,
    invoke_exact: bool,
) -> InvokeResult<Value> {
    let handle_type = mh.handle_type();
    if !invoke_exact && !is_method_type_convertible(rt, callsite, handle_type) {
        return Err(InvokeError::wrong_method_type(handle_type, callsite));
    }

    let var_handle_class = &rt.specials().var_handle;
    let takes_var_handle = match (callsite.ptypes().first(), handle_type.ptypes().first()) {
        (Some(callsite_first), Some(handle_first)) => {
            Arc::ptr_eq(handle_first, var_handle_class)
                && handle_first.is_assignable_from(callsite_first)
        }
        _ => false,
    };
    if !takes_var_handle {
        return Err(InvokeError::wrong_method_type(handle_type, callsite));
    }

    let receiver = frame
        .get_reference(operands.operand(0))
        .ok_or_else(|| InvokeError::null_pointer("Expected argument 1 to be a non-null VarHandle"))?;
    let receiver_object = rt.object(receiver)?;
    let vh = receiver_object
        .as_var_handle()
        .cloned()
        .ok_or_else(|| InvokeError::class_cast(&receiver_object.class, var_handle_class))?;

    let vh_type = vh.method_type_for_access_mode(rt, mode);
    let mh_invoke_type = rt
        .method_types()
        .intern(handle_type.clone_without_leading_parameter());
    let compatible = match mh.target() {
        HandleTarget::VarHandleInvokerExact(_) => mh_invoke_type.is_exact_match(&vh_type),
        _ => is_method_type_convertible(rt, &mh_invoke_type, &vh_type),
    };
    if !compatible {
        return Err(InvokeError::wrong_method_type(&vh_type, &mh_invoke_type));
    }
    if !vh.is_access_mode_supported(mode) {
        log::warn!("invoker of {mode} on a handle without it");
        return Err(InvokeError::illegal_state(format!("{mode} is not supported")));
    }

    let callsite_without_handle = rt
        .method_types()
        .intern(callsite.clone_without_leading_parameter());
    let without_handle = NoReceiverOperands::new(operands);
    access_with_conversions(
        rt,
        &vh,
        mode,
        frame,
        &callsite_without_handle,
        &without_handle,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RangeOperands, VarArgsOperands, VarHandle, testing::TestWorld};

    /// Lays out `args` after a handle register and dispatches.
    fn invoke(
        rt: &Runtime,
        handle: ObjectRef,
        descriptor: &str,
        args: &[Value],
        exact: bool,
    ) -> InvokeResult<Value> {
        let callsite = rt.method_type_from_descriptor(descriptor).expect("type");
        let mut frame = Frame::new(1 + callsite.number_of_vregs());
        frame.set_reference(0, Some(handle));
        let mut slot = 1;
        for (ptype, &arg) in callsite.ptypes().iter().zip(args) {
            frame.write_value(ptype.primitive(), slot, arg);
            slot += ptype.primitive().slot_count();
        }
        let operands = RangeOperands::new(1, callsite.number_of_vregs());
        let handle = frame.get_reference(0);
        if exact {
            dispatch_call_exact(rt, &frame, handle, &callsite, &operands)
        } else {
            dispatch_call(rt, &frame, handle, &callsite, &operands)
        }
    }

    fn handle(rt: &Runtime, mh: InvokeResult<MethodHandle>) -> ObjectRef {
        rt.new_method_handle(mh.expect("method handle"))
            .expect("allocate handle")
    }

    #[test]
    fn virtual_call_picks_the_override() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let m = handle(rt, MethodHandle::virtual_call(rt, &world.base_m));
        let base = Value::from_ref(rt.new_object(&world.base).expect("alloc"));
        let derived = Value::from_ref(rt.new_object(&world.derived).expect("alloc"));

        assert_eq!(
            invoke(rt, m, "(LBase;I)I", &[base, Value::I32(20)], true),
            Ok(Value::I32(21)),
            "Base.m adds one"
        );
        assert_eq!(
            invoke(rt, m, "(LBase;I)I", &[derived, Value::I32(20)], true),
            Ok(Value::I32(40)),
            "Derived.m doubles"
        );
        assert_eq!(
            invoke(rt, m, "(LDerived;S)J", &[derived, Value::I32(3)], false),
            Ok(Value::I64(6)),
            "converted call still dispatches on the receiver"
        );
    }

    #[test]
    fn receiver_checks() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let m = handle(rt, MethodHandle::virtual_call(rt, &world.base_m));
        let point = Value::from_ref(rt.new_object(&world.point).expect("alloc"));

        assert!(matches!(
            invoke(rt, m, "(LBase;I)I", &[Value::NULL, Value::I32(1)], true),
            Err(InvokeError::NullPointer(_))
        ));
        assert!(matches!(
            invoke(rt, m, "(LBase;I)I", &[point, Value::I32(1)], true),
            Err(InvokeError::ClassCast { .. })
        ));
        assert!(matches!(
            invoke(rt, m, "(LBase;I)J", &[point, Value::I32(1)], true),
            Err(InvokeError::WrongMethodType { .. })
        ));
        let base = Value::from_ref(rt.new_object(&world.base).expect("alloc"));
        assert!(matches!(
            invoke(rt, m, "(LBase;Z)I", &[base, Value::I32(1)], false),
            Err(InvokeError::WrongMethodType { .. })
        ));

        let callsite = rt.method_type_from_descriptor("()V").expect("type");
        assert!(matches!(
            dispatch_call(rt, &Frame::new(0), None, &callsite, &RangeOperands::new(0, 0)),
            Err(InvokeError::NullPointer(_))
        ));
    }

    #[test]
    fn boxing_and_unboxing_arguments() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let m = handle(rt, MethodHandle::virtual_call(rt, &world.base_m));
        let base = Value::from_ref(rt.new_object(&world.base).expect("alloc"));
        let boxed = Value::from_ref(rt.box_primitive(Primitive::Int, Value::I32(9)).expect("box"));

        let result = invoke(
            rt,
            m,
            "(LBase;Ljava/lang/Integer;)Ljava/lang/Object;",
            &[base, boxed],
            false,
        )
        .expect("call");
        let object = result.as_reference().expect("boxed result");
        assert_eq!(rt.unbox(object), Some((Primitive::Int, Value::I32(10))));

        assert!(matches!(
            invoke(
                rt,
                m,
                "(LBase;Ljava/lang/Integer;)I",
                &[base, Value::NULL],
                false
            ),
            Err(InvokeError::NullPointer(_))
        ));
    }

    #[test]
    fn nominal_type_of_adapted_handle() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let direct = MethodHandle::virtual_call(rt, &world.base_m).expect("handle");
        let adapted = direct
            .as_type(
                rt,
                rt.method_type_from_descriptor("(LBase;B)J").expect("type"),
            )
            .expect("as_type");
        let m = rt.new_method_handle(adapted).expect("alloc");
        let base = Value::from_ref(rt.new_object(&world.base).expect("alloc"));

        assert_eq!(
            invoke(rt, m, "(LBase;B)J", &[base, Value::I32(-3)], true),
            Ok(Value::I64(-2))
        );
        assert!(matches!(
            invoke(rt, m, "(LBase;I)I", &[base, Value::I32(1)], true),
            Err(InvokeError::WrongMethodType { .. })
        ),
            "exact invocation must match the nominal type"
        );
        assert_eq!(
            invoke(rt, m, "(LBase;I)I", &[base, Value::I32(1)], false),
            Ok(Value::I32(2)),
            "plain invoke uses the real type"
        );
    }

    #[test]
    fn super_call_bypasses_the_override() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let m = handle(rt, MethodHandle::super_call(rt, &world.base_m, &world.derived));
        let derived = Value::from_ref(rt.new_object(&world.derived).expect("alloc"));
        assert_eq!(
            invoke(rt, m, "(LDerived;I)I", &[derived, Value::I32(5)], true),
            Ok(Value::I32(6)),
            "runs Base.m although the receiver is a Derived"
        );

        let own = handle(rt, MethodHandle::super_call(rt, &world.derived_m, &world.derived));
        assert_eq!(
            invoke(rt, own, "(LDerived;I)I", &[derived, Value::I32(5)], true),
            Ok(Value::I32(10))
        );
    }

    #[test]
    fn constructors_allocate_and_string_uses_factory() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let ctor = handle(rt, MethodHandle::constructor(rt, &world.point_init));
        let point = invoke(rt, ctor, "(II)LPoint;", &[Value::I32(3), Value::I32(4)], true)
            .expect("construct")
            .as_reference()
            .expect("new point");
        assert_eq!(rt.is_instance_of(point, &world.point), Ok(true));
        assert_eq!(rt.read_field(Some(point), &world.point_x), Ok(Value::I32(3)));
        assert_eq!(rt.read_field(Some(point), &world.point_y), Ok(Value::I32(4)));

        let converted = invoke(rt, ctor, "(BS)Ljava/lang/Object;", &[Value::I32(1), Value::I32(2)], false)
            .expect("construct")
            .as_reference()
            .expect("new point");
        assert_eq!(rt.read_field(Some(converted), &world.point_y), Ok(Value::I32(2)));

        let string_ctor = handle(rt, MethodHandle::constructor(rt, &world.string_init));
        let source = Value::from_ref(rt.new_string("copied").expect("string"));
        let copy = invoke(
            rt,
            string_ctor,
            "(Ljava/lang/String;)Ljava/lang/String;",
            &[source],
            true,
        )
        .expect("string factory")
        .as_reference()
        .expect("string");
        assert_ne!(Some(copy), source.as_reference(), "factory builds a new string");
        assert_eq!(rt.string_value(copy).as_deref(), Some("copied"));
    }

    #[test]
    fn field_handles() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let point_ref = rt.new_object(&world.point).expect("alloc");
        let point = Value::from_ref(point_ref);
        let get = handle(rt, MethodHandle::getter(rt, &world.point_x));
        let set = handle(rt, MethodHandle::setter(rt, &world.point_x));

        invoke(rt, set, "(LPoint;I)V", &[point, Value::I32(12)], true).expect("put");
        assert_eq!(invoke(rt, get, "(LPoint;)I", &[point], true), Ok(Value::I32(12)));
        assert_eq!(invoke(rt, get, "(LPoint;)D", &[point], false), Ok(Value::F64(12.0)));

        let boxed = Value::from_ref(rt.box_primitive(Primitive::Short, Value::I32(-7)).expect("box"));
        invoke(rt, set, "(LPoint;Ljava/lang/Short;)V", &[point, boxed], false).expect("unboxed put");
        assert_eq!(rt.read_field(Some(point_ref), &world.point_x), Ok(Value::I32(-7)));

        assert!(matches!(
            invoke(rt, get, "(LPoint;)Z", &[point], false),
            Err(InvokeError::WrongMethodType { .. })
        ));
        assert!(matches!(
            invoke(rt, get, "(LPoint;)I", &[Value::NULL], true),
            Err(InvokeError::NullPointer(_))
        ));
    }

    #[test]
    fn static_field_handles_initialize_the_class() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let set = handle(rt, MethodHandle::setter(rt, &world.counter_total));
        let get = handle(rt, MethodHandle::getter(rt, &world.counter_total));
        assert!(!world.counter.is_initialized());

        invoke(rt, set, "(I)V", &[Value::I32(5)], true).expect("put");
        assert!(world.counter.is_initialized());
        assert_eq!(
            invoke(rt, get, "()J", &[], false),
            Ok(Value::I64(5)),
            "the write happens after the initializer stored 100"
        );
    }

    #[test]
    fn transforms_see_packed_arguments() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let sum_type = rt.method_type_from_descriptor("(IJ)J").expect("type");
        let mh = MethodHandle::transform(rt, &world.sum_transform, sum_type).expect("transform");
        let m = rt.new_method_handle(mh).expect("alloc");

        assert_eq!(
            invoke(rt, m, "(IJ)J", &[Value::I32(2), Value::I64(40)], true),
            Ok(Value::I64(42))
        );
        assert_eq!(
            invoke(rt, m, "(BI)Ljava/lang/Object;", &[Value::I32(1), Value::I32(2)], false)
                .map(|v| v.as_reference().and_then(|r| rt.unbox(r))),
            Ok(Some((Primitive::Long, Value::I64(3)))),
            "arguments converted to the handle type, result boxed for the call site"
        );

        let site_typed = MethodHandle::call_site_transform(
            rt,
            &world.sum_transform,
            rt.method_type_from_descriptor("(IJ)J").expect("type"),
        )
        .expect("transform");
        let m = rt.new_method_handle(site_typed).expect("alloc");
        assert_eq!(
            invoke(rt, m, "(II)J", &[Value::I32(2), Value::I32(3)], false),
            Ok(Value::I64(5)),
            "the record is typed by the call site"
        );
    }

    #[test]
    fn caller_transformer_unpacks_the_record() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let m = handle(rt, MethodHandle::virtual_call(rt, &world.base_m));
        let base = rt.new_object(&world.base).expect("alloc");

        let record_type = rt.method_type_from_descriptor("(LBase;S)J").expect("type");
        let mut record = EmulatedStackFrame::new(record_type);
        record.set_argument(0, Value::from_ref(base)).expect("receiver");
        record.set_argument(1, Value::I32(6)).expect("argument");
        let packed = rt.new_stack_frame(record).expect("alloc");

        let result = invoke(
            rt,
            m,
            "(Ldalvik/system/EmulatedStackFrame;)V",
            &[Value::from_ref(packed)],
            false,
        );
        assert_eq!(result, Ok(Value::I64(7)));
        let stored = rt
            .object(packed)
            .expect("record object")
            .as_stack_frame()
            .expect("record")
            .lock()
            .return_value();
        assert_eq!(stored, Value::I64(7), "result converted to the record's type");
    }

    #[test]
    fn var_handle_invokers() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let point = Value::from_ref(rt.new_object(&world.point).expect("alloc"));
        let vh = Value::from_ref(
            rt.new_var_handle(VarHandle::for_field(&world.point_x))
                .expect("var handle"),
        );

        let set_type = rt
            .method_type_from_descriptor("(Ljava/lang/invoke/VarHandle;LPoint;I)V")
            .expect("type");
        let setter = handle(
            rt,
            MethodHandle::var_handle_invoker(rt, AccessMode::SetVolatile, set_type, true),
        );
        invoke(
            rt,
            setter,
            "(Ljava/lang/invoke/VarHandle;LPoint;I)V",
            &[vh, point, Value::I32(11)],
            true,
        )
        .expect("set");

        let get_type = rt
            .method_type_from_descriptor("(Ljava/lang/invoke/VarHandle;LPoint;)J")
            .expect("type");
        let widening = handle(
            rt,
            MethodHandle::var_handle_invoker(rt, AccessMode::GetAcquire, get_type.clone(), false),
        );
        assert_eq!(
            invoke(
                rt,
                widening,
                "(Ljava/lang/invoke/VarHandle;LPoint;)J",
                &[vh, point],
                true
            ),
            Ok(Value::I64(11))
        );

        let strict = handle(
            rt,
            MethodHandle::var_handle_invoker(rt, AccessMode::GetAcquire, get_type, true),
        );
        assert!(matches!(
            invoke(
                rt,
                strict,
                "(Ljava/lang/invoke/VarHandle;LPoint;)J",
                &[vh, point],
                true
            ),
            Err(InvokeError::WrongMethodType { .. })
        ),
            "exact invoker needs the accessor's own type"
        );
        assert!(matches!(
            invoke(
                rt,
                widening,
                "(Ljava/lang/invoke/VarHandle;LPoint;)J",
                &[Value::NULL, point],
                true
            ),
            Err(InvokeError::NullPointer(_))
        ));
    }

    #[test]
    fn var_args_operands_feed_dispatch() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let m = handle(rt, MethodHandle::virtual_call(rt, &world.base_m));
        let derived = rt.new_object(&world.derived).expect("alloc");

        let mut frame = Frame::new(6);
        frame.set_reference(4, Some(derived));
        frame.set(1, 8);
        let operands = VarArgsOperands::new(&[4, 1]).expect("two registers");
        let callsite = rt.method_type_from_descriptor("(LBase;I)I").expect("type");
        assert_eq!(
            dispatch_call(rt, &frame, Some(m), &callsite, &operands),
            Ok(Value::I32(16))
        );
    }
}
