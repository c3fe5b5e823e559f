use std::sync::Arc;

use crate::{
    AccessMode, ClassRef, FieldRef, InvokeError, InvokeResult, MethodRef, MethodType, Primitive,
    Runtime, convert::is_method_type_convertible,
};

/// What invoking a method handle does.
#[derive(Debug, Clone)]
pub enum HandleTarget {
    /// Static or private method, called without dispatch.
    DirectCall(MethodRef),
    /// Re-resolved against the receiver's runtime class.
    VirtualCall(MethodRef),
    InterfaceCall(MethodRef),
    /// Resolved through the superclass of the handle's first parameter type.
    SuperCall(MethodRef),
    /// Allocates an instance of the declaring class, or calls the string
    /// factory standing in for a string constructor.
    ConstructorCall(MethodRef),
    InstanceFieldGet(FieldRef),
    InstanceFieldPut(FieldRef),
    StaticFieldGet(FieldRef),
    StaticFieldPut(FieldRef),
    /// Calls `transform(frame)` on the handle with the packed arguments.
    Transform(MethodRef),
    /// Like [`HandleTarget::Transform`], with the record typed by the call
    /// site instead of the handle.
    CallSiteTransform(MethodRef),
    VarHandleInvoker(AccessMode),
    VarHandleInvokerExact(AccessMode),
}

impl HandleTarget {
    #[must_use]
    pub fn is_field_access(&self) -> bool {
        matches!(
            self,
            Self::InstanceFieldGet(_)
                | Self::InstanceFieldPut(_)
                | Self::StaticFieldGet(_)
                | Self::StaticFieldPut(_)
        )
    }

    #[must_use]
    pub fn is_transform(&self) -> bool {
        matches!(self, Self::Transform(_) | Self::CallSiteTransform(_))
    }

    #[must_use]
    pub fn is_var_handle_invoker(&self) -> bool {
        matches!(
            self,
            Self::VarHandleInvoker(_) | Self::VarHandleInvokerExact(_)
        )
    }

    /// Type of the underlying method or field access, where there is one.
    fn intrinsic_type(&self, rt: &Runtime) -> Option<Arc<MethodType>> {
        let void = || rt.primitive_class(Primitive::Void);
        let signature = match self {
            Self::DirectCall(method) if method.is_static() => method.method_type().clone(),
            Self::DirectCall(method)
            | Self::VirtualCall(method)
            | Self::InterfaceCall(method)
            | Self::SuperCall(method) => {
                with_leading_parameter(rt, method.declaring_class(), method.method_type())
            }
            Self::ConstructorCall(method) => {
                rt.method_type(method.declaring_class(), method.method_type().ptypes())
            }
            Self::InstanceFieldGet(field) => {
                rt.method_type(field.field_type(), &[field.declaring_class().clone()])
            }
            Self::InstanceFieldPut(field) => rt.method_type(
                &void(),
                &[field.declaring_class().clone(), field.field_type().clone()],
            ),
            Self::StaticFieldGet(field) => rt.method_type(field.field_type(), &[]),
            Self::StaticFieldPut(field) => rt.method_type(&void(), &[field.field_type().clone()]),
            Self::Transform(_)
            | Self::CallSiteTransform(_)
            | Self::VarHandleInvoker(_)
            | Self::VarHandleInvokerExact(_) => return None,
        };
        Some(signature)
    }
}

fn with_leading_parameter(rt: &Runtime, first: &ClassRef, method_type: &MethodType) -> Arc<MethodType> {
    let ptypes: Vec<_> = std::iter::once(first.clone())
        .chain(method_type.ptypes().iter().cloned())
        .collect();
    rt.method_type(method_type.rtype(), &ptypes)
}

/// A typed, directly invocable reference to a method, a field access, a
/// transformer or a var handle accessor.
#[derive(Debug, Clone)]
pub struct MethodHandle {
    target: HandleTarget,
    handle_type: Arc<MethodType>,
    nominal_type: Option<Arc<MethodType>>,
}

impl MethodHandle {
    /// Handle of type `handle_type` over `target`. Method and field targets
    /// must be reachable from `handle_type` through conversions.
    pub fn new(
        rt: &Runtime,
        target: HandleTarget,
        handle_type: Arc<MethodType>,
    ) -> InvokeResult<Self> {
        if let Some(intrinsic) = target.intrinsic_type(rt) {
            if !is_method_type_convertible(rt, &handle_type, &intrinsic) {
                return Err(InvokeError::wrong_method_type(&intrinsic, &handle_type));
            }
        }
        Ok(Self {
            target,
            handle_type,
            nominal_type: None,
        })
    }

    /// Handle typed exactly like its target. Returns `None` for targets that
    /// need an explicit type.
    #[must_use]
    pub fn of_target(rt: &Runtime, target: HandleTarget) -> Option<Self> {
        let handle_type = target.intrinsic_type(rt)?;
        Some(Self {
            target,
            handle_type,
            nominal_type: None,
        })
    }

    /// Static methods and private instance methods.
    pub fn direct(rt: &Runtime, method: &MethodRef) -> InvokeResult<Self> {
        if method.is_constructor() {
            return Err(InvokeError::illegal_state(format!(
                "{} is a constructor",
                method.pretty_name()
            )));
        }
        Self::exact(rt, HandleTarget::DirectCall(method.clone()))
    }

    pub fn virtual_call(rt: &Runtime, method: &MethodRef) -> InvokeResult<Self> {
        if !method.is_virtual() {
            return Err(InvokeError::illegal_state(format!(
                "{} is not virtual",
                method.pretty_name()
            )));
        }
        let target = if method.declaring_class().is_interface() {
            HandleTarget::InterfaceCall(method.clone())
        } else {
            HandleTarget::VirtualCall(method.clone())
        };
        Self::exact(rt, target)
    }

    /// Invoke-special of `method` as seen from `referrer`, which becomes the
    /// receiver type.
    pub fn super_call(rt: &Runtime, method: &MethodRef, referrer: &ClassRef) -> InvokeResult<Self> {
        if !referrer.is_subclass_of(method.declaring_class())
            && !referrer.implements(method.declaring_class())
        {
            return Err(InvokeError::class_cast(referrer, method.declaring_class()));
        }
        let handle_type = with_leading_parameter(rt, referrer, method.method_type());
        Ok(Self {
            target: HandleTarget::SuperCall(method.clone()),
            handle_type,
            nominal_type: None,
        })
    }

    pub fn constructor(rt: &Runtime, method: &MethodRef) -> InvokeResult<Self> {
        if !method.is_constructor() {
            return Err(InvokeError::illegal_state(format!(
                "{} is not a constructor",
                method.pretty_name()
            )));
        }
        Self::exact(rt, HandleTarget::ConstructorCall(method.clone()))
    }

    pub fn getter(rt: &Runtime, field: &FieldRef) -> InvokeResult<Self> {
        let target = if field.is_static() {
            HandleTarget::StaticFieldGet(field.clone())
        } else {
            HandleTarget::InstanceFieldGet(field.clone())
        };
        Self::exact(rt, target)
    }

    pub fn setter(rt: &Runtime, field: &FieldRef) -> InvokeResult<Self> {
        let target = if field.is_static() {
            HandleTarget::StaticFieldPut(field.clone())
        } else {
            HandleTarget::InstanceFieldPut(field.clone())
        };
        Self::exact(rt, target)
    }

    /// `method` must be an instance method taking the packed frame.
    pub fn transform(rt: &Runtime, method: &MethodRef, handle_type: Arc<MethodType>) -> InvokeResult<Self> {
        check_transformer(rt, method)?;
        Self::new(rt, HandleTarget::Transform(method.clone()), handle_type)
    }

    pub fn call_site_transform(
        rt: &Runtime,
        method: &MethodRef,
        handle_type: Arc<MethodType>,
    ) -> InvokeResult<Self> {
        check_transformer(rt, method)?;
        Self::new(rt, HandleTarget::CallSiteTransform(method.clone()), handle_type)
    }

    /// Invoker of `mode` on whatever var handle arrives as the first
    /// argument. `handle_type` starts with the var handle class.
    pub fn var_handle_invoker(
        rt: &Runtime,
        mode: AccessMode,
        handle_type: Arc<MethodType>,
        exact: bool,
    ) -> InvokeResult<Self> {
        let var_handle_class = &rt.specials().var_handle;
        if handle_type
            .ptypes()
            .first()
            .is_none_or(|first| !Arc::ptr_eq(first, var_handle_class))
        {
            return Err(InvokeError::illegal_state(format!(
                "invoker type {handle_type} does not start with a VarHandle"
            )));
        }
        let target = if exact {
            HandleTarget::VarHandleInvokerExact(mode)
        } else {
            HandleTarget::VarHandleInvoker(mode)
        };
        Self::new(rt, target, handle_type)
    }

    fn exact(rt: &Runtime, target: HandleTarget) -> InvokeResult<Self> {
        Self::of_target(rt, target)
            .ok_or_else(|| InvokeError::illegal_state("handle target has no intrinsic type"))
    }

    #[must_use]
    pub fn target(&self) -> &HandleTarget {
        &self.target
    }

    #[must_use]
    pub fn handle_type(&self) -> &Arc<MethodType> {
        &self.handle_type
    }

    /// Type this handle was adapted to by [`MethodHandle::as_type`].
    #[must_use]
    pub fn nominal_type(&self) -> Option<&Arc<MethodType>> {
        self.nominal_type.as_ref()
    }

    /// Type exact invocations must match.
    #[must_use]
    pub fn declared_type(&self) -> &Arc<MethodType> {
        self.nominal_type.as_ref().unwrap_or(&self.handle_type)
    }

    /// Same target, invoked exactly as `new_type`. Arguments and results are
    /// converted against the real handle type.
    pub fn as_type(&self, rt: &Runtime, new_type: Arc<MethodType>) -> InvokeResult<Self> {
        if new_type.is_exact_match(&self.handle_type) {
            return Ok(Self {
                nominal_type: None,
                ..self.clone()
            });
        }
        if !is_method_type_convertible(rt, &new_type, &self.handle_type) {
            return Err(InvokeError::wrong_method_type(&self.handle_type, &new_type));
        }
        Ok(Self {
            nominal_type: Some(new_type),
            ..self.clone()
        })
    }
}

fn check_transformer(rt: &Runtime, method: &MethodRef) -> InvokeResult<()> {
    let method_type = method.method_type();
    let takes_frame = method_type.parameter_count() == 1
        && Arc::ptr_eq(method_type.ptype(0), &rt.specials().emulated_stack_frame);
    if method.is_static() || !takes_frame {
        return Err(InvokeError::illegal_state(format!(
            "{} cannot transform an emulated stack frame",
            method.pretty_name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestWorld;

    #[test]
    fn derived_handle_types() {
        let world = TestWorld::new();
        let rt = &world.runtime;

        let virtual_m = MethodHandle::virtual_call(rt, &world.base_m).expect("virtual");
        assert!(matches!(virtual_m.target(), HandleTarget::VirtualCall(_)));
        assert_eq!(virtual_m.handle_type().descriptor(), "(LBase;I)I");

        let getter = MethodHandle::getter(rt, &world.point_x).expect("getter");
        assert_eq!(getter.handle_type().descriptor(), "(LPoint;)I");
        let setter = MethodHandle::setter(rt, &world.counter_total).expect("setter");
        assert_eq!(setter.handle_type().descriptor(), "(I)V");

        let ctor = MethodHandle::constructor(rt, &world.point_init).expect("constructor");
        assert_eq!(ctor.handle_type().descriptor(), "(II)LPoint;");

        let sup = MethodHandle::super_call(rt, &world.derived_m, &world.derived).expect("super");
        assert_eq!(sup.handle_type().descriptor(), "(LDerived;I)I");
        assert!(MethodHandle::super_call(rt, &world.derived_m, &world.base).is_err());
    }

    #[test]
    fn construction_checks_convertibility() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let widened = rt.method_type_from_descriptor("(LDerived;S)J").expect("type");
        assert!(
            MethodHandle::new(rt, HandleTarget::VirtualCall(world.base_m.clone()), widened).is_ok()
        );
        let narrowed = rt.method_type_from_descriptor("(LBase;J)I").expect("type");
        assert!(matches!(
            MethodHandle::new(rt, HandleTarget::VirtualCall(world.base_m.clone()), narrowed),
            Err(InvokeError::WrongMethodType { .. })
        ));
        assert!(MethodHandle::constructor(rt, &world.base_m).is_err());
        assert!(MethodHandle::virtual_call(rt, &world.point_init).is_err());
    }

    #[test]
    fn as_type_sets_nominal_type() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let handle = MethodHandle::virtual_call(rt, &world.base_m).expect("virtual");

        let boxed = rt
            .method_type_from_descriptor("(LBase;Ljava/lang/Integer;)Ljava/lang/Object;")
            .expect("type");
        let adapted = handle.as_type(rt, boxed.clone()).expect("convertible");
        assert!(adapted.declared_type().is_exact_match(&boxed));
        assert!(adapted.handle_type().is_exact_match(handle.handle_type()));

        let back = adapted
            .as_type(rt, handle.handle_type().clone())
            .expect("original type");
        assert!(back.nominal_type().is_none());

        let wrong = rt.method_type_from_descriptor("(LBase;Z)I").expect("type");
        assert!(matches!(
            handle.as_type(rt, wrong),
            Err(InvokeError::WrongMethodType { .. })
        ));
    }

    #[test]
    fn invokers_start_with_var_handle() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let good = rt
            .method_type_from_descriptor("(Ljava/lang/invoke/VarHandle;LPoint;)I")
            .expect("type");
        assert!(MethodHandle::var_handle_invoker(rt, AccessMode::Get, good, false).is_ok());
        let bad = rt.method_type_from_descriptor("(LPoint;)I").expect("type");
        assert!(MethodHandle::var_handle_invoker(rt, AccessMode::Get, bad, true).is_err());
    }
}
