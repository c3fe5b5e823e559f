use std::sync::Arc;

use crate::{
    AccessMode, AccessModeTemplate, AccessModes, ArrayData, BufferStorage, ClassRef, FieldHolder,
    FieldRef, Frame, FrameGetter, FrameSetter, HeapObject, InvokeError, InvokeResult, MethodType,
    NoReceiverOperands, Operands, Primitive, RangeOperands, RawStorage, Runtime, Value,
    accessor::{self, Location, check_array_index, check_element_index},
    convert::{
        convert_return_value, is_parameter_convertible, is_return_convertible,
        perform_conversions,
    },
};

/// What a variable handle's coordinates address.
#[derive(Debug, Clone)]
pub enum VarHandleKind {
    /// An instance field (coordinate: the object) or a static field (no
    /// coordinates).
    Field(FieldRef),
    /// `(array, int index)`
    ArrayElement,
    /// `(byte[] array, int byte index)`
    ByteArrayView { native_byte_order: bool },
    /// `(ByteBuffer buffer, int byte index)`
    ByteBufferView { native_byte_order: bool },
}

/// Typed access to a variable with a fixed set of supported access modes.
#[derive(Debug, Clone)]
pub struct VarHandle {
    var_type: ClassRef,
    coordinate_type0: Option<ClassRef>,
    coordinate_type1: Option<ClassRef>,
    access_modes: AccessModes,
    kind: VarHandleKind,
}

fn null_coordinate() -> InvokeError {
    InvokeError::null_pointer("Attempt to access memory on a null object")
}

impl VarHandle {
    /// Final fields only get the read modes.
    #[must_use]
    pub fn for_field(field: &FieldRef) -> Self {
        Self {
            var_type: field.field_type().clone(),
            coordinate_type0: (!field.is_static()).then(|| field.declaring_class().clone()),
            coordinate_type1: None,
            access_modes: AccessModes::for_var_type(field.kind(), field.is_final()),
            kind: VarHandleKind::Field(field.clone()),
        }
    }

    pub fn for_array(rt: &Runtime, array_class: &ClassRef) -> InvokeResult<Self> {
        let component = array_class.component_type().ok_or_else(|| {
            InvokeError::illegal_state(format!("{} is not an array", array_class.pretty_name()))
        })?;
        Ok(Self {
            var_type: component.clone(),
            coordinate_type0: Some(array_class.clone()),
            coordinate_type1: Some(rt.primitive_class(Primitive::Int)),
            access_modes: AccessModes::for_var_type(component.primitive(), false),
            kind: VarHandleKind::ArrayElement,
        })
    }

    /// Views a `byte[]` as elements of `var_type`.
    pub fn for_byte_array_view(
        rt: &Runtime,
        var_type: &ClassRef,
        native_byte_order: bool,
    ) -> InvokeResult<Self> {
        Self::check_view_type(var_type)?;
        let bytes = rt
            .linker()
            .array_class_of(&rt.primitive_class(Primitive::Byte));
        Ok(Self {
            var_type: var_type.clone(),
            coordinate_type0: Some(bytes),
            coordinate_type1: Some(rt.primitive_class(Primitive::Int)),
            access_modes: AccessModes::for_var_type(var_type.primitive(), false),
            kind: VarHandleKind::ByteArrayView { native_byte_order },
        })
    }

    /// Views a byte buffer as elements of `var_type`.
    pub fn for_byte_buffer_view(
        rt: &Runtime,
        var_type: &ClassRef,
        native_byte_order: bool,
    ) -> InvokeResult<Self> {
        Self::check_view_type(var_type)?;
        Ok(Self {
            var_type: var_type.clone(),
            coordinate_type0: Some(rt.specials().byte_buffer.clone()),
            coordinate_type1: Some(rt.primitive_class(Primitive::Int)),
            access_modes: AccessModes::for_var_type(var_type.primitive(), false),
            kind: VarHandleKind::ByteBufferView { native_byte_order },
        })
    }

    fn check_view_type(var_type: &ClassRef) -> InvokeResult<()> {
        match var_type.primitive() {
            Primitive::Char
            | Primitive::Short
            | Primitive::Int
            | Primitive::Long
            | Primitive::Float
            | Primitive::Double => Ok(()),
            _ => Err(InvokeError::unsupported(format!(
                "no byte view of {}",
                var_type.pretty_name()
            ))),
        }
    }

    /// Replaces the supported modes. Modes the variable's kind cannot
    /// perform still fail when used.
    #[must_use]
    pub fn with_access_modes(mut self, access_modes: AccessModes) -> Self {
        self.access_modes = access_modes;
        self
    }

    #[must_use]
    pub fn var_type(&self) -> &ClassRef {
        &self.var_type
    }

    #[must_use]
    pub fn coordinate_type0(&self) -> Option<&ClassRef> {
        self.coordinate_type0.as_ref()
    }

    #[must_use]
    pub fn coordinate_type1(&self) -> Option<&ClassRef> {
        self.coordinate_type1.as_ref()
    }

    #[must_use]
    pub fn access_modes(&self) -> AccessModes {
        self.access_modes
    }

    #[must_use]
    pub fn kind(&self) -> &VarHandleKind {
        &self.kind
    }

    #[must_use]
    pub fn is_access_mode_supported(&self, mode: AccessMode) -> bool {
        self.access_modes.supports(mode)
    }

    fn coordinates(&self) -> impl Iterator<Item = &ClassRef> {
        self.coordinate_type0
            .iter()
            .chain(self.coordinate_type1.iter())
    }

    /// Coordinates followed by the value operands of `template`.
    fn parameter_types(&self, template: AccessModeTemplate) -> Vec<ClassRef> {
        self.coordinates()
            .cloned()
            .chain(std::iter::repeat_n(
                self.var_type.clone(),
                template.value_operands(),
            ))
            .collect()
    }

    fn return_type(&self, rt: &Runtime, template: AccessModeTemplate) -> ClassRef {
        match template {
            AccessModeTemplate::Set => rt.primitive_class(Primitive::Void),
            AccessModeTemplate::CompareAndSet => rt.primitive_class(Primitive::Boolean),
            _ => self.var_type.clone(),
        }
    }

    /// Exact signature of the accessor for `mode`, without the handle itself.
    #[must_use]
    pub fn method_type_for_access_mode(&self, rt: &Runtime, mode: AccessMode) -> Arc<MethodType> {
        let template = mode.template();
        rt.method_type(
            &self.return_type(rt, template),
            &self.parameter_types(template),
        )
    }

    /// Whether a call of `method_type` can reach the accessor for `mode`
    /// through conversions. A void result is always acceptable.
    #[must_use]
    pub fn is_method_type_compatible(
        &self,
        rt: &Runtime,
        mode: AccessMode,
        method_type: &MethodType,
    ) -> bool {
        let template = mode.template();
        let mt_rtype = method_type.rtype();
        if mt_rtype.primitive() != Primitive::Void {
            let vh_rtype = self.return_type(rt, template);
            if !Arc::ptr_eq(&vh_rtype, mt_rtype) && !is_return_convertible(rt, &vh_rtype, mt_rtype)
            {
                return false;
            }
        }
        self.parameters_compatible(rt, template, method_type.ptypes())
    }

    /// Same as [`VarHandle::is_method_type_compatible`] for an invoker whose
    /// first parameter is the handle.
    #[must_use]
    pub fn is_invoker_method_type_compatible(
        &self,
        rt: &Runtime,
        mode: AccessMode,
        method_type: &MethodType,
    ) -> bool {
        let template = mode.template();
        let vh_rtype = self.return_type(rt, template);
        if !is_return_convertible(rt, &vh_rtype, method_type.rtype()) {
            return false;
        }
        match method_type.ptypes().split_first() {
            Some((_, ptypes)) => self.parameters_compatible(rt, template, ptypes),
            None => false,
        }
    }

    fn parameters_compatible(
        &self,
        rt: &Runtime,
        template: AccessModeTemplate,
        ptypes: &[ClassRef],
    ) -> bool {
        let vh_ptypes = self.parameter_types(template);
        vh_ptypes.len() == ptypes.len()
            && vh_ptypes
                .iter()
                .zip(ptypes)
                .all(|(vh, mt)| is_parameter_convertible(rt, mt, vh))
    }

    /// Performs `mode` with coordinates and values read through `operands`,
    /// already typed exactly as the accessor expects.
    pub fn access(
        &self,
        rt: &Runtime,
        mode: AccessMode,
        frame: &Frame,
        operands: &dyn Operands,
    ) -> InvokeResult<Value> {
        let mut getter = FrameGetter::new(frame, operands);
        let kind = self.var_type.primitive();

        match &self.kind {
            VarHandleKind::Field(field) if field.is_static() => {
                let class = field.declaring_class();
                rt.linker().ensure_initialized(rt, class)?;
                let location = Location {
                    storage: class.statics(),
                    offset: field.offset(),
                    kind,
                    byte_swap: false,
                    holder: FieldHolder::Class(class.clone()),
                };
                accessor::access(rt, mode, &location, &mut getter)
            }
            VarHandleKind::Field(field) => {
                let object = getter.get_reference().ok_or_else(null_coordinate)?;
                let heap_object = rt.object(object)?;
                if !field.declaring_class().is_assignable_from(&heap_object.class) {
                    return Err(InvokeError::class_cast(
                        &heap_object.class,
                        field.declaring_class(),
                    ));
                }
                let storage = heap_object.fields().ok_or_else(|| {
                    InvokeError::class_cast(&heap_object.class, field.declaring_class())
                })?;
                let location = Location {
                    storage,
                    offset: field.offset(),
                    kind,
                    byte_swap: false,
                    holder: FieldHolder::Object(object),
                };
                accessor::access(rt, mode, &location, &mut getter)
            }
            VarHandleKind::ArrayElement => {
                let array_ref = getter.get_reference().ok_or_else(null_coordinate)?;
                let index = getter.get() as i32;
                let heap_object = rt.object(array_ref)?;
                let array = self.array_of(&heap_object, kind)?;
                let index = check_array_index(index, array.length)?;
                if kind.is_reference() {
                    self.check_array_store(rt, mode, &heap_object.class, frame, operands)?;
                }
                let location = Location {
                    storage: &array.data,
                    offset: array.element_offset(index),
                    kind,
                    byte_swap: false,
                    holder: FieldHolder::Object(array_ref),
                };
                accessor::access(rt, mode, &location, &mut getter)
            }
            VarHandleKind::ByteArrayView { native_byte_order } => {
                let array_ref = getter.get_reference().ok_or_else(null_coordinate)?;
                let byte_index = getter.get() as i32;
                let heap_object = rt.object(array_ref)?;
                let array = self.array_of(&heap_object, Primitive::Byte)?;
                let index = check_element_index(kind, byte_index, 0, array.length)?;
                let location = Location {
                    storage: &array.data,
                    offset: index,
                    kind,
                    byte_swap: !native_byte_order,
                    holder: FieldHolder::Object(array_ref),
                };
                view_access(rt, mode, &location, &mut getter)
            }
            VarHandleKind::ByteBufferView { native_byte_order } => {
                let buffer_ref = getter.get_reference().ok_or_else(null_coordinate)?;
                let byte_index = getter.get() as i32;
                let heap_object = rt.object(buffer_ref)?;
                let buffer = heap_object
                    .as_byte_buffer()
                    .ok_or_else(|| self.not_a(&heap_object.class))?;
                if buffer.read_only && !mode.is_read_only() {
                    return Err(InvokeError::ReadOnlyBuffer);
                }
                let index = check_element_index(kind, byte_index, buffer.offset(), buffer.limit)?;

                let backing;
                let storage: &RawStorage = match &buffer.storage {
                    BufferStorage::Heap { array, .. } => {
                        backing = rt.object(*array)?;
                        &self.array_of(&backing, Primitive::Byte)?.data
                    }
                    BufferStorage::Direct(storage) => storage,
                };
                if !storage.contains(index, kind.component_size()) {
                    return Err(InvokeError::illegal_state(
                        "buffer limit exceeds its storage",
                    ));
                }
                let location = Location {
                    storage,
                    offset: index,
                    kind,
                    byte_swap: !native_byte_order,
                    holder: FieldHolder::Object(buffer_ref),
                };
                view_access(rt, mode, &location, &mut getter)
            }
        }
    }

    /// Array body of `object` if its elements are `component`.
    fn array_of<'o>(
        &self,
        object: &'o HeapObject,
        component: Primitive,
    ) -> InvokeResult<&'o ArrayData> {
        object
            .as_array()
            .filter(|array| array.component == component)
            .ok_or_else(|| self.not_a(&object.class))
    }

    fn not_a(&self, class: &ClassRef) -> InvokeError {
        match &self.coordinate_type0 {
            Some(expected) => InvokeError::class_cast(class, expected),
            None => InvokeError::illegal_state("static field has no coordinates"),
        }
    }

    /// Arrays are covariant: a reference stored through a handle typed for a
    /// supertype array must still fit the actual array.
    fn check_array_store(
        &self,
        rt: &Runtime,
        mode: AccessMode,
        array_class: &ClassRef,
        frame: &Frame,
        operands: &dyn Operands,
    ) -> InvokeResult<()> {
        let stored = match mode.template() {
            AccessModeTemplate::Get => return Ok(()),
            AccessModeTemplate::Set | AccessModeTemplate::GetAndUpdate => 2,
            AccessModeTemplate::CompareAndSet | AccessModeTemplate::CompareAndExchange => 3,
        };
        let Some(component) = array_class.component_type() else {
            return Ok(());
        };
        if let Some(value) = frame.get_reference(operands.operand(stored)) {
            let class = rt.class_of(value)?;
            if !component.is_assignable_from(&class) {
                return Err(InvokeError::class_cast(&class, component));
            }
        }
        Ok(())
    }
}

fn view_access(
    rt: &Runtime,
    mode: AccessMode,
    location: &Location<'_>,
    getter: &mut FrameGetter<'_>,
) -> InvokeResult<Value> {
    if RawStorage::is_aligned(location.offset, location.kind.component_size()) {
        accessor::access(rt, mode, location, getter)
    } else {
        accessor::access_unaligned(mode, location, getter)
    }
}

/// Converts the operands of a call of type `callsite` into a fresh frame
/// typed for the accessor of `mode`, performs the access and converts the
/// result back. `operands` hold the coordinates first.
pub(crate) fn access_with_conversions(
    rt: &Runtime,
    handle: &VarHandle,
    mode: AccessMode,
    frame: &Frame,
    callsite: &MethodType,
    operands: &dyn Operands,
) -> InvokeResult<Value> {
    let accessor_type = handle.method_type_for_access_mode(rt, mode);
    let num_vregs = accessor_type.number_of_vregs();
    let mut accessor_frame = Frame::new(num_vregs);
    {
        let mut getter = FrameGetter::new(frame, operands);
        let mut setter = FrameSetter::new(&mut accessor_frame, 0);
        perform_conversions(rt, callsite, &accessor_type, &mut getter, &mut setter)?;
    }
    let result = handle.access(
        rt,
        mode,
        &accessor_frame,
        &RangeOperands::new(0, num_vregs),
    )?;
    convert_return_value(rt, callsite, &accessor_type, result)
}

/// Entry point for a var handle accessor call. Operand 0 holds the handle;
/// `callsite` describes the remaining operands.
pub fn access_variable(
    rt: &Runtime,
    frame: &Frame,
    mode: AccessMode,
    callsite: &MethodType,
    operands: &dyn Operands,
) -> InvokeResult<Value> {
    let handle_ref = frame
        .get_reference(operands.operand(0))
        .ok_or_else(|| InvokeError::null_pointer("Attempt to invoke a VarHandle on a null reference"))?;
    let object = rt.object(handle_ref)?;
    let handle = object.as_var_handle().cloned().ok_or_else(|| {
        InvokeError::class_cast(&object.class, &rt.specials().var_handle)
    })?;

    if !handle.is_access_mode_supported(mode) {
        log::warn!("{mode} is not supported by {}", handle.var_type.pretty_name());
        return Err(InvokeError::illegal_state(format!(
            "{mode} is not supported"
        )));
    }
    if !handle.is_method_type_compatible(rt, mode, callsite) {
        return Err(InvokeError::wrong_method_type(
            &handle.method_type_for_access_mode(rt, mode),
            callsite,
        ));
    }

    let without_handle = NoReceiverOperands::new(operands);
    access_with_conversions(rt, &handle, mode, frame, callsite, &without_handle)
}
