use std::sync::{Arc, atomic::Ordering};

use parking_lot::Mutex;

use crate::{
    ArrayData, BOXED_VALUE_OFFSET, ByteBuffer, ClassLinker, ClassRef, ClassRegistry,
    EmulatedStackFrame, Field, FieldHolder, Heap, HeapCreateInfo, HeapObject, Interpreter,
    InvokeError, InvokeResult, MethodHandle, MethodType, MethodTypeTable, NativeInterpreter,
    NoBarrier, ObjectBody, ObjectRef, Primitive, RawStorage, ReferenceBarrier, SpecialClasses,
    Value, VarHandle,
};

#[derive(Default)]
pub struct RuntimeCreateInfo {
    pub heap: HeapCreateInfo,
    /// defaults to [`NativeInterpreter`]
    pub interpreter: Option<Arc<dyn Interpreter>>,
    /// defaults to [`NoBarrier`]
    pub barrier: Option<Arc<dyn ReferenceBarrier>>,
}

pub struct RuntimeShared {
    pub heap: Heap,
    pub classes: ClassRegistry,
    pub specials: SpecialClasses,
    pub method_types: MethodTypeTable,
    pub interpreter: Arc<dyn Interpreter>,
    pub barrier: Arc<dyn ReferenceBarrier>,
}

/// Handle to everything an invocation needs. Cloning is cheap and clones
/// may move freely between threads.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeShared>,
}

impl Runtime {
    #[must_use]
    pub fn new(info: RuntimeCreateInfo) -> Self {
        let heap = Heap::new(info.heap);
        let classes = ClassRegistry::new();
        let specials = SpecialClasses::bootstrap(&classes);
        log::debug!("bootstrapped runtime classes");

        let inner = RuntimeShared {
            heap,
            classes,
            specials,
            method_types: MethodTypeTable::new(),
            interpreter: info
                .interpreter
                .unwrap_or_else(|| Arc::new(NativeInterpreter)),
            barrier: info.barrier.unwrap_or_else(|| Arc::new(NoBarrier)),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    #[inline]
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.inner.heap
    }

    #[inline]
    #[must_use]
    pub fn classes(&self) -> &ClassRegistry {
        &self.inner.classes
    }

    #[inline]
    #[must_use]
    pub fn linker(&self) -> &dyn ClassLinker {
        &self.inner.classes
    }

    #[inline]
    #[must_use]
    pub fn specials(&self) -> &SpecialClasses {
        &self.inner.specials
    }

    #[must_use]
    pub fn method_types(&self) -> &MethodTypeTable {
        &self.inner.method_types
    }

    #[must_use]
    pub fn interpreter(&self) -> &dyn Interpreter {
        &*self.inner.interpreter
    }

    #[must_use]
    pub fn barrier(&self) -> &dyn ReferenceBarrier {
        &*self.inner.barrier
    }

    #[must_use]
    pub fn primitive_class(&self, kind: Primitive) -> ClassRef {
        self.specials().primitive(kind).clone()
    }

    pub fn find_class(&self, descriptor: &str) -> InvokeResult<ClassRef> {
        self.linker().find_class(descriptor)
    }

    /// Interned signature built from resolved classes.
    #[must_use]
    pub fn method_type(&self, rtype: &ClassRef, ptypes: &[ClassRef]) -> Arc<MethodType> {
        self.method_types()
            .intern(MethodType::new(rtype.clone(), ptypes.to_vec()))
    }

    pub fn method_type_from_descriptor(&self, descriptor: &str) -> InvokeResult<Arc<MethodType>> {
        self.method_types()
            .from_descriptor(self.linker(), descriptor)
    }

    pub fn object(&self, reference: ObjectRef) -> InvokeResult<Arc<HeapObject>> {
        self.heap().get(reference)
    }

    pub fn class_of(&self, reference: ObjectRef) -> InvokeResult<ClassRef> {
        Ok(self.object(reference)?.class.clone())
    }

    pub fn is_instance_of(&self, reference: ObjectRef, class: &ClassRef) -> InvokeResult<bool> {
        Ok(self
            .linker()
            .is_assignable_from(class, &*self.class_of(reference)?))
    }

    pub fn new_object(&self, class: &ClassRef) -> InvokeResult<ObjectRef> {
        if class.is_interface() || class.is_primitive() || class.is_array_class() {
            return Err(InvokeError::illegal_state(format!(
                "cannot instantiate {}",
                class.pretty_name()
            )));
        }
        self.heap().allocate(
            class.clone(),
            ObjectBody::Instance(RawStorage::new(class.instance_size())),
        )
    }

    /// Zeroed array whose element class is `component`.
    pub fn new_array(&self, component: &ClassRef, length: usize) -> InvokeResult<ObjectRef> {
        let kind = component.primitive();
        let size = length.checked_mul(kind.component_size()).ok_or_else(|| {
            InvokeError::illegal_state(format!("array of {length} {kind} elements is too large"))
        })?;
        let class = self.linker().array_class_of(component);
        self.heap().allocate(
            class,
            ObjectBody::Array(ArrayData {
                component: kind,
                length,
                data: RawStorage::new(size),
            }),
        )
    }

    pub fn new_byte_array(&self, bytes: &[u8]) -> InvokeResult<ObjectRef> {
        let component = self.primitive_class(Primitive::Byte);
        let class = self.linker().array_class_of(&component);
        self.heap().allocate(
            class,
            ObjectBody::Array(ArrayData {
                component: Primitive::Byte,
                length: bytes.len(),
                data: RawStorage::from_bytes(bytes),
            }),
        )
    }

    pub fn new_string(&self, text: &str) -> InvokeResult<ObjectRef> {
        self.heap().allocate(
            self.specials().string.clone(),
            ObjectBody::String(text.into()),
        )
    }

    #[must_use]
    pub fn string_value(&self, reference: ObjectRef) -> Option<String> {
        self.object(reference).ok()?.as_str().map(str::to_string)
    }

    pub fn new_method_handle(&self, handle: MethodHandle) -> InvokeResult<ObjectRef> {
        self.heap().allocate(
            self.specials().method_handle.clone(),
            ObjectBody::MethodHandle(Arc::new(handle)),
        )
    }

    #[must_use]
    pub fn method_handle(&self, reference: ObjectRef) -> Option<Arc<MethodHandle>> {
        self.object(reference).ok()?.as_method_handle().cloned()
    }

    pub fn new_var_handle(&self, handle: VarHandle) -> InvokeResult<ObjectRef> {
        self.heap().allocate(
            self.specials().var_handle.clone(),
            ObjectBody::VarHandle(Arc::new(handle)),
        )
    }

    #[must_use]
    pub fn var_handle(&self, reference: ObjectRef) -> Option<Arc<VarHandle>> {
        self.object(reference).ok()?.as_var_handle().cloned()
    }

    pub fn new_stack_frame(&self, frame: EmulatedStackFrame) -> InvokeResult<ObjectRef> {
        self.heap().allocate(
            self.specials().emulated_stack_frame.clone(),
            ObjectBody::StackFrame(Mutex::new(frame)),
        )
    }

    pub fn new_byte_buffer(&self, buffer: ByteBuffer) -> InvokeResult<ObjectRef> {
        self.heap().allocate(
            self.specials().byte_buffer.clone(),
            ObjectBody::ByteBuffer(buffer),
        )
    }

    /// Wraps a primitive in its box.
    pub fn box_primitive(&self, kind: Primitive, value: Value) -> InvokeResult<ObjectRef> {
        let class = self.specials().boxed(kind).ok_or_else(|| {
            InvokeError::illegal_state(format!("{kind} has no box"))
        })?;
        let reference = self.new_object(class)?;
        let object = self.object(reference)?;
        if let Some(fields) = object.fields() {
            fields.write_value(kind, BOXED_VALUE_OFFSET, value, Ordering::Relaxed)?;
        }
        Ok(reference)
    }

    /// Kind and value wrapped by a box; `None` for anything else.
    #[must_use]
    pub fn unbox(&self, reference: ObjectRef) -> Option<(Primitive, Value)> {
        let object = self.object(reference).ok()?;
        let kind = self.specials().unboxed_kind(&object.class)?;
        let value = object
            .fields()?
            .read_value(kind, BOXED_VALUE_OFFSET, Ordering::Relaxed)
            .ok()?;
        Some((kind, value))
    }

    fn with_field_storage<R>(
        &self,
        object: Option<ObjectRef>,
        field: &Field,
        f: impl FnOnce(&RawStorage, FieldHolder) -> InvokeResult<R>,
    ) -> InvokeResult<R> {
        if field.is_static() {
            let class = field.declaring_class();
            return f(class.statics(), FieldHolder::Class(class.clone()));
        }
        let reference = object.ok_or_else(|| {
            InvokeError::null_pointer(format!("read of field {} on null", field.name()))
        })?;
        let heap_object = self.object(reference)?;
        let storage = heap_object.fields().ok_or_else(|| {
            InvokeError::class_cast(&heap_object.class, field.declaring_class())
        })?;
        f(storage, FieldHolder::Object(reference))
    }

    /// Reads a field with the ordering its declaration implies. `object` is
    /// ignored for statics.
    pub fn read_field(&self, object: Option<ObjectRef>, field: &Field) -> InvokeResult<Value> {
        self.with_field_storage(object, field, |storage, _| {
            storage.read_value(field.kind(), field.offset(), field.ordering())
        })
    }

    /// Writes a field, running the reference barrier first for reference
    /// fields.
    pub fn write_field(
        &self,
        object: Option<ObjectRef>,
        field: &Field,
        value: Value,
    ) -> InvokeResult<()> {
        self.with_field_storage(object, field, |storage, holder| {
            if field.kind().is_reference() {
                self.barrier().pre_write_barrier(&holder, field.offset());
            }
            storage.write_value(field.kind(), field.offset(), value, field.ordering())
        })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeCreateInfo::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxing_round_trips() {
        let rt = Runtime::default();
        let boxed = rt
            .box_primitive(Primitive::Double, Value::F64(-1.5))
            .expect("box");
        assert!(Arc::ptr_eq(
            &rt.class_of(boxed).expect("class"),
            rt.specials().boxed(Primitive::Double).expect("Double")
        ));
        assert_eq!(rt.unbox(boxed), Some((Primitive::Double, Value::F64(-1.5))));

        let text = rt.new_string("not a box").expect("string");
        assert_eq!(rt.unbox(text), None);
        assert_eq!(rt.string_value(text).as_deref(), Some("not a box"));
    }

    #[test]
    fn instance_checks_follow_the_hierarchy() {
        let rt = Runtime::default();
        let integer = rt
            .box_primitive(Primitive::Int, Value::I32(1))
            .expect("box");
        let is_a = |class: &ClassRef| rt.is_instance_of(integer, class).expect("instance check");
        assert!(is_a(&rt.specials().number));
        assert!(is_a(&rt.specials().object));
        assert!(!is_a(&rt.specials().string));
    }

    #[test]
    fn heap_limit_is_reported() {
        let rt = Runtime::new(RuntimeCreateInfo {
            heap: HeapCreateInfo {
                initial_objects: Some(1),
                max_objects: Some(1),
            },
            ..Default::default()
        });
        assert!(rt.new_string("first").is_ok());
        assert!(matches!(
            rt.new_string("second"),
            Err(InvokeError::IllegalState(_))
        ));
    }

    #[test]
    fn null_instance_field_access() {
        let rt = Runtime::default();
        let integer = rt.specials().boxed(Primitive::Int).expect("Integer");
        let field = rt.classes().find_field(integer, "value").expect("value");
        assert!(matches!(
            rt.read_field(None, &field),
            Err(InvokeError::NullPointer(_))
        ));
    }

    #[test]
    fn oversized_arrays_are_rejected() {
        let rt = Runtime::default();
        let long = rt.primitive_class(Primitive::Long);
        let before = rt.heap().object_count();
        assert!(matches!(
            rt.new_array(&long, usize::MAX / 4),
            Err(InvokeError::IllegalState(message)) if message.contains("too large")
        ));
        assert_eq!(rt.heap().object_count(), before);
        assert!(rt.new_array(&long, 2).is_ok());
    }

    #[test]
    fn unknown_references_are_errors() {
        let rt = Runtime::default();
        let stray = ObjectRef::from_raw(u32::MAX).expect("non-zero");
        assert!(matches!(rt.object(stray), Err(InvokeError::IllegalState(_))));
        assert!(rt.class_of(stray).is_err());
        assert!(rt.is_instance_of(stray, &rt.specials().object).is_err());
        assert_eq!(rt.string_value(stray), None);
        assert!(rt.method_handle(stray).is_none());
        assert!(rt.var_handle(stray).is_none());
        assert_eq!(rt.unbox(stray), None);

        let integer = rt.specials().boxed(Primitive::Int).expect("Integer");
        let field = rt.classes().find_field(integer, "value").expect("value");
        assert!(matches!(
            rt.write_field(Some(stray), &field, Value::I32(1)),
            Err(InvokeError::IllegalState(_))
        ));
    }
}
