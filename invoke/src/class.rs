use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, ThreadId},
};

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};

use crate::{
    CallContext, InvokeError, InvokeResult, MethodType, Primitive, RawStorage, Runtime, Value,
};

pub type ClassRef = Arc<Class>;
pub type FieldRef = Arc<Field>;
pub type MethodRef = Arc<Method>;

/// Body of a method that the native interpreter can execute.
pub type MethodFunction = fn(&mut CallContext<'_>) -> InvokeResult<Value>;

/// Runs once per class before its statics are first touched.
pub type StaticInitializer = fn(&Runtime, &ClassRef) -> InvokeResult<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClassFlags: u32 {
        const INTERFACE = 1 << 0;
        const ABSTRACT = 1 << 1;
        const FINAL = 1 << 2;
        /// the immutable text class whose constructors are replaced by factories
        const STRING = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FieldFlags: u32 {
        const STATIC = 1 << 0;
        const VOLATILE = 1 << 1;
        const FINAL = 1 << 2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodFlags: u32 {
        const STATIC = 1 << 0;
        const PRIVATE = 1 << 1;
        const CONSTRUCTOR = 1 << 2;
        const ABSTRACT = 1 << 3;
        const NATIVE = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    Uninitialized,
    Initializing(ThreadId),
    Initialized,
    Failed,
}

#[derive(Debug)]
struct ClassInit {
    state: Mutex<InitState>,
    done: Condvar,
    initialized: AtomicBool,
}

/// Runtime class metadata.
///
/// Classes never own their methods or fields: vtables and member tables live
/// in the [`crate::ClassRegistry`], members point back to their class.
pub struct Class {
    id: ClassId,
    descriptor: Box<str>,
    primitive: Primitive,
    flags: ClassFlags,
    super_class: Option<ClassRef>,
    interfaces: Box<[ClassRef]>,
    component_type: Option<ClassRef>,
    instance_size: usize,
    statics: RawStorage,
    initializer: Option<StaticInitializer>,
    init: ClassInit,
}

pub(crate) struct ClassParts {
    pub id: ClassId,
    pub descriptor: Box<str>,
    pub primitive: Primitive,
    pub flags: ClassFlags,
    pub super_class: Option<ClassRef>,
    pub interfaces: Box<[ClassRef]>,
    pub component_type: Option<ClassRef>,
    pub instance_size: usize,
    pub static_size: usize,
    pub initializer: Option<StaticInitializer>,
}

impl Class {
    pub(crate) fn from_parts(parts: ClassParts) -> Self {
        // primitive and array classes have nothing to run
        let trivially_initialized = (parts.initializer.is_none() && parts.super_class.is_none())
            || parts.primitive.is_primitive()
            || parts.component_type.is_some();
        let state = if trivially_initialized {
            InitState::Initialized
        } else {
            InitState::Uninitialized
        };

        Self {
            id: parts.id,
            descriptor: parts.descriptor,
            primitive: parts.primitive,
            flags: parts.flags,
            super_class: parts.super_class,
            interfaces: parts.interfaces,
            component_type: parts.component_type,
            instance_size: parts.instance_size,
            statics: RawStorage::new(parts.static_size),
            initializer: parts.initializer,
            init: ClassInit {
                state: Mutex::new(state),
                done: Condvar::new(),
                initialized: AtomicBool::new(trivially_initialized),
            },
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ClassId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    #[inline]
    #[must_use]
    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    #[must_use]
    pub fn flags(&self) -> ClassFlags {
        self.flags
    }

    #[must_use]
    pub fn super_class(&self) -> Option<&ClassRef> {
        self.super_class.as_ref()
    }

    #[must_use]
    pub fn interfaces(&self) -> &[ClassRef] {
        &self.interfaces
    }

    #[must_use]
    pub fn component_type(&self) -> Option<&ClassRef> {
        self.component_type.as_ref()
    }

    #[must_use]
    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    /// Storage of the static fields.
    #[must_use]
    pub fn statics(&self) -> &RawStorage {
        &self.statics
    }

    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(ClassFlags::INTERFACE)
    }

    #[must_use]
    pub fn is_string_class(&self) -> bool {
        self.flags.contains(ClassFlags::STRING)
    }

    #[must_use]
    pub fn is_array_class(&self) -> bool {
        self.component_type.is_some()
    }

    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.primitive.is_primitive()
    }

    #[must_use]
    pub fn is_object_class(&self) -> bool {
        self.descriptor_equals("Ljava/lang/Object;")
    }

    #[inline]
    #[must_use]
    pub fn descriptor_equals(&self, descriptor: &str) -> bool {
        &*self.descriptor == descriptor
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.init.initialized.load(Ordering::Acquire)
    }

    /// Human readable name, `int`, `java.lang.String` or `int[]`.
    #[must_use]
    pub fn pretty_name(&self) -> String {
        pretty_descriptor(&self.descriptor)
    }

    /// Walks the superclass chain only; interfaces are not considered.
    #[must_use]
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if std::ptr::eq(class, other) {
                return true;
            }
            current = class.super_class.as_deref();
        }
        false
    }

    #[must_use]
    pub fn implements(&self, interface: &Class) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if class
                .interfaces
                .iter()
                .any(|i| std::ptr::eq(&**i, interface) || i.implements(interface))
            {
                return true;
            }
            current = class.super_class.as_deref();
        }
        false
    }

    /// Whether a value whose class is `other` may be stored where `self` is
    /// expected.
    #[must_use]
    pub fn is_assignable_from(&self, other: &Class) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if self.is_primitive() || other.is_primitive() {
            return false;
        }
        if self.is_object_class() {
            return true;
        }
        if self.is_interface() {
            return other.implements(self);
        }
        match (&self.component_type, &other.component_type) {
            (Some(to), Some(from)) => to.is_assignable_from(from),
            (Some(_), None) => false,
            _ => other.is_subclass_of(self),
        }
    }
}

impl std::fmt::Debug for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Runs the static initializer of `class` once, after its superclass.
///
/// A thread that re-enters while it is itself initializing the class sees it
/// as initialized; other threads block until the initializer finishes.
pub fn ensure_initialized(rt: &Runtime, class: &ClassRef) -> InvokeResult<()> {
    if class.is_initialized() {
        return Ok(());
    }

    let current = thread::current().id();
    {
        let mut state = class.init.state.lock();
        loop {
            match *state {
                InitState::Initialized => return Ok(()),
                InitState::Failed => {
                    return Err(InvokeError::ClassInitialization(class.pretty_name()));
                }
                InitState::Initializing(owner) if owner == current => return Ok(()),
                InitState::Initializing(_) => class.init.done.wait(&mut state),
                InitState::Uninitialized => {
                    *state = InitState::Initializing(current);
                    break;
                }
            }
        }
    }

    log::debug!("initializing {}", class.pretty_name());
    let result = match class.super_class() {
        Some(super_class) => ensure_initialized(rt, super_class),
        None => Ok(()),
    }
    .and_then(|()| match class.initializer {
        Some(initializer) => initializer(rt, class),
        None => Ok(()),
    });

    let mut state = class.init.state.lock();
    match result {
        Ok(()) => {
            *state = InitState::Initialized;
            class.init.initialized.store(true, Ordering::Release);
        }
        Err(ref error) => {
            log::debug!("initializer of {} failed: {error}", class.pretty_name());
            *state = InitState::Failed;
        }
    }
    class.init.done.notify_all();
    result.map_err(|_| InvokeError::ClassInitialization(class.pretty_name()))
}

fn pretty_descriptor(descriptor: &str) -> String {
    let dims = descriptor.bytes().take_while(|&b| b == b'[').count();
    let element = &descriptor[dims..];
    let mut name = match element.as_bytes().first() {
        Some(b'L') => element
            .trim_start_matches('L')
            .trim_end_matches(';')
            .replace('/', "."),
        Some(&c) => match Primitive::from_descriptor(c) {
            Some(kind) if kind.is_primitive() => kind.pretty_name().to_string(),
            _ => element.to_string(),
        },
        None => String::new(),
    };
    for _ in 0..dims {
        name.push_str("[]");
    }
    name
}

pub struct Field {
    name: Box<str>,
    declaring_class: ClassRef,
    field_type: ClassRef,
    offset: usize,
    flags: FieldFlags,
}

impl Field {
    pub(crate) fn new(
        name: &str,
        declaring_class: ClassRef,
        field_type: ClassRef,
        offset: usize,
        flags: FieldFlags,
    ) -> Self {
        Self {
            name: name.into(),
            declaring_class,
            field_type,
            offset,
            flags,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn declaring_class(&self) -> &ClassRef {
        &self.declaring_class
    }

    #[must_use]
    pub fn field_type(&self) -> &ClassRef {
        &self.field_type
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> Primitive {
        self.field_type.primitive()
    }

    /// Byte offset into the instance storage, or into the class statics.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }

    #[must_use]
    pub fn is_volatile(&self) -> bool {
        self.flags.contains(FieldFlags::VOLATILE)
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.flags.contains(FieldFlags::FINAL)
    }

    /// Ordering used by plain field reads and writes through handles.
    #[must_use]
    pub fn ordering(&self) -> Ordering {
        if self.is_volatile() {
            Ordering::SeqCst
        } else {
            Ordering::Relaxed
        }
    }

    #[must_use]
    pub fn pretty_name(&self) -> String {
        format!(
            "{} {}.{}",
            self.field_type.pretty_name(),
            self.declaring_class.pretty_name(),
            self.name
        )
    }
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Field({})", self.pretty_name())
    }
}

/// Register layout of a method with bytecode. Arguments occupy the last
/// `ins_size` registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeItem {
    pub registers_size: usize,
    pub ins_size: usize,
}

pub struct Method {
    name: Box<str>,
    declaring_class: ClassRef,
    method_type: Arc<MethodType>,
    flags: MethodFlags,
    vtable_index: Option<usize>,
    code_item: Option<CodeItem>,
    entry: Option<MethodFunction>,
}

pub(crate) struct MethodParts {
    pub name: Box<str>,
    pub declaring_class: ClassRef,
    pub method_type: Arc<MethodType>,
    pub flags: MethodFlags,
    pub vtable_index: Option<usize>,
    pub code_item: Option<CodeItem>,
    pub entry: Option<MethodFunction>,
}

impl Method {
    pub(crate) fn from_parts(parts: MethodParts) -> Self {
        Self {
            name: parts.name,
            declaring_class: parts.declaring_class,
            method_type: parts.method_type,
            flags: parts.flags,
            vtable_index: parts.vtable_index,
            code_item: parts.code_item,
            entry: parts.entry,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn declaring_class(&self) -> &ClassRef {
        &self.declaring_class
    }

    /// Signature without the receiver.
    #[must_use]
    pub fn method_type(&self) -> &Arc<MethodType> {
        &self.method_type
    }

    #[must_use]
    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    #[must_use]
    pub fn vtable_index(&self) -> Option<usize> {
        self.vtable_index
    }

    #[must_use]
    pub fn entry(&self) -> Option<MethodFunction> {
        self.entry
    }

    #[must_use]
    pub fn code_item(&self) -> Option<CodeItem> {
        self.code_item
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.flags.contains(MethodFlags::CONSTRUCTOR)
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodFlags::ABSTRACT)
    }

    #[must_use]
    pub fn is_virtual(&self) -> bool {
        !self
            .flags
            .intersects(MethodFlags::STATIC | MethodFlags::PRIVATE | MethodFlags::CONSTRUCTOR)
    }

    /// Argument slots including the receiver.
    #[must_use]
    pub fn number_of_ins(&self) -> usize {
        self.method_type.number_of_vregs() + usize::from(!self.is_static())
    }

    /// `(registers, first argument register)` of a fresh frame for this
    /// method. Methods without bytecode get exactly their ins.
    #[must_use]
    pub fn frame_layout(&self) -> (usize, usize) {
        match self.code_item {
            Some(code) => (code.registers_size, code.registers_size - code.ins_size),
            None => (self.number_of_ins(), 0),
        }
    }

    /// Same name and exactly matching signature.
    #[must_use]
    pub fn has_same_signature(&self, other: &Method) -> bool {
        self.name == other.name && self.method_type.is_exact_match(&other.method_type)
    }

    #[must_use]
    pub fn pretty_name(&self) -> String {
        format!(
            "{}.{}{}",
            self.declaring_class.pretty_name(),
            self.name,
            self.method_type
        )
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Method({})", self.pretty_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_descriptors() {
        assert_eq!(pretty_descriptor("I"), "int");
        assert_eq!(pretty_descriptor("Ljava/lang/String;"), "java.lang.String");
        assert_eq!(pretty_descriptor("[[J"), "long[][]");
        assert_eq!(pretty_descriptor("[Ljava/lang/Object;"), "java.lang.Object[]");
    }
}
