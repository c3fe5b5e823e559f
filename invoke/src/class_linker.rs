use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::{
    Class, ClassFlags, ClassId, ClassParts, ClassRef, CodeItem, Field, FieldFlags, FieldRef,
    InvokeError, InvokeResult, Method, MethodFlags, MethodFunction, MethodParts, MethodRef,
    MethodType, Primitive, Runtime, StaticInitializer, ensure_initialized,
};

/// Class, field and method metadata the dispatch and access paths consult.
pub trait ClassLinker: Send + Sync {
    fn find_class(&self, descriptor: &str) -> InvokeResult<ClassRef>;

    fn array_class_of(&self, component: &ClassRef) -> ClassRef;

    fn is_assignable_from(&self, to: &Class, from: &Class) -> bool {
        to.is_assignable_from(from)
    }

    /// Implementation of `method` selected by the runtime class `class`.
    fn find_virtual_override(&self, class: &ClassRef, method: &MethodRef)
    -> InvokeResult<MethodRef>;

    /// Target of an invoke-super of `method` issued from `referrer`.
    fn super_method(&self, referrer: &ClassRef, method: &MethodRef) -> InvokeResult<MethodRef>;

    /// Static factory standing in for a constructor of the string class.
    fn string_factory_for(&self, constructor: &MethodRef) -> InvokeResult<MethodRef>;

    fn ensure_initialized(&self, rt: &Runtime, class: &ClassRef) -> InvokeResult<()> {
        ensure_initialized(rt, class)
    }
}

/// Description of a method handed to [`ClassRegistry::define_method`].
pub struct MethodDef<'a> {
    pub name: &'a str,
    pub method_type: Arc<MethodType>,
    pub flags: MethodFlags,
    pub code_item: Option<CodeItem>,
    pub entry: Option<MethodFunction>,
}

impl<'a> MethodDef<'a> {
    #[must_use]
    pub fn new(name: &'a str, method_type: Arc<MethodType>) -> Self {
        Self {
            name,
            method_type,
            flags: MethodFlags::empty(),
            code_item: None,
            entry: None,
        }
    }

    #[must_use]
    pub fn flags(mut self, flags: MethodFlags) -> Self {
        self.flags |= flags;
        self
    }

    #[must_use]
    pub fn code_item(mut self, registers_size: usize, ins_size: usize) -> Self {
        self.code_item = Some(CodeItem {
            registers_size,
            ins_size,
        });
        self
    }

    #[must_use]
    pub fn entry(mut self, entry: MethodFunction) -> Self {
        self.entry = Some(entry);
        self
    }
}

pub struct ClassRegistryImpl {
    classes: FxHashMap<Box<str>, ClassRef>,
    vtables: FxHashMap<ClassId, Vec<MethodRef>>,
    methods: FxHashMap<ClassId, Vec<MethodRef>>,
    fields: FxHashMap<ClassId, Vec<FieldRef>>,
    string_factories: Vec<(MethodRef, MethodRef)>,
}

/// In-memory [`ClassLinker`]: classes are defined programmatically and never
/// unloaded.
pub struct ClassRegistry {
    inner: RwLock<ClassRegistryImpl>,
    next_id: AtomicU32,
}

impl ClassRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ClassRegistryImpl {
                classes: FxHashMap::default(),
                vtables: FxHashMap::default(),
                methods: FxHashMap::default(),
                fields: FxHashMap::default(),
                string_factories: Vec::new(),
            }),
            next_id: AtomicU32::new(1),
        }
    }

    fn next_id(&self) -> ClassId {
        ClassId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers `class` with a copy of its superclass's vtable. A class
    /// already defined under the same descriptor wins.
    fn insert(&self, class: ClassRef) -> ClassRef {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.classes.get(class.descriptor()) {
            return existing.clone();
        }
        let vtable = class
            .super_class()
            .and_then(|super_class| inner.vtables.get(&super_class.id()).cloned())
            .unwrap_or_default();
        inner.vtables.insert(class.id(), vtable);
        inner
            .classes
            .insert(class.descriptor().into(), class.clone());
        class
    }

    pub fn define_primitive(&self, kind: Primitive) -> ClassRef {
        let descriptor = kind.descriptor().to_string();
        if let Some(found) = self.lookup(&descriptor) {
            return found;
        }
        self.insert(Arc::new(Class::from_parts(ClassParts {
            id: self.next_id(),
            descriptor: descriptor.into(),
            primitive: kind,
            flags: ClassFlags::FINAL | ClassFlags::ABSTRACT,
            super_class: None,
            interfaces: Box::new([]),
            component_type: None,
            instance_size: 0,
            static_size: 0,
            initializer: None,
        })))
    }

    #[must_use]
    pub fn builder(&self, descriptor: &str) -> ClassBuilder<'_> {
        ClassBuilder {
            registry: self,
            descriptor: descriptor.to_string(),
            flags: ClassFlags::empty(),
            super_class: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            initializer: None,
        }
    }

    #[must_use]
    pub fn lookup(&self, descriptor: &str) -> Option<ClassRef> {
        self.inner.read().classes.get(descriptor).cloned()
    }

    /// Adds a method to `class`. A virtual method with the name and exact
    /// signature of an inherited one takes over its vtable slot.
    pub fn define_method(&self, class: &ClassRef, def: MethodDef<'_>) -> MethodRef {
        let mut inner = self.inner.write();
        let virtual_method =
            !def.flags
                .intersects(MethodFlags::STATIC | MethodFlags::PRIVATE | MethodFlags::CONSTRUCTOR)
                && !class.is_interface();

        let vtable = inner.vtables.entry(class.id()).or_default();
        let vtable_index = virtual_method.then(|| {
            vtable
                .iter()
                .position(|m| {
                    m.name() == def.name && m.method_type().is_exact_match(&def.method_type)
                })
                .unwrap_or(vtable.len())
        });

        let method = Arc::new(Method::from_parts(MethodParts {
            name: def.name.into(),
            declaring_class: class.clone(),
            method_type: def.method_type,
            flags: def.flags,
            vtable_index,
            code_item: def.code_item,
            entry: def.entry,
        }));

        if let Some(index) = vtable_index {
            if index == vtable.len() {
                vtable.push(method.clone());
            } else {
                vtable[index] = method.clone();
            }
        }
        inner
            .methods
            .entry(class.id())
            .or_default()
            .push(method.clone());
        method
    }

    /// Registers the static factory used in place of a string constructor.
    pub fn register_string_factory(&self, constructor: &MethodRef, factory: &MethodRef) {
        self.inner
            .write()
            .string_factories
            .push((constructor.clone(), factory.clone()));
    }

    /// Method declared by `class` itself.
    #[must_use]
    pub fn find_method(&self, class: &Class, name: &str, method_type: &MethodType) -> Option<MethodRef> {
        self.inner
            .read()
            .methods
            .get(&class.id())?
            .iter()
            .find(|m| m.name() == name && m.method_type().is_exact_match(method_type))
            .cloned()
    }

    /// Field declared by `class` or one of its superclasses.
    #[must_use]
    pub fn find_field(&self, class: &Class, name: &str) -> Option<FieldRef> {
        let inner = self.inner.read();
        let mut current = Some(class);
        while let Some(class) = current {
            if let Some(field) = inner
                .fields
                .get(&class.id())
                .and_then(|fields| fields.iter().find(|f| f.name() == name))
            {
                return Some(field.clone());
            }
            current = class.super_class().map(|s| &**s);
        }
        None
    }

    #[must_use]
    pub fn vtable(&self, class: &Class) -> Vec<MethodRef> {
        self.inner
            .read()
            .vtables
            .get(&class.id())
            .cloned()
            .unwrap_or_default()
    }

    fn vtable_entry(&self, class: &Class, index: usize) -> Option<MethodRef> {
        self.inner.read().vtables.get(&class.id())?.get(index).cloned()
    }

    /// Searches `class` and its superclasses for a concrete method with the
    /// given name and signature.
    fn find_declared_in_hierarchy(&self, class: &Class, method: &Method) -> Option<MethodRef> {
        let inner = self.inner.read();
        let mut current = Some(class);
        while let Some(class) = current {
            let found = inner.methods.get(&class.id()).and_then(|methods| {
                methods
                    .iter()
                    .find(|m| !m.is_abstract() && !m.is_static() && m.has_same_signature(method))
            });
            if let Some(found) = found {
                return Some(found.clone());
            }
            current = class.super_class().map(|s| &**s);
        }
        None
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassLinker for ClassRegistry {
    fn find_class(&self, descriptor: &str) -> InvokeResult<ClassRef> {
        if let Some(found) = self.lookup(descriptor) {
            return Ok(found);
        }
        if let Some(component) = descriptor.strip_prefix('[') {
            let component = self.find_class(component)?;
            return Ok(self.array_class_of(&component));
        }
        Err(InvokeError::ClassNotFound(descriptor.to_string()))
    }

    fn array_class_of(&self, component: &ClassRef) -> ClassRef {
        let descriptor = format!("[{}", component.descriptor());
        if let Some(found) = self.lookup(&descriptor) {
            return found;
        }
        let object = self.lookup("Ljava/lang/Object;");
        self.insert(Arc::new(Class::from_parts(ClassParts {
            id: self.next_id(),
            descriptor: descriptor.into(),
            primitive: Primitive::Not,
            flags: ClassFlags::FINAL,
            super_class: object,
            interfaces: Box::new([]),
            component_type: Some(component.clone()),
            instance_size: 0,
            static_size: 0,
            initializer: None,
        })))
    }

    fn find_virtual_override(
        &self,
        class: &ClassRef,
        method: &MethodRef,
    ) -> InvokeResult<MethodRef> {
        let found = match method.vtable_index() {
            Some(index) if !method.declaring_class().is_interface() => {
                self.vtable_entry(class, index)
            }
            _ => self.find_declared_in_hierarchy(class, method),
        };
        match found {
            Some(found) if !found.is_abstract() => Ok(found),
            _ => Err(InvokeError::NoSuchMethod(format!(
                "{} has no implementation of {}",
                class.pretty_name(),
                method.pretty_name()
            ))),
        }
    }

    fn super_method(&self, referrer: &ClassRef, method: &MethodRef) -> InvokeResult<MethodRef> {
        let no_such_method = || {
            InvokeError::NoSuchMethod(format!(
                "no super implementation of {} from {}",
                method.pretty_name(),
                referrer.pretty_name()
            ))
        };
        let super_class = referrer.super_class().ok_or_else(no_such_method)?;
        let index = method.vtable_index().ok_or_else(no_such_method)?;
        self.vtable_entry(super_class, index)
            .filter(|m| !m.is_abstract())
            .ok_or_else(no_such_method)
    }

    fn string_factory_for(&self, constructor: &MethodRef) -> InvokeResult<MethodRef> {
        self.inner
            .read()
            .string_factories
            .iter()
            .find(|(ctor, _)| Arc::ptr_eq(ctor, constructor))
            .map(|(_, factory)| factory.clone())
            .ok_or_else(|| {
                InvokeError::NoSuchMethod(format!(
                    "no string factory for {}",
                    constructor.pretty_name()
                ))
            })
    }
}

pub struct ClassBuilder<'a> {
    registry: &'a ClassRegistry,
    descriptor: String,
    flags: ClassFlags,
    super_class: Option<ClassRef>,
    interfaces: Vec<ClassRef>,
    fields: Vec<(String, ClassRef, FieldFlags)>,
    initializer: Option<StaticInitializer>,
}

impl ClassBuilder<'_> {
    #[must_use]
    pub fn super_class(mut self, super_class: &ClassRef) -> Self {
        self.super_class = Some(super_class.clone());
        self
    }

    #[must_use]
    pub fn interface(mut self, interface: &ClassRef) -> Self {
        self.interfaces.push(interface.clone());
        self
    }

    #[must_use]
    pub fn flags(mut self, flags: ClassFlags) -> Self {
        self.flags |= flags;
        self
    }

    #[must_use]
    pub fn field(mut self, name: &str, field_type: &ClassRef) -> Self {
        self.fields
            .push((name.to_string(), field_type.clone(), FieldFlags::empty()));
        self
    }

    #[must_use]
    pub fn field_with(mut self, name: &str, field_type: &ClassRef, flags: FieldFlags) -> Self {
        self.fields.push((name.to_string(), field_type.clone(), flags));
        self
    }

    #[must_use]
    pub fn static_field(self, name: &str, field_type: &ClassRef) -> Self {
        self.field_with(name, field_type, FieldFlags::STATIC)
    }

    #[must_use]
    pub fn initializer(mut self, initializer: StaticInitializer) -> Self {
        self.initializer = Some(initializer);
        self
    }

    /// Lays out instance fields after the superclass's, statics from zero,
    /// each aligned to its own size.
    pub fn build(self) -> ClassRef {
        let mut instance_size = self
            .super_class
            .as_ref()
            .map_or(0, |super_class| super_class.instance_size());
        let mut static_size = 0;

        let mut offsets = Vec::with_capacity(self.fields.len());
        for (_, field_type, flags) in &self.fields {
            let size = field_type.primitive().component_size();
            let cursor = if flags.contains(FieldFlags::STATIC) {
                &mut static_size
            } else {
                &mut instance_size
            };
            let offset = cursor.next_multiple_of(size);
            *cursor = offset + size;
            offsets.push(offset);
        }

        let class = self.registry.insert(Arc::new(Class::from_parts(ClassParts {
            id: self.registry.next_id(),
            descriptor: self.descriptor.into(),
            primitive: Primitive::Not,
            flags: self.flags,
            super_class: self.super_class,
            interfaces: self.interfaces.into(),
            component_type: None,
            instance_size,
            static_size,
            initializer: self.initializer,
        })));

        let fields = self
            .fields
            .into_iter()
            .zip(offsets)
            .map(|((name, field_type, flags), offset)| {
                Arc::new(Field::new(&name, class.clone(), field_type, offset, flags))
            })
            .collect();
        self.registry
            .inner
            .write()
            .fields
            .insert(class.id(), fields);
        class
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestWorld;

    #[test]
    fn field_layout_is_aligned() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let registry = rt.classes();
        let class = registry
            .builder("LLayout;")
            .super_class(&rt.specials().object)
            .field("b", &rt.primitive_class(Primitive::Byte))
            .field("j", &rt.primitive_class(Primitive::Long))
            .field("s", &rt.primitive_class(Primitive::Short))
            .static_field("i", &rt.primitive_class(Primitive::Int))
            .build();

        let offset = |name| registry.find_field(&class, name).map(|f| f.offset());
        assert_eq!(offset("b"), Some(0));
        assert_eq!(offset("j"), Some(8));
        assert_eq!(offset("s"), Some(16));
        assert_eq!(offset("i"), Some(0), "statics have their own storage");
        assert_eq!(class.instance_size(), 18);
        assert_eq!(class.statics().len(), 4);
    }

    #[test]
    fn overrides_share_vtable_slots() {
        let world = TestWorld::new();
        let registry = world.runtime.classes();
        let base_m = registry
            .find_method(&world.base, "m", &world.int_to_int)
            .expect("Base.m");
        let derived_m = registry
            .find_method(&world.derived, "m", &world.int_to_int)
            .expect("Derived.m");
        assert_eq!(base_m.vtable_index(), derived_m.vtable_index());

        let resolved = registry
            .find_virtual_override(&world.derived, &base_m)
            .expect("override");
        assert!(Arc::ptr_eq(&resolved, &derived_m));

        let inherited = registry
            .find_virtual_override(&world.base, &base_m)
            .expect("own method");
        assert!(Arc::ptr_eq(&inherited, &base_m));

        let super_target = registry
            .super_method(&world.derived, &derived_m)
            .expect("super");
        assert!(Arc::ptr_eq(&super_target, &base_m));
    }

    #[test]
    fn array_classes_are_created_on_demand() {
        let world = TestWorld::new();
        let registry = world.runtime.classes();
        let ints = registry.find_class("[[I").expect("array class");
        assert_eq!(ints.pretty_name(), "int[][]");
        let component = ints.component_type().expect("component");
        assert!(Arc::ptr_eq(
            component,
            &registry.find_class("[I").expect("inner array")
        ));
        assert!(world.runtime.specials().object.is_assignable_from(&ints));
        assert!(matches!(
            registry.find_class("LNope;"),
            Err(InvokeError::ClassNotFound(_))
        ));
    }
}
