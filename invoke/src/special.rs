use std::sync::Arc;

use crate::{Class, ClassFlags, ClassRef, ClassRegistry, FieldFlags, Primitive};

/// Offset of the `value` field in every box.
pub const BOXED_VALUE_OFFSET: usize = 0;

/// Classes the dispatch and access paths need to recognize by identity.
#[derive(Debug)]
pub struct SpecialClasses {
    pub object: ClassRef,
    pub number: ClassRef,
    pub string: ClassRef,
    pub method_handle: ClassRef,
    pub var_handle: ClassRef,
    pub emulated_stack_frame: ClassRef,
    pub byte_buffer: ClassRef,
    primitives: Vec<ClassRef>,
    boxes: Vec<Option<ClassRef>>,
}

fn kind_index(kind: Primitive) -> usize {
    kind as usize
}

impl SpecialClasses {
    /// Defines the well-known classes in `registry`.
    pub fn bootstrap(registry: &ClassRegistry) -> Self {
        let object = registry.builder("Ljava/lang/Object;").build();
        let number = registry
            .builder("Ljava/lang/Number;")
            .super_class(&object)
            .flags(ClassFlags::ABSTRACT)
            .build();

        let kinds = [
            Primitive::Not,
            Primitive::Boolean,
            Primitive::Byte,
            Primitive::Char,
            Primitive::Short,
            Primitive::Int,
            Primitive::Long,
            Primitive::Float,
            Primitive::Double,
            Primitive::Void,
        ];
        let primitives = kinds
            .iter()
            .map(|&kind| match kind {
                Primitive::Not => object.clone(),
                kind => registry.define_primitive(kind),
            })
            .collect::<Vec<_>>();

        let boxes = kinds
            .iter()
            .map(|&kind| {
                let descriptor = kind.boxed_descriptor()?;
                let super_class = if kind.is_numeric() && kind != Primitive::Char {
                    &number
                } else {
                    &object
                };
                Some(
                    registry
                        .builder(descriptor)
                        .super_class(super_class)
                        .flags(ClassFlags::FINAL)
                        .field_with("value", &primitives[kind_index(kind)], FieldFlags::FINAL)
                        .build(),
                )
            })
            .collect();

        let leaf = |descriptor: &str, flags: ClassFlags| {
            registry
                .builder(descriptor)
                .super_class(&object)
                .flags(flags)
                .build()
        };

        Self {
            string: leaf("Ljava/lang/String;", ClassFlags::FINAL | ClassFlags::STRING),
            method_handle: leaf("Ljava/lang/invoke/MethodHandle;", ClassFlags::ABSTRACT),
            var_handle: leaf("Ljava/lang/invoke/VarHandle;", ClassFlags::empty()),
            emulated_stack_frame: leaf("Ldalvik/system/EmulatedStackFrame;", ClassFlags::FINAL),
            byte_buffer: leaf("Ljava/nio/ByteBuffer;", ClassFlags::empty()),
            object,
            number,
            primitives,
            boxes,
        }
    }

    /// Class standing for `kind` in a signature; references map to Object.
    #[must_use]
    pub fn primitive(&self, kind: Primitive) -> &ClassRef {
        &self.primitives[kind_index(kind)]
    }

    #[must_use]
    pub fn boxed(&self, kind: Primitive) -> Option<&ClassRef> {
        self.boxes[kind_index(kind)].as_ref()
    }

    /// Kind wrapped by `class` if it is one of the boxes.
    #[must_use]
    pub fn unboxed_kind(&self, class: &Class) -> Option<Primitive> {
        Primitive::PRIMITIVES.into_iter().find(|&kind| {
            self.boxed(kind)
                .is_some_and(|boxed| std::ptr::eq(Arc::as_ptr(boxed), class))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxes_know_their_kind() {
        let registry = ClassRegistry::new();
        let specials = SpecialClasses::bootstrap(&registry);
        for kind in Primitive::PRIMITIVES {
            let boxed = specials.boxed(kind).expect("every primitive has a box");
            assert_eq!(specials.unboxed_kind(boxed), Some(kind), "{kind}");
            let value = registry.find_field(boxed, "value").expect("value field");
            assert_eq!(value.offset(), BOXED_VALUE_OFFSET);
            assert_eq!(value.kind(), kind);
        }
        assert_eq!(specials.unboxed_kind(&specials.number), None);
        assert!(specials.boxed(Primitive::Void).is_none());
    }

    #[test]
    fn numeric_boxes_extend_number() {
        let registry = ClassRegistry::new();
        let specials = SpecialClasses::bootstrap(&registry);
        let integer = specials.boxed(Primitive::Int).expect("Integer");
        let character = specials.boxed(Primitive::Char).expect("Character");
        assert!(specials.number.is_assignable_from(integer));
        assert!(!specials.number.is_assignable_from(character));
        assert!(specials.object.is_assignable_from(character));
    }
}
