//! Class fixtures shared by the unit tests.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::{
    CallContext, ClassRef, FieldHolder, FieldRef, InvokeError, InvokeResult, MethodDef,
    MethodFlags, MethodRef, MethodType, Primitive, ReferenceBarrier, Runtime, RuntimeCreateInfo,
    Value,
};

#[derive(Default)]
struct CountingBarrier {
    hits: AtomicUsize,
}

impl ReferenceBarrier for CountingBarrier {
    fn pre_write_barrier(&self, _holder: &FieldHolder, _offset: usize) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }
}

/// `Base.m(I)I`, overridden by `Derived`; `Point` with two int fields, a
/// string field and a constructor; `Counter` with a lazily initialized
/// static; a string constructor backed by a factory; and a transformer
/// that sums its packed arguments.
pub(crate) struct TestWorld {
    pub runtime: Runtime,
    pub int_to_int: Arc<MethodType>,
    pub base: ClassRef,
    pub derived: ClassRef,
    pub base_m: MethodRef,
    pub derived_m: MethodRef,
    pub point: ClassRef,
    pub point_x: FieldRef,
    pub point_y: FieldRef,
    pub point_name: FieldRef,
    pub point_init: MethodRef,
    pub counter: ClassRef,
    pub counter_total: FieldRef,
    pub string_init: MethodRef,
    pub sum_transform: MethodRef,
    barrier: Option<Arc<CountingBarrier>>,
}

fn base_m(ctx: &mut CallContext<'_>) -> InvokeResult<Value> {
    Ok(Value::I32(ctx.int(1).wrapping_add(1)))
}

fn derived_m(ctx: &mut CallContext<'_>) -> InvokeResult<Value> {
    Ok(Value::I32(ctx.int(1).wrapping_mul(2)))
}

fn field_of(rt: &Runtime, class: &ClassRef, name: &str) -> InvokeResult<FieldRef> {
    rt.classes()
        .find_field(class, name)
        .ok_or_else(|| InvokeError::illegal_state(format!("{} has no field {name}", class.pretty_name())))
}

fn point_init(ctx: &mut CallContext<'_>) -> InvokeResult<Value> {
    let class = ctx.method.declaring_class();
    let this = ctx.reference(0);
    let x = field_of(ctx.runtime, class, "x")?;
    let y = field_of(ctx.runtime, class, "y")?;
    ctx.runtime.write_field(this, &x, Value::I32(ctx.int(1)))?;
    ctx.runtime.write_field(this, &y, Value::I32(ctx.int(2)))?;
    Ok(Value::zero(Primitive::Void))
}

fn counter_init(rt: &Runtime, class: &ClassRef) -> InvokeResult<()> {
    let total = field_of(rt, class, "total")?;
    rt.write_field(None, &total, Value::I32(100))
}

fn new_string_from_string(ctx: &mut CallContext<'_>) -> InvokeResult<Value> {
    let source = ctx
        .reference(0)
        .ok_or_else(|| InvokeError::null_pointer("string source is null"))?;
    let text = ctx
        .runtime
        .string_value(source)
        .ok_or_else(|| InvokeError::illegal_state("not a string"))?;
    Ok(Value::from_ref(ctx.runtime.new_string(&text)?))
}

fn sum_transform(ctx: &mut CallContext<'_>) -> InvokeResult<Value> {
    let record = ctx
        .reference(1)
        .ok_or_else(|| InvokeError::null_pointer("no stack frame"))?;
    let object = ctx.runtime.object(record)?;
    let mut record = object
        .as_stack_frame()
        .ok_or_else(|| InvokeError::illegal_state("not a stack frame"))?
        .lock();
    let mut sum = 0i64;
    for index in 0..record.method_type().parameter_count() {
        sum += match record.argument(index)? {
            Value::I32(v) => i64::from(v),
            Value::I64(v) => v,
            other => return Err(InvokeError::illegal_state(format!("cannot sum {other:?}"))),
        };
    }
    let kind = record.method_type().rtype().primitive();
    record.set_return_value(Value::from_raw(kind, sum as u64));
    Ok(Value::zero(Primitive::Void))
}

impl TestWorld {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Same world with a barrier that counts reference writes.
    pub fn with_counting_barrier() -> Self {
        Self::build(Some(Arc::new(CountingBarrier::default())))
    }

    pub fn barrier_hits(&self) -> usize {
        self.barrier
            .as_ref()
            .map_or(0, |barrier| barrier.hits.load(Ordering::Relaxed))
    }

    fn build(barrier: Option<Arc<CountingBarrier>>) -> Self {
        let runtime = Runtime::new(RuntimeCreateInfo {
            barrier: barrier
                .clone()
                .map(|barrier| barrier as Arc<dyn ReferenceBarrier>),
            ..Default::default()
        });
        let rt = &runtime;
        let registry = rt.classes();
        let specials = rt.specials();
        let int = rt.primitive_class(Primitive::Int);
        let void = rt.primitive_class(Primitive::Void);

        let int_to_int = rt.method_type(&int, &[int.clone()]);
        let base = registry.builder("LBase;").super_class(&specials.object).build();
        let base_m = registry.define_method(&base, MethodDef::new("m", int_to_int.clone()).entry(base_m));
        let derived = registry.builder("LDerived;").super_class(&base).build();
        let derived_m =
            registry.define_method(&derived, MethodDef::new("m", int_to_int.clone()).entry(derived_m));

        let point = registry
            .builder("LPoint;")
            .super_class(&specials.object)
            .field("x", &int)
            .field("y", &int)
            .field("name", &specials.string)
            .build();
        let point_init = registry.define_method(
            &point,
            MethodDef::new("<init>", rt.method_type(&void, &[int.clone(), int.clone()]))
                .flags(MethodFlags::CONSTRUCTOR)
                .entry(point_init),
        );

        let counter = registry
            .builder("LCounter;")
            .super_class(&specials.object)
            .static_field("total", &int)
            .initializer(counter_init)
            .build();

        let string = &specials.string;
        let string_init = registry.define_method(
            string,
            MethodDef::new("<init>", rt.method_type(&void, &[string.clone()]))
                .flags(MethodFlags::CONSTRUCTOR),
        );
        let factory = registry.define_method(
            string,
            MethodDef::new("newStringFromString", rt.method_type(string, &[string.clone()]))
                .flags(MethodFlags::STATIC)
                .entry(new_string_from_string),
        );
        registry.register_string_factory(&string_init, &factory);

        let sum_transform = registry.define_method(
            &specials.method_handle,
            MethodDef::new(
                "transformInternal",
                rt.method_type(&void, &[specials.emulated_stack_frame.clone()]),
            )
            .entry(sum_transform),
        );

        let find = |class: &ClassRef, name: &str| {
            registry
                .find_field(class, name)
                .unwrap_or_else(|| panic!("missing field {name}"))
        };
        Self {
            point_x: find(&point, "x"),
            point_y: find(&point, "y"),
            point_name: find(&point, "name"),
            counter_total: find(&counter, "total"),
            runtime: runtime.clone(),
            int_to_int,
            base,
            derived,
            base_m,
            derived_m,
            point,
            point_init,
            counter,
            string_init,
            sum_transform,
            barrier,
        }
    }
}
