use clap::{Parser as ClapParser, ValueEnum};
use std::{error::Error, process, sync::Arc, thread};

use invoke::{
    AccessMode, CallContext, ClassRef, Frame, InvokeResult, MethodDef, MethodHandle, MethodType,
    ObjectRef, Primitive, RangeOperands, Runtime, RuntimeCreateInfo, Value, VarHandle,
    access_variable, dispatch_call_exact,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// Invoke a virtual handle on a subclass instance
    VirtualDispatch,
    /// Write an int through a big-endian byte array view
    ByteView,
    /// Concurrent get-and-add on a double array element
    DoubleAdd,
    /// Concurrent compare-and-set on an int field
    FieldHandle,
}

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(value_enum, default_value = "virtual-dispatch")]
    scenario: Scenario,

    /// Worker threads for the concurrent scenarios
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Updates per worker thread
    #[arg(long, default_value_t = 1000)]
    iterations: usize,

    /// Log at debug level
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let rt = Runtime::new(RuntimeCreateInfo::default());
    let result = match cli.scenario {
        Scenario::VirtualDispatch => virtual_dispatch(&rt),
        Scenario::ByteView => byte_view(&rt),
        Scenario::DoubleAdd => double_add(&rt, cli.threads, cli.iterations),
        Scenario::FieldHandle => field_handle(&rt, cli.threads, cli.iterations),
    };
    if let Err(err) = result {
        eprintln!("Error running {:?}: {}", cli.scenario, err);
        process::exit(1);
    }
}

/// Lays `args` out in a fresh frame typed by `descriptor`, after `leading`
/// reserved registers.
fn frame_for(
    rt: &Runtime,
    descriptor: &str,
    leading: usize,
    args: &[Value],
) -> InvokeResult<(Frame, Arc<MethodType>)> {
    let callsite = rt.method_type_from_descriptor(descriptor)?;
    let mut frame = Frame::new(leading + callsite.number_of_vregs());
    let mut slot = leading;
    for (ptype, &arg) in callsite.ptypes().iter().zip(args) {
        frame.write_value(ptype.primitive(), slot, arg);
        slot += ptype.primitive().slot_count();
    }
    Ok((frame, callsite))
}

fn access(
    rt: &Runtime,
    handle: ObjectRef,
    mode: AccessMode,
    descriptor: &str,
    args: &[Value],
) -> InvokeResult<Value> {
    let (mut frame, callsite) = frame_for(rt, descriptor, 1, args)?;
    frame.set_reference(0, Some(handle));
    access_variable(rt, &frame, mode, &callsite, &RangeOperands::new(0, frame.len()))
}

fn shape_area(ctx: &mut CallContext<'_>) -> InvokeResult<Value> {
    Ok(Value::I32(ctx.int(1)))
}

fn square_area(ctx: &mut CallContext<'_>) -> InvokeResult<Value> {
    let side = ctx.int(1);
    Ok(Value::I32(side.wrapping_mul(side)))
}

fn virtual_dispatch(rt: &Runtime) -> Result<(), Box<dyn Error>> {
    let registry = rt.classes();
    let int = rt.primitive_class(Primitive::Int);
    let area_type = rt.method_type(&int, &[int.clone()]);

    let shape = registry
        .builder("LShape;")
        .super_class(&rt.specials().object)
        .build();
    let area = registry.define_method(&shape, MethodDef::new("area", area_type.clone()).entry(shape_area));
    let square = registry.builder("LSquare;").super_class(&shape).build();
    registry.define_method(&square, MethodDef::new("area", area_type).entry(square_area));

    let handle = rt.new_method_handle(MethodHandle::virtual_call(rt, &area)?)?;
    let receiver = rt.new_object(&square)?;
    let (frame, callsite) = frame_for(rt, "(LShape;I)I", 0, &[Value::from_ref(receiver), Value::I32(7)])?;
    let result = dispatch_call_exact(
        rt,
        &frame,
        Some(handle),
        &callsite,
        &RangeOperands::new(0, frame.len()),
    )?;
    println!("Shape.area(7) on a Square returned {result:?}");
    Ok(())
}

fn byte_view(rt: &Runtime) -> Result<(), Box<dyn Error>> {
    let bytes = rt.new_byte_array(&[0; 8])?;
    let int = rt.primitive_class(Primitive::Int);
    let big_endian = cfg!(target_endian = "big");
    let handle = rt.new_var_handle(VarHandle::for_byte_array_view(rt, &int, big_endian)?)?;

    access(
        rt,
        handle,
        AccessMode::SetVolatile,
        "([BII)V",
        &[Value::from_ref(bytes), Value::I32(4), Value::I32(0x0102_0304)],
    )?;
    let read = access(rt, handle, AccessMode::Get, "([BI)I", &[Value::from_ref(bytes), Value::I32(4)])?;
    let raw = rt.object(bytes)?.as_array().map(|array| array.data.to_vec());
    println!("stored {read:?}, backing bytes {raw:02x?}");
    Ok(())
}

fn double_add(rt: &Runtime, threads: usize, iterations: usize) -> Result<(), Box<dyn Error>> {
    let double = rt.primitive_class(Primitive::Double);
    let array_class: ClassRef = rt.linker().array_class_of(&double);
    let array = rt.new_array(&double, 1)?;
    let handle = rt.new_var_handle(VarHandle::for_array(rt, &array_class)?)?;

    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let rt = rt.clone();
            thread::spawn(move || -> InvokeResult<()> {
                for _ in 0..iterations {
                    access(
                        &rt,
                        handle,
                        AccessMode::GetAndAdd,
                        "([DID)D",
                        &[Value::from_ref(array), Value::I32(0), Value::F64(0.5)],
                    )?;
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        worker.join().map_err(|_| "worker panicked")??;
    }

    let total = access(rt, handle, AccessMode::GetVolatile, "([DI)D", &[Value::from_ref(array), Value::I32(0)])?;
    println!("{threads} threads x {iterations} adds of 0.5 = {total:?}");
    Ok(())
}

fn field_handle(rt: &Runtime, threads: usize, iterations: usize) -> Result<(), Box<dyn Error>> {
    let int = rt.primitive_class(Primitive::Int);
    let counter = rt
        .classes()
        .builder("LHits;")
        .super_class(&rt.specials().object)
        .field("count", &int)
        .build();
    let field = rt
        .classes()
        .find_field(&counter, "count")
        .ok_or("Hits has no count field")?;
    let object = rt.new_object(&counter)?;
    let handle = rt.new_var_handle(VarHandle::for_field(&field))?;

    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let rt = rt.clone();
            thread::spawn(move || -> InvokeResult<()> {
                let target = Value::from_ref(object);
                for _ in 0..iterations {
                    loop {
                        let seen = access(&rt, handle, AccessMode::GetVolatile, "(LHits;)I", &[target])?;
                        let Value::I32(seen) = seen else { continue };
                        let swapped = access(
                            &rt,
                            handle,
                            AccessMode::CompareAndSet,
                            "(LHits;II)Z",
                            &[target, Value::I32(seen), Value::I32(seen.wrapping_add(1))],
                        )?;
                        if swapped == Value::I32(1) {
                            break;
                        }
                    }
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        worker.join().map_err(|_| "worker panicked")??;
    }

    let count = rt.read_field(Some(object), &field)?;
    log::debug!("{} compare-and-set increments", threads * iterations);
    println!("Hits.count = {count:?}");
    Ok(())
}
