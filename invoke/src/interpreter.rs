use crate::{Frame, InvokeError, InvokeResult, MethodRef, ObjectRef, Primitive, Runtime, Value};

/// What a method body sees while it runs: its own frame with the arguments
/// starting at `first_arg`, receiver first for instance methods.
pub struct CallContext<'a> {
    pub runtime: &'a Runtime,
    pub method: &'a MethodRef,
    pub frame: &'a mut Frame,
    pub first_arg: usize,
}

impl CallContext<'_> {
    #[must_use]
    pub fn arg(&self, kind: Primitive, slot: usize) -> Value {
        self.frame.read_value(kind, self.first_arg + slot)
    }

    #[must_use]
    pub fn int(&self, slot: usize) -> i32 {
        self.frame.get(self.first_arg + slot) as i32
    }

    #[must_use]
    pub fn long(&self, slot: usize) -> i64 {
        self.frame.get_long(self.first_arg + slot)
    }

    #[must_use]
    pub fn float(&self, slot: usize) -> f32 {
        self.frame.get_float(self.first_arg + slot)
    }

    #[must_use]
    pub fn double(&self, slot: usize) -> f64 {
        self.frame.get_double(self.first_arg + slot)
    }

    #[must_use]
    pub fn reference(&self, slot: usize) -> Option<ObjectRef> {
        self.frame.get_reference(self.first_arg + slot)
    }
}

/// Executes a resolved method on a callee frame that dispatch has already
/// filled in.
pub trait Interpreter: Send + Sync {
    fn perform_call(
        &self,
        rt: &Runtime,
        method: &MethodRef,
        frame: &mut Frame,
        first_arg: usize,
    ) -> InvokeResult<Value>;
}

/// Runs the `fn` bodies attached to methods.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeInterpreter;

impl Interpreter for NativeInterpreter {
    fn perform_call(
        &self,
        rt: &Runtime,
        method: &MethodRef,
        frame: &mut Frame,
        first_arg: usize,
    ) -> InvokeResult<Value> {
        let Some(entry) = method.entry().filter(|_| !method.is_abstract()) else {
            return Err(InvokeError::NoSuchMethod(format!(
                "{} has no body",
                method.pretty_name()
            )));
        };
        log::trace!("calling {}", method.pretty_name());
        entry(&mut CallContext {
            runtime: rt,
            method,
            frame,
            first_arg,
        })
    }
}
