use std::sync::Arc;

use crate::{
    Frame, FrameGetter, FrameSetter, InvokeError, InvokeResult, MethodType, ObjectRef, Operands,
    RangeOperands, Runtime, Value, convert::perform_conversions,
};

/// An argument list packed into one object, handed to transformers so they
/// can see every argument of a call at once.
#[derive(Debug, Clone)]
pub struct EmulatedStackFrame {
    method_type: Arc<MethodType>,
    slots: Frame,
    return_value: Value,
}

impl EmulatedStackFrame {
    /// Zeroed arguments of `method_type`.
    #[must_use]
    pub fn new(method_type: Arc<MethodType>) -> Self {
        let slots = Frame::new(method_type.number_of_vregs());
        let return_value = Value::zero(method_type.rtype().primitive());
        Self {
            method_type,
            slots,
            return_value,
        }
    }

    /// Packs the operands of a call typed `callsite`, converting each to the
    /// matching parameter of `frame_type`.
    pub fn from_frame_and_args(
        rt: &Runtime,
        callsite: &MethodType,
        frame_type: Arc<MethodType>,
        caller: &Frame,
        operands: &dyn Operands,
    ) -> InvokeResult<Self> {
        let mut frame = Self::new(frame_type);
        let mut getter = FrameGetter::new(caller, operands);
        let mut setter = FrameSetter::new(&mut frame.slots, 0);
        perform_conversions(rt, callsite, &frame.method_type, &mut getter, &mut setter)?;
        Ok(frame)
    }

    /// Unpacks the arguments into `callee` starting at `first_dest`,
    /// converting them to `callee_type`.
    pub fn write_to_frame(
        &self,
        rt: &Runtime,
        callee_type: &MethodType,
        callee: &mut Frame,
        first_dest: usize,
    ) -> InvokeResult<()> {
        let operands = RangeOperands::new(0, self.slots.len());
        let mut getter = FrameGetter::new(&self.slots, &operands);
        let mut setter = FrameSetter::new(callee, first_dest);
        perform_conversions(rt, &self.method_type, callee_type, &mut getter, &mut setter)
    }

    #[must_use]
    pub fn method_type(&self) -> &Arc<MethodType> {
        &self.method_type
    }

    fn slot_of(&self, index: usize) -> InvokeResult<usize> {
        if index >= self.method_type.parameter_count() {
            return Err(InvokeError::index_out_of_bounds(
                index as i64,
                self.method_type.parameter_count() as i64,
            ));
        }
        Ok(self.method_type.ptypes()[..index]
            .iter()
            .map(|ptype| ptype.primitive().slot_count())
            .sum())
    }

    pub fn argument(&self, index: usize) -> InvokeResult<Value> {
        let slot = self.slot_of(index)?;
        let kind = self.method_type.ptype(index).primitive();
        Ok(self.slots.read_value(kind, slot))
    }

    /// Replaces an argument in place; the value must already have the
    /// parameter's kind.
    pub fn set_argument(&mut self, index: usize, value: Value) -> InvokeResult<()> {
        let slot = self.slot_of(index)?;
        let kind = self.method_type.ptype(index).primitive();
        self.slots.write_value(kind, slot, value);
        Ok(())
    }

    /// First argument as a reference, for records whose first parameter is
    /// a receiver.
    #[must_use]
    pub fn receiver(&self) -> Option<ObjectRef> {
        if self.method_type.parameter_count() == 0 {
            return None;
        }
        self.slots.get_reference(0)
    }

    #[must_use]
    pub fn return_value(&self) -> Value {
        self.return_value
    }

    pub fn set_return_value(&mut self, value: Value) {
        self.return_value = value;
    }
}
