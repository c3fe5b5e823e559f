use std::ops::{Deref, DerefMut};

use crate::{MethodRef, ObjectRef, Primitive, Value, bits_to_double, bits_to_float};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Active,
    /// Arguments are still being written; the frame must not be walked.
    UnderConstruction,
}

/// Register window of one activation.
///
/// Every slot is 32 bits wide, long and double take two consecutive slots
/// with the low word first. `refs` shadows the slots: a slot holds a
/// reference only while both agree on the same id.
#[derive(Debug, Clone)]
pub struct Frame {
    vregs: Box<[u32]>,
    refs: Box<[Option<ObjectRef>]>,
    method: Option<MethodRef>,
    state: FrameState,
}

impl Frame {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            vregs: vec![0; size].into_boxed_slice(),
            refs: vec![None; size].into_boxed_slice(),
            method: None,
            state: FrameState::Active,
        }
    }

    #[must_use]
    pub fn for_method(method: &MethodRef, size: usize) -> Self {
        let mut frame = Self::new(size);
        frame.method = Some(method.clone());
        frame
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.vregs.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vregs.is_empty()
    }

    #[must_use]
    pub fn method(&self) -> Option<&MethodRef> {
        self.method.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Marks the frame as under construction until the guard drops.
    pub fn begin_construction(&mut self) -> ConstructionGuard<'_> {
        self.state = FrameState::UnderConstruction;
        ConstructionGuard { frame: self }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> u32 {
        self.vregs[index]
    }

    #[inline]
    pub fn set(&mut self, index: usize, value: u32) {
        self.vregs[index] = value;
        self.refs[index] = None;
    }

    #[must_use]
    pub fn get_long(&self, index: usize) -> i64 {
        let low = u64::from(self.vregs[index]);
        let high = u64::from(self.vregs[index + 1]);
        ((high << 32) | low) as i64
    }

    pub fn set_long(&mut self, index: usize, value: i64) {
        self.set(index, value as u32);
        self.set(index + 1, (value >> 32) as u32);
    }

    #[must_use]
    pub fn get_float(&self, index: usize) -> f32 {
        bits_to_float(self.get(index))
    }

    pub fn set_float(&mut self, index: usize, value: f32) {
        self.set(index, value.to_bits());
    }

    #[must_use]
    pub fn get_double(&self, index: usize) -> f64 {
        bits_to_double(self.get_long(index) as u64)
    }

    pub fn set_double(&mut self, index: usize, value: f64) {
        self.set_long(index, value.to_bits() as i64);
    }

    #[must_use]
    pub fn get_reference(&self, index: usize) -> Option<ObjectRef> {
        self.refs[index].filter(|r| r.raw() == self.vregs[index])
    }

    pub fn set_reference(&mut self, index: usize, value: Option<ObjectRef>) {
        self.vregs[index] = ObjectRef::encode(value);
        self.refs[index] = value;
    }

    #[must_use]
    pub fn holds_reference(&self, index: usize) -> bool {
        self.get_reference(index).is_some()
    }

    /// Reads the slot(s) at `index` as `kind`.
    #[must_use]
    pub fn read_value(&self, kind: Primitive, index: usize) -> Value {
        match kind {
            Primitive::Not => Value::Ref(self.get_reference(index)),
            Primitive::Long | Primitive::Double => {
                Value::from_raw(kind, self.get_long(index) as u64)
            }
            Primitive::Void => Value::I32(0),
            _ => Value::from_raw(kind, u64::from(self.get(index))),
        }
    }

    pub fn write_value(&mut self, kind: Primitive, index: usize, value: Value) {
        match kind {
            Primitive::Not => self.set_reference(index, value.as_reference()),
            Primitive::Long | Primitive::Double => self.set_long(index, value.raw_bits() as i64),
            Primitive::Void => {}
            _ => self.set(index, value.as_i32() as u32),
        }
    }
}

pub struct ConstructionGuard<'a> {
    frame: &'a mut Frame,
}

impl Deref for ConstructionGuard<'_> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        self.frame
    }
}

impl DerefMut for ConstructionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Frame {
        self.frame
    }
}

impl Drop for ConstructionGuard<'_> {
    fn drop(&mut self) {
        self.frame.state = FrameState::Active;
    }
}

/// Maps argument positions to caller registers.
pub trait Operands {
    fn len(&self) -> usize;

    /// Register holding argument slot `index`.
    fn operand(&self, index: usize) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consecutive registers, as used by range call forms.
#[derive(Debug, Clone, Copy)]
pub struct RangeOperands {
    first: usize,
    count: usize,
}

impl RangeOperands {
    #[must_use]
    pub fn new(first: usize, count: usize) -> Self {
        Self { first, count }
    }
}

impl Operands for RangeOperands {
    fn len(&self) -> usize {
        self.count
    }

    fn operand(&self, index: usize) -> usize {
        debug_assert!(index < self.count);
        self.first + index
    }
}

pub const MAX_VAR_ARGS: usize = 5;

/// Explicit register list of a fixed-arity call form.
#[derive(Debug, Clone, Copy)]
pub struct VarArgsOperands {
    registers: [usize; MAX_VAR_ARGS],
    count: usize,
}

impl VarArgsOperands {
    /// `None` when more than [`MAX_VAR_ARGS`] registers are given.
    #[must_use]
    pub fn new(registers: &[usize]) -> Option<Self> {
        if registers.len() > MAX_VAR_ARGS {
            return None;
        }
        let mut fixed = [0; MAX_VAR_ARGS];
        fixed[..registers.len()].copy_from_slice(registers);
        Some(Self {
            registers: fixed,
            count: registers.len(),
        })
    }
}

impl Operands for VarArgsOperands {
    fn len(&self) -> usize {
        self.count
    }

    fn operand(&self, index: usize) -> usize {
        self.registers[..self.count][index]
    }
}

/// Hides operand 0, the handle a var handle or invoker was called through.
pub struct NoReceiverOperands<'a> {
    inner: &'a dyn Operands,
}

impl<'a> NoReceiverOperands<'a> {
    #[must_use]
    pub fn new(inner: &'a dyn Operands) -> Self {
        Self { inner }
    }
}

impl Operands for NoReceiverOperands<'_> {
    fn len(&self) -> usize {
        self.inner.len().saturating_sub(1)
    }

    fn operand(&self, index: usize) -> usize {
        self.inner.operand(index + 1)
    }
}

/// Sequential typed reads from the caller's operands.
pub struct FrameGetter<'a> {
    frame: &'a Frame,
    operands: &'a dyn Operands,
    index: usize,
}

impl<'a> FrameGetter<'a> {
    #[must_use]
    pub fn new(frame: &'a Frame, operands: &'a dyn Operands) -> Self {
        Self {
            frame,
            operands,
            index: 0,
        }
    }

    fn next(&mut self) -> usize {
        let register = self.operands.operand(self.index);
        self.index += 1;
        register
    }

    pub fn get(&mut self) -> u32 {
        let register = self.next();
        self.frame.get(register)
    }

    pub fn get_long(&mut self) -> i64 {
        let low = u64::from(self.get());
        let high = u64::from(self.get());
        ((high << 32) | low) as i64
    }

    pub fn get_reference(&mut self) -> Option<ObjectRef> {
        let register = self.next();
        self.frame.get_reference(register)
    }

    pub fn read(&mut self, kind: Primitive) -> Value {
        match kind {
            Primitive::Not => Value::Ref(self.get_reference()),
            Primitive::Long | Primitive::Double => Value::from_raw(kind, self.get_long() as u64),
            Primitive::Void => Value::I32(0),
            _ => Value::from_raw(kind, u64::from(self.get())),
        }
    }

    /// Operand slots consumed so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.index
    }
}

/// Sequential typed writes into a callee frame.
pub struct FrameSetter<'a> {
    frame: &'a mut Frame,
    index: usize,
}

impl<'a> FrameSetter<'a> {
    #[must_use]
    pub fn new(frame: &'a mut Frame, first_dest: usize) -> Self {
        Self {
            frame,
            index: first_dest,
        }
    }

    pub fn set(&mut self, value: u32) {
        self.frame.set(self.index, value);
        self.index += 1;
    }

    pub fn set_long(&mut self, value: i64) {
        self.frame.set_long(self.index, value);
        self.index += 2;
    }

    pub fn set_reference(&mut self, value: Option<ObjectRef>) {
        self.frame.set_reference(self.index, value);
        self.index += 1;
    }

    pub fn write(&mut self, kind: Primitive, value: Value) {
        self.frame.write_value(kind, self.index, value);
        self.index += kind.slot_count();
    }
}

/// Copies the caller's operands verbatim into `callee` starting at
/// `first_dest`, keeping references intact.
pub fn copy_arguments(caller: &Frame, operands: &dyn Operands, callee: &mut Frame, first_dest: usize) {
    for i in 0..operands.len() {
        let source = operands.operand(i);
        let dest = first_dest + i;
        match caller.get_reference(source) {
            Some(reference) => callee.set_reference(dest, Some(reference)),
            None => callee.set(dest, caller.get(source)),
        }
    }
}
