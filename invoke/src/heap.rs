use std::{
    cell::UnsafeCell,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};

use crate::{
    ClassRef, EmulatedStackFrame, InvokeError, InvokeResult, MethodHandle, ObjectRef, Primitive,
    Scalar, Value, VarHandle,
};

/// Zeroed, 8-byte aligned memory whose slots are only ever accessed
/// atomically.
///
/// Backs instance fields, class statics, array elements and direct byte
/// buffers. Every access goes through a [`Scalar`] of the slot's width, so
/// shared references may read and write concurrently.
pub struct RawStorage {
    words: Box<[UnsafeCell<u64>]>,
    len: usize,
}

// SAFETY: all accesses to the cells are atomic
unsafe impl Send for RawStorage {}
// SAFETY: all accesses to the cells are atomic
unsafe impl Sync for RawStorage {}

impl RawStorage {
    #[must_use]
    pub fn new(len: usize) -> Self {
        let words = (0..len.div_ceil(8)).map(|_| UnsafeCell::new(0)).collect();
        Self { words, len }
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let storage = Self::new(bytes.len());
        for (offset, &byte) in bytes.iter().enumerate() {
            storage.byte(offset).store(byte, Ordering::Relaxed);
        }
        storage
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.words.as_ptr()).cast::<u8>()
    }

    /// Offsets are relative to an 8-byte aligned base, so alignment only
    /// depends on the offset.
    #[inline]
    #[must_use]
    pub fn is_aligned(offset: usize, size: usize) -> bool {
        offset % size == 0
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, offset: usize, size: usize) -> bool {
        offset.checked_add(size).is_some_and(|end| end <= self.len)
    }

    fn check_range(&self, offset: usize, size: usize) -> InvokeResult<()> {
        if self.contains(offset, size) {
            Ok(())
        } else {
            Err(InvokeError::index_out_of_bounds(
                i64::try_from(offset).unwrap_or(i64::MAX),
                i64::try_from(self.len).unwrap_or(i64::MAX),
            ))
        }
    }

    /// Pointer to an aligned, in-bounds slot of `T`.
    #[inline]
    pub fn slot<T: Scalar>(&self, offset: usize) -> InvokeResult<*mut T> {
        self.check_range(offset, T::SIZE)?;
        if !Self::is_aligned(offset, T::SIZE) {
            return Err(InvokeError::illegal_state(format!(
                "misaligned {}-byte slot at {offset}",
                T::SIZE
            )));
        }
        // SAFETY: bounds checked above
        Ok(unsafe { self.base().add(offset).cast::<T>() })
    }

    #[inline]
    pub fn load<T: Scalar>(&self, offset: usize, order: Ordering) -> InvokeResult<T> {
        let ptr = self.slot(offset)?;
        // SAFETY: `slot` checked bounds and alignment
        Ok(unsafe { T::load(ptr, order) })
    }

    #[inline]
    pub fn store<T: Scalar>(&self, offset: usize, value: T, order: Ordering) -> InvokeResult<()> {
        let ptr = self.slot(offset)?;
        // SAFETY: `slot` checked bounds and alignment
        unsafe { T::store(ptr, value, order) };
        Ok(())
    }

    /// Only called with offsets below `len`.
    fn byte(&self, offset: usize) -> &AtomicU8 {
        debug_assert!(offset < self.len);
        // SAFETY: in bounds, AtomicU8 has no alignment requirement
        unsafe { AtomicU8::from_ptr(self.base().add(offset)) }
    }

    /// Copies bytes out one at a time; used for unaligned plain accesses.
    pub fn read_bytes(&self, offset: usize, out: &mut [u8]) -> InvokeResult<()> {
        self.check_range(offset, out.len())?;
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.byte(offset + i).load(Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> InvokeResult<()> {
        self.check_range(offset, bytes.len())?;
        for (i, &byte) in bytes.iter().enumerate() {
            self.byte(offset + i).store(byte, Ordering::Relaxed);
        }
        Ok(())
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        (0..self.len)
            .map(|offset| self.byte(offset).load(Ordering::Relaxed))
            .collect()
    }

    /// Reads a slot of `kind` and normalizes it into a [`Value`].
    pub fn read_value(&self, kind: Primitive, offset: usize, order: Ordering) -> InvokeResult<Value> {
        let bits = match kind {
            Primitive::Boolean => self.load::<u8>(offset, order)?.to_bits(),
            Primitive::Byte => self.load::<i8>(offset, order)?.to_bits(),
            Primitive::Char => self.load::<u16>(offset, order)?.to_bits(),
            Primitive::Short => self.load::<i16>(offset, order)?.to_bits(),
            Primitive::Int | Primitive::Float => self.load::<i32>(offset, order)?.to_bits(),
            Primitive::Long | Primitive::Double => self.load::<i64>(offset, order)?.to_bits(),
            Primitive::Not => self.load::<u32>(offset, order)?.to_bits(),
            Primitive::Void => 0,
        };
        Ok(Value::from_raw(kind, bits))
    }

    /// Writes `value` truncated to the width of `kind`. Reference barriers
    /// are the caller's business.
    pub fn write_value(
        &self,
        kind: Primitive,
        offset: usize,
        value: Value,
        order: Ordering,
    ) -> InvokeResult<()> {
        let bits = value.raw_bits();
        match kind {
            Primitive::Boolean => self.store(offset, u8::from(value.as_bool()), order),
            Primitive::Byte => self.store(offset, i8::from_bits(bits), order),
            Primitive::Char => self.store(offset, u16::from_bits(bits), order),
            Primitive::Short => self.store(offset, i16::from_bits(bits), order),
            Primitive::Int | Primitive::Float => self.store(offset, i32::from_bits(bits), order),
            Primitive::Long | Primitive::Double => self.store(offset, i64::from_bits(bits), order),
            Primitive::Not => self.store(offset, u32::from_bits(bits), order),
            Primitive::Void => Ok(()),
        }
    }
}

impl std::fmt::Debug for RawStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawStorage").field("len", &self.len).finish()
    }
}

#[derive(Debug)]
pub struct ArrayData {
    pub component: Primitive,
    pub length: usize,
    pub data: RawStorage,
}

impl ArrayData {
    #[must_use]
    pub fn element_offset(&self, index: usize) -> usize {
        index * self.component.component_size()
    }
}

#[derive(Debug)]
pub enum BufferStorage {
    /// Wraps a byte array starting at `offset`.
    Heap { array: ObjectRef, offset: usize },
    /// Owns memory outside any object; indices start at 0.
    Direct(RawStorage),
}

#[derive(Debug)]
pub struct ByteBuffer {
    pub storage: BufferStorage,
    /// Exclusive end, in the same coordinates as the offset.
    pub limit: usize,
    pub read_only: bool,
}

impl ByteBuffer {
    #[must_use]
    pub fn offset(&self) -> usize {
        match self.storage {
            BufferStorage::Heap { offset, .. } => offset,
            BufferStorage::Direct(_) => 0,
        }
    }
}

#[derive(Debug)]
pub enum ObjectBody {
    Instance(RawStorage),
    Array(ArrayData),
    String(Box<str>),
    MethodHandle(Arc<MethodHandle>),
    VarHandle(Arc<VarHandle>),
    StackFrame(Mutex<EmulatedStackFrame>),
    ByteBuffer(ByteBuffer),
}

#[derive(Debug)]
pub struct HeapObject {
    pub class: ClassRef,
    pub body: ObjectBody,
}

impl HeapObject {
    #[must_use]
    pub fn fields(&self) -> Option<&RawStorage> {
        match &self.body {
            ObjectBody::Instance(storage) => Some(storage),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayData> {
        match &self.body {
            ObjectBody::Array(array) => Some(array),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.body {
            ObjectBody::String(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_method_handle(&self) -> Option<&Arc<MethodHandle>> {
        match &self.body {
            ObjectBody::MethodHandle(handle) => Some(handle),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_var_handle(&self) -> Option<&Arc<VarHandle>> {
        match &self.body {
            ObjectBody::VarHandle(handle) => Some(handle),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_stack_frame(&self) -> Option<&Mutex<EmulatedStackFrame>> {
        match &self.body {
            ObjectBody::StackFrame(frame) => Some(frame),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_byte_buffer(&self) -> Option<&ByteBuffer> {
        match &self.body {
            ObjectBody::ByteBuffer(buffer) => Some(buffer),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct HeapCreateInfo {
    /// objects to reserve room for up front
    pub initial_objects: Option<usize>,
    /// hard cap on live objects, the heap never frees
    pub max_objects: Option<usize>,
}

#[derive(Debug)]
pub struct HeapSettings {
    initial_objects: usize,
    max_objects: usize,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            initial_objects: 1024,
            max_objects: u32::MAX as usize - 1,
        }
    }
}

/// Object table. References are indices offset by one so that `0` stays
/// free for null. Objects are never freed.
#[derive(Debug)]
pub struct Heap {
    objects: RwLock<Vec<Arc<HeapObject>>>,
    settings: HeapSettings,
}

impl Heap {
    #[must_use]
    pub fn new(info: HeapCreateInfo) -> Self {
        let mut settings = HeapSettings::default();
        info.initial_objects
            .inspect(|&val| settings.initial_objects = val);
        info.max_objects.inspect(|&val| settings.max_objects = val);

        Self {
            objects: RwLock::new(Vec::with_capacity(settings.initial_objects)),
            settings,
        }
    }

    pub fn allocate(&self, class: ClassRef, body: ObjectBody) -> InvokeResult<ObjectRef> {
        let mut objects = self.objects.write();
        if objects.len() >= self.settings.max_objects {
            return Err(InvokeError::illegal_state("object table exhausted"));
        }
        objects.push(Arc::new(HeapObject { class, body }));
        u32::try_from(objects.len())
            .ok()
            .and_then(ObjectRef::from_raw)
            .ok_or_else(|| InvokeError::illegal_state("object table exhausted"))
    }

    /// Object behind `reference`; fails for references this heap never
    /// handed out.
    pub fn get(&self, reference: ObjectRef) -> InvokeResult<Arc<HeapObject>> {
        let objects = self.objects.read();
        (reference.raw() as usize)
            .checked_sub(1)
            .and_then(|index| objects.get(index))
            .cloned()
            .ok_or_else(|| {
                InvokeError::illegal_state(format!(
                    "reference {} is not an object of this heap",
                    reference.raw()
                ))
            })
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }
}

/// Owner of a reference slot about to be overwritten.
#[derive(Debug, Clone)]
pub enum FieldHolder {
    Object(ObjectRef),
    Class(ClassRef),
}

/// Hook run before every store of a reference into the heap, including
/// compare-and-swap and get-and-set.
pub trait ReferenceBarrier: Send + Sync {
    fn pre_write_barrier(&self, holder: &FieldHolder, offset: usize);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoBarrier;

impl ReferenceBarrier for NoBarrier {
    #[inline]
    fn pre_write_barrier(&self, _holder: &FieldHolder, _offset: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_is_zeroed_and_typed() {
        let storage = RawStorage::new(16);
        let read = |kind, offset, order| storage.read_value(kind, offset, order).expect("read");
        assert_eq!(read(Primitive::Long, 8, Ordering::Relaxed), Value::I64(0));

        storage
            .write_value(Primitive::Short, 2, Value::I32(-2), Ordering::Relaxed)
            .expect("write");
        assert_eq!(read(Primitive::Short, 2, Ordering::Relaxed), Value::I32(-2));
        assert_eq!(
            read(Primitive::Char, 2, Ordering::Relaxed),
            Value::I32(0xfffe),
            "same bits read back unsigned"
        );

        storage
            .write_value(Primitive::Double, 8, Value::F64(2.5), Ordering::SeqCst)
            .expect("write");
        assert_eq!(read(Primitive::Double, 8, Ordering::SeqCst), Value::F64(2.5));
    }

    #[test]
    fn bytes_round_trip_unaligned() {
        let storage = RawStorage::new(8);
        storage.write_bytes(3, &[1, 2, 3]).expect("write");
        let mut out = [0u8; 3];
        storage.read_bytes(3, &mut out).expect("read");
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(storage.to_vec(), vec![0, 0, 0, 1, 2, 3, 0, 0]);
    }

    #[test]
    fn bounds() {
        let storage = RawStorage::new(6);
        assert!(storage.contains(2, 4));
        assert!(!storage.contains(4, 4));
        assert!(!storage.contains(usize::MAX, 2));
        assert!(RawStorage::is_aligned(4, 4));
        assert!(!RawStorage::is_aligned(6, 4));
    }

    #[test]
    fn bad_slots_are_errors() {
        let storage = RawStorage::new(8);
        assert!(matches!(
            storage.load::<i32>(2, Ordering::Relaxed),
            Err(InvokeError::IllegalState(message)) if message.contains("misaligned")
        ));
        assert!(matches!(
            storage.load::<i64>(8, Ordering::Relaxed),
            Err(InvokeError::IndexOutOfBounds { index: 8, length: 8 })
        ));
        assert!(matches!(
            storage.store::<i32>(usize::MAX - 1, 1, Ordering::Relaxed),
            Err(InvokeError::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            storage.write_bytes(6, &[1, 2, 3]),
            Err(InvokeError::IndexOutOfBounds { index: 6, length: 8 })
        ));
        let mut out = [0u8; 2];
        assert!(storage.read_bytes(7, &mut out).is_err());
        assert_eq!(storage.to_vec(), vec![0; 8], "failed writes leave storage untouched");
    }

    #[test]
    fn foreign_references_are_errors() {
        let heap = Heap::new(HeapCreateInfo::default());
        let other = Heap::new(HeapCreateInfo::default());
        let class = crate::Runtime::default().specials().object.clone();
        let reference = other
            .allocate(class.clone(), ObjectBody::Instance(RawStorage::new(0)))
            .expect("allocate");
        assert!(matches!(heap.get(reference), Err(InvokeError::IllegalState(_))));

        let own = heap
            .allocate(class, ObjectBody::Instance(RawStorage::new(0)))
            .expect("allocate");
        assert!(heap.get(own).is_ok());
        assert_eq!(heap.object_count(), 1);
    }
}
